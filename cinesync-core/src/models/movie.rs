use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::id::{MovieId, RoomId, UserId};
use crate::{Error, Result};

/// Vendor-specific locators for third-party media sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vendor", rename_all = "lowercase")]
pub enum VendorInfo {
    Bilibili(BilibiliSource),
    Alist(AlistSource),
    Emby(EmbySource),
}

impl VendorInfo {
    #[must_use]
    pub fn backend(&self) -> &str {
        match self {
            Self::Bilibili(s) => &s.backend,
            Self::Alist(s) => &s.backend,
            Self::Emby(s) => &s.backend,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BilibiliSource {
    pub bvid: String,
    pub cid: u64,
    pub epid: u64,
    /// Share one DASH manifest across users of this movie.
    pub shared: bool,
    /// Vendor backend name; empty selects the default backend.
    pub backend: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlistSource {
    pub server_id: String,
    pub path: String,
    pub password: String,
    pub backend: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbySource {
    pub server_id: String,
    pub item_id: String,
    pub backend: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subtitle {
    pub url: String,
    pub format: String,
}

/// A named alternate source for the same movie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoreSource {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub movie_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovieBase {
    pub url: String,
    pub name: String,
    pub live: bool,
    pub proxy: bool,
    pub rtmp_source: bool,
    /// Container hint: "mp4", "m3u8", "flv", "mpd", ...
    #[serde(rename = "type")]
    pub movie_type: String,
    pub headers: HashMap<String, String>,
    pub subtitles: HashMap<String, Subtitle>,
    pub more_sources: Vec<MoreSource>,
    pub is_folder: bool,
    pub vendor_info: Option<VendorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub room_id: RoomId,
    pub creator_id: UserId,
    /// Folder this movie lives in; `None` at the room root.
    pub parent_id: Option<MovieId>,
    /// Play-order position within the room.
    pub position: u64,
    #[serde(flatten)]
    pub base: MovieBase,
}

impl Movie {
    #[must_use]
    pub fn new(room_id: RoomId, creator_id: UserId, base: MovieBase) -> Self {
        Self {
            id: MovieId::new(),
            room_id,
            creator_id,
            parent_id: None,
            position: 0,
            base,
        }
    }

    #[must_use]
    pub const fn is_folder(&self) -> bool {
        self.base.is_folder
    }

    /// Folders with vendor locators list their children from the vendor at
    /// request time instead of from storage.
    #[must_use]
    pub const fn is_dynamic_folder(&self) -> bool {
        self.base.is_folder && self.base.vendor_info.is_some()
    }

    /// Structural validation applied on push and edit.
    pub fn validate(&self) -> Result<()> {
        if self.base.rtmp_source && !self.base.live {
            return Err(Error::InvalidInput(
                "an RTMP-sourced movie must be live".to_string(),
            ));
        }
        if self.base.is_folder {
            if !self.base.url.is_empty() {
                return Err(Error::InvalidInput("a folder has no URL".to_string()));
            }
            return Ok(());
        }
        if self.base.rtmp_source {
            // The URL is assigned by the relay, not the client.
            return Ok(());
        }
        if self.base.vendor_info.is_some() {
            return Ok(());
        }
        let url = url::Url::parse(&self.base.url)
            .map_err(|_| Error::InvalidInput("invalid movie URL".to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(Error::InvalidInput(format!(
                "unsupported URL scheme: {scheme}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie_with(base: MovieBase) -> Movie {
        Movie::new(RoomId::new(), UserId::new(), base)
    }

    #[test]
    fn test_rtmp_source_implies_live() {
        let m = movie_with(MovieBase {
            rtmp_source: true,
            live: false,
            ..Default::default()
        });
        assert!(m.validate().is_err());

        let m = movie_with(MovieBase {
            rtmp_source: true,
            live: true,
            ..Default::default()
        });
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_folder_has_no_url() {
        let m = movie_with(MovieBase {
            is_folder: true,
            url: "https://example.com/a.mp4".into(),
            ..Default::default()
        });
        assert!(m.validate().is_err());

        let m = movie_with(MovieBase {
            is_folder: true,
            ..Default::default()
        });
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_url_scheme_check() {
        let m = movie_with(MovieBase {
            url: "ftp://example.com/a.mp4".into(),
            ..Default::default()
        });
        assert!(m.validate().is_err());

        let m = movie_with(MovieBase {
            url: "https://example.com/a.mp4".into(),
            ..Default::default()
        });
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_dynamic_folder() {
        let m = movie_with(MovieBase {
            is_folder: true,
            vendor_info: Some(VendorInfo::Alist(AlistSource {
                server_id: "srv".into(),
                path: "/movies".into(),
                ..Default::default()
            })),
            ..Default::default()
        });
        assert!(m.is_dynamic_folder());
        assert!(m.validate().is_ok());
    }
}
