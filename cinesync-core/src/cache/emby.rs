//! Per-movie Emby caches.

use std::sync::Arc;

use crate::cache::{MapCache, RefreshCache};
use crate::models::{EmbySource, Movie, UserId, VendorInfo};
use crate::provider::{BackendRegistry, EmbyPlayback};
use crate::{Error, Result};

use super::bilibili::VENDOR_TTL;

/// API key plus host for one (user, server) pair. Keys do not expire.
#[derive(Debug, Clone)]
pub struct EmbyAuth {
    pub host: String,
    pub api_key: String,
    pub backend: String,
}

pub type EmbyUserCache = RefreshCache<Arc<EmbyAuth>>;

pub struct EmbyMovieCache {
    pub playback: MapCache<UserId, EmbyPlayback, Arc<EmbyUserCache>>,
}

fn emby_source(movie: &Movie) -> Result<EmbySource> {
    match &movie.base.vendor_info {
        Some(VendorInfo::Emby(source)) => Ok(source.clone()),
        _ => Err(Error::InvalidInput(
            "movie has no emby vendor info".to_string(),
        )),
    }
}

impl EmbyMovieCache {
    pub fn new(movie: &Movie, backends: Arc<BackendRegistry>) -> Result<Self> {
        let source = emby_source(movie)?;
        let playback = MapCache::new(Some(VENDOR_TTL), move |_user: &UserId| {
            let source = source.clone();
            let backends = backends.clone();
            Arc::new(move |auth_cache: Arc<EmbyUserCache>| {
                let source = source.clone();
                let backends = backends.clone();
                Box::pin(async move {
                    let auth = auth_cache.get(()).await?;
                    let backend = backends.load(&source.backend)?;
                    backend
                        .call(backend.emby().playback(
                            &auth.host,
                            &auth.api_key,
                            &source.item_id,
                        ))
                        .await
                })
            })
        });
        Ok(Self { playback })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MovieBase, RoomId};

    #[test]
    fn test_requires_emby_vendor_info() {
        let movie = Movie::new(RoomId::new(), UserId::new(), MovieBase::default());
        assert!(EmbyMovieCache::new(&movie, Arc::new(BackendRegistry::with_default())).is_err());
    }
}
