//! Bilibili HTTP provider.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::dash::{DashAudioStream, DashManifestData, DashSegmentBase, DashVideoStream};
use super::{BilibiliBackend, BilibiliDash, LiveStream, HTTP_CLIENT};
use crate::models::BilibiliSource;
use crate::{Error, Result};

const API_BASE: &str = "https://api.bilibili.com";
const REFERER: &str = "https://www.bilibili.com";

/// DASH request `fnval`: dash + HDR + 4K + dolby + 8K flags.
const FNVAL_DASH: u32 = 4048;

pub struct HttpBilibili {
    client: reqwest::Client,
}

impl HttpBilibili {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
        }
    }

    fn request(
        &self,
        url: &str,
        cookies: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url).header("Referer", REFERER);
        if !cookies.is_empty() {
            let cookie = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            req = req.header("Cookie", cookie);
        }
        req
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        cookies: &HashMap<String, String>,
    ) -> Result<T> {
        let resp = self.request(url, cookies).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "bilibili returned {} for {url}",
                resp.status()
            )));
        }
        Ok(resp.json::<T>().await?)
    }
}

impl Default for HttpBilibili {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResp<T> {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(alias = "result")]
    data: Option<T>,
}

impl<T> ApiResp<T> {
    fn into_data(self) -> Result<T> {
        if self.code != 0 {
            return Err(Error::Upstream(format!(
                "bilibili api error {}: {}",
                self.code, self.message
            )));
        }
        self.data
            .ok_or_else(|| Error::Upstream("bilibili api returned no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct PlayUrlData {
    #[serde(default)]
    dash: Option<DashInfo>,
    #[serde(default)]
    durl: Vec<DurlItem>,
}

#[derive(Debug, Deserialize)]
struct DurlItem {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DashInfo {
    #[serde(default)]
    duration: f64,
    #[serde(default, rename = "minBufferTime")]
    min_buffer_time: f64,
    #[serde(default)]
    video: Vec<DashStreamInfo>,
    #[serde(default)]
    audio: Vec<DashStreamInfo>,
}

#[derive(Debug, Deserialize)]
struct DashStreamInfo {
    #[serde(default)]
    id: u64,
    #[serde(default, rename = "baseUrl", alias = "base_url")]
    base_url: String,
    #[serde(default, rename = "backupUrl", alias = "backup_url")]
    backup_urls: Option<Vec<String>>,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: String,
    #[serde(default)]
    codecs: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default, rename = "frameRate", alias = "frame_rate")]
    frame_rate: String,
    #[serde(default)]
    bandwidth: u64,
    #[serde(default)]
    sar: String,
    #[serde(default, rename = "startWithSap", alias = "start_with_sap")]
    start_with_sap: u32,
    #[serde(default, rename = "SegmentBase", alias = "segment_base")]
    segment_base: Option<SegmentBaseInfo>,
    #[serde(default, rename = "audioSamplingRate")]
    audio_sampling_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SegmentBaseInfo {
    #[serde(default, rename = "Initialization", alias = "initialization")]
    initialization: String,
    #[serde(default, rename = "indexRange", alias = "index_range")]
    index_range: String,
}

#[derive(Debug, Deserialize)]
struct SubtitleData {
    #[serde(default)]
    subtitle: SubtitleInfo,
}

#[derive(Debug, Default, Deserialize)]
struct SubtitleInfo {
    #[serde(default)]
    subtitles: Vec<SubtitleItem>,
}

#[derive(Debug, Deserialize)]
struct SubtitleItem {
    #[serde(default)]
    lan_doc: String,
    #[serde(default)]
    subtitle_url: String,
}

fn video_stream(info: &DashStreamInfo) -> DashVideoStream {
    DashVideoStream {
        id: info.id.to_string(),
        base_url: info.base_url.clone(),
        backup_urls: info.backup_urls.clone().unwrap_or_default(),
        mime_type: info.mime_type.clone(),
        codecs: info.codecs.clone(),
        width: info.width,
        height: info.height,
        frame_rate: info.frame_rate.clone(),
        bandwidth: info.bandwidth,
        sar: if info.sar.is_empty() {
            "1:1".to_string()
        } else {
            info.sar.clone()
        },
        start_with_sap: info.start_with_sap,
        segment_base: segment_base(info),
    }
}

fn audio_stream(info: &DashStreamInfo) -> DashAudioStream {
    DashAudioStream {
        id: info.id.to_string(),
        base_url: info.base_url.clone(),
        backup_urls: info.backup_urls.clone().unwrap_or_default(),
        mime_type: info.mime_type.clone(),
        codecs: info.codecs.clone(),
        bandwidth: info.bandwidth,
        audio_sampling_rate: info
            .audio_sampling_rate
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(44100),
        start_with_sap: info.start_with_sap,
        segment_base: segment_base(info),
    }
}

fn segment_base(info: &DashStreamInfo) -> DashSegmentBase {
    info.segment_base
        .as_ref()
        .map(|sb| DashSegmentBase {
            initialization: sb.initialization.clone(),
            index_range: sb.index_range.clone(),
        })
        .unwrap_or_default()
}

/// Split a DASH response into an AVC manifest and an optional HEVC one.
fn split_dash(dash: &DashInfo) -> BilibiliDash {
    let mut avc = DashManifestData {
        duration: dash.duration,
        min_buffer_time: dash.min_buffer_time.max(1.5),
        ..Default::default()
    };
    let mut hevc = avc.clone();

    for video in &dash.video {
        if video.codecs.starts_with("hev") || video.codecs.starts_with("hvc") {
            hevc.video_streams.push(video_stream(video));
        } else {
            avc.video_streams.push(video_stream(video));
        }
    }
    for audio in &dash.audio {
        avc.audio_streams.push(audio_stream(audio));
        hevc.audio_streams.push(audio_stream(audio));
    }

    let hevc = if hevc.video_streams.is_empty() {
        None
    } else {
        Some(hevc)
    };
    BilibiliDash { avc, hevc }
}

fn playurl_endpoint(source: &BilibiliSource, dash: bool) -> Result<String> {
    let suffix = if dash {
        format!("fnval={FNVAL_DASH}")
    } else {
        "platform=html5&high_quality=1".to_string()
    };
    if source.epid != 0 {
        Ok(format!(
            "{API_BASE}/pgc/player/web/playurl?ep_id={}&{suffix}",
            source.epid
        ))
    } else if !source.bvid.is_empty() {
        Ok(format!(
            "{API_BASE}/x/player/wbi/playurl?bvid={}&cid={}&{suffix}",
            source.bvid, source.cid
        ))
    } else {
        Err(Error::InvalidInput("bvid and epid are empty".to_string()))
    }
}

#[async_trait]
impl BilibiliBackend for HttpBilibili {
    async fn dash_manifest(
        &self,
        cookies: &HashMap<String, String>,
        source: &BilibiliSource,
    ) -> Result<BilibiliDash> {
        let url = playurl_endpoint(source, true)?;
        let resp: ApiResp<PlayUrlData> = self.get_json(&url, cookies).await?;
        let data = resp.into_data()?;
        let dash = data
            .dash
            .ok_or_else(|| Error::Upstream("no dash streams in playurl response".to_string()))?;
        Ok(split_dash(&dash))
    }

    async fn playback_url(
        &self,
        cookies: &HashMap<String, String>,
        source: &BilibiliSource,
    ) -> Result<String> {
        let url = playurl_endpoint(source, false)?;
        let resp: ApiResp<PlayUrlData> = self.get_json(&url, cookies).await?;
        let data = resp.into_data()?;
        data.durl
            .into_iter()
            .next()
            .map(|d| d.url)
            .ok_or_else(|| Error::Upstream("no playback URL in playurl response".to_string()))
    }

    async fn subtitles(
        &self,
        cookies: &HashMap<String, String>,
        source: &BilibiliSource,
    ) -> Result<HashMap<String, String>> {
        if source.bvid.is_empty() || source.cid == 0 {
            return Err(Error::InvalidInput("bvid or cid is empty".to_string()));
        }
        let url = format!(
            "{API_BASE}/x/player/v2?bvid={}&cid={}",
            source.bvid, source.cid
        );
        let resp: ApiResp<SubtitleData> = self.get_json(&url, cookies).await?;
        let data = resp.into_data()?;
        Ok(data
            .subtitle
            .subtitles
            .into_iter()
            .filter(|s| !s.subtitle_url.is_empty())
            .map(|s| (s.lan_doc, s.subtitle_url))
            .collect())
    }

    async fn live_streams(&self, cid: u64) -> Result<Vec<LiveStream>> {
        #[derive(Debug, Deserialize)]
        struct RoomPlayInfo {
            playurl_info: Option<PlayurlInfo>,
        }
        #[derive(Debug, Deserialize)]
        struct PlayurlInfo {
            playurl: Option<Playurl>,
        }
        #[derive(Debug, Deserialize)]
        struct Playurl {
            #[serde(default)]
            stream: Vec<Stream>,
        }
        #[derive(Debug, Deserialize)]
        struct Stream {
            #[serde(default)]
            format: Vec<Format>,
        }
        #[derive(Debug, Deserialize)]
        struct Format {
            #[serde(default)]
            format_name: String,
            #[serde(default)]
            codec: Vec<Codec>,
        }
        #[derive(Debug, Deserialize)]
        struct Codec {
            #[serde(default)]
            current_qn: u64,
            #[serde(default)]
            base_url: String,
            #[serde(default)]
            url_info: Vec<UrlInfo>,
        }
        #[derive(Debug, Deserialize)]
        struct UrlInfo {
            #[serde(default)]
            host: String,
            #[serde(default)]
            extra: String,
        }

        let url = format!(
            "https://api.live.bilibili.com/xlive/web-room/v2/index/getRoomPlayInfo?room_id={cid}&protocol=0,1&format=0,1,2&codec=0,1&qn=10000&platform=web"
        );
        let resp: ApiResp<RoomPlayInfo> = self.get_json(&url, &HashMap::new()).await?;
        let data = resp.into_data()?;

        let mut streams = Vec::new();
        let playurl = data
            .playurl_info
            .and_then(|i| i.playurl)
            .ok_or_else(|| Error::Upstream("live room is offline".to_string()))?;
        for stream in playurl.stream {
            for format in stream.format {
                for codec in format.codec {
                    let urls = codec
                        .url_info
                        .iter()
                        .map(|u| format!("{}{}{}", u.host, codec.base_url, u.extra))
                        .collect::<Vec<_>>();
                    streams.push(LiveStream {
                        quality: codec.current_qn,
                        desc: format.format_name.clone(),
                        urls,
                    });
                }
            }
        }
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playurl_endpoint_prefers_epid() {
        let source = BilibiliSource {
            epid: 42,
            bvid: "BV1xx".into(),
            cid: 7,
            ..Default::default()
        };
        let url = playurl_endpoint(&source, true).unwrap();
        assert!(url.contains("/pgc/player/web/playurl?ep_id=42"));
        assert!(url.contains("fnval=4048"));
    }

    #[test]
    fn test_playurl_endpoint_bvid() {
        let source = BilibiliSource {
            bvid: "BV1xx".into(),
            cid: 7,
            ..Default::default()
        };
        let url = playurl_endpoint(&source, false).unwrap();
        assert!(url.contains("bvid=BV1xx&cid=7"));
        assert!(!url.contains("fnval"));
    }

    #[test]
    fn test_playurl_endpoint_empty_source() {
        assert!(playurl_endpoint(&BilibiliSource::default(), true).is_err());
    }

    #[test]
    fn test_split_dash_separates_hevc() {
        let dash = DashInfo {
            duration: 120.0,
            min_buffer_time: 1.5,
            video: vec![
                DashStreamInfo {
                    id: 1,
                    codecs: "avc1.64001F".into(),
                    base_url: "https://cdn/v-avc.m4s".into(),
                    backup_urls: None,
                    mime_type: "video/mp4".into(),
                    width: 1920,
                    height: 1080,
                    frame_rate: "30".into(),
                    bandwidth: 1000,
                    sar: String::new(),
                    start_with_sap: 1,
                    segment_base: None,
                    audio_sampling_rate: None,
                },
                DashStreamInfo {
                    id: 2,
                    codecs: "hev1.1.6.L120".into(),
                    base_url: "https://cdn/v-hevc.m4s".into(),
                    backup_urls: None,
                    mime_type: "video/mp4".into(),
                    width: 1920,
                    height: 1080,
                    frame_rate: "30".into(),
                    bandwidth: 800,
                    sar: String::new(),
                    start_with_sap: 1,
                    segment_base: None,
                    audio_sampling_rate: None,
                },
            ],
            audio: vec![DashStreamInfo {
                id: 3,
                codecs: "mp4a.40.2".into(),
                base_url: "https://cdn/a.m4s".into(),
                backup_urls: None,
                mime_type: "audio/mp4".into(),
                width: 0,
                height: 0,
                frame_rate: String::new(),
                bandwidth: 128,
                sar: String::new(),
                start_with_sap: 1,
                segment_base: None,
                audio_sampling_rate: Some("44100".into()),
            }],
        };

        let split = split_dash(&dash);
        assert_eq!(split.avc.video_streams.len(), 1);
        assert_eq!(split.avc.audio_streams.len(), 1);
        let hevc = split.hevc.unwrap();
        assert_eq!(hevc.video_streams.len(), 1);
        assert_eq!(hevc.video_streams[0].base_url, "https://cdn/v-hevc.m4s");
        // Empty SAR defaults to 1:1
        assert_eq!(split.avc.video_streams[0].sar, "1:1");
    }
}
