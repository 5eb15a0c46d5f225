//! Structured MPEG-DASH manifest data.
//!
//! Vendor responses are parsed into this owned representation; the proxy
//! layer turns it into MPD XML at serve time with per-user tokens applied.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashSegmentBase {
    pub initialization: String,
    pub index_range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashVideoStream {
    pub id: String,
    pub base_url: String,
    pub backup_urls: Vec<String>,
    pub mime_type: String,
    pub codecs: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: String,
    pub bandwidth: u64,
    pub sar: String,
    pub start_with_sap: u32,
    pub segment_base: DashSegmentBase,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashAudioStream {
    pub id: String,
    pub base_url: String,
    pub backup_urls: Vec<String>,
    pub mime_type: String,
    pub codecs: String,
    pub bandwidth: u64,
    pub audio_sampling_rate: u64,
    pub start_with_sap: u32,
    pub segment_base: DashSegmentBase,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashManifestData {
    /// Media duration in seconds.
    pub duration: f64,
    pub min_buffer_time: f64,
    pub video_streams: Vec<DashVideoStream>,
    pub audio_streams: Vec<DashAudioStream>,
}

impl DashManifestData {
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.video_streams.len() + self.audio_streams.len()
    }
}
