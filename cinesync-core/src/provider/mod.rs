//! Vendor media providers.
//!
//! Each third-party service is reached through an object-safe interface so
//! the runtime never depends on a concrete transport. The bundled
//! implementations are plain HTTP clients; out-of-process backends implement
//! the same traits behind whatever transport they use.

pub mod alist;
pub mod backends;
pub mod bilibili;
pub mod breaker;
pub mod dash;
pub mod emby;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use crate::models::BilibiliSource;
use crate::Result;

pub use backends::{Backend, BackendRegistry};
pub use breaker::{BreakerConfig, BreakerState, SlidingWindowBreaker};
pub use dash::{DashAudioStream, DashManifestData, DashSegmentBase, DashVideoStream};

pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Shared HTTP client for vendor requests (connection pooling).
pub(crate) static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .unwrap_or_default()
});

/// A live stream variant advertised by a vendor.
#[derive(Debug, Clone, Default)]
pub struct LiveStream {
    pub quality: u64,
    pub desc: String,
    pub urls: Vec<String>,
}

/// Both DASH renditions returned by Bilibili: AVC plus an optional HEVC set.
#[derive(Debug, Clone, Default)]
pub struct BilibiliDash {
    pub avc: DashManifestData,
    pub hevc: Option<DashManifestData>,
}

#[async_trait]
pub trait BilibiliBackend: Send + Sync {
    /// Fetch the shared DASH manifest pair for a video or episode.
    async fn dash_manifest(
        &self,
        cookies: &HashMap<String, String>,
        source: &BilibiliSource,
    ) -> Result<BilibiliDash>;

    /// Fetch a single progressive playback URL (per-user, watermarked).
    async fn playback_url(
        &self,
        cookies: &HashMap<String, String>,
        source: &BilibiliSource,
    ) -> Result<String>;

    /// Subtitle name → JSON subtitle URL.
    async fn subtitles(
        &self,
        cookies: &HashMap<String, String>,
        source: &BilibiliSource,
    ) -> Result<HashMap<String, String>>;

    /// Live stream variants for a live room cid.
    async fn live_streams(&self, cid: u64) -> Result<Vec<LiveStream>>;
}

#[derive(Debug, Clone, Default)]
pub struct AlistFsEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Signed raw URL; empty for directories.
    pub raw_url: String,
    pub provider: String,
}

#[derive(Debug, Clone, Default)]
pub struct AlistFsList {
    pub entries: Vec<AlistFsEntry>,
    pub total: u64,
}

#[async_trait]
pub trait AlistBackend: Send + Sync {
    async fn login(&self, host: &str, username: &str, password: &str) -> Result<String>;

    async fn fs_get(
        &self,
        host: &str,
        token: &str,
        path: &str,
        password: &str,
    ) -> Result<AlistFsEntry>;

    async fn fs_list(
        &self,
        host: &str,
        token: &str,
        path: &str,
        password: &str,
        page: u64,
        per_page: u64,
    ) -> Result<AlistFsList>;
}

#[derive(Debug, Clone, Default)]
pub struct EmbyItem {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EmbyItems {
    pub items: Vec<EmbyItem>,
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct EmbyPlayback {
    pub url: String,
    pub container: String,
    pub subtitles: HashMap<String, String>,
}

#[async_trait]
pub trait EmbyBackend: Send + Sync {
    async fn playback(&self, host: &str, api_key: &str, item_id: &str) -> Result<EmbyPlayback>;

    async fn items(
        &self,
        host: &str,
        api_key: &str,
        parent_id: &str,
        start: u64,
        limit: u64,
    ) -> Result<EmbyItems>;
}
