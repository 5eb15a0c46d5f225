//! Per-movie Bilibili caches.
//!
//! Five sub-caches per movie: a per-user progressive URL map (URLs are
//! watermarked and carry the user's token), one shared DASH manifest bundle,
//! subtitles with lazy SRT transcoding, a generated live playlist, and the
//! danmaku XML. TTLs stay under the 60-minute expiry of Bilibili tokens.

use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{MapCache, RefreshCache};
use crate::models::{BilibiliSource, Movie, MovieId, RoomId, UserId, VendorInfo};
use crate::provider::{BackendRegistry, BilibiliDash, DashManifestData, LiveStream, HTTP_CLIENT};
use crate::repository::BilibiliCredential;
use crate::{Error, Result};

/// Vendor caches keep a 5-minute safety margin under the 60-minute token TTL.
pub const VENDOR_TTL: Duration = Duration::from_secs(55 * 60);

/// Per-user vendor credentials; `None` means the user has not linked an
/// account and requests go out anonymously.
pub type BilibiliUserCache = RefreshCache<Option<BilibiliCredential>>;

/// The shared DASH manifest with its original segment URLs harvested out.
///
/// Each representation's base URL is rewritten to a runtime-served path
/// (`<movie-id>?id=<n>&roomId=<room-id>[&t=hevc]`); `urls[n]` keeps the
/// upstream CDN URL the proxy fetches when that path is requested.
#[derive(Debug, Clone)]
pub struct MpdBundle {
    pub avc: DashManifestData,
    pub hevc: Option<DashManifestData>,
    pub urls: Vec<String>,
}

impl MpdBundle {
    fn build(dash: BilibiliDash, movie_id: &MovieId, room_id: &RoomId) -> Self {
        let mut urls = Vec::new();
        let mut avc = dash.avc;
        let mut rewrite = |base_url: &mut String, hevc: bool| {
            let id = urls.len();
            urls.push(std::mem::take(base_url));
            *base_url = format!("{movie_id}?id={id}&roomId={room_id}");
            if hevc {
                base_url.push_str("&t=hevc");
            }
        };

        for stream in &mut avc.video_streams {
            rewrite(&mut stream.base_url, false);
        }
        for stream in &mut avc.audio_streams {
            rewrite(&mut stream.base_url, false);
        }
        let hevc = dash.hevc.map(|mut hevc| {
            for stream in &mut hevc.video_streams {
                rewrite(&mut stream.base_url, true);
            }
            for stream in &mut hevc.audio_streams {
                rewrite(&mut stream.base_url, true);
            }
            hevc
        });

        Self { avc, hevc, urls }
    }

    /// Resolve a rewritten stream index back to its upstream URL.
    pub fn upstream_url(&self, id: usize) -> Result<&str> {
        self.urls
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidInput(format!("stream index {id} out of range")))
    }
}

pub struct BilibiliSubtitleItem {
    pub url: String,
    /// Lazily transcoded SRT; the vendor serves subtitles as JSON.
    pub srt: RefreshCache<Bytes>,
}

pub type BilibiliSubtitles = Arc<HashMap<String, Arc<BilibiliSubtitleItem>>>;

pub struct BilibiliMovieCache {
    pub no_shared_url: MapCache<UserId, String, Arc<BilibiliUserCache>>,
    pub shared_mpd: RefreshCache<Arc<MpdBundle>, Arc<BilibiliUserCache>>,
    pub subtitles: RefreshCache<BilibiliSubtitles, Arc<BilibiliUserCache>>,
    pub live: RefreshCache<Bytes>,
    pub danmu: RefreshCache<Bytes>,
}

fn bilibili_source(movie: &Movie) -> Result<BilibiliSource> {
    match &movie.base.vendor_info {
        Some(VendorInfo::Bilibili(source)) => Ok(source.clone()),
        _ => Err(Error::InvalidInput(
            "movie has no bilibili vendor info".to_string(),
        )),
    }
}

async fn cookies_of(user_cache: &BilibiliUserCache) -> Result<HashMap<String, String>> {
    Ok(user_cache
        .get(())
        .await?
        .map(|c| c.cookies)
        .unwrap_or_default())
}

impl BilibiliMovieCache {
    pub fn new(movie: &Movie, backends: Arc<BackendRegistry>) -> Result<Self> {
        let source = bilibili_source(movie)?;
        let movie_id = movie.id.clone();
        let room_id = movie.room_id.clone();

        let no_shared_url = {
            let source = source.clone();
            let backends = backends.clone();
            MapCache::new(Some(VENDOR_TTL), move |_user: &UserId| {
                let source = source.clone();
                let backends = backends.clone();
                Arc::new(move |user_cache: Arc<BilibiliUserCache>| {
                    let source = source.clone();
                    let backends = backends.clone();
                    Box::pin(async move {
                        let cookies = cookies_of(&user_cache).await?;
                        let backend = backends.load(&source.backend)?;
                        backend
                            .call(backend.bilibili().playback_url(&cookies, &source))
                            .await
                    })
                })
            })
        };

        let shared_mpd = {
            let source = source.clone();
            let backends = backends.clone();
            RefreshCache::new(Some(VENDOR_TTL), move |user_cache: Arc<BilibiliUserCache>| {
                let source = source.clone();
                let backends = backends.clone();
                let movie_id = movie_id.clone();
                let room_id = room_id.clone();
                async move {
                    let cookies = cookies_of(&user_cache).await?;
                    let backend = backends.load(&source.backend)?;
                    let dash = backend
                        .call(backend.bilibili().dash_manifest(&cookies, &source))
                        .await?;
                    Ok(Arc::new(MpdBundle::build(dash, &movie_id, &room_id)))
                }
            })
        };

        let subtitles = {
            let source = source.clone();
            let backends = backends.clone();
            RefreshCache::new(None, move |user_cache: Arc<BilibiliUserCache>| {
                let source = source.clone();
                let backends = backends.clone();
                async move {
                    // Subtitles require a linked account; anonymous users get none.
                    let Some(credential) = user_cache.get(()).await? else {
                        return Ok(Arc::new(HashMap::new()));
                    };
                    let backend = backends.load(&source.backend)?;
                    let raw = backend
                        .call(
                            backend
                                .bilibili()
                                .subtitles(&credential.cookies, &source),
                        )
                        .await?;
                    let map = raw
                        .into_iter()
                        .map(|(name, url)| {
                            let srt_url = url.clone();
                            let item = BilibiliSubtitleItem {
                                url,
                                srt: RefreshCache::new(None, move |()| {
                                    fetch_subtitle_as_srt(srt_url.clone())
                                }),
                            };
                            (name, Arc::new(item))
                        })
                        .collect::<HashMap<_, _>>();
                    Ok(Arc::new(map))
                }
            })
        };

        let live = {
            let source = source.clone();
            let backends = backends.clone();
            RefreshCache::new(Some(VENDOR_TTL), move |()| {
                let source = source.clone();
                let backends = backends.clone();
                async move {
                    let backend = backends.load(&source.backend)?;
                    let streams = backend
                        .call(backend.bilibili().live_streams(source.cid))
                        .await?;
                    Ok(live_playlist(&streams))
                }
            })
        };

        let danmu = {
            let cid = source.cid;
            RefreshCache::new(None, move |()| fetch_danmu(cid))
        };

        Ok(Self {
            no_shared_url,
            shared_mpd,
            subtitles,
            live,
            danmu,
        })
    }
}

/// Build an HLS variant playlist from the vendor's live stream list.
fn live_playlist(streams: &[LiveStream]) -> Bytes {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for stream in streams {
        let Some(url) = stream.urls.first() else {
            continue;
        };
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},NAME=\"{}\"",
            1920 * 1080 * stream.quality,
            stream.desc
        );
        out.push_str(url);
        out.push('\n');
    }
    Bytes::from(out)
}

#[derive(Debug, Deserialize)]
struct SubtitleBody {
    #[serde(default)]
    body: Vec<SubtitleLine>,
}

#[derive(Debug, Deserialize)]
struct SubtitleLine {
    #[serde(default)]
    content: String,
    #[serde(default)]
    from: f64,
    #[serde(default)]
    to: f64,
}

fn format_srt_time(seconds: f64) -> String {
    let total = seconds.max(0.0);
    let hours = (total / 3600.0) as u64;
    let minutes = ((total % 3600.0) / 60.0) as u64;
    let secs = (total % 60.0) as u64;
    let millis = ((total - total.floor()) * 1000.0) as u64;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

fn subtitle_to_srt(subtitle: &SubtitleBody) -> Bytes {
    let mut out = String::new();
    for (counter, line) in subtitle.body.iter().enumerate() {
        let _ = write!(
            out,
            "{counter}\n{} --> {}\n{}\n\n",
            format_srt_time(line.from),
            format_srt_time(line.to),
            line.content
        );
    }
    Bytes::from(out)
}

async fn fetch_subtitle_as_srt(url: String) -> Result<Bytes> {
    let url = if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url
    };
    let resp = HTTP_CLIENT
        .get(&url)
        .header("Referer", "https://www.bilibili.com")
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(Error::Upstream(format!(
            "subtitle fetch returned {}",
            resp.status()
        )));
    }
    let body: SubtitleBody = resp.json().await?;
    Ok(subtitle_to_srt(&body))
}

async fn fetch_danmu(cid: u64) -> Result<Bytes> {
    let url = format!("https://comment.bilibili.com/{cid}.xml");
    let resp = HTTP_CLIENT.get(&url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::Upstream(format!(
            "danmaku fetch returned {}",
            resp.status()
        )));
    }
    let compressed = resp.bytes().await?;
    // Served raw-deflate, no zlib header.
    let mut decoder = flate2::read::DeflateDecoder::new(compressed.as_ref());
    let mut xml = Vec::new();
    decoder
        .read_to_end(&mut xml)
        .map_err(|e| Error::Upstream(format!("danmaku decompression failed: {e}")))?;
    Ok(Bytes::from(xml))
}
