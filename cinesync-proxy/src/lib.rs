//! Media proxy utilities.
//!
//! Forwards range requests to upstream media hosts, optionally memoizing
//! small responses in a byte-range cache, and rewrites HLS playlists and
//! DASH manifests so every child resource is served back through the
//! runtime with a signed target token.

pub mod m3u8;
pub mod mpd;
pub mod target;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use axum::{body::Body, http::StatusCode, response::Response};
use bytes::Bytes;

use cinesync_core::{Error, Result};

/// Manifests are small; anything larger is suspicious.
const MAX_MANIFEST_SIZE: usize = 10 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared HTTP client for proxy requests; reuses connections and TLS
/// sessions across requests.
static PROXY_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(20)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
});

/// Cached upstream response: the forwarded header subset plus the body.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_range: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    url: String,
    range: Option<String>,
}

/// Byte-range LRU cache keyed by (effective URL, range).
pub struct ProxyCache {
    inner: moka::future::Cache<CacheKey, Arc<CachedResponse>>,
    body_limit: usize,
}

impl ProxyCache {
    #[must_use]
    pub fn new(max_entries: u64, body_limit: usize) -> Self {
        Self {
            inner: moka::future::CacheBuilder::new(max_entries)
                .time_to_live(Duration::from_secs(10 * 60))
                .build(),
            body_limit,
        }
    }
}

/// One proxied fetch.
pub struct ProxyRequest<'a> {
    /// Upstream URL to fetch.
    pub url: &'a str,
    /// Extra headers the source requires (Referer, cookies, ...).
    pub headers: &'a HashMap<String, String>,
    /// The client's `Range` header, forwarded verbatim.
    pub range: Option<&'a str>,
    /// Response cache; `None` disables caching for this fetch.
    pub cache: Option<&'a ProxyCache>,
    /// Overrides the URL used in the cache key, e.g. with volatile query
    /// parameters stripped.
    pub cache_key: Option<&'a str>,
}

fn apply_source_headers(
    mut request: reqwest::RequestBuilder,
    url: &str,
    headers: &HashMap<String, String>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if !headers.contains_key("User-Agent") {
        request = request.header(
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
        );
    }
    if !headers.contains_key("Referer") {
        if let Ok(parsed) = url::Url::parse(url) {
            let referer = format!(
                "{}://{}{}",
                parsed.scheme(),
                parsed.host_str().unwrap_or(""),
                parsed.path()
            );
            request = request.header("Referer", referer);
        }
    }
    request
}

fn forwarded_response(cached: &CachedResponse) -> Result<Response> {
    let mut builder = Response::builder().status(cached.status);
    if let Some(content_type) = &cached.content_type {
        builder = builder.header("Content-Type", content_type);
    }
    if let Some(content_range) = &cached.content_range {
        builder = builder.header("Content-Range", content_range);
    }
    builder = builder.header("Content-Length", cached.body.len());
    builder
        .body(Body::from(cached.body.clone()))
        .map_err(|e| Error::Internal(format!("failed to build response: {e}")))
}

/// Fetch `url`, forwarding the range and mirroring upstream status,
/// `Content-Type`, `Content-Range` and `Content-Length`.
///
/// Small 2xx/206 responses are buffered into the cache; everything else is
/// streamed straight through.
pub async fn proxy_url(req: ProxyRequest<'_>) -> Result<Response> {
    let key = CacheKey {
        url: req.cache_key.unwrap_or(req.url).to_string(),
        range: req.range.map(str::to_string),
    };
    if let Some(cache) = req.cache {
        if let Some(hit) = cache.inner.get(&key).await {
            tracing::debug!(url = %key.url, range = ?key.range, "proxy cache hit");
            return forwarded_response(&hit);
        }
    }

    let mut request = apply_source_headers(PROXY_CLIENT.get(req.url), req.url, req.headers);
    if let Some(range) = req.range {
        request = request.header("Range", range);
    }
    let upstream = request
        .send()
        .await
        .map_err(|e| Error::Upstream(format!("proxy request failed: {e}")))?;

    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_range = upstream
        .headers()
        .get("Content-Range")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_length = upstream.content_length();

    let cacheable = req.cache.is_some()
        && (status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT)
        && content_length.is_some_and(|len| {
            len as usize <= req.cache.map_or(0, |c| c.body_limit)
        });

    if cacheable {
        let body = upstream
            .bytes()
            .await
            .map_err(|e| Error::Upstream(format!("failed to read upstream body: {e}")))?;
        let cached = Arc::new(CachedResponse {
            status: status.as_u16(),
            content_type,
            content_range,
            body,
        });
        if let Some(cache) = req.cache {
            cache.inner.insert(key, cached.clone()).await;
        }
        return forwarded_response(&cached);
    }

    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header("Content-Type", content_type);
    }
    if let Some(content_range) = content_range {
        builder = builder.header("Content-Range", content_range);
    }
    if let Some(len) = content_length {
        builder = builder.header("Content-Length", len);
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| Error::Internal(format!("failed to build response: {e}")))
}

/// Fetch a playlist or other small text resource with source headers applied.
pub async fn fetch_text(url: &str, headers: &HashMap<String, String>) -> Result<String> {
    let request = apply_source_headers(PROXY_CLIENT.get(url), url, headers);
    let resp = request
        .send()
        .await
        .map_err(|e| Error::Upstream(format!("manifest request failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(Error::Upstream(format!(
            "manifest fetch returned {}",
            resp.status()
        )));
    }
    if resp
        .content_length()
        .is_some_and(|len| len as usize > MAX_MANIFEST_SIZE)
    {
        return Err(Error::Upstream("manifest too large".to_string()));
    }
    let body = resp
        .bytes()
        .await
        .map_err(|e| Error::Upstream(format!("failed to read manifest: {e}")))?;
    if body.len() > MAX_MANIFEST_SIZE {
        return Err(Error::Upstream("manifest too large".to_string()));
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Percent-encode a string for use inside a query parameter value.
#[must_use]
pub fn percent_encode(input: &str) -> String {
    percent_encoding::utf8_percent_encode(input, percent_encoding::NON_ALPHANUMERIC).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_range_distinguishes() {
        let a = CacheKey {
            url: "https://example.com/a.mp4".into(),
            range: Some("bytes=0-1023".into()),
        };
        let b = CacheKey {
            url: "https://example.com/a.mp4".into(),
            range: Some("bytes=1024-2047".into()),
        };
        assert_ne!(a, b);
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(
            percent_encode("https://a.com/x?y=1"),
            "https%3A%2F%2Fa%2Ecom%2Fx%3Fy%3D1"
        );
    }

    #[tokio::test]
    async fn test_forwarded_response_headers() {
        let cached = CachedResponse {
            status: 206,
            content_type: Some("video/mp4".into()),
            content_range: Some("bytes 0-1023/2048".into()),
            body: Bytes::from(vec![0u8; 1024]),
        };
        let resp = forwarded_response(&cached).unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()["Content-Type"], "video/mp4");
        assert_eq!(resp.headers()["Content-Range"], "bytes 0-1023/2048");
        assert_eq!(resp.headers()["Content-Length"], "1024");
    }
}
