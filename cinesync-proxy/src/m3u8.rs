//! HLS playlist rewriting.
//!
//! Every URI in the playlist (segment lines and `URI="..."` attributes) is
//! resolved against the playlist's own URL and handed to a caller-supplied
//! mapper, which returns the runtime path that will proxy it.

/// Upper bound on rewritten URIs per playlist.
const MAX_M3U8_URLS: usize = 1000;

/// True when a URI points at a nested playlist rather than a segment.
#[must_use]
pub fn is_m3u8_url(raw: &str) -> bool {
    let path = raw.split(['?', '#']).next().unwrap_or(raw);
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

fn make_absolute(raw: &str, base: Option<&url::Url>) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    if let Some(base) = base {
        if let Ok(joined) = base.join(raw) {
            return joined.to_string();
        }
    }
    raw.to_string()
}

/// Rewrite a playlist, mapping every absolute child URL through `map_url`.
///
/// `map_url(absolute_url, is_playlist)` returns the replacement URI.
pub fn rewrite_m3u8<F>(content: &str, source_url: &str, mut map_url: F) -> String
where
    F: FnMut(&str, bool) -> String,
{
    let base = url::Url::parse(source_url).ok();
    let mut output = String::with_capacity(content.len());
    let mut url_count = 0usize;

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix('#') {
            if rest.contains("URI=\"") {
                output.push_str(&rewrite_uri_attribute(
                    line,
                    base.as_ref(),
                    &mut map_url,
                    &mut url_count,
                ));
            } else {
                output.push_str(line);
            }
        } else if line.trim().is_empty() {
            output.push_str(line);
        } else {
            url_count += 1;
            if url_count > MAX_M3U8_URLS {
                tracing::warn!(
                    source_url = %source_url,
                    "playlist exceeded URL limit, dropping remaining entries"
                );
                continue;
            }
            let absolute = make_absolute(line.trim(), base.as_ref());
            output.push_str(&map_url(&absolute, is_m3u8_url(&absolute)));
        }
        output.push('\n');
    }

    output
}

fn rewrite_uri_attribute<F>(
    line: &str,
    base: Option<&url::Url>,
    map_url: &mut F,
    url_count: &mut usize,
) -> String
where
    F: FnMut(&str, bool) -> String,
{
    const PATTERN: &str = "URI=\"";
    let mut result = String::with_capacity(line.len());
    let mut remaining = line;

    while let Some(start) = remaining.find(PATTERN) {
        result.push_str(&remaining[..start + PATTERN.len()]);
        remaining = &remaining[start + PATTERN.len()..];

        if let Some(end) = remaining.find('"') {
            let uri = &remaining[..end];
            *url_count += 1;
            if *url_count <= MAX_M3U8_URLS {
                let absolute = make_absolute(uri, base);
                result.push_str(&map_url(&absolute, is_m3u8_url(&absolute)));
            } else {
                result.push_str(uri);
            }
            result.push('"');
            remaining = &remaining[end + 1..];
        } else {
            result.push_str(remaining);
            remaining = "";
        }
    }

    result.push_str(remaining);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "https://cdn.example.com/live/stream.m3u8";

    #[test]
    fn test_is_m3u8_url() {
        assert!(is_m3u8_url("https://a/child.m3u8"));
        assert!(is_m3u8_url("child.m3u8?sig=abc"));
        assert!(!is_m3u8_url("seg-001.ts"));
        assert!(!is_m3u8_url("seg.m3u8.ts"));
    }

    #[test]
    fn test_segment_lines_rewritten() {
        let playlist = "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,\nseg1.ts\n";
        let out = rewrite_m3u8(playlist, SOURCE, |url, is_playlist| {
            assert!(!is_playlist);
            format!("/proxy?u={url}")
        });

        assert!(out.contains("/proxy?u=https://cdn.example.com/live/seg0.ts"));
        assert!(out.contains("/proxy?u=https://cdn.example.com/live/seg1.ts"));
        assert!(out.contains("#EXT-X-VERSION:3"));
    }

    #[test]
    fn test_variant_playlists_flagged() {
        let playlist = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n";
        let mut seen_playlist = false;
        rewrite_m3u8(playlist, SOURCE, |_, is_playlist| {
            seen_playlist |= is_playlist;
            String::new()
        });
        assert!(seen_playlist);
    }

    #[test]
    fn test_uri_attribute_rewritten() {
        let playlist = "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x1234\n";
        let out = rewrite_m3u8(playlist, SOURCE, |url, _| format!("/proxy?u={url}"));
        assert!(out.contains("URI=\"/proxy?u=https://cdn.example.com/live/key.bin\""));
        assert!(out.contains("IV=0x1234"));
    }

    #[test]
    fn test_absolute_urls_kept_absolute() {
        let playlist = "#EXTM3U\nhttps://other.example.com/seg.ts\n";
        let out = rewrite_m3u8(playlist, SOURCE, |url, _| format!("<{url}>"));
        assert!(out.contains("<https://other.example.com/seg.ts>"));
    }

    #[test]
    fn test_url_limit_enforced() {
        let mut playlist = String::from("#EXTM3U\n");
        for i in 0..(MAX_M3U8_URLS + 10) {
            playlist.push_str(&format!("seg{i}.ts\n"));
        }
        let mut count = 0;
        rewrite_m3u8(&playlist, SOURCE, |_, _| {
            count += 1;
            String::new()
        });
        assert_eq!(count, MAX_M3U8_URLS);
    }
}
