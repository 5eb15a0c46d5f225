//! MPEG-DASH MPD XML generation from structured DASH data.
//!
//! Pure data → XML string conversion. Base URLs are already rewritten to
//! runtime paths when the manifest bundle is built; tokenization appends the
//! per-user token to every base URL at serve time, so concurrent callers
//! never share a mutable tree.

use std::fmt::Write;

use cinesync_core::provider::DashManifestData;

/// Options for MPD generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MpdOptions<'a> {
    /// Per-user token appended to every base URL as `&token=`.
    pub token: Option<&'a str>,
}

/// Generate MPD XML from structured DASH data.
#[must_use]
pub fn generate_mpd(data: &DashManifestData, opts: &MpdOptions<'_>) -> String {
    let mut xml = String::with_capacity(4096);

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let duration_str = format_duration(data.duration);
    let min_buf_str = format_duration(data.min_buffer_time.max(1.5));
    let _ = writeln!(
        xml,
        "<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\" \
         profiles=\"urn:mpeg:dash:profile:isoff-on-demand:2011\" \
         type=\"static\" \
         mediaPresentationDuration=\"{duration_str}\" \
         minBufferTime=\"{min_buf_str}\">"
    );

    xml.push_str("  <Period>\n");

    if !data.video_streams.is_empty() {
        xml.push_str(
            "    <AdaptationSet mimeType=\"video/mp4\" segmentAlignment=\"true\" startWithSAP=\"1\">\n",
        );
        for v in &data.video_streams {
            let _ = writeln!(
                xml,
                "      <Representation id=\"{}\" codecs=\"{}\" width=\"{}\" height=\"{}\" \
                 frameRate=\"{}\" bandwidth=\"{}\" sar=\"{}\" startWithSAP=\"{}\">",
                xml_escape(&v.id),
                xml_escape(&v.codecs),
                v.width,
                v.height,
                xml_escape(&v.frame_rate),
                v.bandwidth,
                xml_escape(if v.sar.is_empty() { "1:1" } else { &v.sar }),
                v.start_with_sap,
            );
            write_base_url(&mut xml, &v.base_url, opts);
            write_segment_base(
                &mut xml,
                &v.segment_base.initialization,
                &v.segment_base.index_range,
            );
            xml.push_str("      </Representation>\n");
        }
        xml.push_str("    </AdaptationSet>\n");
    }

    if !data.audio_streams.is_empty() {
        xml.push_str(
            "    <AdaptationSet mimeType=\"audio/mp4\" segmentAlignment=\"true\" startWithSAP=\"1\">\n",
        );
        for a in &data.audio_streams {
            let _ = writeln!(
                xml,
                "      <Representation id=\"{}\" codecs=\"{}\" bandwidth=\"{}\" \
                 audioSamplingRate=\"{}\" startWithSAP=\"{}\">",
                xml_escape(&a.id),
                xml_escape(&a.codecs),
                a.bandwidth,
                a.audio_sampling_rate,
                a.start_with_sap,
            );
            write_base_url(&mut xml, &a.base_url, opts);
            write_segment_base(
                &mut xml,
                &a.segment_base.initialization,
                &a.segment_base.index_range,
            );
            xml.push_str("      </Representation>\n");
        }
        xml.push_str("    </AdaptationSet>\n");
    }

    xml.push_str("  </Period>\n");
    xml.push_str("</MPD>\n");

    xml
}

fn write_base_url(xml: &mut String, base_url: &str, opts: &MpdOptions<'_>) {
    let mut url = base_url.to_string();
    if let Some(token) = opts.token {
        let encoded = crate::percent_encode(token);
        let separator = if url.contains('?') { '&' } else { '?' };
        let _ = write!(url, "{separator}token={encoded}");
    }
    let _ = writeln!(xml, "        <BaseURL>{}</BaseURL>", xml_escape(&url));
}

fn write_segment_base(xml: &mut String, initialization: &str, index_range: &str) {
    if initialization.is_empty() && index_range.is_empty() {
        return;
    }
    let _ = write!(
        xml,
        "        <SegmentBase indexRange=\"{}\">\n\
                   <Initialization range=\"{}\"/>\n\
                 </SegmentBase>\n",
        xml_escape(index_range),
        xml_escape(initialization),
    );
}

/// Format seconds as an ISO 8601 duration, e.g. `PT3M45.2S`.
fn format_duration(secs: f64) -> String {
    if secs <= 0.0 {
        return "PT0S".to_string();
    }
    let hours = (secs / 3600.0).floor() as u64;
    let mins = ((secs % 3600.0) / 60.0).floor() as u64;
    let remaining = secs % 60.0;

    let mut s = String::from("PT");
    if hours > 0 {
        let _ = write!(s, "{hours}H");
    }
    if mins > 0 {
        let _ = write!(s, "{mins}M");
    }
    if remaining > 0.0 || (hours == 0 && mins == 0) {
        let formatted = format!("{remaining:.1}");
        let formatted = formatted.trim_end_matches('0').trim_end_matches('.');
        let _ = write!(s, "{formatted}S");
    }
    s
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinesync_core::provider::{DashAudioStream, DashSegmentBase, DashVideoStream};

    fn sample_data() -> DashManifestData {
        DashManifestData {
            duration: 225.5,
            min_buffer_time: 1.5,
            video_streams: vec![DashVideoStream {
                id: "80".to_string(),
                base_url: "movieid123?id=0&roomId=room123".to_string(),
                backup_urls: vec![],
                mime_type: "video/mp4".to_string(),
                codecs: "avc1.64001F".to_string(),
                width: 1920,
                height: 1080,
                frame_rate: "30".to_string(),
                bandwidth: 2_000_000,
                sar: "1:1".to_string(),
                start_with_sap: 1,
                segment_base: DashSegmentBase {
                    initialization: "0-926".to_string(),
                    index_range: "927-9286".to_string(),
                },
            }],
            audio_streams: vec![DashAudioStream {
                id: "30280".to_string(),
                base_url: "movieid123?id=1&roomId=room123".to_string(),
                backup_urls: vec![],
                mime_type: "audio/mp4".to_string(),
                codecs: "mp4a.40.2".to_string(),
                bandwidth: 128_000,
                audio_sampling_rate: 44100,
                start_with_sap: 1,
                segment_base: DashSegmentBase {
                    initialization: "0-800".to_string(),
                    index_range: "801-5000".to_string(),
                },
            }],
        }
    }

    #[test]
    fn test_untokenized_mpd() {
        let mpd = generate_mpd(&sample_data(), &MpdOptions::default());
        assert!(mpd.contains("mediaPresentationDuration=\"PT3M45.5S\""));
        assert!(mpd.contains("codecs=\"avc1.64001F\""));
        assert!(mpd.contains("indexRange=\"927-9286\""));
        assert!(mpd.contains("movieid123?id=0&amp;roomId=room123"));
        assert!(!mpd.contains("token="));
    }

    #[test]
    fn test_tokenized_mpd() {
        let mpd = generate_mpd(
            &sample_data(),
            &MpdOptions {
                token: Some("tok123"),
            },
        );
        assert!(mpd.contains("movieid123?id=0&amp;roomId=room123&amp;token=tok123"));
        assert!(mpd.contains("movieid123?id=1&amp;roomId=room123&amp;token=tok123"));
    }

    #[test]
    fn test_token_without_existing_query() {
        let mut data = sample_data();
        data.audio_streams.clear();
        data.video_streams[0].base_url = "plain".to_string();
        let mpd = generate_mpd(
            &data,
            &MpdOptions {
                token: Some("tok"),
            },
        );
        assert!(mpd.contains("plain?token=tok"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "PT0S");
        assert_eq!(format_duration(30.0), "PT30S");
        assert_eq!(format_duration(90.5), "PT1M30.5S");
        assert_eq!(format_duration(3661.0), "PT1H1M1S");
    }
}
