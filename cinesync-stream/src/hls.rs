//! FLV → MPEG-TS remuxing into a rolling HLS playlist.
//!
//! Frames from the publisher are demuxed with xflv, written through
//! xmpegts' `TsMuxer`, and cut into segments at keyframe boundaries once
//! the target duration has elapsed. Segments live in memory and roll out of
//! the playlist window as new ones land.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

use xflv::demuxer::{FlvAudioTagDemuxer, FlvVideoTagDemuxer};
use xmpegts::define::{epsi_stream_type, MPEG_FLAG_IDR_FRAME};
use xmpegts::ts::TsMuxer;

use crate::error::{StreamError, StreamResult};
use crate::gop::MediaFrame;

#[derive(Debug, Clone)]
pub struct Segment {
    pub sequence: u64,
    pub duration_ms: i64,
    /// Monotonically increasing name used in playlist URIs.
    pub name: String,
    pub data: Bytes,
    pub discontinuity: bool,
}

pub struct HlsRemuxer {
    video_demuxer: FlvVideoTagDemuxer,
    audio_demuxer: FlvAudioTagDemuxer,
    ts_muxer: TsMuxer,
    video_pid: u16,
    audio_pid: u16,

    segments: VecDeque<Segment>,
    window: usize,
    sequence: u64,
    segment_duration_ms: i64,
    last_segment_dts: i64,
    last_dts: i64,
    ended: bool,
}

impl HlsRemuxer {
    pub fn new(segment_seconds: u64, window: usize) -> StreamResult<Self> {
        let mut ts_muxer = TsMuxer::new();
        let audio_pid = ts_muxer
            .add_stream(epsi_stream_type::PSI_STREAM_AAC, BytesMut::new())
            .map_err(|e| StreamError::Mux(format!("{e:?}")))?;
        let video_pid = ts_muxer
            .add_stream(epsi_stream_type::PSI_STREAM_H264, BytesMut::new())
            .map_err(|e| StreamError::Mux(format!("{e:?}")))?;

        Ok(Self {
            video_demuxer: FlvVideoTagDemuxer::new(),
            audio_demuxer: FlvAudioTagDemuxer::new(),
            ts_muxer,
            video_pid,
            audio_pid,
            segments: VecDeque::new(),
            window,
            sequence: 0,
            segment_duration_ms: (segment_seconds * 1000) as i64,
            last_segment_dts: 0,
            last_dts: 0,
            ended: false,
        })
    }

    pub fn process(&mut self, frame: &MediaFrame) -> StreamResult<()> {
        let (pid, pts, dts, flags, payload) = match frame {
            MediaFrame::Video { timestamp, data } => {
                let demuxed = self
                    .video_demuxer
                    .demux(*timestamp, BytesMut::from(&data[..]))
                    .map_err(|e| StreamError::Demux(format!("{e:?}")))?;
                let Some(video) = demuxed else {
                    return Ok(());
                };

                let mut flags = 0;
                if frame.is_keyframe() {
                    flags = MPEG_FLAG_IDR_FRAME;
                    if video.dts - self.last_segment_dts >= self.segment_duration_ms {
                        self.cut_segment(video.dts, false)?;
                    }
                }
                let mut payload = BytesMut::new();
                payload.extend_from_slice(&video.data);
                self.last_dts = video.dts;
                (self.video_pid, video.pts, video.dts, flags, payload)
            }
            MediaFrame::Audio { timestamp, data } => {
                let audio = self
                    .audio_demuxer
                    .demux(*timestamp, BytesMut::from(&data[..]))
                    .map_err(|e| StreamError::Demux(format!("{e:?}")))?;
                if !audio.has_data {
                    return Ok(());
                }
                let mut payload = BytesMut::new();
                payload.extend_from_slice(&audio.data);
                self.last_dts = audio.dts;
                (self.audio_pid, audio.pts, audio.dts, 0, payload)
            }
        };

        self.ts_muxer
            .write(pid, pts * 90, dts * 90, flags, payload)
            .map_err(|e| StreamError::Mux(format!("{e:?}")))?;
        Ok(())
    }

    fn cut_segment(&mut self, current_dts: i64, is_eof: bool) -> StreamResult<()> {
        let data = self.ts_muxer.get_data();
        if !data.is_empty() {
            let segment = Segment {
                sequence: self.sequence,
                duration_ms: current_dts - self.last_segment_dts,
                name: format!("{:08}", self.sequence),
                data: data.freeze(),
                discontinuity: false,
            };
            self.segments.push_back(segment);
            while self.segments.len() > self.window {
                self.segments.pop_front();
            }
            self.sequence += 1;
        }
        self.ts_muxer.reset();
        self.last_segment_dts = current_dts;
        if is_eof {
            self.ended = true;
        }
        Ok(())
    }

    /// Flush the trailing partial segment when the publisher leaves.
    pub fn finish(&mut self) -> StreamResult<()> {
        if self.last_dts > self.last_segment_dts {
            self.cut_segment(self.last_dts, true)?;
        } else {
            self.ended = true;
        }
        Ok(())
    }

    #[must_use]
    pub fn segment(&self, name: &str) -> Option<Bytes> {
        self.segments
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.data.clone())
    }

    #[must_use]
    pub fn has_segments(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Rolling playlist; `rewrite` maps a segment name to the URI served to
    /// clients (path, extension, auth token).
    #[must_use]
    pub fn playlist<F>(&self, mut rewrite: F) -> String
    where
        F: FnMut(&str) -> String,
    {
        let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

        let target = self
            .segments
            .iter()
            .map(|s| (s.duration_ms + 999) / 1000)
            .max()
            .unwrap_or_else(|| (self.segment_duration_ms + 999) / 1000);
        out.push_str(&format!("#EXT-X-TARGETDURATION:{target}\n"));

        let first = self.segments.front().map_or(0, |s| s.sequence);
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{first}\n"));

        for segment in &self.segments {
            if segment.discontinuity {
                out.push_str("#EXT-X-DISCONTINUITY\n");
            }
            out.push_str(&format!(
                "#EXTINF:{:.3},\n",
                segment.duration_ms as f64 / 1000.0
            ));
            out.push_str(&rewrite(&segment.name));
            out.push('\n');
        }
        if self.ended {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remuxer() -> HlsRemuxer {
        HlsRemuxer::new(4, 6).unwrap()
    }

    fn push_segment(r: &mut HlsRemuxer, sequence_end_dts: i64) {
        // Drive the segment clock directly; TS payload content is exercised
        // end-to-end by the integration path, not here.
        r.ts_muxer
            .write(
                r.video_pid,
                sequence_end_dts * 90,
                sequence_end_dts * 90,
                MPEG_FLAG_IDR_FRAME,
                BytesMut::from(&[0u8; 188][..]),
            )
            .unwrap();
        r.cut_segment(sequence_end_dts, false).unwrap();
    }

    #[test]
    fn test_playlist_shape() {
        let mut r = remuxer();
        push_segment(&mut r, 4000);
        push_segment(&mut r, 8000);

        let playlist = r.playlist(|name| format!("/live/data/{name}.ts"));
        assert!(playlist.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n"));
        assert!(playlist.contains("#EXT-X-TARGETDURATION:4"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
        assert!(playlist.contains("#EXTINF:4.000,\n/live/data/00000000.ts"));
        assert!(!playlist.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_window_rolls() {
        let mut r = remuxer();
        for i in 1..=10 {
            push_segment(&mut r, i * 4000);
        }
        assert_eq!(r.segments.len(), 6);

        let playlist = r.playlist(|name| name.to_string());
        // First four segments rolled out of the window.
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:4"));
        assert!(r.segment("00000003").is_none());
        assert!(r.segment("00000009").is_some());
    }

    #[test]
    fn test_finish_marks_endlist() {
        let mut r = remuxer();
        push_segment(&mut r, 4000);
        r.finish().unwrap();
        let playlist = r.playlist(|name| name.to_string());
        assert!(playlist.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_segment_names_monotonic() {
        let mut r = remuxer();
        for i in 1..=3 {
            push_segment(&mut r, i * 4000);
        }
        let names: Vec<_> = r.segments.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["00000000", "00000001", "00000002"]);
    }
}
