//! GOP buffer for instant playback on join.
//!
//! Keeps the last N groups of pictures plus the AVC/AAC sequence headers so
//! a new subscriber can start decoding from the latest keyframe instead of
//! waiting for the next one.

use bytes::Bytes;
use std::collections::VecDeque;

/// One FLV-tag-shaped media frame.
#[derive(Debug, Clone)]
pub enum MediaFrame {
    Audio { timestamp: u32, data: Bytes },
    Video { timestamp: u32, data: Bytes },
}

impl MediaFrame {
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        match self {
            Self::Audio { timestamp, .. } | Self::Video { timestamp, .. } => *timestamp,
        }
    }

    #[must_use]
    pub fn data(&self) -> &Bytes {
        match self {
            Self::Audio { data, .. } | Self::Video { data, .. } => data,
        }
    }

    #[must_use]
    pub const fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }

    /// H.264 keyframe: FLV frame-type nibble == 1.
    #[must_use]
    pub fn is_keyframe(&self) -> bool {
        match self {
            Self::Video { data, .. } => !data.is_empty() && (data[0] >> 4) & 0x0F == 1,
            Self::Audio { .. } => false,
        }
    }

    /// AVC sequence header: keyframe with AVCPacketType == 0.
    #[must_use]
    pub fn is_video_sequence_header(&self) -> bool {
        match self {
            Self::Video { data, .. } => self.is_keyframe() && data.len() > 1 && data[1] == 0,
            Self::Audio { .. } => false,
        }
    }

    /// AAC sequence header: sound format 10 with AACPacketType == 0.
    #[must_use]
    pub fn is_audio_sequence_header(&self) -> bool {
        match self {
            Self::Audio { data, .. } => {
                data.len() > 1 && (data[0] >> 4) & 0x0F == 10 && data[1] == 0
            }
            Self::Video { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GopConfig {
    pub max_gops: usize,
    pub max_bytes: usize,
}

impl Default for GopConfig {
    fn default() -> Self {
        Self {
            max_gops: 2,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

pub struct GopBuffer {
    config: GopConfig,
    gops: VecDeque<Vec<MediaFrame>>,
    current: Vec<MediaFrame>,
    total_bytes: usize,
    video_sequence_header: Option<MediaFrame>,
    audio_sequence_header: Option<MediaFrame>,
}

impl GopBuffer {
    #[must_use]
    pub fn new(config: GopConfig) -> Self {
        Self {
            config,
            gops: VecDeque::new(),
            current: Vec::new(),
            total_bytes: 0,
            video_sequence_header: None,
            audio_sequence_header: None,
        }
    }

    fn evict_oldest_gop(&mut self) {
        if let Some(old) = self.gops.pop_front() {
            let old_size: usize = old.iter().map(|f| f.data().len()).sum();
            self.total_bytes = self.total_bytes.saturating_sub(old_size);
        }
    }

    pub fn push(&mut self, frame: MediaFrame) {
        if frame.is_video_sequence_header() {
            self.video_sequence_header = Some(frame);
            return;
        }
        if frame.is_audio_sequence_header() {
            self.audio_sequence_header = Some(frame);
            return;
        }

        // A keyframe closes the current GOP and starts a new one.
        if frame.is_keyframe() && !self.current.is_empty() {
            let completed = std::mem::take(&mut self.current);
            self.gops.push_back(completed);
            while self.gops.len() > self.config.max_gops {
                self.evict_oldest_gop();
            }
        }

        self.total_bytes += frame.data().len();
        self.current.push(frame);

        if self.total_bytes > self.config.max_bytes {
            self.evict_oldest_gop();
        }
    }

    /// Everything a new subscriber needs: sequence headers, completed GOPs,
    /// then the GOP in progress.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MediaFrame> {
        let mut frames = Vec::new();
        frames.extend(self.video_sequence_header.clone());
        frames.extend(self.audio_sequence_header.clone());
        for gop in &self.gops {
            frames.extend_from_slice(gop);
        }
        frames.extend_from_slice(&self.current);
        frames
    }

    pub fn clear(&mut self) {
        self.gops.clear();
        self.current.clear();
        self.total_bytes = 0;
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

impl Default for GopBuffer {
    fn default() -> Self {
        Self::new(GopConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(keyframe: bool, size: usize) -> MediaFrame {
        let mut data = vec![0u8; size.max(2)];
        data[0] = if keyframe { 0x17 } else { 0x27 };
        data[1] = 1; // NALU, not a sequence header
        MediaFrame::Video {
            timestamp: 0,
            data: Bytes::from(data),
        }
    }

    fn avc_sequence_header() -> MediaFrame {
        MediaFrame::Video {
            timestamp: 0,
            data: Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00]),
        }
    }

    fn aac_sequence_header() -> MediaFrame {
        MediaFrame::Audio {
            timestamp: 0,
            data: Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]),
        }
    }

    #[test]
    fn test_frame_classification() {
        assert!(video(true, 8).is_keyframe());
        assert!(!video(false, 8).is_keyframe());
        assert!(avc_sequence_header().is_video_sequence_header());
        assert!(!video(true, 8).is_video_sequence_header());
        assert!(aac_sequence_header().is_audio_sequence_header());
    }

    #[test]
    fn test_sequence_headers_always_first_in_snapshot() {
        let mut buffer = GopBuffer::default();
        buffer.push(video(true, 100));
        buffer.push(avc_sequence_header());
        buffer.push(aac_sequence_header());
        buffer.push(video(false, 50));

        let frames = buffer.snapshot();
        assert!(frames[0].is_video_sequence_header());
        assert!(frames[1].is_audio_sequence_header());
        assert_eq!(frames.len(), 4);
    }

    #[test]
    fn test_gop_rotation() {
        let mut buffer = GopBuffer::new(GopConfig {
            max_gops: 2,
            max_bytes: 1024 * 1024,
        });
        for _ in 0..4 {
            buffer.push(video(true, 100));
            buffer.push(video(false, 50));
        }
        // 3 complete GOPs, oldest evicted to keep 2, plus the current one.
        assert_eq!(buffer.gops.len(), 2);
        assert_eq!(buffer.current.len(), 2);
    }

    #[test]
    fn test_byte_cap_evicts() {
        let mut buffer = GopBuffer::new(GopConfig {
            max_gops: 10,
            max_bytes: 300,
        });
        buffer.push(video(true, 200));
        buffer.push(video(true, 200));
        buffer.push(video(true, 200));
        assert!(buffer.total_bytes() <= 600);
        assert!(buffer.gops.len() < 3);
    }
}
