//! HTTP-FLV delivery.
//!
//! Wraps a channel subscription in FLV framing: header, prior GOP frames,
//! then live tags as they arrive. Output is pushed into an unbounded byte
//! channel the HTTP layer turns into a streaming response body.

use bytes::{Bytes, BytesMut};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use xflv::muxer::{FlvMuxer, HEADER_LENGTH};

use crate::error::{StreamError, StreamResult};
use crate::gop::MediaFrame;

/// Frames inspected before giving up on seeing both elementary streams.
const MAX_FRAMES_TO_GUESS_AV: usize = 10;

pub struct FlvSession {
    muxer: FlvMuxer,
    out: mpsc::UnboundedSender<Result<Bytes, std::io::Error>>,
    has_audio: bool,
    has_video: bool,
    header_sent: bool,
    pending: Vec<MediaFrame>,
}

impl FlvSession {
    #[must_use]
    pub fn new(out: mpsc::UnboundedSender<Result<Bytes, std::io::Error>>) -> Self {
        Self {
            muxer: FlvMuxer::new(),
            out,
            has_audio: false,
            has_video: false,
            header_sent: false,
            pending: Vec::new(),
        }
    }

    /// Run the session to completion: prior frames, then the live feed.
    pub async fn run(
        mut self,
        prior: Vec<MediaFrame>,
        mut rx: broadcast::Receiver<MediaFrame>,
    ) -> StreamResult<()> {
        for frame in prior {
            self.feed(frame)?;
        }
        loop {
            match rx.recv().await {
                Ok(frame) => self.feed(frame)?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "flv subscriber lagged, continuing from live edge");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        Ok(())
    }

    fn feed(&mut self, frame: MediaFrame) -> StreamResult<()> {
        if !self.header_sent {
            match &frame {
                MediaFrame::Audio { .. } => self.has_audio = true,
                MediaFrame::Video { .. } => self.has_video = true,
            }
            self.pending.push(frame);
            if (self.has_audio && self.has_video) || self.pending.len() > MAX_FRAMES_TO_GUESS_AV {
                self.write_header()?;
                for frame in std::mem::take(&mut self.pending) {
                    self.write_tag(&frame)?;
                }
            }
            return Ok(());
        }
        self.write_tag(&frame)
    }

    fn write_header(&mut self) -> StreamResult<()> {
        self.muxer
            .write_flv_header(self.has_audio, self.has_video)
            .map_err(|e| StreamError::Mux(format!("{e:?}")))?;
        self.muxer
            .write_previous_tag_size(0)
            .map_err(|e| StreamError::Mux(format!("{e:?}")))?;
        self.header_sent = true;
        self.flush()
    }

    fn write_tag(&mut self, frame: &MediaFrame) -> StreamResult<()> {
        let (tag_type, timestamp, data) = match frame {
            MediaFrame::Audio { timestamp, data } => (8u8, *timestamp, data),
            MediaFrame::Video { timestamp, data } => (9u8, *timestamp, data),
        };
        let len = data.len() as u32;
        self.muxer
            .write_flv_tag_header(tag_type, len, timestamp)
            .map_err(|e| StreamError::Mux(format!("{e:?}")))?;
        self.muxer
            .write_flv_tag_body(BytesMut::from(&data[..]))
            .map_err(|e| StreamError::Mux(format!("{e:?}")))?;
        self.muxer
            .write_previous_tag_size(len + HEADER_LENGTH)
            .map_err(|e| StreamError::Mux(format!("{e:?}")))?;
        self.flush()
    }

    fn flush(&mut self) -> StreamResult<()> {
        let data = self.muxer.writer.extract_current_bytes();
        if data.is_empty() {
            return Ok(());
        }
        self.out
            .send(Ok(Bytes::from(data.to_vec())))
            .map_err(|_| StreamError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    fn video(ts: u32) -> MediaFrame {
        MediaFrame::Video {
            timestamp: ts,
            data: Bytes::from_static(&[0x17, 0x01, 0, 0, 0]),
        }
    }

    fn audio(ts: u32) -> MediaFrame {
        MediaFrame::Audio {
            timestamp: ts,
            data: Bytes::from_static(&[0xAF, 0x01, 0x21]),
        }
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<Result<Bytes, std::io::Error>>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_header_after_both_streams_seen() {
        let (tx, mut out_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = broadcast::channel(16);
        let session = FlvSession::new(tx);

        let handle = tokio::spawn(session.run(vec![video(0), audio(0)], frames_rx));
        drop(frames_tx);
        handle.await.unwrap().unwrap();

        let bytes = collect(&mut out_rx).await;
        // "FLV" signature with both audio and video flags set (0b101).
        assert_eq!(&bytes[..3], b"FLV");
        assert_eq!(bytes[4], 0x05);
    }

    #[tokio::test]
    async fn test_header_forced_after_guess_window() {
        let (tx, mut out_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = broadcast::channel(64);
        let session = FlvSession::new(tx);

        let prior: Vec<MediaFrame> = (0..=MAX_FRAMES_TO_GUESS_AV as u32 + 1).map(video).collect();
        let handle = tokio::spawn(session.run(prior, frames_rx));
        drop(frames_tx);
        handle.await.unwrap().unwrap();

        let bytes = collect(&mut out_rx).await;
        assert_eq!(&bytes[..3], b"FLV");
        // Video-only flag.
        assert_eq!(bytes[4], 0x01);
    }

    #[tokio::test]
    async fn test_live_frames_follow_prior() {
        let (tx, mut out_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = broadcast::channel(16);
        let session = FlvSession::new(tx);

        let handle = tokio::spawn(session.run(vec![video(0), audio(0)], frames_rx));
        frames_tx.send(video(40)).unwrap();
        drop(frames_tx);
        handle.await.unwrap().unwrap();

        let bytes = collect(&mut out_rx).await;
        // Header + 3 tags: more data than header alone.
        assert!(bytes.len() > 13);
    }
}
