//! Live channel: one publisher fanned out to FLV and HLS subscribers.
//!
//! Inbound frames land in the GOP buffer (for instant-start FLV), in a
//! broadcast channel (for ongoing FLV delivery), and in the HLS remuxer
//! (for the rolling segment playlist). Subscription and frame push are
//! linearized through the GOP lock so a new FLV subscriber neither misses
//! nor duplicates frames.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use cinesync_core::models::{MovieId, RoomId};

use crate::error::{StreamError, StreamResult};
use crate::gop::{GopBuffer, MediaFrame};
use crate::hls::HlsRemuxer;

const FRAME_FANOUT_DEPTH: usize = 512;

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub segment_seconds: u64,
    pub playlist_window: usize,
    pub ts_disguised_as_png: bool,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            segment_seconds: 4,
            playlist_window: 6,
            ts_disguised_as_png: false,
        }
    }
}

pub struct LiveChannel {
    room_id: RoomId,
    movie_id: MovieId,
    publisher: Mutex<Option<String>>,
    gop: RwLock<GopBuffer>,
    frames_tx: broadcast::Sender<MediaFrame>,
    hls: Mutex<HlsRemuxer>,
    closed: AtomicBool,
}

impl LiveChannel {
    pub fn new(
        room_id: RoomId,
        movie_id: MovieId,
        settings: &LiveSettings,
    ) -> StreamResult<Arc<Self>> {
        let (frames_tx, _) = broadcast::channel(FRAME_FANOUT_DEPTH);
        Ok(Arc::new(Self {
            room_id,
            movie_id,
            publisher: Mutex::new(None),
            gop: RwLock::new(GopBuffer::default()),
            frames_tx,
            hls: Mutex::new(HlsRemuxer::new(
                settings.segment_seconds,
                settings.playlist_window,
            )?),
            closed: AtomicBool::new(false),
        }))
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub fn movie_id(&self) -> &MovieId {
        &self.movie_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_publisher(&self) -> bool {
        self.publisher.lock().is_some()
    }

    /// Claim the single publisher slot.
    pub fn start_publish(&self, session_id: &str) -> StreamResult<()> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        let mut publisher = self.publisher.lock();
        if publisher.is_some() {
            return Err(StreamError::AlreadyPublishing);
        }
        *publisher = Some(session_id.to_string());
        info!(
            room_id = %self.room_id,
            movie_id = %self.movie_id,
            session_id,
            "publisher attached"
        );
        Ok(())
    }

    /// Release the publisher slot and flush the trailing HLS segment.
    pub fn end_publish(&self, session_id: &str) {
        let mut publisher = self.publisher.lock();
        if publisher.as_deref() != Some(session_id) {
            return;
        }
        *publisher = None;
        drop(publisher);

        if let Err(err) = self.hls.lock().finish() {
            debug!(error = %err, "failed to flush trailing segment");
        }
        self.gop.write().clear();
        info!(
            room_id = %self.room_id,
            movie_id = %self.movie_id,
            session_id,
            "publisher detached"
        );
    }

    /// Ingest one frame from the publisher.
    pub fn push_frame(&self, frame: MediaFrame) -> StreamResult<()> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        {
            let mut gop = self.gop.write();
            gop.push(frame.clone());
            // No receivers is fine; the GOP buffer covers late joiners.
            let _ = self.frames_tx.send(frame.clone());
        }
        self.hls.lock().process(&frame)
    }

    /// FLV subscription: the prior GOP snapshot plus ongoing frames.
    #[must_use]
    pub fn subscribe_flv(&self) -> (Vec<MediaFrame>, broadcast::Receiver<MediaFrame>) {
        let gop = self.gop.read();
        let rx = self.frames_tx.subscribe();
        (gop.snapshot(), rx)
    }

    /// Rolling playlist; `rewrite` maps segment names to served URIs.
    #[must_use]
    pub fn playlist<F>(&self, rewrite: F) -> Option<String>
    where
        F: FnMut(&str) -> String,
    {
        let hls = self.hls.lock();
        if !hls.has_segments() {
            return None;
        }
        Some(hls.playlist(rewrite))
    }

    #[must_use]
    pub fn segment(&self, name: &str) -> Option<Bytes> {
        self.hls.lock().segment(name)
    }

    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self.publisher.lock() = None;
        self.gop.write().clear();
    }
}

/// Registry of live channels keyed by (room, movie).
pub struct LiveRegistry {
    channels: DashMap<(RoomId, MovieId), Arc<LiveChannel>>,
    settings: LiveSettings,
}

impl LiveRegistry {
    #[must_use]
    pub fn new(settings: LiveSettings) -> Self {
        Self {
            channels: DashMap::new(),
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &LiveSettings {
        &self.settings
    }

    /// Get or create the channel for a movie.
    pub fn channel(&self, room_id: &RoomId, movie_id: &MovieId) -> StreamResult<Arc<LiveChannel>> {
        let key = (room_id.clone(), movie_id.clone());
        if let Some(channel) = self.channels.get(&key) {
            if !channel.is_closed() {
                return Ok(channel.clone());
            }
            self.channels
                .remove_if(&key, |_, current| current.is_closed());
        }
        let created = LiveChannel::new(room_id.clone(), movie_id.clone(), &self.settings)?;
        Ok(self.channels.entry(key).or_insert(created).clone())
    }

    /// Live channel lookup without creation.
    #[must_use]
    pub fn get(&self, room_id: &RoomId, movie_id: &MovieId) -> Option<Arc<LiveChannel>> {
        self.channels
            .get(&(room_id.clone(), movie_id.clone()))
            .map(|c| c.clone())
            .filter(|c| !c.is_closed())
    }

    pub fn remove(&self, room_id: &RoomId, movie_id: &MovieId) {
        if let Some((_, channel)) = self
            .channels
            .remove(&(room_id.clone(), movie_id.clone()))
        {
            channel.close();
        }
    }

    pub fn close_all(&self) {
        for entry in self.channels.iter() {
            entry.value().close();
        }
        self.channels.clear();
    }
}
