//! Lock-guarded authoritative playback state for one room.

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use crate::models::{Current, CurrentMovie, RoomId, Status};
use crate::{Error, Result};

/// Queue of pending best-effort persistence writes.
pub type PersistSender = mpsc::UnboundedSender<(RoomId, Current)>;

pub struct CurrentCell {
    room_id: RoomId,
    inner: RwLock<Current>,
    persist: Option<PersistSender>,
}

impl CurrentCell {
    #[must_use]
    pub fn new(room_id: RoomId, initial: Option<Current>, persist: Option<PersistSender>) -> Self {
        Self {
            room_id,
            inner: RwLock::new(initial.unwrap_or_default()),
            persist,
        }
    }

    /// Snapshot with the seek advanced to now. Reads never mutate state.
    #[must_use]
    pub fn current(&self) -> Current {
        self.inner.read().as_of(chrono::Utc::now())
    }

    #[must_use]
    pub fn current_movie(&self) -> Option<CurrentMovie> {
        self.inner.read().movie.clone()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.read().status.advanced(chrono::Utc::now())
    }

    fn queue_persist(&self, current: &Current) {
        if let Some(persist) = &self.persist {
            if persist
                .send((self.room_id.clone(), current.clone()))
                .is_err()
            {
                warn!(room_id = %self.room_id, "current persistence queue closed");
            }
        }
    }

    fn validate(seek: f64, rate: f64) -> Result<()> {
        if !seek.is_finite() || seek < 0.0 {
            return Err(Error::InvalidInput("seek must be non-negative".to_string()));
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::InvalidInput(
                "playback rate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn set_status(
        &self,
        playing: bool,
        seek: f64,
        rate: f64,
        time_diff: f64,
    ) -> Result<Status> {
        Self::validate(seek, rate)?;
        let snapshot = {
            let mut inner = self.inner.write();
            inner.status.set(playing, seek, rate, time_diff);
            inner.clone()
        };
        self.queue_persist(&snapshot);
        Ok(snapshot.status)
    }

    pub fn set_seek_rate(&self, seek: f64, rate: f64, time_diff: f64) -> Result<Status> {
        Self::validate(seek, rate)?;
        let snapshot = {
            let mut inner = self.inner.write();
            inner.status.set_seek_rate(seek, rate, time_diff);
            inner.clone()
        };
        self.queue_persist(&snapshot);
        Ok(snapshot.status)
    }

    /// Replace the current movie; seek resets to zero.
    pub fn set_movie(&self, movie: Option<CurrentMovie>, play: bool) -> Current {
        let snapshot = {
            let mut inner = self.inner.write();
            inner.movie = movie;
            let rate = inner.status.rate;
            inner.status.set(play, 0.0, rate, 0.0);
            inner.clone()
        };
        self.queue_persist(&snapshot);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MovieId;

    fn cell() -> CurrentCell {
        CurrentCell::new(RoomId::new(), None, None)
    }

    #[test]
    fn test_set_movie_resets_seek() {
        let cell = cell();
        cell.set_status(true, 100.0, 1.0, 0.0).unwrap();

        let movie = CurrentMovie {
            id: MovieId::new(),
            is_live: false,
            sub_path: String::new(),
        };
        let current = cell.set_movie(Some(movie.clone()), true);

        assert_eq!(current.movie.unwrap().id, movie.id);
        assert!(current.status.is_playing);
        assert!((current.status.seek - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let cell = cell();
        assert!(cell.set_status(true, 0.0, 0.0, 0.0).is_err());
        assert!(cell.set_status(true, 0.0, -1.0, 0.0).is_err());
        assert!(cell.set_status(true, f64::NAN, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_status_reads_advance() {
        let cell = cell();
        cell.set_status(true, 10.0, 2.0, 0.0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));

        let status = cell.status();
        assert!(status.seek > 10.0);
        // The stored value is untouched by reads.
        let raw = cell.inner.read().status.seek;
        assert!((raw - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_persist_queue_receives_mutations() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cell = CurrentCell::new(RoomId::new(), None, Some(tx));

        cell.set_status(true, 5.0, 1.0, 0.0).unwrap();
        let (_, current) = rx.try_recv().unwrap();
        assert!((current.status.seek - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_negative_time_diff_clamped() {
        let cell = cell();
        let status = cell.set_status(false, 1.0, 1.0, -10.0).unwrap();
        assert!((status.seek - 0.0).abs() < f64::EPSILON);
    }
}
