use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::MovieId;

/// Playback status of the room's current movie.
///
/// `seek` is the position as of `updated_at`; readers derive the position as
/// of now with [`Status::advanced`] without mutating the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub is_playing: bool,
    pub seek: f64,
    pub rate: f64,
    pub updated_at: DateTime<Utc>,
}

impl Status {
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_playing: false,
            seek: 0.0,
            rate: 1.0,
            updated_at: Utc::now(),
        }
    }

    /// The status as of `now`: while playing, seek advances by wall-clock
    /// elapsed time scaled by the playback rate.
    #[must_use]
    pub fn advanced(&self, now: DateTime<Utc>) -> Self {
        let mut out = self.clone();
        if self.is_playing {
            let elapsed = (now - self.updated_at).num_milliseconds() as f64 / 1000.0;
            out.seek = (self.seek + elapsed * self.rate).max(0.0);
        }
        out.updated_at = now;
        out
    }

    /// Apply a client-reported status. `time_diff` is the one-way offset the
    /// client observed (seconds, may be negative); it compensates for the
    /// transit delay of the message.
    pub fn set(&mut self, playing: bool, seek: f64, rate: f64, time_diff: f64) {
        self.is_playing = playing;
        self.seek = (seek + time_diff).max(0.0);
        self.rate = rate;
        self.updated_at = Utc::now();
    }

    /// Seek/rate change that leaves the play/pause state untouched.
    pub fn set_seek_rate(&mut self, seek: f64, rate: f64, time_diff: f64) {
        self.seek = (seek + time_diff).max(0.0);
        self.rate = rate;
        self.updated_at = Utc::now();
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference to the movie a room is currently playing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentMovie {
    pub id: MovieId,
    pub is_live: bool,
    /// Sub-path within a folder movie, empty otherwise.
    pub sub_path: String,
}

/// A room's authoritative playback state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Current {
    pub movie: Option<CurrentMovie>,
    pub status: Status,
}

impl Current {
    /// Copy with the status advanced to `now`.
    #[must_use]
    pub fn as_of(&self, now: DateTime<Utc>) -> Self {
        Self {
            movie: self.movie.clone(),
            status: self.status.advanced(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_advanced_while_playing() {
        let mut status = Status::new();
        status.is_playing = true;
        status.seek = 30.0;
        status.rate = 1.0;
        let t0 = status.updated_at;

        let later = status.advanced(t0 + Duration::seconds(5));
        assert!((later.seek - 35.0).abs() < 1e-6);
    }

    #[test]
    fn test_advanced_with_rate() {
        let mut status = Status::new();
        status.is_playing = true;
        status.seek = 10.0;
        status.rate = 2.0;
        let t0 = status.updated_at;

        let later = status.advanced(t0 + Duration::seconds(3));
        assert!((later.seek - 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_advanced_while_paused() {
        let mut status = Status::new();
        status.seek = 42.0;
        let t0 = status.updated_at;

        let later = status.advanced(t0 + Duration::seconds(60));
        assert!((later.seek - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_set_clamps_negative_seek() {
        let mut status = Status::new();
        status.set(true, 1.0, 1.0, -5.0);
        assert!((status.seek - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_time_diff_compensation() {
        let mut status = Status::new();
        status.set(true, 30.0, 1.0, 0.25);
        assert!((status.seek - 30.25).abs() < 1e-6);
    }

    #[test]
    fn test_set_seek_rate_keeps_playing_flag() {
        let mut status = Status::new();
        status.set(true, 10.0, 1.0, 0.0);
        status.set_seek_rate(20.0, 1.5, 0.0);
        assert!(status.is_playing);
        assert!((status.seek - 20.0).abs() < f64::EPSILON);
        assert!((status.rate - 1.5).abs() < f64::EPSILON);
    }
}
