//! RTMP publish authorization.
//!
//! A publish key ties exactly one publisher to one (room, movie) pair. Only
//! movies flagged as RTMP sources accept a publisher, and only the movie's
//! creator may mint a key.

use serde::{Deserialize, Serialize};

use super::auth::TokenService;
use crate::models::{MovieId, RoomId};
use crate::{Error, Result};

/// Publish tokens outlive typical streaming sessions but not by much.
pub const PUBLISH_KEY_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtmpClaims {
    /// Room ID (the RTMP `app`).
    pub r: String,
    /// Movie ID (the RTMP `stream`).
    pub m: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct PublishKeyService {
    tokens: TokenService,
}

impl PublishKeyService {
    #[must_use]
    pub fn new(tokens: TokenService) -> Self {
        Self { tokens }
    }

    /// Mint a publish token for `rtmp://<host>/<room>/<movie>?token=...`.
    pub fn new_rtmp_authorization(&self, room_id: &RoomId, movie_id: &MovieId) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        self.tokens.sign_claims(&RtmpClaims {
            r: room_id.as_str().to_string(),
            m: movie_id.as_str().to_string(),
            iat: now,
            exp: now + PUBLISH_KEY_TTL_HOURS * 3600,
        })
    }

    /// Validate a publish token against the app/stream pair the publisher
    /// presented.
    pub fn verify_publish(
        &self,
        token: &str,
        room_id: &RoomId,
        movie_id: &MovieId,
    ) -> Result<RtmpClaims> {
        let claims: RtmpClaims = self.tokens.verify_claims(token)?;
        if claims.r != room_id.as_str() {
            return Err(Error::Auth(format!(
                "publish token room mismatch: expected {room_id}"
            )));
        }
        if claims.m != movie_id.as_str() {
            return Err(Error::Auth(format!(
                "publish token movie mismatch: expected {movie_id}"
            )));
        }
        Ok(claims)
    }
}
