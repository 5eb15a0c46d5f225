//! Signed target tokens for proxied playlist children.
//!
//! Every child URI in a served M3U8 is rewritten to a runtime path carrying
//! one of these tokens. The token binds the target URL to the (room, movie)
//! pair it was issued for, so a leaked segment path cannot be replayed
//! against another room.

use serde::{Deserialize, Serialize};

use cinesync_core::models::{MovieId, RoomId};
use cinesync_core::service::TokenService;
use cinesync_core::{Error, Result};

/// Long enough to play through a VOD playlist, short enough to rotate.
pub const TARGET_TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetClaims {
    /// Room ID.
    pub r: String,
    /// Movie ID.
    pub m: String,
    /// Upstream target URL.
    pub u: String,
    /// Whether the target is itself a playlist (recursive rewrite).
    pub f: bool,
    pub iat: i64,
    pub exp: i64,
}

pub fn sign_target(
    tokens: &TokenService,
    room_id: &RoomId,
    movie_id: &MovieId,
    target_url: &str,
    is_m3u8_file: bool,
) -> Result<String> {
    let now = chrono::Utc::now().timestamp();
    tokens.sign_claims(&TargetClaims {
        r: room_id.as_str().to_string(),
        m: movie_id.as_str().to_string(),
        u: target_url.to_string(),
        f: is_m3u8_file,
        iat: now,
        exp: now + TARGET_TOKEN_TTL_SECS,
    })
}

/// Validate a target token and assert it was issued for this room/movie.
pub fn verify_target(
    tokens: &TokenService,
    token: &str,
    room_id: &RoomId,
    movie_id: &MovieId,
) -> Result<TargetClaims> {
    let claims: TargetClaims = tokens.verify_claims(token)?;
    if claims.r != room_id.as_str() || claims.m != movie_id.as_str() {
        return Err(Error::Auth(
            "target token does not match this room and movie".to_string(),
        ));
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinesync_core::service::DEFAULT_TOKEN_TTL_HOURS;

    fn tokens() -> TokenService {
        TokenService::new("secret", DEFAULT_TOKEN_TTL_HOURS).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let tokens = tokens();
        let room = RoomId::new();
        let movie = MovieId::new();
        let token = sign_target(
            &tokens,
            &room,
            &movie,
            "https://cdn.example.com/seg0.ts",
            false,
        )
        .unwrap();

        let claims = verify_target(&tokens, &token, &room, &movie).unwrap();
        assert_eq!(claims.u, "https://cdn.example.com/seg0.ts");
        assert!(!claims.f);
    }

    #[test]
    fn test_binding_enforced() {
        let tokens = tokens();
        let room = RoomId::new();
        let movie = MovieId::new();
        let token = sign_target(&tokens, &room, &movie, "https://x/seg.ts", false).unwrap();

        assert!(verify_target(&tokens, &token, &RoomId::new(), &movie).is_err());
        assert!(verify_target(&tokens, &token, &room, &MovieId::new()).is_err());
    }

    #[test]
    fn test_playlist_flag_survives() {
        let tokens = tokens();
        let room = RoomId::new();
        let movie = MovieId::new();
        let token = sign_target(&tokens, &room, &movie, "https://x/child.m3u8", true).unwrap();
        assert!(verify_target(&tokens, &token, &room, &movie).unwrap().f);
    }
}
