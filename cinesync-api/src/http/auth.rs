//! Request authentication helpers.
//!
//! Bearer tokens are accepted from the `Authorization` header, the
//! WebSocket subprotocol header, or a `?token=` query parameter, in that
//! order. An absent token resolves to the shared guest identity; whether a
//! guest may act is decided per room.

use axum::http::HeaderMap;

use cinesync_core::models::{is_valid_id, RoomId};
use cinesync_core::op::{RoomEntry, UserEntry};
use cinesync_core::{Error, Result};

use crate::AppState;

/// Pull the bearer token out of a request, if any.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get("Authorization") {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    if let Some(value) = headers.get("Sec-WebSocket-Protocol") {
        if let Ok(value) = value.to_str() {
            // The client offers the token as a subprotocol entry.
            if let Some(token) = value.split(',').map(str::trim).find(|p| !p.is_empty()) {
                return Some(token.to_string());
            }
        }
    }
    query_token
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Resolve the requesting user: token holders are validated against their
/// user version, everyone else becomes the guest.
pub async fn auth_user(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<UserEntry> {
    match extract_token(headers, query_token) {
        Some(token) => state.runtime.authenticate(&state.tokens, &token).await,
        None => {
            let guest = state.runtime.load_or_init_guest().await?;
            guest.value().check_active()?;
            Ok(guest)
        }
    }
}

/// Resolve the room ID from `X-Room-Id`, `?roomId=`, or a path parameter.
pub fn extract_room_id(
    headers: &HeaderMap,
    query_room: Option<&str>,
    path_room: Option<&str>,
) -> Result<RoomId> {
    let raw = headers
        .get("X-Room-Id")
        .and_then(|v| v.to_str().ok())
        .or(query_room)
        .or(path_room)
        .unwrap_or_default();
    if !is_valid_id(raw) {
        return Err(Error::InvalidInput("invalid room id".to_string()));
    }
    Ok(RoomId::from(raw))
}

/// Load a live, active room.
pub async fn auth_room(state: &AppState, room_id: &RoomId) -> Result<RoomEntry> {
    let entry = state.runtime.load_or_init_room(room_id).await?;
    entry.value().check_active()?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_token_priority() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer aaa"));
        headers.insert("Sec-WebSocket-Protocol", HeaderValue::from_static("bbb"));
        assert_eq!(
            extract_token(&headers, Some("ccc")),
            Some("aaa".to_string())
        );

        headers.remove("Authorization");
        assert_eq!(
            extract_token(&headers, Some("ccc")),
            Some("bbb".to_string())
        );

        headers.remove("Sec-WebSocket-Protocol");
        assert_eq!(
            extract_token(&headers, Some("ccc")),
            Some("ccc".to_string())
        );
        assert_eq!(extract_token(&headers, None), None);
        assert_eq!(extract_token(&headers, Some("")), None);
    }

    #[test]
    fn test_room_id_sources() {
        let raw = "0123456789abcdef0123456789abcdef";
        let mut headers = HeaderMap::new();

        assert!(extract_room_id(&headers, None, None).is_err());
        assert!(extract_room_id(&headers, Some("nope"), None).is_err());
        assert_eq!(
            extract_room_id(&headers, Some(raw), None).unwrap().as_str(),
            raw
        );
        assert_eq!(
            extract_room_id(&headers, None, Some(raw)).unwrap().as_str(),
            raw
        );

        headers.insert("X-Room-Id", HeaderValue::from_static("0123456789abcdef0123456789abcdef"));
        assert!(extract_room_id(&headers, Some("ignored"), None).is_ok());
    }
}
