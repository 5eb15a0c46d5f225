//! Live delivery endpoints: HLS playlist + segments and HTTP-FLV.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use cinesync_core::models::{MovieId, Permission};
use cinesync_core::Error;
use cinesync_stream::{png, FlvSession};

use super::auth::{auth_room, auth_user, extract_room_id, extract_token};
use super::error::{ApiResult, AppError};
use super::room::RoomQuery;
use crate::AppState;

fn strip_ext<'a>(raw: &'a str, ext: &str) -> &'a str {
    raw.strip_suffix(ext).unwrap_or(raw)
}

/// GET /api/room/movie/live/hls/list/:movieId.m3u8
pub async fn hls_list(
    State(state): State<AppState>,
    Path(movie_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
) -> ApiResult<Response> {
    let bearer = extract_token(&headers, query.token.as_deref()).unwrap_or_default();
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    room_entry
        .value()
        .has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let movie_id = MovieId::from(strip_ext(&movie_id, ".m3u8"));
    let channel = state
        .live
        .get(&room_id, &movie_id)
        .ok_or_else(|| Error::NotFound("live stream".to_string()))?;

    let ext = if state.live.settings().ts_disguised_as_png {
        "png"
    } else {
        "ts"
    };
    let playlist = channel
        .playlist(|name| {
            format!(
                "/api/room/movie/live/hls/data/{room_id}/{movie_id}/{name}.{ext}?token={bearer}"
            )
        })
        .ok_or_else(|| Error::NotFound("no segments yet".to_string()))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(playlist))
        .map_err(|e| AppError(Error::Internal(format!("failed to build response: {e}"))))
}

/// GET /api/room/movie/live/hls/data/:roomId/:movieId/:dataId
pub async fn hls_data(
    State(state): State<AppState>,
    Path((room_id, movie_id, data_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
) -> ApiResult<Response> {
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, None, Some(&room_id))?;
    let room_entry = auth_room(&state, &room_id).await?;
    room_entry
        .value()
        .has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let movie_id = MovieId::from(movie_id.as_str());
    let channel = state
        .live
        .get(&room_id, &movie_id)
        .ok_or_else(|| Error::NotFound("live stream".to_string()))?;

    let disguised = data_id.ends_with(".png");
    let name = strip_ext(strip_ext(&data_id, ".ts"), ".png");
    let segment = channel
        .segment(name)
        .ok_or_else(|| Error::NotFound(format!("segment {name}")))?;

    let (content_type, body) = if disguised {
        ("image/png", png::disguise_segment(&segment))
    } else {
        ("video/mp2t", segment)
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=30")
        .body(Body::from(body))
        .map_err(|e| AppError(Error::Internal(format!("failed to build response: {e}"))))
}

/// GET /api/room/movie/live/flv/:movieId.flv
pub async fn flv(
    State(state): State<AppState>,
    Path(movie_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
) -> ApiResult<Response> {
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    room_entry
        .value()
        .has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let movie_id = MovieId::from(strip_ext(&movie_id, ".flv"));
    let channel = state
        .live
        .get(&room_id, &movie_id)
        .ok_or_else(|| Error::NotFound("live stream".to_string()))?;
    if !channel.has_publisher() {
        return Err(AppError(Error::NotFound("no publisher".to_string())));
    }

    let (prior, frames_rx) = channel.subscribe_flv();
    let (tx, rx) = mpsc::unbounded_channel();
    let room_for_log = room_id.clone();
    tokio::spawn(async move {
        if let Err(err) = FlvSession::new(tx).run(prior, frames_rx).await {
            debug!(room_id = %room_for_log, error = %err, "flv session ended");
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/x-flv")
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .body(Body::from_stream(UnboundedReceiverStream::new(rx)))
        .map_err(|e| AppError(Error::Internal(format!("failed to build response: {e}"))))
}
