//! Movie-list mutation endpoints and RTMP publish keys.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use cinesync_core::models::{is_valid_id, MovieBase, MovieId, Permission};
use cinesync_core::op::{RoomEntry, UserEntry};
use cinesync_core::Error;

use super::auth::{auth_room, auth_user, extract_room_id, extract_token};
use super::error::{ApiResult, AppError};
use super::room::RoomQuery;
use crate::AppState;

struct RequestContext {
    user: UserEntry,
    room: RoomEntry,
    bearer: String,
}

async fn context(
    state: &AppState,
    headers: &HeaderMap,
    query: &RoomQuery,
) -> Result<RequestContext, AppError> {
    let bearer = extract_token(headers, query.token.as_deref()).unwrap_or_default();
    let user = auth_user(state, headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(headers, query.room_id.as_deref(), None)?;
    let room = auth_room(state, &room_id).await?;
    Ok(RequestContext { user, room, bearer })
}

fn movie_id_from(raw: &str) -> Result<MovieId, AppError> {
    if !is_valid_id(raw) {
        return Err(AppError(Error::InvalidInput("invalid movie id".into())));
    }
    Ok(MovieId::from(raw))
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub base: MovieBase,
}

/// POST /api/room/movie/push
pub async fn push(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
    Json(body): Json<PushRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&state, &headers, &query).await?;
    let room = ctx.room.value();
    room.has_permission(ctx.user.value(), Permission::ADD_MOVIE)
        .await?;

    let parent = body
        .parent
        .as_deref()
        .map(movie_id_from)
        .transpose()?;
    let movie = room
        .movies()
        .push(&ctx.user.value().id, parent, body.base)
        .await?;
    Ok(Json(super::room::client_source(
        &movie,
        &room.id(),
        &ctx.bearer,
    )))
}

#[derive(Debug, Deserialize)]
pub struct PushManyRequest {
    #[serde(default)]
    pub parent: Option<String>,
    pub movies: Vec<MovieBase>,
}

/// POST /api/room/movie/pushes
pub async fn pushes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
    Json(body): Json<PushManyRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&state, &headers, &query).await?;
    let room = ctx.room.value();
    room.has_permission(ctx.user.value(), Permission::ADD_MOVIE)
        .await?;

    let parent = body
        .parent
        .as_deref()
        .map(movie_id_from)
        .transpose()?;
    let movies = room
        .movies()
        .push_many(&ctx.user.value().id, parent, body.movies)
        .await?;
    let out: Vec<Value> = movies
        .iter()
        .map(|m| super::room::client_source(m, &room.id(), &ctx.bearer))
        .collect();
    Ok(Json(json!({ "movies": out })))
}

#[derive(Debug, Deserialize)]
pub struct SwapRequest {
    pub id1: String,
    pub id2: String,
}

/// POST /api/room/movie/swap
pub async fn swap(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
    Json(body): Json<SwapRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&state, &headers, &query).await?;
    let room = ctx.room.value();
    room.has_permission(ctx.user.value(), Permission::EDIT_MOVIE)
        .await?;
    room.movies()
        .swap(&movie_id_from(&body.id1)?, &movie_id_from(&body.id2)?)
        .await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub id: String,
    #[serde(flatten)]
    pub base: MovieBase,
}

/// POST /api/room/movie/edit
pub async fn edit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
    Json(body): Json<EditRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&state, &headers, &query).await?;
    let room = ctx.room.value();
    room.has_permission(ctx.user.value(), Permission::EDIT_MOVIE)
        .await?;

    let id = movie_id_from(&body.id)?;
    let movie = room.movies().edit(&id, body.base).await?;
    // Stale vendor manifests must not outlive the edit.
    state.runtime.vendors().invalidate_movie(&id);
    Ok(Json(super::room::client_source(
        &movie,
        &room.id(),
        &ctx.bearer,
    )))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<String>,
}

/// POST /api/room/movie/del
pub async fn del(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
    Json(body): Json<DeleteRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&state, &headers, &query).await?;
    let room = ctx.room.value();
    room.has_permission(ctx.user.value(), Permission::DELETE_MOVIE)
        .await?;

    let ids = body
        .ids
        .iter()
        .map(|raw| movie_id_from(raw))
        .collect::<Result<Vec<_>, _>>()?;
    room.movies().delete(&ids).await?;
    for id in &ids {
        state.runtime.vendors().invalidate_movie(id);
    }
    Ok(Json(json!({})))
}

/// POST /api/room/movie/clear
pub async fn clear(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&state, &headers, &query).await?;
    let room = ctx.room.value();
    room.has_permission(ctx.user.value(), Permission::DELETE_MOVIE)
        .await?;
    room.movies().clear().await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct SetCurrentRequest {
    pub id: String,
    #[serde(default, rename = "subPath")]
    pub sub_path: String,
    #[serde(default)]
    pub play: bool,
}

/// POST /api/room/movie/current
pub async fn set_current(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
    Json(body): Json<SetCurrentRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&state, &headers, &query).await?;
    let room = ctx.room.value();
    let current = room
        .set_current_movie(
            ctx.user.value(),
            &movie_id_from(&body.id)?,
            &body.sub_path,
            body.play,
        )
        .await?;
    Ok(Json(json!({ "current": current })))
}

#[derive(Debug, Deserialize)]
pub struct PublishKeyRequest {
    pub id: String,
}

/// POST /api/room/movie/publishKey
///
/// Only the movie's creator may mint a publish token, and only for movies
/// flagged as RTMP sources.
pub async fn publish_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
    Json(body): Json<PublishKeyRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = context(&state, &headers, &query).await?;
    let room = ctx.room.value();
    let user = ctx.user.value();

    let movie = room.movies().get(&movie_id_from(&body.id)?).await?;
    if !movie.base.rtmp_source {
        return Err(AppError(Error::InvalidInput(
            "movie is not an RTMP source".into(),
        )));
    }
    if movie.creator_id != user.id && !user.is_root() {
        return Err(AppError(Error::NoPermission));
    }

    let token = state
        .publish_keys
        .new_rtmp_authorization(&room.id(), &movie.id)?;
    Ok(Json(json!({
        "host": format!(
            "rtmp://{}:{}",
            state.config.server.public_host, state.config.server.rtmp_port
        ),
        "app": room.id(),
        "token": token,
    })))
}
