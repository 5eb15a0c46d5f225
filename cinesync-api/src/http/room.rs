//! Room read endpoints: current playback state and movie listings.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use cinesync_core::models::{is_valid_id, Movie, MovieId, Permission, RoomId, VendorInfo};
use cinesync_core::op::MAX_PAGE_SIZE;
use cinesync_core::Error;

use super::auth::{auth_room, auth_user, extract_room_id, extract_token};
use super::error::{ApiResult, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    pub token: Option<String>,
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
}

/// The URL and type a client should actually load for a movie.
///
/// Proxied and vendor-backed sources point back at the runtime; direct
/// sources pass through untouched.
pub fn client_source(movie: &Movie, room_id: &RoomId, bearer: &str) -> Value {
    let proxy_path = format!(
        "/api/room/movie/proxy/{}?roomId={}&token={}",
        movie.id, room_id, bearer
    );
    let (url, movie_type, headers) = if movie.base.rtmp_source {
        (
            format!(
                "/api/room/movie/live/hls/list/{}.m3u8?roomId={}&token={}",
                movie.id, room_id, bearer
            ),
            "m3u8".to_string(),
            None,
        )
    } else if let Some(vendor) = &movie.base.vendor_info {
        let movie_type = match vendor {
            VendorInfo::Bilibili(_) if movie.base.live => "m3u8".to_string(),
            VendorInfo::Bilibili(source) if source.shared => "mpd".to_string(),
            _ if movie.base.movie_type.is_empty() => "mp4".to_string(),
            _ => movie.base.movie_type.clone(),
        };
        (proxy_path, movie_type, None)
    } else if movie.base.proxy {
        (proxy_path, movie.base.movie_type.clone(), None)
    } else {
        (
            movie.base.url.clone(),
            movie.base.movie_type.clone(),
            Some(movie.base.headers.clone()),
        )
    };

    json!({
        "id": movie.id,
        "name": movie.base.name,
        "live": movie.base.live,
        "url": url,
        "type": movie_type,
        "headers": headers,
        "subtitles": movie.base.subtitles,
        "moreSources": movie.base.more_sources,
        "isFolder": movie.base.is_folder,
        "creatorId": movie.creator_id,
    })
}

/// GET /api/room/movie/current
pub async fn current(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
) -> ApiResult<Json<Value>> {
    let bearer = extract_token(&headers, query.token.as_deref()).unwrap_or_default();
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    let room = room_entry.value();
    room.has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let current = room.current();
    let movie = match &current.movie {
        Some(current_movie) => {
            let movie = room.movies().get(&current_movie.id).await?;
            let mut value = client_source(&movie, &room_id, &bearer);
            value["subPath"] = json!(current_movie.sub_path);
            Some(value)
        }
        None => None,
    };

    Ok(Json(json!({
        "current": {
            "movie": movie,
            "status": current.status,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct MoviesQuery {
    pub token: Option<String>,
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
    /// Folder to list; the room root when absent.
    pub id: Option<String>,
    #[serde(default)]
    pub keyword: String,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_max")]
    pub max: u64,
}

fn default_page() -> u64 {
    1
}

fn default_max() -> u64 {
    20
}

/// GET /api/room/movie/movies
pub async fn movies(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MoviesQuery>,
) -> ApiResult<Json<Value>> {
    let bearer = extract_token(&headers, query.token.as_deref()).unwrap_or_default();
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    let room = room_entry.value();
    room.has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let parent = match &query.id {
        Some(raw) => {
            if !is_valid_id(raw) {
                return Err(AppError(Error::InvalidInput("invalid folder id".into())));
            }
            Some(MovieId::from(raw.as_str()))
        }
        None => None,
    };

    // Dynamic folders list their children from the vendor.
    if let Some(parent_id) = &parent {
        let folder = room.movies().get(parent_id).await?;
        if folder.is_dynamic_folder() {
            let items =
                list_dynamic_folder(&state, &folder, user.value(), &query).await?;
            return Ok(Json(items));
        }
    }

    let page = room
        .movies()
        .list(parent.as_ref(), &query.keyword, query.page, query.max)
        .await?;
    let movies: Vec<Value> = page
        .movies
        .iter()
        .map(|m| client_source(m, &room_id, &bearer))
        .collect();
    Ok(Json(json!({ "total": page.total, "movies": movies })))
}

async fn list_dynamic_folder(
    state: &AppState,
    folder: &Movie,
    user: &cinesync_core::models::User,
    query: &MoviesQuery,
) -> Result<Value, AppError> {
    if query.max > MAX_PAGE_SIZE || query.max == 0 || query.page == 0 {
        return Err(AppError(Error::InvalidInput("bad page/size".into())));
    }
    let vendors = state.runtime.vendors();
    match &folder.base.vendor_info {
        Some(VendorInfo::Alist(source)) => {
            let auth = vendors.alist_user(&user.id, &source.server_id);
            let auth = auth.get(()).await?;
            let backend = vendors.backends().load(&source.backend)?;
            let listing = backend
                .call(backend.alist().fs_list(
                    &auth.host,
                    &auth.token,
                    &source.path,
                    &source.password,
                    query.page,
                    query.max,
                ))
                .await?;
            let items: Vec<Value> = listing
                .entries
                .iter()
                .map(|entry| {
                    json!({
                        "name": entry.name,
                        "isDir": entry.is_dir,
                        "size": entry.size,
                        "path": format!("{}/{}", source.path.trim_end_matches('/'), entry.name),
                    })
                })
                .collect();
            Ok(json!({ "total": listing.total, "items": items }))
        }
        Some(VendorInfo::Emby(source)) => {
            let auth = vendors.emby_user(&user.id, &source.server_id);
            let auth = auth.get(()).await?;
            let backend = vendors.backends().load(&source.backend)?;
            let listing = backend
                .call(backend.emby().items(
                    &auth.host,
                    &auth.api_key,
                    &source.item_id,
                    (query.page - 1) * query.max,
                    query.max,
                ))
                .await?;
            let items: Vec<Value> = listing
                .items
                .iter()
                .map(|item| {
                    json!({
                        "name": item.name,
                        "isDir": item.is_folder,
                        "id": item.id,
                    })
                })
                .collect();
            Ok(json!({ "total": listing.total, "items": items }))
        }
        _ => Err(AppError(Error::InvalidInput(
            "folder cannot be listed from vendor".into(),
        ))),
    }
}
