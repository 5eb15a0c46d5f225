//! Media proxy endpoints.
//!
//! `proxy/:movieId` serves progressive media, rewritten playlists, and DASH
//! manifests depending on the movie's source kind; `serveM3u8` proxies
//! playlist children under signed target tokens.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use cinesync_core::models::{Movie, MovieId, Permission, RoomId, User, VendorInfo};
use cinesync_core::{Error, Result};
use cinesync_proxy::target::{sign_target, verify_target};
use cinesync_proxy::{fetch_text, m3u8::rewrite_m3u8, mpd, proxy_url, ProxyRequest};

use super::auth::{auth_room, auth_user, extract_room_id, extract_token};
use super::error::{ApiResult, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub token: Option<String>,
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
    /// DASH stream index within the shared manifest.
    pub id: Option<usize>,
    /// `hevc` selects the HEVC rendition of the shared manifest.
    pub t: Option<String>,
}

fn bilibili_headers() -> HashMap<String, String> {
    HashMap::from([(
        "Referer".to_string(),
        "https://www.bilibili.com".to_string(),
    )])
}

fn m3u8_response(content: String) -> Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(content))
        .map_err(|e| Error::Internal(format!("failed to build response: {e}")))
}

fn mpd_response(content: String) -> Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/dash+xml")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(content))
        .map_err(|e| Error::Internal(format!("failed to build response: {e}")))
}

/// Rewrite every child of a fetched playlist to a `serveM3u8` path with a
/// fresh target token.
fn rewrite_playlist(
    state: &AppState,
    room_id: &RoomId,
    movie_id: &MovieId,
    bearer: &str,
    content: &str,
    source_url: &str,
) -> String {
    rewrite_m3u8(content, source_url, |target, is_playlist| {
        match sign_target(&state.tokens, room_id, movie_id, target, is_playlist) {
            Ok(target_token) => format!(
                "/api/room/movie/serveM3u8/{movie_id}/{target_token}?roomId={room_id}&token={bearer}"
            ),
            Err(err) => {
                tracing::warn!(error = %err, "failed to sign target token");
                target.to_string()
            }
        }
    })
}

/// GET /api/room/movie/proxy/:movieId
pub async fn proxy_movie(
    State(state): State<AppState>,
    Path(movie_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ProxyQuery>,
) -> ApiResult<Response> {
    let bearer = extract_token(&headers, query.token.as_deref()).unwrap_or_default();
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    let room = room_entry.value();
    room.has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let movie = room
        .movies()
        .get(&MovieId::from(movie_id.as_str()))
        .await?;
    if movie.base.rtmp_source {
        return Err(AppError(Error::InvalidInput(
            "RTMP-sourced movies are served from the live endpoints".into(),
        )));
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    if let Some(vendor) = movie.base.vendor_info.clone() {
        return vendor_response(
            &state, &room_id, &movie, &vendor, user.value(), &bearer, &query, range,
        )
        .await
        .map_err(AppError);
    }

    if movie.base.live || movie.base.movie_type == "m3u8" {
        if !movie.base.proxy {
            return Err(AppError(Error::InvalidInput(
                "proxy is not enabled for this movie".into(),
            )));
        }
        let content = fetch_text(&movie.base.url, &movie.base.headers).await?;
        let rewritten = rewrite_playlist(
            &state,
            &room_id,
            &movie.id,
            &bearer,
            &content,
            &movie.base.url,
        );
        return m3u8_response(rewritten).map_err(AppError);
    }

    if !movie.base.proxy {
        return Err(AppError(Error::InvalidInput(
            "proxy is not enabled for this movie".into(),
        )));
    }
    proxy_url(ProxyRequest {
        url: &movie.base.url,
        headers: &movie.base.headers,
        range,
        cache: state.proxy_cache.as_deref(),
        cache_key: None,
    })
    .await
    .map_err(AppError)
}

#[allow(clippy::too_many_arguments)]
async fn vendor_response(
    state: &AppState,
    room_id: &RoomId,
    movie: &Movie,
    vendor: &VendorInfo,
    user: &User,
    bearer: &str,
    query: &ProxyQuery,
    range: Option<&str>,
) -> Result<Response> {
    let vendors = state.runtime.vendors();
    match vendor {
        VendorInfo::Bilibili(source) => {
            let cache = vendors.bilibili_movie(movie)?;
            let user_cache = vendors.bilibili_user(&user.id);

            if movie.base.live {
                let playlist = cache.live.get(()).await?;
                let content = String::from_utf8_lossy(&playlist).into_owned();
                let rewritten = rewrite_playlist(
                    state,
                    room_id,
                    &movie.id,
                    bearer,
                    &content,
                    "https://live.bilibili.com/",
                );
                return m3u8_response(rewritten);
            }

            if source.shared {
                let bundle = cache.shared_mpd.get(user_cache).await?;
                return match query.id {
                    // Serve the manifest tokenized for this caller.
                    None => {
                        let data = if query.t.as_deref() == Some("hevc") {
                            bundle.hevc.as_ref().ok_or_else(|| {
                                Error::NotFound("no HEVC rendition".to_string())
                            })?
                        } else {
                            &bundle.avc
                        };
                        mpd_response(mpd::generate_mpd(
                            data,
                            &mpd::MpdOptions {
                                token: Some(bearer),
                            },
                        ))
                    }
                    // Serve one harvested segment stream.
                    Some(index) => {
                        let upstream = bundle.upstream_url(index)?;
                        proxy_url(ProxyRequest {
                            url: upstream,
                            headers: &bilibili_headers(),
                            range,
                            cache: state.proxy_cache.as_deref(),
                            cache_key: None,
                        })
                        .await
                    }
                };
            }

            let url_cache = cache.no_shared_url.load_or_store(user.id.clone());
            let url = url_cache.get(user_cache).await?;
            proxy_url(ProxyRequest {
                url: &url,
                headers: &bilibili_headers(),
                range,
                cache: state.proxy_cache.as_deref(),
                cache_key: None,
            })
            .await
        }
        VendorInfo::Alist(source) => {
            let cache = vendors.alist_movie(movie)?;
            let auth = vendors.alist_user(&user.id, &source.server_id);
            let resolved = cache
                .resolved
                .load_or_store(user.id.clone())
                .get(auth)
                .await?;
            if movie.base.movie_type == "m3u8" {
                let content = fetch_text(&resolved.url, &movie.base.headers).await?;
                let rewritten = rewrite_playlist(
                    state,
                    room_id,
                    &movie.id,
                    bearer,
                    &content,
                    &resolved.url,
                );
                return m3u8_response(rewritten);
            }
            proxy_url(ProxyRequest {
                url: &resolved.url,
                headers: &movie.base.headers,
                range,
                cache: state.proxy_cache.as_deref(),
                // Signed raw URLs rotate; cache on the stable path instead.
                cache_key: Some(&format!("alist:{}:{}", source.server_id, source.path)),
            })
            .await
        }
        VendorInfo::Emby(source) => {
            let cache = vendors.emby_movie(movie)?;
            let auth = vendors.emby_user(&user.id, &source.server_id);
            let playback = cache
                .playback
                .load_or_store(user.id.clone())
                .get(auth)
                .await?;
            proxy_url(ProxyRequest {
                url: &playback.url,
                headers: &movie.base.headers,
                range,
                cache: state.proxy_cache.as_deref(),
                cache_key: Some(&format!("emby:{}:{}", source.server_id, source.item_id)),
            })
            .await
        }
    }
}

/// GET /api/room/movie/serveM3u8/:movieId/:targetToken
pub async fn serve_m3u8(
    State(state): State<AppState>,
    Path((movie_id, target_token)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ProxyQuery>,
) -> ApiResult<Response> {
    let bearer = extract_token(&headers, query.token.as_deref()).unwrap_or_default();
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    let room = room_entry.value();
    room.has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let movie_id = MovieId::from(movie_id.as_str());
    let claims = verify_target(&state.tokens, &target_token, &room_id, &movie_id)?;

    // Source headers follow the movie when it still exists.
    let source_headers = room
        .movies()
        .get(&movie_id)
        .await
        .map(|m| m.base.headers)
        .unwrap_or_default();

    if claims.f {
        let content = fetch_text(&claims.u, &source_headers).await?;
        let rewritten = rewrite_playlist(&state, &room_id, &movie_id, &bearer, &content, &claims.u);
        return m3u8_response(rewritten).map_err(AppError);
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    proxy_url(ProxyRequest {
        url: &claims.u,
        headers: &source_headers,
        range,
        cache: state.proxy_cache.as_deref(),
        cache_key: None,
    })
    .await
    .map_err(AppError)
}

/// GET /api/room/movie/subtitle/:movieId/:name
pub async fn subtitle(
    State(state): State<AppState>,
    Path((movie_id, name)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ProxyQuery>,
) -> ApiResult<Response> {
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    let room = room_entry.value();
    room.has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let movie = room
        .movies()
        .get(&MovieId::from(movie_id.as_str()))
        .await?;
    let vendors = state.runtime.vendors();
    let cache = vendors.bilibili_movie(&movie)?;
    let user_cache = vendors.bilibili_user(&user.value().id);
    let subtitles = cache.subtitles.get(user_cache).await?;
    let item = subtitles
        .get(&name)
        .ok_or_else(|| Error::NotFound(format!("subtitle {name}")))?;
    let srt = item.srt.get(()).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/srt; charset=utf-8")
        .body(Body::from(srt))
        .map_err(|e| AppError(Error::Internal(format!("failed to build response: {e}"))))
}

/// GET /api/room/movie/danmu/:movieId
pub async fn danmu(
    State(state): State<AppState>,
    Path(movie_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ProxyQuery>,
) -> ApiResult<Response> {
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    let room = room_entry.value();
    room.has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let movie = room
        .movies()
        .get(&MovieId::from(movie_id.as_str()))
        .await?;
    let cache = state.runtime.vendors().bilibili_movie(&movie)?;
    let xml = cache.danmu.get(()).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
        .body(Body::from(xml))
        .map_err(|e| AppError(Error::Internal(format!("failed to build response: {e}"))))
}
