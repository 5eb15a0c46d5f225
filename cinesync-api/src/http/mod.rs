pub mod auth;
pub mod error;
pub mod live;
pub mod movie;
pub mod proxy;
pub mod room;
pub mod websocket;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

/// The core HTTP surface.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/room/ws", get(websocket::ws_handler))
        .route(
            "/api/room/movie/current",
            get(room::current).post(movie::set_current),
        )
        .route("/api/room/movie/movies", get(room::movies))
        .route("/api/room/movie/push", post(movie::push))
        .route("/api/room/movie/pushes", post(movie::pushes))
        .route("/api/room/movie/swap", post(movie::swap))
        .route("/api/room/movie/edit", post(movie::edit))
        .route("/api/room/movie/del", post(movie::del))
        .route("/api/room/movie/clear", post(movie::clear))
        .route("/api/room/movie/publishKey", post(movie::publish_key))
        .route("/api/room/movie/proxy/:movie_id", get(proxy::proxy_movie))
        .route(
            "/api/room/movie/serveM3u8/:movie_id/:target_token",
            get(proxy::serve_m3u8),
        )
        .route(
            "/api/room/movie/subtitle/:movie_id/:name",
            get(proxy::subtitle),
        )
        .route("/api/room/movie/danmu/:movie_id", get(proxy::danmu))
        .route("/api/room/movie/live/hls/list/:movie_id", get(live::hls_list))
        .route(
            "/api/room/movie/live/hls/data/:room_id/:movie_id/:data_id",
            get(live::hls_data),
        )
        .route("/api/room/movie/live/flv/:movie_id", get(live::flv))
        .with_state(state)
}
