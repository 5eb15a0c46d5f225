//! RTMP publish authentication against the room runtime.

use std::sync::Arc;

use async_trait::async_trait;

use cinesync_core::models::{is_valid_id, MovieId, RoomId};
use cinesync_core::op::Runtime;
use cinesync_core::service::PublishKeyService;
use cinesync_stream::{PublishAuth, StreamError, StreamResult};

/// Validates publish tokens and checks the target movie is a live RTMP
/// source in an active room.
pub struct RuntimePublishAuth {
    runtime: Arc<Runtime>,
    publish_keys: Arc<PublishKeyService>,
}

impl RuntimePublishAuth {
    #[must_use]
    pub fn new(runtime: Arc<Runtime>, publish_keys: Arc<PublishKeyService>) -> Self {
        Self {
            runtime,
            publish_keys,
        }
    }
}

#[async_trait]
impl PublishAuth for RuntimePublishAuth {
    async fn authenticate_publish(
        &self,
        app: &str,
        stream: &str,
        token: &str,
    ) -> StreamResult<(RoomId, MovieId)> {
        if !is_valid_id(app) || !is_valid_id(stream) {
            return Err(StreamError::AuthenticationFailed(
                "malformed app or stream name".to_string(),
            ));
        }
        let room_id = RoomId::from(app);
        let movie_id = MovieId::from(stream);

        self.publish_keys
            .verify_publish(token, &room_id, &movie_id)
            .map_err(|e| StreamError::AuthenticationFailed(e.to_string()))?;

        let room = self
            .runtime
            .load_or_init_room(&room_id)
            .await
            .map_err(|e| StreamError::AuthenticationFailed(e.to_string()))?;
        room.value()
            .check_active()
            .map_err(|e| StreamError::AuthenticationFailed(e.to_string()))?;

        let movie = room
            .value()
            .movies()
            .get(&movie_id)
            .await
            .map_err(|e| StreamError::AuthenticationFailed(e.to_string()))?;
        if !movie.base.rtmp_source {
            return Err(StreamError::AuthenticationFailed(
                "movie is not an RTMP source".to_string(),
            ));
        }

        Ok((room_id, movie_id))
    }
}
