//! RTMP ingest server.
//!
//! Publishers connect as `rtmp://<host>/<roomID>/<movieID>?token=<token>`:
//! the app name is the room, the stream key carries the movie ID and the
//! signed publish token. After the handshake each connection is driven by
//! `rml_rtmp`'s `ServerSession`; accepted publishers feed frames into their
//! room's [`LiveChannel`].

use std::sync::Arc;

use async_trait::async_trait;
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ServerSession, ServerSessionConfig, ServerSessionEvent, ServerSessionResult,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use cinesync_core::models::{MovieId, RoomId};

use crate::channel::{LiveChannel, LiveRegistry};
use crate::error::{StreamError, StreamResult};
use crate::gop::MediaFrame;

/// Validates a publish attempt and resolves it to a (room, movie) pair.
///
/// Implementations check the token signature, that the movie exists in the
/// room, and that it is flagged as an RTMP source.
#[async_trait]
pub trait PublishAuth: Send + Sync {
    async fn authenticate_publish(
        &self,
        app: &str,
        stream: &str,
        token: &str,
    ) -> StreamResult<(RoomId, MovieId)>;
}

/// Split `movieid?token=...` into the stream name and its token.
fn parse_stream_key(stream_key: &str) -> (&str, &str) {
    match stream_key.split_once('?') {
        Some((name, query)) => {
            let token = query
                .split('&')
                .find_map(|pair| pair.strip_prefix("token="))
                .unwrap_or("");
            (name, token)
        }
        None => (stream_key, ""),
    }
}

pub struct RtmpServer {
    address: String,
    registry: Arc<LiveRegistry>,
    auth: Arc<dyn PublishAuth>,
}

impl RtmpServer {
    #[must_use]
    pub fn new(address: String, registry: Arc<LiveRegistry>, auth: Arc<dyn PublishAuth>) -> Self {
        Self {
            address,
            registry,
            auth,
        }
    }

    /// Accept loop; runs until the listener fails or the task is aborted.
    pub async fn serve(&self) -> StreamResult<()> {
        let listener = TcpListener::bind(&self.address).await?;
        info!(address = %self.address, "rtmp server listening");

        loop {
            let (stream, remote) = listener.accept().await?;
            debug!(remote = %remote, "rtmp connection accepted");
            let registry = self.registry.clone();
            let auth = self.auth.clone();
            tokio::spawn(async move {
                let mut session = RtmpSession::new(stream, registry, auth);
                if let Err(err) = session.run().await {
                    debug!(remote = %remote, error = %err, "rtmp session ended");
                }
            });
        }
    }
}

struct RtmpSession {
    stream: TcpStream,
    registry: Arc<LiveRegistry>,
    auth: Arc<dyn PublishAuth>,
    session_id: String,
    channel: Option<Arc<LiveChannel>>,
}

impl RtmpSession {
    fn new(stream: TcpStream, registry: Arc<LiveRegistry>, auth: Arc<dyn PublishAuth>) -> Self {
        Self {
            stream,
            registry,
            auth,
            session_id: cinesync_core::models::generate_id(),
            channel: None,
        }
    }

    async fn run(&mut self) -> StreamResult<()> {
        let remaining = self.handshake().await?;
        let result = self.drive_session(remaining).await;
        if let Some(channel) = self.channel.take() {
            channel.end_publish(&self.session_id);
        }
        result
    }

    async fn handshake(&mut self) -> StreamResult<Vec<u8>> {
        let mut handshake = Handshake::new(PeerType::Server);
        let mut buf = [0u8; 4096];
        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(StreamError::Handshake("peer closed during handshake".into()));
            }
            match handshake
                .process_bytes(&buf[..n])
                .map_err(|e| StreamError::Handshake(format!("{e:?}")))?
            {
                HandshakeProcessResult::InProgress { response_bytes } => {
                    self.stream.write_all(&response_bytes).await?;
                }
                HandshakeProcessResult::Completed {
                    response_bytes,
                    remaining_bytes,
                } => {
                    self.stream.write_all(&response_bytes).await?;
                    return Ok(remaining_bytes);
                }
            }
        }
    }

    async fn drive_session(&mut self, remaining: Vec<u8>) -> StreamResult<()> {
        let config = ServerSessionConfig::new();
        let (mut session, initial) =
            ServerSession::new(config).map_err(|e| StreamError::Session(format!("{e:?}")))?;
        self.handle_results(&mut session, initial).await?;

        if !remaining.is_empty() {
            let results = session
                .handle_input(&remaining)
                .map_err(|e| StreamError::Session(format!("{e:?}")))?;
            self.handle_results(&mut session, results).await?;
        }

        let mut buf = [0u8; 4096];
        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            let results = session
                .handle_input(&buf[..n])
                .map_err(|e| StreamError::Session(format!("{e:?}")))?;
            self.handle_results(&mut session, results).await?;
        }
    }

    async fn handle_results(
        &mut self,
        session: &mut ServerSession,
        results: Vec<ServerSessionResult>,
    ) -> StreamResult<()> {
        // Events may produce follow-up results (accept responses).
        let mut queue = results;
        while !queue.is_empty() {
            let mut next = Vec::new();
            for result in queue {
                match result {
                    ServerSessionResult::OutboundResponse(packet) => {
                        self.stream.write_all(&packet.bytes).await?;
                    }
                    ServerSessionResult::RaisedEvent(event) => {
                        next.extend(self.handle_event(session, event).await?);
                    }
                    ServerSessionResult::UnhandleableMessageReceived(_) => {}
                }
            }
            queue = next;
        }
        Ok(())
    }

    async fn handle_event(
        &mut self,
        session: &mut ServerSession,
        event: ServerSessionEvent,
    ) -> StreamResult<Vec<ServerSessionResult>> {
        match event {
            ServerSessionEvent::ConnectionRequested {
                request_id,
                app_name,
            } => {
                debug!(app = %app_name, "rtmp connection requested");
                session
                    .accept_request(request_id)
                    .map_err(|e| StreamError::Session(format!("{e:?}")))
            }
            ServerSessionEvent::PublishStreamRequested {
                request_id,
                app_name,
                stream_key,
                mode: _,
            } => {
                let (stream_name, token) = parse_stream_key(&stream_key);
                let (room_id, movie_id) = self
                    .auth
                    .authenticate_publish(&app_name, stream_name, token)
                    .await
                    .map_err(|err| {
                        warn!(app = %app_name, stream = %stream_name, error = %err, "rtmp publish rejected");
                        err
                    })?;

                let channel = self
                    .registry
                    .channel(&room_id, &movie_id)
                    .map_err(|err| {
                        warn!(error = %err, "failed to open live channel");
                        err
                    })?;
                channel.start_publish(&self.session_id)?;
                info!(
                    room_id = %room_id,
                    movie_id = %movie_id,
                    "rtmp publish accepted"
                );
                self.channel = Some(channel);

                session
                    .accept_request(request_id)
                    .map_err(|e| StreamError::Session(format!("{e:?}")))
            }
            ServerSessionEvent::PublishStreamFinished { .. } => {
                if let Some(channel) = self.channel.take() {
                    channel.end_publish(&self.session_id);
                }
                Ok(Vec::new())
            }
            ServerSessionEvent::AudioDataReceived {
                data, timestamp, ..
            } => {
                if let Some(channel) = &self.channel {
                    channel.push_frame(MediaFrame::Audio {
                        timestamp: timestamp.value,
                        data,
                    })?;
                }
                Ok(Vec::new())
            }
            ServerSessionEvent::VideoDataReceived {
                data, timestamp, ..
            } => {
                if let Some(channel) = &self.channel {
                    channel.push_frame(MediaFrame::Video {
                        timestamp: timestamp.value,
                        data,
                    })?;
                }
                Ok(Vec::new())
            }
            ServerSessionEvent::PlayStreamRequested { .. } => {
                // Viewers take the HLS/FLV endpoints; RTMP out is not served.
                Err(StreamError::Session(
                    "rtmp playback is not supported".to_string(),
                ))
            }
            other => {
                debug!(event = ?other, "ignoring rtmp event");
                Ok(Vec::new())
            }
        }
    }
}
