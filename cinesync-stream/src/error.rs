use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rtmp handshake failed: {0}")]
    Handshake(String),

    #[error("rtmp session error: {0}")]
    Session(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stream already has a publisher")]
    AlreadyPublishing,

    #[error("channel closed")]
    Closed,

    #[error("demux error: {0}")]
    Demux(String),

    #[error("mux error: {0}")]
    Mux(String),
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;
