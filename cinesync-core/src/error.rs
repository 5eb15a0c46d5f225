use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("token expired")]
    AuthExpired,

    #[error("user account has been banned")]
    UserBanned,

    #[error("user account is pending approval")]
    UserPending,

    #[error("guest access is not allowed")]
    GuestForbidden,

    #[error("room has been banned")]
    RoomBanned,

    #[error("room is pending approval")]
    RoomPending,

    #[error("user has been banned from this room")]
    MemberBanned,

    #[error("membership is pending review")]
    MemberPending,

    #[error("no permission")]
    NoPermission,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("already closed")]
    AlreadyClosed,

    #[error("send queue full")]
    SendQueueFull,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("vendor backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
