use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use cinesync_core::Error;

/// Transport-boundary error: maps core errors onto HTTP statuses and a
/// JSON `{"error": ...}` envelope.
#[derive(Debug)]
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Auth(_) | Error::AuthExpired => StatusCode::UNAUTHORIZED,
            Error::UserBanned
            | Error::UserPending
            | Error::GuestForbidden
            | Error::RoomBanned
            | Error::RoomPending
            | Error::MemberBanned
            | Error::MemberPending
            | Error::NoPermission => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) | Error::AlreadyExists(_) => StatusCode::BAD_REQUEST,
            Error::AlreadyClosed => StatusCode::CONFLICT,
            Error::Upstream(_)
            | Error::BackendUnavailable(_)
            | Error::SendQueueFull
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError(Error::AuthExpired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError(Error::NoPermission).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError(Error::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError(Error::InvalidInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError(Error::Upstream("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError(Error::AlreadyClosed).status(),
            StatusCode::CONFLICT
        );
    }
}
