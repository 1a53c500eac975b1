use crate::services::error::{ErrorCode, StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::StorageFailure,
            msg,
        )
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorCode::InvalidRequest, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let code = err.code();
        let status = match (&err, code) {
            (StorageError::UploadTooLarge(_), _) => StatusCode::PAYLOAD_TOO_LARGE,
            (_, ErrorCode::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorCode::Conflict | ErrorCode::FolderExists) => StatusCode::CONFLICT,
            (_, ErrorCode::InvalidRequest | ErrorCode::CycleRejected) => StatusCode::BAD_REQUEST,
            (_, ErrorCode::Gone) => StatusCode::GONE,
            (_, ErrorCode::StorageFailure) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if code == ErrorCode::StorageFailure {
            // Details stay in the log; clients get a generic message.
            tracing::error!(error = %err, "storage failure");
            return AppError::new(status, code, "internal storage failure");
        }
        let message = match code {
            // A unique violation surfaced by the store carries SQL detail.
            ErrorCode::Conflict if matches!(err, StorageError::Sqlx(_)) => {
                "name already exists".to_string()
            }
            _ => err.to_string(),
        };
        AppError::new(status, code, message)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "unexpected error");
        AppError::internal("internal error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_do_not_leak_details() {
        let err = StorageError::Io(std::io::Error::other("/srv/data/123 is gone"));
        let app: AppError = err.into();
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app.code, ErrorCode::StorageFailure);
        assert!(!app.message.contains("/srv"));
    }

    #[test]
    fn client_errors_map_to_4xx() {
        let cases = [
            (StorageError::NodeNotFound(1), StatusCode::NOT_FOUND),
            (StorageError::NameConflict("a".into()), StatusCode::CONFLICT),
            (StorageError::FolderExists("a".into()), StatusCode::CONFLICT),
            (StorageError::CycleRejected, StatusCode::BAD_REQUEST),
            (StorageError::UnsupportedMedia("a.txt".into()), StatusCode::BAD_REQUEST),
            (StorageError::ShareExpired, StatusCode::GONE),
            (StorageError::UploadTooLarge(10), StatusCode::PAYLOAD_TOO_LARGE),
        ];
        for (err, status) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status, "{}", app.message);
        }
    }
}
