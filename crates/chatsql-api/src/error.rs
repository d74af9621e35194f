//! Maps the crate-wide error taxonomy onto HTTP status codes (spec §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatsql_types::ChatSqlError;
use serde_json::json;

pub struct ApiError(pub ChatSqlError);

impl From<ChatSqlError> for ApiError {
    fn from(err: ChatSqlError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            ChatSqlError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ChatSqlError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ChatSqlError::Permission(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            ChatSqlError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded"),
            ChatSqlError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            ChatSqlError::Database(_) | ChatSqlError::Io { .. } | ChatSqlError::Serialization { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            ChatSqlError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::warn!(error = %self.0, %kind, "request rejected");
        }

        (status, Json(json!({ "error": kind, "message": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
