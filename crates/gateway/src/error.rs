//! Error types for the gateway layer

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use concierge_auth::AuthError;
use concierge_chats::ChatError;
use serde_json::json;
use thiserror::Error;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AuthorizationFailed(_) => StatusCode::FORBIDDEN,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InternalError(_) | GatewayError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let error_response = json!({
            "error": status.as_str(),
            "message": self.to_string(),
        });

        (status, Json(error_response)).into_response()
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<ChatError> for GatewayError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::Database(err) => GatewayError::DatabaseError(err.to_string()),
            err @ (ChatError::ConversationNotFound { .. }
            | ChatError::MessageNotFound { .. }
            | ChatError::MemberNotFound { .. }
            | ChatError::MediaNotFound { .. }) => GatewayError::NotFound(err.to_string()),
            ChatError::AccessDenied { reason } | ChatError::PermissionDenied { reason } => {
                GatewayError::AuthorizationFailed(reason)
            }
            ChatError::Validation { message } => GatewayError::InvalidRequest(message),
            ChatError::Conflict { message } | ChatError::Internal { message } => {
                GatewayError::InternalError(message)
            }
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Database(err) => GatewayError::DatabaseError(err.to_string()),
            other => GatewayError::AuthenticationFailed(other.to_string()),
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::InvalidRequest(rejection.body_text())
    }
}

impl From<MultipartError> for GatewayError {
    fn from(error: MultipartError) -> Self {
        GatewayError::InvalidRequest(error.body_text())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        GatewayError::InvalidRequest(format!("JSON error: {}", error))
    }
}
