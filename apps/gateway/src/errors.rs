use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Application-level error type for the REST surface.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

/// Connection-level errors. None of these close the connection; each becomes
/// an `error` event on the connection that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Could not decode payload: {0}")]
    Decode(String),

    #[error("Connection is not authenticated")]
    NotAuthenticated,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} belongs to a different user")]
    SessionMismatch(String),

    #[error("Unknown connection")]
    UnknownConnection,
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidMessage(_) => "INVALID_MESSAGE",
            GatewayError::Decode(_) => "DECODE_ERROR",
            GatewayError::NotAuthenticated => "NOT_AUTHENTICATED",
            GatewayError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            GatewayError::SessionMismatch(_) => "SESSION_MISMATCH",
            GatewayError::UnknownConnection => "UNKNOWN_CONNECTION",
        }
    }

    /// What the client should do next, if anything beyond resending.
    pub fn action(&self) -> Option<&'static str> {
        match self {
            GatewayError::NotAuthenticated | GatewayError::SessionNotFound(_) => {
                Some("reauthenticate")
            }
            _ => None,
        }
    }

    pub fn to_event(&self) -> ErrorEvent {
        ErrorEvent {
            code: self.code(),
            message: self.to_string(),
            action: self.action(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::SessionNotFound(id) => AppError::NotFound(format!("Session {id} not found")),
            other => AppError::Validation(other.to_string()),
        }
    }
}

/// Payload of an outbound `error` message.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
}
