use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No sessionId provided")]
    MissingSessionId,

    #[error("No transport found for sessionId")]
    NoTransportForSession,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Worker tool execution timeout")]
    ExecutionTimeout,

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Protocol-surface errors carry exact plain-text bodies the clients
        // key on; everything else gets the JSON error envelope.
        match self {
            AppError::MissingSessionId => {
                (StatusCode::BAD_REQUEST, "No sessionId provided").into_response()
            }
            AppError::NoTransportForSession => {
                (StatusCode::UNAUTHORIZED, "No transport found for sessionId").into_response()
            }
            AppError::SessionNotFound => {
                (StatusCode::NOT_FOUND, "Session not found").into_response()
            }
            other => {
                let (status, error_message) = match other {
                    AppError::Json(ref err) => (StatusCode::BAD_REQUEST, err.to_string()),
                    AppError::Io(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
                    AppError::BadRequest(ref message) => {
                        (StatusCode::BAD_REQUEST, message.clone())
                    }
                    AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
                    AppError::ExecutionTimeout => {
                        (StatusCode::GATEWAY_TIMEOUT, other.to_string())
                    }
                    ref err => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
                };

                let body = json!({ "error": error_message });
                (status, axum::Json(body)).into_response()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
