pub mod chat;
pub mod events;
pub mod health;
pub mod sessions;
pub mod tools;

use crate::error::DeskError;
use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(chat::router())
        .merge(events::router())
        .merge(sessions::router())
        .merge(tools::router())
}

/// Error body shared by every route: `{"status": "error", "error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Desk(DeskError),
    BadRequest(String),
    NotFound(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Desk(DeskError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Desk(DeskError::InvalidState(_)) => StatusCode::CONFLICT,
            Self::Desk(DeskError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            Self::Desk(DeskError::ProtocolViolation(_) | DeskError::IterationLimit(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DeskError> for ApiError {
    fn from(e: DeskError) -> Self {
        Self::Desk(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Session ids are not echoed back.
            Self::Desk(DeskError::SessionNotFound(_)) => "Session not found".to_string(),
            Self::Desk(e) => e.to_string(),
            Self::BadRequest(m) | Self::NotFound(m) => m.clone(),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %message, "request rejected");
        }
        (
            status,
            Json(serde_json::json!({ "status": "error", "error": message })),
        )
            .into_response()
    }
}

pub(crate) fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest("invalid session id".to_string()))
}
