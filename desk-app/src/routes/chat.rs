use super::{ApiError, parse_session_id};
use crate::http_auth::ActingUser;
use crate::server::AppState;
use axum::routing::post;
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApprovalRequest {
    /// The session the approval belongs to.
    id: String,
    approved: bool,
    #[serde(default, rename = "userInput")]
    user_input: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/chat", post(post_chat))
        .route("/api/approval", post(post_approval))
}

/// Accept a message and answer right away; the run itself reports through
/// the session's event stream.
#[tracing::instrument(level = "info", skip_all)]
async fn post_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActingUser>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message is required".to_string()));
    }
    let session_id = match req.session_id.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => parse_session_id(raw)?,
        None => state.desk.create_session(actor.0.clone()),
    };
    state.desk.submit_message(session_id, req.message, actor.0)?;
    tracing::info!(%session_id, "chat message accepted");
    Ok(Json(serde_json::json!({ "session_id": session_id })))
}

#[tracing::instrument(level = "info", skip_all)]
async fn post_approval(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActingUser>,
    Json(req): Json<ApprovalRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = parse_session_id(&req.id)?;
    state
        .desk
        .submit_approval(session_id, req.approved, req.user_input, actor.0)?;
    tracing::info!(%session_id, approved = req.approved, "approval accepted");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
