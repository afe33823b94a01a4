use super::{ApiError, parse_session_id};
use crate::http_auth::ActingUser;
use crate::server::AppState;
use axum::extract::Path;
use axum::routing::{delete, get};
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", delete(delete_session))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_sessions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActingUser>,
) -> Json<serde_json::Value> {
    let sessions = state.desk.list_sessions(actor.identity());
    Json(serde_json::json!({ "sessions": sessions }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn delete_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActingUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_session_id(&id)?;
    state.desk.cleanup(id, actor.identity())?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
