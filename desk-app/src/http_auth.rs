//! Caller identity for HTTP requests.
//!
//! Authentication happens upstream. The gateway in front of the desk sets
//! `x-user-id`, and this middleware resolves it through the user directory.
//! Missing or unknown ids act anonymously.

use crate::routes::ApiError;
use crate::server::AppState;
use axum::Extension;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use desk_tools::UserIdentity;
use std::sync::Arc;

pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// The resolved caller, inserted into request extensions.
#[derive(Debug, Clone, Default)]
pub struct ActingUser(pub Option<UserIdentity>);

impl ActingUser {
    pub fn identity(&self) -> Option<&UserIdentity> {
        self.0.as_ref()
    }
}

fn user_id_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(&USER_ID_HEADER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw.to_string())
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn resolve_acting_user(
    Extension(state): Extension<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let user_id = user_id_from_headers(req.headers());
    let actor = match state.desk.resolve_actor(user_id.as_deref()).await {
        Ok(actor) => actor,
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve acting user");
            return ApiError::from(e).into_response();
        }
    };
    req.extensions_mut().insert(ActingUser(actor));
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_state;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::middleware;
    use axum::routing::get;
    use tower::util::ServiceExt;

    fn whoami_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|Extension(actor): Extension<ActingUser>| async move {
                    actor
                        .identity()
                        .map(|u| u.id.clone())
                        .unwrap_or_else(|| "anonymous".to_string())
                }),
            )
            .layer(middleware::from_fn(resolve_acting_user))
            .layer(Extension(state))
    }

    async fn whoami(header: Option<&str>) -> String {
        let mut req = Request::builder().uri("/whoami");
        if let Some(header) = header {
            req = req.header("x-user-id", header);
        }
        let response = whoami_router(test_state(vec![]))
            .oneshot(req.body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(body.to_vec()).expect("utf8")
    }

    #[test]
    fn user_id_header_is_trimmed_and_blank_is_absent() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_id_from_headers(&headers), None);
        headers.insert("x-user-id", " u-1001 ".parse().expect("header value"));
        assert_eq!(user_id_from_headers(&headers).as_deref(), Some("u-1001"));
        headers.insert("x-user-id", "   ".parse().expect("header value"));
        assert_eq!(user_id_from_headers(&headers), None);
    }

    #[tokio::test]
    async fn known_user_is_resolved() {
        assert_eq!(whoami(Some("u-1002")).await, "u-1002");
    }

    #[tokio::test]
    async fn unknown_or_missing_user_is_anonymous() {
        assert_eq!(whoami(Some("u-9999")).await, "anonymous");
        assert_eq!(whoami(None).await, "anonymous");
    }
}
