//! Server-sent event stream for one session.
//!
//! Each agent event goes out as a `data:` line holding the tagged JSON
//! object. When nothing arrives within the keepalive interval a `:keepalive`
//! comment is sent instead. The stream ends when the session is cleaned up.

use crate::events::{AgentEvent, Delivery, Subscription};
use crate::http_auth::ActingUser;
use crate::server::AppState;
use axum::Extension;
use axum::extract::Query;
use axum::http::HeaderName;
use axum::http::header::CACHE_CONTROL;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

#[derive(Debug, Deserialize)]
struct EventsQuery {
    session_id: String,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/events", get(get_events))
}

#[tracing::instrument(level = "info", skip_all)]
async fn get_events(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActingUser>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let subscription = Uuid::parse_str(query.session_id.trim())
        .ok()
        .and_then(|id| state.desk.subscribe(id, actor.identity()).ok());

    let stream = match subscription {
        Some(sub) => {
            tracing::info!(session_id = %sub.session_id(), "event stream opened");
            subscription_stream(sub, state.desk.keepalive())
        }
        None => {
            tracing::info!(session_id = %query.session_id, "event stream for unknown session");
            stream::once(async { Ok(to_sse(&AgentEvent::error("Session not found"))) }).boxed()
        }
    };

    (
        [(CACHE_CONTROL, "no-cache"), (X_ACCEL_BUFFERING, "no")],
        Sse::new(stream),
    )
}

fn subscription_stream(sub: Subscription, keepalive: Duration) -> EventStream {
    stream::unfold(sub, move |sub| async move {
        match sub.next(keepalive).await {
            Delivery::Event(event) => Some((Ok(to_sse(&event)), sub)),
            Delivery::Keepalive => Some((Ok(Event::default().comment("keepalive")), sub)),
            Delivery::Closed => {
                tracing::info!(session_id = %sub.session_id(), "event stream closed");
                None
            }
        }
    })
    .boxed()
}

fn to_sse(event: &AgentEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "failed to serialize event");
            Event::default().data(r#"{"type":"error","data":{"message":"internal error"}}"#)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::events::AgentEvent;
    use crate::server::{test_app, test_state};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn get(uri: String, user: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(user) = user {
            req = req.header("x-user-id", user);
        }
        req.body(Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn unknown_session_gets_one_error_event_then_ends() {
        let response = test_app(test_state(vec![]))
            .oneshot(get(
                format!("/api/events?session_id={}", uuid::Uuid::new_v4()),
                None,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "data: {\"type\":\"error\",\"data\":{\"message\":\"Session not found\"}}\n\n"
        );
    }

    #[tokio::test]
    async fn buffered_events_stream_until_the_session_is_removed() {
        let state = test_state(vec![]);
        let id = state.desk.create_session(None);
        state.events.publish(id, AgentEvent::assistant_message("hello"));
        state.events.publish(id, AgentEvent::done());

        let response = test_app(state.clone())
            .oneshot(get(format!("/api/events?session_id={id}"), None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        state.desk.cleanup(id, None).unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(body.to_vec()).unwrap();
        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("data: {\"type\":\"message\""));
        assert!(frames[0].contains("\"content\":\"hello\""));
        assert_eq!(frames[1], "data: {\"type\":\"done\",\"data\":{}}");
    }

    #[tokio::test]
    async fn other_users_session_looks_unknown() {
        let state = test_state(vec![]);
        let ada = state.desk.resolve_actor(Some("u-1001")).await.unwrap();
        let id = state.desk.create_session(ada);
        let response = test_app(state)
            .oneshot(get(format!("/api/events?session_id={id}"), Some("u-1002")))
            .await
            .expect("response");
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("Session not found"));
    }
}
