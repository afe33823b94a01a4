//! Per-session event queues between the agent and its listener.
//!
//! Queues outlive listener connections: a listener that drops and
//! reconnects picks up whatever was published in between.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub const APPROVAL_PLACEHOLDER: &str = "Enter verification code from email";

/// Wire form: `{"type": <kind>, "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum AgentEvent {
    Message {
        id: String,
        role: &'static str,
        content: String,
        timestamp: String,
    },
    Approval {
        /// Session id the decision must be posted back for.
        id: String,
        message: String,
        #[serde(rename = "type")]
        input_type: &'static str,
        placeholder: &'static str,
    },
    Error {
        message: String,
    },
    Done {},
}

impl AgentEvent {
    pub fn assistant_message(content: impl Into<String>) -> Self {
        Self::Message {
            id: Uuid::new_v4().to_string(),
            role: "assistant",
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn verification_request(session_id: Uuid, order_id: &str) -> Self {
        Self::Approval {
            id: session_id.to_string(),
            message: format!(
                "A verification code has been sent to your email address for order {order_id}. Please check your email (including spam/junk folder) and enter the 6-digit code below to confirm the cancellation."
            ),
            input_type: "input",
            placeholder: APPROVAL_PLACEHOLDER,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn done() -> Self {
        Self::Done {}
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Approval { .. } => "approval",
            Self::Error { .. } => "error",
            Self::Done {} => "done",
        }
    }
}

/// What a consumer gets back from [`Subscription::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(AgentEvent),
    /// Nothing arrived within the timeout.
    Keepalive,
    /// The queue was removed; no further events will arrive.
    Closed,
}

struct EventQueue {
    buf: Mutex<VecDeque<AgentEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

impl EventQueue {
    fn new() -> Self {
        Self {
            buf: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn buf(&self) -> std::sync::MutexGuard<'_, VecDeque<AgentEvent>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<AgentEvent> {
        self.buf().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub struct EventChannel {
    queues: DashMap<Uuid, Arc<EventQueue>>,
    /// 0 means unbounded.
    max_buffered: usize,
}

impl EventChannel {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            queues: DashMap::new(),
            max_buffered,
        }
    }

    #[cfg(test)]
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Create the queue for `session_id` if it does not exist yet.
    pub fn ensure_queue(&self, session_id: Uuid) {
        self.queue_or_create(session_id);
    }

    fn queue_or_create(&self, session_id: Uuid) -> Arc<EventQueue> {
        self.queues
            .entry(session_id)
            .or_insert_with(|| Arc::new(EventQueue::new()))
            .clone()
    }

    /// Enqueue without blocking. Events for sessions with no queue are dropped.
    pub fn publish(&self, session_id: Uuid, event: AgentEvent) {
        let Some(queue) = self.queues.get(&session_id).map(|q| q.clone()) else {
            tracing::warn!(%session_id, kind = event.kind(), "no event queue for session; event dropped");
            return;
        };

        let kind = event.kind();
        let depth = {
            let mut buf = queue.buf();
            if self.max_buffered > 0 && buf.len() >= self.max_buffered {
                if let Some(dropped) = buf.pop_front() {
                    tracing::warn!(
                        %session_id,
                        dropped_kind = dropped.kind(),
                        max_buffered = self.max_buffered,
                        "event buffer full; dropped oldest event"
                    );
                }
            }
            buf.push_back(event);
            buf.len()
        };
        queue.notify.notify_one();
        tracing::debug!(%session_id, kind, depth, "event published");
    }

    /// Attach to the session's queue, creating it if needed.
    pub fn subscribe(&self, session_id: Uuid) -> Subscription {
        Subscription {
            session_id,
            queue: self.queue_or_create(session_id),
        }
    }

    /// Delete the queue. Attached subscriptions observe [`Delivery::Closed`].
    pub fn remove(&self, session_id: Uuid) -> bool {
        match self.queues.remove(&session_id) {
            Some((_, queue)) => {
                queue.close();
                true
            }
            None => false,
        }
    }

    /// Number of live session queues.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    #[cfg(test)]
    pub fn has_queue(&self, session_id: Uuid) -> bool {
        self.queues.contains_key(&session_id)
    }

    #[cfg(test)]
    pub fn buffered(&self, session_id: Uuid) -> usize {
        self.queues
            .get(&session_id)
            .map(|q| q.buf().len())
            .unwrap_or(0)
    }
}

pub struct Subscription {
    session_id: Uuid,
    queue: Arc<EventQueue>,
}

impl Subscription {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Next event in publish order, or a keepalive once `timeout` elapses.
    pub async fn next(&self, timeout: Duration) -> Delivery {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.queue.pop() {
                return Delivery::Event(event);
            }
            if self.queue.is_closed() {
                return Delivery::Closed;
            }
            if tokio::time::timeout_at(deadline, self.queue.notify.notified())
                .await
                .is_err()
            {
                return Delivery::Keepalive;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TICK: Duration = Duration::from_secs(30);

    #[test]
    fn events_serialize_as_type_and_data() {
        let sid = Uuid::new_v4();
        let approval = serde_json::to_value(AgentEvent::verification_request(sid, "ORD-002")).unwrap();
        assert_eq!(approval["type"], "approval");
        assert_eq!(approval["data"]["id"], sid.to_string());
        assert_eq!(approval["data"]["type"], "input");
        assert_eq!(approval["data"]["placeholder"], APPROVAL_PLACEHOLDER);
        assert!(approval["data"]["message"].as_str().unwrap().contains("ORD-002"));

        let done = serde_json::to_value(AgentEvent::done()).unwrap();
        assert_eq!(done, json!({ "type": "done", "data": {} }));

        let err = serde_json::to_value(AgentEvent::error("boom")).unwrap();
        assert_eq!(err, json!({ "type": "error", "data": { "message": "boom" } }));

        let msg = serde_json::to_value(AgentEvent::assistant_message("hi")).unwrap();
        assert_eq!(msg["data"]["role"], "assistant");
        assert_eq!(msg["data"]["content"], "hi");
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let channel = EventChannel::unbounded();
        let sid = Uuid::new_v4();
        let sub = channel.subscribe(sid);
        channel.publish(sid, AgentEvent::assistant_message("one"));
        channel.publish(sid, AgentEvent::done());

        assert!(matches!(sub.next(TICK).await, Delivery::Event(AgentEvent::Message { content, .. }) if content == "one"));
        assert_eq!(sub.next(TICK).await, Delivery::Event(AgentEvent::done()));
    }

    #[tokio::test]
    async fn publish_without_queue_is_dropped() {
        let channel = EventChannel::unbounded();
        let sid = Uuid::new_v4();
        channel.publish(sid, AgentEvent::done());
        assert!(!channel.has_queue(sid));

        channel.ensure_queue(sid);
        assert_eq!(channel.buffered(sid), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_subscription_gets_keepalive_then_later_events() {
        let channel = Arc::new(EventChannel::unbounded());
        let sid = Uuid::new_v4();
        let sub = channel.subscribe(sid);

        assert_eq!(sub.next(TICK).await, Delivery::Keepalive);

        let publisher = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            publisher.publish(sid, AgentEvent::done());
        });
        assert_eq!(sub.next(TICK).await, Delivery::Event(AgentEvent::done()));
    }

    #[tokio::test]
    async fn reconnect_sees_events_published_while_detached() {
        let channel = EventChannel::unbounded();
        let sid = Uuid::new_v4();
        drop(channel.subscribe(sid));

        channel.publish(sid, AgentEvent::error("while away"));
        let again = channel.subscribe(sid);
        assert_eq!(again.next(TICK).await, Delivery::Event(AgentEvent::error("while away")));
    }

    #[tokio::test]
    async fn bounded_queue_drops_oldest() {
        let channel = EventChannel::new(2);
        let sid = Uuid::new_v4();
        let sub = channel.subscribe(sid);
        channel.publish(sid, AgentEvent::error("1"));
        channel.publish(sid, AgentEvent::error("2"));
        channel.publish(sid, AgentEvent::error("3"));
        assert_eq!(channel.buffered(sid), 2);

        assert_eq!(sub.next(TICK).await, Delivery::Event(AgentEvent::error("2")));
        assert_eq!(sub.next(TICK).await, Delivery::Event(AgentEvent::error("3")));
    }

    #[tokio::test]
    async fn removing_the_queue_closes_subscriptions() {
        let channel = EventChannel::unbounded();
        let sid = Uuid::new_v4();
        let sub = channel.subscribe(sid);
        assert!(channel.remove(sid));
        assert!(!channel.remove(sid));
        assert_eq!(sub.next(TICK).await, Delivery::Closed);
    }
}
