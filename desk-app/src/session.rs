//! In-memory conversation sessions.
//!
//! Each session sits behind its own async mutex. Holding that lock is what
//! "running" means: the agent loop and approval handling take it for the
//! whole run, so two submissions on one session never interleave.

use crate::events::EventChannel;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use desk_llm::{ChatMessage, Usage};
use desk_tools::{ApprovalContext, ContactInfo, UserIdentity};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type SessionHandle = Arc<Mutex<Session>>;

/// A parked cancellation waiting for the customer's verification code.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingApproval {
    pub order_id: String,
    pub code: String,
    /// Tool call the eventual tool-result message answers.
    pub tool_call_id: String,
    pub contact: ContactInfo,
    pub created_at: DateTime<Utc>,
}

impl PendingApproval {
    pub fn new(tool_call_id: impl Into<String>, approval: ApprovalContext) -> Self {
        Self {
            order_id: approval.order_id,
            code: approval.code,
            tool_call_id: tool_call_id.into(),
            contact: approval.contact,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user: Option<UserIdentity>,
    pub history: Vec<ChatMessage>,
    pub pending_approval: Option<PendingApproval>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub usage_totals: Usage,
}

impl Session {
    fn new(user: Option<UserIdentity>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user,
            history: Vec::new(),
            pending_approval: None,
            created_at: now,
            last_active: now,
            usage_totals: Usage::default(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.pending_approval.is_some()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.history.push(message);
        self.last_active = Utc::now();
    }
}

struct SessionEntry {
    owner_id: Option<String>,
    created_at: DateTime<Utc>,
    session: SessionHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Absent while a run holds the session.
    pub messages: Option<usize>,
    /// Model token usage so far. Absent while a run holds the session.
    pub usage: Option<Usage>,
    pub pending_approval: bool,
    pub running: bool,
}

pub struct SessionStore {
    sessions: DashMap<Uuid, SessionEntry>,
    events: Arc<EventChannel>,
}

impl SessionStore {
    pub fn new(events: Arc<EventChannel>) -> Self {
        Self {
            sessions: DashMap::new(),
            events,
        }
    }

    /// Allocate a session and its event queue.
    pub fn create(&self, user: Option<UserIdentity>) -> Uuid {
        let session = Session::new(user);
        let id = session.id;
        let owner_id = session.user.as_ref().map(|u| u.id.clone());
        tracing::info!(
            session_id = %id,
            user_id = owner_id.as_deref().unwrap_or("anonymous"),
            "session created"
        );
        let entry = SessionEntry {
            owner_id,
            created_at: session.created_at,
            session: Arc::new(Mutex::new(session)),
        };
        self.events.ensure_queue(id);
        self.sessions.insert(id, entry);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.get(&id).map(|e| e.session.clone())
    }

    /// `Some(owner)` for a known session; the inner value is `None` for
    /// anonymous sessions.
    pub fn owner(&self, id: Uuid) -> Option<Option<String>> {
        self.sessions.get(&id).map(|e| e.owner_id.clone())
    }

    /// Summaries, most recently active first. Sessions mid-run count as
    /// active now.
    pub fn list(&self) -> Vec<SessionSummary> {
        let now = Utc::now();
        let mut out: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| {
                let (id, e) = entry.pair();
                match e.session.try_lock() {
                    Ok(s) => SessionSummary {
                        id: *id,
                        user_id: e.owner_id.clone(),
                        created_at: e.created_at,
                        last_active: s.last_active,
                        messages: Some(s.history.len()),
                        usage: Some(s.usage_totals),
                        pending_approval: s.is_suspended(),
                        running: false,
                    },
                    Err(_) => SessionSummary {
                        id: *id,
                        user_id: e.owner_id.clone(),
                        created_at: e.created_at,
                        last_active: now,
                        messages: None,
                        usage: None,
                        pending_approval: false,
                        running: true,
                    },
                }
            })
            .collect();
        out.sort_by_key(|s| s.last_active);
        out.reverse();
        out
    }

    /// Drop the session and its event queue.
    pub fn cleanup(&self, id: Uuid) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        let queue_removed = self.events.remove(id);
        if removed {
            tracing::info!(session_id = %id, queue_removed, "session cleaned up");
        }
        removed
    }
}
