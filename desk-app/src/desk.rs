//! Entry points the transport calls into.
//!
//! Session access is scoped to the acting user: a session owned by someone
//! else is reported as missing, the same way orders are.

use crate::agent::{RunOutcome, SupportAgent};
use crate::approval::ApprovalCoordinator;
use crate::error::{DeskError, Result};
use crate::events::{EventChannel, Subscription};
use crate::session::{SessionHandle, SessionStore, SessionSummary};
use desk_tools::{UserDirectory, UserIdentity};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct SupportDesk {
    sessions: SessionStore,
    events: Arc<EventChannel>,
    agent: Arc<SupportAgent>,
    approvals: ApprovalCoordinator,
    users: Arc<dyn UserDirectory>,
    keepalive: Duration,
}

impl SupportDesk {
    pub fn new(
        agent: Arc<SupportAgent>,
        events: Arc<EventChannel>,
        users: Arc<dyn UserDirectory>,
        keepalive: Duration,
    ) -> Self {
        Self {
            sessions: SessionStore::new(events.clone()),
            approvals: ApprovalCoordinator::new(agent.clone(), events.clone()),
            events,
            agent,
            users,
            keepalive,
        }
    }

    pub fn keepalive(&self) -> Duration {
        self.keepalive
    }

    /// Resolve a caller-supplied user id. Unknown ids act anonymously.
    pub async fn resolve_actor(&self, user_id: Option<&str>) -> Result<Option<UserIdentity>> {
        let Some(user_id) = user_id.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let user = self.users.resolve_user(user_id).await?;
        if user.is_none() {
            tracing::warn!(user_id, "unknown user id; treating caller as anonymous");
        }
        Ok(user)
    }

    pub fn create_session(&self, user: Option<UserIdentity>) -> Uuid {
        self.sessions.create(user)
    }

    fn session_for(&self, id: Uuid, actor: Option<&UserIdentity>) -> Result<SessionHandle> {
        let owner = self
            .sessions
            .owner(id)
            .ok_or(DeskError::SessionNotFound(id))?;
        if let Some(owner) = owner {
            if actor.map(|a| a.id.as_str()) != Some(owner.as_str()) {
                tracing::warn!(session_id = %id, "session access by non-owner");
                return Err(DeskError::SessionNotFound(id));
            }
        }
        self.sessions
            .get(id)
            .ok_or(DeskError::SessionNotFound(id))
    }

    /// Validate access without touching the session.
    pub fn check_access(&self, id: Uuid, actor: Option<&UserIdentity>) -> Result<()> {
        self.session_for(id, actor).map(|_| ())
    }

    /// Run the agent for `text`, waiting for any run already in progress on
    /// the same session.
    #[tracing::instrument(level = "info", skip_all, fields(session_id = %id))]
    pub async fn process_message(
        &self,
        id: Uuid,
        text: &str,
        actor: Option<&UserIdentity>,
    ) -> Result<RunOutcome> {
        let handle = self.session_for(id, actor)?;
        let mut session = handle.lock().await;
        self.agent.run(&mut session, text).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(session_id = %id, approved = approved))]
    pub async fn process_approval(
        &self,
        id: Uuid,
        approved: bool,
        user_input: Option<&str>,
        actor: Option<&UserIdentity>,
    ) -> Result<RunOutcome> {
        let handle = self.session_for(id, actor)?;
        let mut session = handle.lock().await;
        self.approvals.resolve(&mut session, approved, user_input).await
    }

    /// Check access now, run in the background. Outcomes arrive as events.
    pub fn submit_message(
        self: &Arc<Self>,
        id: Uuid,
        text: String,
        actor: Option<UserIdentity>,
    ) -> Result<()> {
        self.check_access(id, actor.as_ref())?;
        let desk = self.clone();
        tokio::spawn(async move {
            if let Err(e) = desk.process_message(id, &text, actor.as_ref()).await {
                tracing::debug!(session_id = %id, error = %e, "background message run ended with error");
            }
        });
        Ok(())
    }

    pub fn submit_approval(
        self: &Arc<Self>,
        id: Uuid,
        approved: bool,
        user_input: Option<String>,
        actor: Option<UserIdentity>,
    ) -> Result<()> {
        self.check_access(id, actor.as_ref())?;
        let desk = self.clone();
        tokio::spawn(async move {
            if let Err(e) = desk
                .process_approval(id, approved, user_input.as_deref(), actor.as_ref())
                .await
            {
                tracing::debug!(session_id = %id, error = %e, "background approval ended with error");
            }
        });
        Ok(())
    }

    pub fn subscribe(&self, id: Uuid, actor: Option<&UserIdentity>) -> Result<Subscription> {
        self.check_access(id, actor)?;
        Ok(self.events.subscribe(id))
    }

    /// Sessions visible to `actor`: their own plus anonymous ones.
    pub fn list_sessions(&self, actor: Option<&UserIdentity>) -> Vec<SessionSummary> {
        let actor_id = actor.map(|a| a.id.as_str());
        self.sessions
            .list()
            .into_iter()
            .filter(|s| s.user_id.is_none() || s.user_id.as_deref() == actor_id)
            .collect()
    }

    /// Sessions parked on a verification code, across all users.
    pub fn pending_approvals(&self) -> usize {
        self.sessions
            .list()
            .iter()
            .filter(|s| s.pending_approval)
            .count()
    }

    pub fn cleanup(&self, id: Uuid, actor: Option<&UserIdentity>) -> Result<()> {
        self.check_access(id, actor)?;
        self.sessions.cleanup(id);
        Ok(())
    }
}
