//! Resolution of parked cancellations.

use crate::agent::{RunOutcome, SupportAgent};
use crate::error::{DeskError, Result};
use crate::events::{AgentEvent, EventChannel};
use crate::session::Session;
use desk_llm::ChatMessage;
use desk_tools::{CANCEL_ORDER_WITH_VERIFICATION, FailureKind, ToolOutcome};
use serde_json::json;
use std::sync::Arc;

pub struct ApprovalCoordinator {
    agent: Arc<SupportAgent>,
    events: Arc<EventChannel>,
}

impl ApprovalCoordinator {
    pub fn new(agent: Arc<SupportAgent>, events: Arc<EventChannel>) -> Self {
        Self { agent, events }
    }

    /// Answer the session's pending approval, then resume the agent.
    ///
    /// An approval with a code runs the cancellation with that code. A
    /// rejection, or an approval without a code, tells the model the customer
    /// declined. Either way the pending record is consumed.
    #[tracing::instrument(level = "info", skip_all, fields(session_id = %session.id, approved = approved))]
    pub async fn resolve(
        &self,
        session: &mut Session,
        approved: bool,
        user_input: Option<&str>,
    ) -> Result<RunOutcome> {
        let Some(pending) = session.pending_approval.take() else {
            let err = DeskError::no_pending_approval();
            tracing::warn!("approval received with nothing pending");
            self.events.publish(session.id, AgentEvent::error(err.to_string()));
            return Err(err);
        };

        let code = user_input.map(str::trim).filter(|s| !s.is_empty());
        let result = match (approved, code) {
            (true, Some(code)) => {
                let arguments = json!({
                    "order_id": pending.order_id,
                    "verification_code": code,
                })
                .to_string();
                let executed = self
                    .agent
                    .tools()
                    .execute(CANCEL_ORDER_WITH_VERIFICATION, &arguments, session.user.as_ref())
                    .await;
                match executed {
                    Ok(outcome) => {
                        tracing::info!(
                            order_id = %pending.order_id,
                            success = outcome.is_success(),
                            failure_kind = ?outcome.failure_kind(),
                            "verification code checked"
                        );
                        outcome.to_result_json()
                    }
                    Err(e) => {
                        let err = DeskError::from(e);
                        tracing::error!(order_id = %pending.order_id, error = %err, "cancellation failed");
                        let aborted = ToolOutcome::failure(
                            FailureKind::Aborted,
                            "Cancellation could not be completed",
                        );
                        session.push(ChatMessage::tool_result(
                            pending.tool_call_id,
                            aborted.to_result_json().to_string(),
                        ));
                        self.events.publish(session.id, AgentEvent::error(err.to_string()));
                        return Err(err);
                    }
                }
            }
            _ => {
                tracing::info!(order_id = %pending.order_id, "customer declined cancellation");
                denial_result()
            }
        };

        session.push(ChatMessage::tool_result(pending.tool_call_id, result.to_string()));
        self.agent.run(session, "").await
    }
}

/// Tool result recorded when the customer declines. Clients read the
/// `message` key, the model reads `error` and `error_kind`.
fn denial_result() -> serde_json::Value {
    const DENIED: &str = "User denied cancellation";
    let mut out = ToolOutcome::failure(FailureKind::Denied, DENIED).to_result_json();
    out["message"] = json!(DENIED);
    out
}
