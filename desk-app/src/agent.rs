//! Support agent: LLM calls, tool dispatch, and suspension on approval.

use crate::error::{DeskError, Result};
use crate::events::{AgentEvent, EventChannel};
use crate::session::{PendingApproval, Session};
use desk_llm::{ChatMessage, ChatModel, ToolCall};
use desk_tools::{FailureKind, ToolOutcome, ToolRegistry, UserIdentity};
use std::sync::Arc;
use std::time::Instant;

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A final answer was published, followed by `done`.
    Completed,
    /// A tool asked for the customer's verification code. The session now
    /// holds a pending approval.
    Suspended,
}

enum BatchOutcome {
    Continue,
    Suspended,
}

pub struct SupportAgent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    events: Arc<EventChannel>,
    system_prompt: String,
    max_iterations: usize,
}

impl SupportAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        events: Arc<EventChannel>,
        system_prompt: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        Self {
            model,
            tools,
            events,
            system_prompt: system_prompt.into(),
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run the loop for one inbound message. Empty `user_text` resumes after
    /// an approval. Failures are published as an `error` event before being
    /// returned; the session keeps its last consistent history.
    #[tracing::instrument(level = "info", skip_all, fields(session_id = %session.id))]
    pub async fn run(&self, session: &mut Session, user_text: &str) -> Result<RunOutcome> {
        let result = self.run_inner(session, user_text).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, history_messages = session.history.len(), "agent run failed");
            self.events.publish(session.id, AgentEvent::error(e.to_string()));
        }
        result
    }

    async fn run_inner(&self, session: &mut Session, user_text: &str) -> Result<RunOutcome> {
        if let Some(pending) = &session.pending_approval {
            return Err(DeskError::InvalidState(format!(
                "waiting for the verification code for order {}; answer that first",
                pending.order_id
            )));
        }

        let user_text = user_text.trim();
        if !user_text.is_empty() {
            session.push(ChatMessage::user(user_text));
        }
        tracing::info!(
            model = self.model.model(),
            prior_history_messages = session.history.len(),
            tools_registered = self.tools.definitions().len(),
            resume = user_text.is_empty(),
            "agent run started"
        );

        for iteration in 1..=self.max_iterations {
            let messages = self.build_context(session);
            tracing::debug!(
                iteration,
                prompt_messages = messages.len(),
                "agent prompt assembled"
            );

            let llm_started = Instant::now();
            let response = self.model.chat(&messages, self.tools.definitions()).await?;
            session.usage_totals.add(response.usage);
            tracing::info!(
                iteration,
                latency_ms = llm_started.elapsed().as_millis() as u64,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                tool_calls = response.message.tool_calls.len(),
                finish_reason = %response.finish_reason,
                "agent llm call completed"
            );

            let message = response.message;
            if message.tool_calls.is_empty() {
                let content = message.content;
                session.push(ChatMessage::assistant(content.clone()));
                self.events
                    .publish(session.id, AgentEvent::assistant_message(content));
                self.events.publish(session.id, AgentEvent::done());
                tracing::info!(
                    iteration,
                    history_messages = session.history.len(),
                    "agent run completed"
                );
                return Ok(RunOutcome::Completed);
            }

            let calls = message.tool_calls.clone();
            session.push(ChatMessage::assistant_tool_calls(
                message.content,
                message.tool_calls,
            ));
            match self.execute_batch(session, &calls).await? {
                BatchOutcome::Continue => {}
                BatchOutcome::Suspended => return Ok(RunOutcome::Suspended),
            }
        }

        Err(DeskError::IterationLimit(self.max_iterations))
    }

    /// Execute one assistant message's tool calls in order. Every call gets
    /// exactly one tool-result, except an approval-requiring call whose
    /// result is supplied when the approval is resolved.
    async fn execute_batch(&self, session: &mut Session, calls: &[ToolCall]) -> Result<BatchOutcome> {
        for (idx, call) in calls.iter().enumerate() {
            tracing::info!(
                tool_call_id = %call.id,
                tool_name = %call.name,
                arguments_len = call.arguments.len(),
                "agent handling tool call"
            );
            let started = Instant::now();
            let executed = self
                .tools
                .execute(&call.name, &call.arguments, session.user.as_ref())
                .await;
            let outcome = match executed {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        tool_call_id = %call.id,
                        tool_name = %call.name,
                        error = %e,
                        "tool call failed; aborting run"
                    );
                    close_unanswered(
                        session,
                        &calls[idx..],
                        FailureKind::Aborted,
                        "Not executed: the request failed before this call could run",
                    );
                    return Err(e.into());
                }
            };
            tracing::info!(
                tool_call_id = %call.id,
                tool_name = %call.name,
                latency_ms = started.elapsed().as_millis() as u64,
                success = outcome.is_success(),
                failure_kind = ?outcome.failure_kind(),
                "tool call executed"
            );

            match outcome {
                ToolOutcome::ApprovalRequired { approval, .. } => {
                    let order_id = approval.order_id.clone();
                    session.pending_approval = Some(PendingApproval::new(call.id.clone(), approval));
                    close_unanswered(
                        session,
                        &calls[idx + 1..],
                        FailureKind::Skipped,
                        "Not executed: waiting for the customer to confirm a verification code",
                    );
                    self.events.publish(
                        session.id,
                        AgentEvent::verification_request(session.id, &order_id),
                    );
                    tracing::info!(
                        tool_call_id = %call.id,
                        order_id = %order_id,
                        skipped_calls = calls.len() - idx - 1,
                        "agent suspended for approval"
                    );
                    return Ok(BatchOutcome::Suspended);
                }
                other => {
                    session.push(ChatMessage::tool_result(
                        call.id.clone(),
                        other.to_result_json().to_string(),
                    ));
                }
            }
        }
        Ok(BatchOutcome::Continue)
    }

    fn build_context(&self, session: &Session) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(session.history.len() + 1);
        messages.push(ChatMessage::system(system_prompt_for(
            &self.system_prompt,
            session.user.as_ref(),
        )));
        messages.extend(session.history.iter().cloned());
        messages
    }
}

/// Append a structured failure for each call so no call is left unanswered.
fn close_unanswered(session: &mut Session, calls: &[ToolCall], kind: FailureKind, reason: &str) {
    for call in calls {
        let result = ToolOutcome::failure(kind, reason).to_result_json();
        session.push(ChatMessage::tool_result(call.id.clone(), result.to_string()));
    }
}

pub fn system_prompt_for(base: &str, user: Option<&UserIdentity>) -> String {
    match user {
        Some(user) => format!(
            "{base}\n\nCURRENT USER CONTEXT:\n- User ID: {}\n- Name: {}\n- Email: {}\n",
            user.id, user.name, user.email
        ),
        None => base.to_string(),
    }
}
