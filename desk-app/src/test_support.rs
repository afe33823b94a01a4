//! Test doubles shared by the desk-app unit tests.

use async_trait::async_trait;
use desk_llm::{ChatMessage, ChatModel, ChatResponse, LlmError, Role, ToolCall, ToolDefinition, Usage};
use desk_tools::{InMemoryOrderStore, LogNotifier, ToolRegistry, order_tools, seed};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays canned responses in order and records every prompt it sees.
pub struct ScriptedModel {
    script: Mutex<VecDeque<desk_llm::Result<ChatResponse>>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Duration,
}

impl ScriptedModel {
    pub fn new(script: Vec<desk_llm::Result<ChatResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep before answering, to leave room for interleaving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, idx: usize) -> Vec<ChatMessage> {
        self.prompts.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> desk_llm::Result<ChatResponse> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(LlmError::InvalidInput("script exhausted".to_string())))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 12,
        completion_tokens: 4,
    }
}

pub fn reply(text: &str) -> ChatResponse {
    ChatResponse {
        message: ChatMessage::assistant(text),
        usage: usage(),
        finish_reason: "stop".to_string(),
    }
}

pub fn calls_reply(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        message: ChatMessage::assistant_tool_calls("", calls),
        usage: usage(),
        finish_reason: "tool_calls".to_string(),
    }
}

pub fn tool_reply(calls: Vec<(&str, &str, Value)>) -> ChatResponse {
    calls_reply(
        calls
            .into_iter()
            .map(|(id, name, args)| ToolCall::new(id, name, args))
            .collect(),
    )
}

pub fn desk_tools_fixture() -> (Arc<InMemoryOrderStore>, Arc<ToolRegistry>) {
    let store = Arc::new(InMemoryOrderStore::with_data(
        seed::demo_users(),
        seed::demo_orders(),
    ));
    let registry = ToolRegistry::new(order_tools(store.clone(), Arc::new(LogNotifier)))
        .expect("order tools register");
    (store, Arc::new(registry))
}

/// Every assistant tool call is answered by exactly one tool result before
/// the next non-tool message.
pub fn assert_history_closed(history: &[ChatMessage]) {
    let mut i = 0;
    while i < history.len() {
        let msg = &history[i];
        i += 1;
        if msg.role != Role::Assistant || msg.tool_calls.is_empty() {
            continue;
        }
        let mut open: Vec<&str> = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
        while i < history.len() && history[i].role == Role::Tool {
            let id = history[i].tool_call_id.as_deref().expect("tool result has an id");
            let pos = open
                .iter()
                .position(|c| *c == id)
                .unwrap_or_else(|| panic!("tool result {id} answers no open call"));
            open.remove(pos);
            i += 1;
        }
        assert!(open.is_empty(), "unanswered tool calls: {open:?}");
    }
}
