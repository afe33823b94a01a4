//! LLM collaborator for the support desk.
//!
//! Pure HTTP client against OpenAI-compatible chat completion endpoints,
//! plus the `ChatModel` seam the agent loop is written against.

mod client;
mod error;
mod openai;
mod types;

pub use client::{ChatModel, DEFAULT_BASE_URL, LlmClient, validate_tool_name};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
