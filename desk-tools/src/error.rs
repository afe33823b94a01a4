use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

/// Failures that cannot be expressed as a structured tool outcome. These
/// abort the agent loop instead of being fed back to the model.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid tool definition: {0}")]
    InvalidDefinition(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("notification failed: {0}")]
    Notification(String),
}

impl From<rusqlite::Error> for ToolError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ToolError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Store(format!("store task failed: {e}"))
    }
}

impl From<desk_llm::LlmError> for ToolError {
    fn from(e: desk_llm::LlmError) -> Self {
        Self::InvalidDefinition(e.to_string())
    }
}

/// Kind of a structured, model-visible tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Absent, or owned by someone else. The two are never distinguished.
    NotFound,
    InvalidState,
    InvalidCredential,
    InvalidArguments,
    /// Not executed because an earlier call in the batch suspended the run.
    Skipped,
    /// Not executed because the run failed before reaching the call.
    Aborted,
    Denied,
}
