use desk_llm::LlmError;
use desk_tools::ToolError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, DeskError>;

#[derive(Debug, Error)]
pub enum DeskError {
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("{0}")]
    InvalidState(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("agent stopped after {0} model calls without a final answer")]
    IterationLimit(usize),
}

impl DeskError {
    pub fn no_pending_approval() -> Self {
        Self::InvalidState("no pending approval".to_string())
    }
}

impl From<LlmError> for DeskError {
    fn from(e: LlmError) -> Self {
        Self::Upstream(format!("llm: {e}"))
    }
}

impl From<ToolError> for DeskError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::UnknownTool(name) => {
                Self::ProtocolViolation(format!("model requested unknown tool {name:?}"))
            }
            ToolError::InvalidDefinition(msg) => Self::ProtocolViolation(msg),
            ToolError::InvalidArguments(msg) => {
                Self::ProtocolViolation(format!("invalid tool arguments: {msg}"))
            }
            ToolError::Store(msg) => Self::Upstream(format!("order store: {msg}")),
            ToolError::Notification(msg) => Self::Upstream(format!("notifier: {msg}")),
        }
    }
}
