use crate::error::{FailureKind, Result, ToolError};
use crate::model::UserIdentity;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Contact details copied onto a pending approval so the approval flow does
/// not need to look the owner up again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalContext {
    pub order_id: String,
    pub code: String,
    pub contact: ContactInfo,
}

/// Result of a tool handler. Failures are data: they go back to the model as
/// a tool-result message.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure { kind: FailureKind, reason: String },
    ApprovalRequired {
        payload: Value,
        approval: ApprovalContext,
    },
}

impl ToolOutcome {
    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            reason: reason.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::failure(FailureKind::NotFound, "Order not found")
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// JSON body of the tool-result message fed back to the model.
    pub fn to_result_json(&self) -> Value {
        match self {
            Self::Success(payload) => with_success_flag(payload, true),
            Self::Failure { kind, reason } => json!({
                "success": false,
                "error": reason,
                "error_kind": kind,
            }),
            Self::ApprovalRequired { payload, .. } => {
                let mut out = with_success_flag(payload, true);
                out["requires_approval"] = Value::Bool(true);
                out
            }
        }
    }
}

fn with_success_flag(payload: &Value, success: bool) -> Value {
    let mut out = json!({ "success": success });
    match payload {
        Value::Object(map) => {
            for (k, v) in map {
                out[k] = v.clone();
            }
        }
        Value::Null => {}
        other => out["result"] = other.clone(),
    }
    out
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// `actor` is the user the call acts for; handlers enforce ownership
    /// themselves and fail closed when it is absent.
    async fn execute(&self, arguments: Value, actor: Option<&UserIdentity>)
    -> Result<ToolOutcome>;
}

/// Model-facing definition of `tool`. Fails on names the model API rejects.
pub fn to_llm_tool_def(tool: &dyn Tool) -> Result<desk_llm::ToolDefinition> {
    let spec = tool.spec();
    Ok(desk_llm::ToolDefinition::validated(
        spec.name,
        spec.description,
        spec.parameters_schema,
    )?)
}

pub(crate) fn require_string(args: &Value, key: &str) -> Result<String> {
    let Some(v) = args.get(key) else {
        return Err(ToolError::InvalidArguments(format!("missing key: {key}")));
    };
    match v {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::String(_) => Err(ToolError::InvalidArguments(format!(
            "key {key} must not be empty"
        ))),
        other => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other:?}"
        ))),
    }
}
