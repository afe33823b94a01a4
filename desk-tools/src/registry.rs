use crate::error::{FailureKind, Result, ToolError};
use crate::model::UserIdentity;
use crate::traits::{Tool, ToolOutcome, to_llm_tool_def};
use desk_llm::ToolDefinition;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Name-indexed set of tools with their model-facing definitions.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Rejects names the model API would refuse and duplicate names.
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(tools.len());
        let mut definitions = Vec::with_capacity(tools.len());
        for tool in tools {
            let def = to_llm_tool_def(tool.as_ref())?;
            if by_name.contains_key(&def.name) {
                return Err(ToolError::InvalidDefinition(format!(
                    "duplicate tool name: {}",
                    def.name
                )));
            }
            by_name.insert(def.name.clone(), tool);
            definitions.push(def);
        }
        Ok(Self {
            tools: by_name,
            definitions,
        })
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Run a tool with raw model-supplied arguments.
    ///
    /// Unknown names are protocol errors. Unparseable or incomplete arguments
    /// come back as an `invalid_arguments` outcome so the model can retry.
    #[tracing::instrument(level = "debug", skip(self, arguments_json, actor))]
    pub async fn execute(
        &self,
        name: &str,
        arguments_json: &str,
        actor: Option<&UserIdentity>,
    ) -> Result<ToolOutcome> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let arguments = match parse_arguments(arguments_json) {
            Ok(v) => v,
            Err(reason) => {
                tracing::warn!(tool = name, %reason, "model sent malformed tool arguments");
                return Ok(ToolOutcome::failure(FailureKind::InvalidArguments, reason));
            }
        };

        match tool.execute(arguments, actor).await {
            Err(ToolError::InvalidArguments(reason)) => {
                tracing::warn!(tool = name, %reason, "tool rejected arguments");
                Ok(ToolOutcome::failure(FailureKind::InvalidArguments, reason))
            }
            other => other,
        }
    }
}

fn parse_arguments(raw: &str) -> std::result::Result<Value, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(other) => Err(format!("arguments must be a JSON object, got {other}")),
        Err(e) => Err(format!("arguments are not valid JSON: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::orders::{GET_ORDER_STATUS, order_tools};
    use crate::seed;
    use crate::store::InMemoryOrderStore;
    use crate::traits::ToolSpec;
    use async_trait::async_trait;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let store = Arc::new(InMemoryOrderStore::with_data(
            seed::demo_users(),
            seed::demo_orders(),
        ));
        ToolRegistry::new(order_tools(store, Arc::new(LogNotifier))).unwrap()
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.0.to_string(),
                description: "test".to_string(),
                parameters_schema: json!({ "type": "object" }),
            }
        }

        async fn execute(&self, _: Value, _: Option<&UserIdentity>) -> Result<ToolOutcome> {
            Ok(ToolOutcome::Success(Value::Null))
        }
    }

    #[test]
    fn exposes_every_order_tool() {
        let reg = registry();
        assert_eq!(
            reg.names(),
            vec![
                "get_order_status",
                "list_orders",
                "generate_cancellation_code",
                "cancel_order_with_verification",
            ]
        );
        assert!(reg.get(GET_ORDER_STATUS).is_some());
    }

    #[test]
    fn rejects_duplicate_and_invalid_names() {
        let dup: Vec<Arc<dyn Tool>> = vec![Arc::new(NamedTool("a")), Arc::new(NamedTool("a"))];
        assert!(matches!(ToolRegistry::new(dup), Err(ToolError::InvalidDefinition(_))));

        let bad: Vec<Arc<dyn Tool>> = vec![Arc::new(NamedTool("has space"))];
        let bad = ToolRegistry::new(bad);
        assert!(matches!(bad, Err(ToolError::InvalidDefinition(_))));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let err = registry().execute("refund_everything", "{}", None).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "refund_everything"));
    }

    #[tokio::test]
    async fn malformed_arguments_become_structured_failures() {
        let reg = registry();
        let ada = seed::demo_users().remove(0);

        let not_json = reg.execute(GET_ORDER_STATUS, "{order_id:", Some(&ada)).await.unwrap();
        assert_eq!(not_json.failure_kind(), Some(FailureKind::InvalidArguments));

        let not_object = reg.execute(GET_ORDER_STATUS, "[1]", Some(&ada)).await.unwrap();
        assert_eq!(not_object.failure_kind(), Some(FailureKind::InvalidArguments));

        let missing_key = reg.execute(GET_ORDER_STATUS, "", Some(&ada)).await.unwrap();
        assert_eq!(missing_key.failure_kind(), Some(FailureKind::InvalidArguments));
    }

    #[tokio::test]
    async fn executes_with_parsed_arguments() {
        let reg = registry();
        let ada = seed::demo_users().remove(0);
        let outcome = reg
            .execute(GET_ORDER_STATUS, r#"{"order_id":"ORD-003"}"#, Some(&ada))
            .await
            .unwrap();
        let ToolOutcome::Success(payload) = outcome else {
            panic!("expected success");
        };
        assert_eq!(payload["order"]["status"], "delivered");
    }
}
