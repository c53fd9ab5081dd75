//! Per-tool user confirmation gating.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use llm::{ToolDefinition, ToolResult};
use serde_json::Value;

use crate::{ToolError, ToolExecutionContext, ToolProvider};

/// Gates a set of tools behind the caller's confirmation callback.
///
/// For a gated tool: no callback in the context means
/// [`ToolError::ConfirmationRequired`] (the orchestrator yields to the chat
/// interface), a declining callback means [`ToolError::ConfirmationFailed`]
/// (reported back to the model), approval proceeds to the wrapped provider.
pub struct ConfirmingProvider {
    inner: Arc<dyn ToolProvider>,
    requires_confirmation: HashSet<String>,
}

impl ConfirmingProvider {
    pub fn new(inner: Arc<dyn ToolProvider>, requires_confirmation: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner,
            requires_confirmation: requires_confirmation.into_iter().collect(),
        }
    }

    fn prompt_for(name: &str, arguments: &Value) -> String {
        let rendered = serde_json::to_string_pretty(arguments).unwrap_or_else(|_| arguments.to_string());
        format!("The assistant wants to run '{name}' with arguments:\n{rendered}\n\nAllow?")
    }
}

#[async_trait]
impl ToolProvider for ConfirmingProvider {
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        self.inner.get_tool_definitions().await
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        if self.requires_confirmation.contains(name) {
            let prompt = Self::prompt_for(name, &arguments);

            let Some(callback) = &context.confirmation else {
                return Err(ToolError::ConfirmationRequired {
                    name: name.to_string(),
                    prompt,
                });
            };

            if !callback.confirm(&prompt, name, &arguments).await {
                log::info!("User declined execution of tool '{name}'");
                return Err(ToolError::ConfirmationFailed {
                    name: name.to_string(),
                });
            }
        }

        self.inner.execute_tool(name, arguments, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfirmationCallback;
    use crate::local::{LocalProvider, Tool};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DeleteNote;

    #[async_trait]
    impl Tool for DeleteNote {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("delete_note", "Delete a note", json!({"type": "object", "properties": {}}))
        }

        async fn invoke(&self, _arguments: Value, _context: &ToolExecutionContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::from_text("deleted"))
        }
    }

    struct FixedAnswer {
        answer: bool,
        asked: AtomicUsize,
    }

    #[async_trait]
    impl ConfirmationCallback for FixedAnswer {
        async fn confirm(&self, _prompt: &str, _tool_name: &str, _args: &Value) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn gated() -> ConfirmingProvider {
        let mut local = LocalProvider::new();
        local.register(Box::new(DeleteNote)).unwrap();
        ConfirmingProvider::new(Arc::new(local), ["delete_note".to_string()])
    }

    #[tokio::test]
    async fn approval_runs_the_tool() {
        let callback = Arc::new(FixedAnswer {
            answer: true,
            asked: AtomicUsize::new(0),
        });
        let context = ToolExecutionContext::new(1).with_confirmation(callback.clone());

        let result = gated().execute_tool("delete_note", json!({}), &context).await.unwrap();

        assert_eq!(result.text, "deleted");
        assert_eq!(callback.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declined_confirmation_fails() {
        let callback = Arc::new(FixedAnswer {
            answer: false,
            asked: AtomicUsize::new(0),
        });
        let context = ToolExecutionContext::new(1).with_confirmation(callback);

        let error = gated().execute_tool("delete_note", json!({}), &context).await.unwrap_err();
        assert!(matches!(error, ToolError::ConfirmationFailed { name } if name == "delete_note"));
    }

    #[tokio::test]
    async fn missing_callback_requires_confirmation() {
        let context = ToolExecutionContext::new(1);

        let error = gated().execute_tool("delete_note", json!({}), &context).await.unwrap_err();
        assert!(matches!(error, ToolError::ConfirmationRequired { .. }));
    }

    #[tokio::test]
    async fn ungated_tools_skip_the_callback() {
        let mut local = LocalProvider::new();
        local.register(Box::new(DeleteNote)).unwrap();
        let provider = ConfirmingProvider::new(Arc::new(local), []);

        let context = ToolExecutionContext::new(1);
        let result = provider.execute_tool("delete_note", json!({}), &context).await.unwrap();
        assert_eq!(result.text, "deleted");
    }
}
