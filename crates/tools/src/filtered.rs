//! Permit-list filtering over a provider.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use llm::{ToolDefinition, ToolResult};
use serde_json::Value;

use crate::{ToolError, ToolExecutionContext, ToolProvider};

/// Restricts a provider to a permit-list of tool names, for both
/// definitions and execution.
pub struct FilteredProvider {
    inner: Arc<dyn ToolProvider>,
    allowed: HashSet<String>,
}

impl FilteredProvider {
    pub fn new(inner: Arc<dyn ToolProvider>, allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner,
            allowed: allowed.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ToolProvider for FilteredProvider {
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let definitions = self.inner.get_tool_definitions().await?;

        Ok(definitions
            .into_iter()
            .filter(|definition| self.allowed.contains(&definition.name))
            .collect())
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        if !self.allowed.contains(name) {
            return Err(ToolError::NotFound(name.to_string()));
        }

        self.inner.execute_tool(name, arguments, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalProvider, Tool};
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.0, "echo", json!({"type": "object", "properties": {}}))
        }

        async fn invoke(&self, _arguments: Value, _context: &ToolExecutionContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::from_text(self.0))
        }
    }

    fn filtered() -> FilteredProvider {
        let mut local = LocalProvider::new();
        local.register(Box::new(Echo("allowed_tool"))).unwrap();
        local.register(Box::new(Echo("hidden_tool"))).unwrap();

        FilteredProvider::new(Arc::new(local), ["allowed_tool".to_string()])
    }

    #[tokio::test]
    async fn definitions_are_restricted_to_the_permit_list() {
        let definitions = filtered().get_tool_definitions().await.unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "allowed_tool");
    }

    #[tokio::test]
    async fn execution_outside_the_permit_list_is_not_found() {
        let context = ToolExecutionContext::new(1);

        let result = filtered()
            .execute_tool("allowed_tool", json!({}), &context)
            .await
            .unwrap();
        assert_eq!(result.text, "allowed_tool");

        let error = filtered()
            .execute_tool("hidden_tool", json!({}), &context)
            .await
            .unwrap_err();
        assert!(matches!(error, ToolError::NotFound(_)));
    }
}
