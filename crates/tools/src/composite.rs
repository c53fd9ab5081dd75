//! Composition of ordered providers behind one interface.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use llm::{ToolDefinition, ToolResult};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::{ToolError, ToolExecutionContext, ToolProvider};

/// Combines providers in order.
///
/// Definitions are fetched and validated for globally unique names on first
/// use, then cached. Execution tries each child in order, suppressing only
/// [`ToolError::NotFound`]; any other failure surfaces immediately.
pub struct CompositeProvider {
    providers: Vec<Arc<dyn ToolProvider>>,
    definitions: OnceCell<Vec<ToolDefinition>>,
}

impl CompositeProvider {
    pub fn new(providers: Vec<Arc<dyn ToolProvider>>) -> Self {
        log::info!("CompositeProvider initialized with {} providers", providers.len());

        Self {
            providers,
            definitions: OnceCell::new(),
        }
    }

    async fn load_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let mut all = Vec::new();
        let mut names: HashSet<String> = HashSet::new();

        for provider in &self.providers {
            let definitions = provider.get_tool_definitions().await?;

            for definition in &definitions {
                if !names.insert(definition.name.clone()) {
                    return Err(ToolError::DuplicateName(definition.name.clone()));
                }
            }

            all.extend(definitions);
        }

        log::info!("Tool name collision check passed for {} unique tools", names.len());
        Ok(all)
    }
}

#[async_trait]
impl ToolProvider for CompositeProvider {
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let definitions = self
            .definitions
            .get_or_try_init(|| self.load_definitions())
            .await?;

        Ok(definitions.clone())
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        for provider in &self.providers {
            match provider.execute_tool(name, arguments.clone(), context).await {
                Ok(result) => return Ok(result),
                Err(ToolError::NotFound(_)) => continue,
                Err(other) => return Err(other),
            }
        }

        log::error!("Tool '{name}' not found in any registered provider");
        Err(ToolError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedProvider {
        definitions: Vec<ToolDefinition>,
        response: &'static str,
    }

    #[async_trait]
    impl ToolProvider for FixedProvider {
        async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
            Ok(self.definitions.clone())
        }

        async fn execute_tool(
            &self,
            name: &str,
            _arguments: Value,
            _context: &ToolExecutionContext,
        ) -> Result<ToolResult, ToolError> {
            if self.definitions.iter().any(|definition| definition.name == name) {
                Ok(ToolResult::from_text(self.response))
            } else {
                Err(ToolError::NotFound(name.to_string()))
            }
        }
    }

    fn definition(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "test tool", json!({"type": "object", "properties": {}}))
    }

    fn provider(names: &[&str], response: &'static str) -> Arc<dyn ToolProvider> {
        Arc::new(FixedProvider {
            definitions: names.iter().map(|name| definition(name)).collect(),
            response,
        })
    }

    #[tokio::test]
    async fn definitions_concatenate_in_provider_order() {
        let composite = CompositeProvider::new(vec![provider(&["a", "b"], "one"), provider(&["c"], "two")]);

        let definitions = composite.get_tool_definitions().await.unwrap();
        let names: Vec<&str> = definitions.iter().map(|definition| definition.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn overlapping_names_fail_fast() {
        let composite = CompositeProvider::new(vec![provider(&["a"], "one"), provider(&["a"], "two")]);

        let error = composite.get_tool_definitions().await.unwrap_err();
        assert!(matches!(error, ToolError::DuplicateName(name) if name == "a"));
    }

    #[tokio::test]
    async fn execution_tries_providers_in_order() {
        let composite = CompositeProvider::new(vec![provider(&["a"], "first"), provider(&["b"], "second")]);
        let context = ToolExecutionContext::new(1);

        let result = composite.execute_tool("b", json!({}), &context).await.unwrap();
        assert_eq!(result.text, "second");

        let error = composite.execute_tool("missing", json!({}), &context).await.unwrap_err();
        assert!(matches!(error, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_lookup_failures_surface_immediately() {
        struct Failing;

        #[async_trait]
        impl ToolProvider for Failing {
            async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
                Ok(vec![])
            }

            async fn execute_tool(
                &self,
                name: &str,
                _arguments: Value,
                _context: &ToolExecutionContext,
            ) -> Result<ToolResult, ToolError> {
                Err(ToolError::Execution {
                    name: name.to_string(),
                    source: anyhow::anyhow!("backend down"),
                })
            }
        }

        let composite = CompositeProvider::new(vec![Arc::new(Failing), provider(&["a"], "never")]);
        let context = ToolExecutionContext::new(1);

        let error = composite.execute_tool("a", json!({}), &context).await.unwrap_err();
        assert!(matches!(error, ToolError::Execution { .. }));
    }
}
