//! Locally implemented tools.

use std::collections::BTreeMap;

use async_trait::async_trait;
use llm::{ToolDefinition, ToolResult};
use serde_json::Value;

use crate::{ToolError, ToolExecutionContext, ToolProvider};

/// A locally implemented tool: its definition plus the function behind it.
///
/// Implementations may return rich [`ToolResult`]s (text plus attachments
/// and structured data) or build one from a plain string.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, arguments: Value, context: &ToolExecutionContext) -> anyhow::Result<ToolResult>;
}

/// Provider over a name-keyed registry of local tools.
pub struct LocalProvider {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self { tools: BTreeMap::new() }
    }

    /// Register a tool, rejecting duplicate names.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.definition().name;

        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }

        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Check arguments against the declared parameter schema.
///
/// Not a full JSON Schema validator: arguments must be an object, required
/// properties must be present, and primitive types must line up. The model
/// gets the error text back, so messages stay descriptive.
fn validate_arguments(name: &str, schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let Some(arguments_object) = arguments.as_object() else {
        return Err(ToolError::InvalidArguments {
            name: name.to_string(),
            message: "arguments must be a JSON object".to_string(),
        });
    };

    for required in schema
        .get("required")
        .and_then(Value::as_array)
        .map(|values| values.as_slice())
        .unwrap_or_default()
    {
        if let Some(required) = required.as_str()
            && !arguments_object.contains_key(required)
        {
            return Err(ToolError::InvalidArguments {
                name: name.to_string(),
                message: format!("missing required parameter '{required}'"),
            });
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in arguments_object {
        let Some(expected) = properties.get(key).and_then(|property| property.get("type")).and_then(Value::as_str)
        else {
            continue;
        };

        let matches = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };

        if !matches && !value.is_null() {
            return Err(ToolError::InvalidArguments {
                name: name.to_string(),
                message: format!("parameter '{key}' must be of type {expected}"),
            });
        }
    }

    Ok(())
}

#[async_trait]
impl ToolProvider for LocalProvider {
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.tools.values().map(|tool| tool.definition()).collect())
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let Some(tool) = self.tools.get(name) else {
            return Err(ToolError::NotFound(name.to_string()));
        };

        let definition = tool.definition();
        validate_arguments(name, &definition.parameters, &arguments)?;

        log::info!("Executing local tool '{name}'");

        tool.invoke(arguments, context).await.map_err(|source| {
            log::error!("Error executing local tool '{name}': {source}");
            ToolError::Execution {
                name: name.to_string(),
                source,
            }
        })
    }
}
