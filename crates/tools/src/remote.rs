//! Tools hosted on remote MCP servers.

use std::borrow::Cow;
use std::collections::HashMap;

use async_trait::async_trait;
use llm::{ToolDefinition, ToolResult};
use rmcp::RoleClient;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use serde_json::Value;

use crate::{ToolError, ToolExecutionContext, ToolProvider};

/// A connected MCP client session, keyed by server id.
pub type RemoteSession = RunningService<RoleClient, ()>;

/// Provider forwarding tool calls to one or more MCP sessions.
///
/// Definitions are fetched once at construction and sanitized: remote
/// servers routinely declare string `format`s the model APIs reject.
pub struct RemoteProvider {
    sessions: HashMap<String, RemoteSession>,
    /// Tool name to owning server id.
    tool_map: HashMap<String, String>,
    definitions: Vec<ToolDefinition>,
}

impl RemoteProvider {
    /// Discover tools from every session.
    pub async fn discover(sessions: HashMap<String, RemoteSession>) -> Result<Self, ToolError> {
        let mut tool_map = HashMap::new();
        let mut definitions = Vec::new();

        for (server_id, session) in &sessions {
            log::debug!("listing tools for {server_id}");

            let listed = session
                .list_tools(Default::default())
                .await
                .map_err(|source| ToolError::Execution {
                    name: format!("<list_tools:{server_id}>"),
                    source: source.into(),
                })?;

            for tool in listed.tools {
                let definition = sanitize_definition(ToolDefinition::new(
                    tool.name.to_string(),
                    tool.description.map(Cow::into_owned).unwrap_or_default(),
                    Value::Object((*tool.input_schema).clone()),
                ));

                tool_map.insert(definition.name.clone(), server_id.clone());
                definitions.push(definition);
            }
        }

        log::info!(
            "RemoteProvider initialized with {} tools from {} sessions",
            definitions.len(),
            sessions.len()
        );

        Ok(Self {
            sessions,
            tool_map,
            definitions,
        })
    }
}

/// Strip string `format` specifiers the model APIs do not accept. Remote
/// definitions are the one place these arrive from outside the process.
fn sanitize_definition(mut definition: ToolDefinition) -> ToolDefinition {
    let Some(properties) = definition
        .parameters
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    else {
        return definition;
    };

    for (parameter, details) in properties.iter_mut() {
        let Some(details) = details.as_object_mut() else { continue };

        let is_string = details.get("type").and_then(Value::as_str) == Some("string");
        let format = details.get("format").and_then(Value::as_str);

        if is_string && format.is_some_and(|format| format != "enum" && format != "date-time") {
            log::warn!(
                "Sanitizing remote tool '{}': removing unsupported format '{}' from parameter '{parameter}'",
                definition.name,
                format.unwrap_or_default(),
            );
            details.remove("format");
        }
    }

    definition
}

#[async_trait]
impl ToolProvider for RemoteProvider {
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.definitions.clone())
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        _context: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let Some(server_id) = self.tool_map.get(name) else {
            return Err(ToolError::NotFound(name.to_string()));
        };

        let Some(session) = self.sessions.get(server_id) else {
            log::error!("Session for server '{server_id}' (tool '{name}') not found");
            return Err(ToolError::NotFound(name.to_string()));
        };

        log::info!("Executing remote tool '{name}' on server '{server_id}'");

        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(ToolError::InvalidArguments {
                    name: name.to_string(),
                    message: format!("arguments must be a JSON object, got {other}"),
                });
            }
        };

        let result = session
            .call_tool(CallToolRequestParam {
                name: Cow::Owned(name.to_string()),
                arguments,
            })
            .await
            .map_err(|source| ToolError::Execution {
                name: name.to_string(),
                source: source.into(),
            })?;

        let mut parts: Vec<String> = Vec::new();
        for content in &result.content {
            if let Some(text) = content.as_text() {
                parts.push(text.text.clone());
            }
        }

        let text = if parts.is_empty() {
            "Tool executed successfully.".to_string()
        } else {
            parts.join("\n")
        };

        if result.is_error.unwrap_or(false) {
            log::error!("Remote tool '{name}' on server '{server_id}' returned an error: {text}");
            return Ok(ToolResult::from_text(format!("Error executing tool '{name}': {text}")));
        }

        Ok(ToolResult::from_text(text))
    }
}
