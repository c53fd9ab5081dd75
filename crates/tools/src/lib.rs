//! Tool provider stack for the LLM orchestration loop.
//!
//! The orchestrator sees one [`ToolProvider`] interface; behind it,
//! providers compose: local registries, remote MCP sessions, composition,
//! name filtering, and per-tool user confirmation. [`Orchestrator`] drives
//! the model-calls-tools loop on top of the stack.

mod composite;
mod confirming;
mod filtered;
mod local;
mod orchestrator;
mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use llm::{ToolDefinition, ToolResult};
use serde_json::Value;
use thiserror::Error;

pub use composite::CompositeProvider;
pub use confirming::ConfirmingProvider;
pub use filtered::FilteredProvider;
pub use local::{LocalProvider, Tool};
pub use orchestrator::{ExecutedTool, Orchestrator, TurnError, TurnOutcome};
pub use remote::RemoteProvider;

/// Failures surfaced by the tool provider stack.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No provider in the stack handles this tool name.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// The tool needs user approval and no confirmation callback is
    /// available; the orchestration loop must yield to the chat interface.
    #[error("tool '{name}' requires user confirmation")]
    ConfirmationRequired { name: String, prompt: String },

    /// The user declined execution.
    #[error("user declined execution of tool '{name}'")]
    ConfirmationFailed { name: String },

    /// Arguments do not match the tool's parameter schema.
    #[error("invalid arguments for tool '{name}': {message}")]
    InvalidArguments { name: String, message: String },

    /// A tool name was registered twice.
    #[error("duplicate tool name '{0}'; tool names must be unique across all providers")]
    DuplicateName(String),

    /// The tool ran and failed.
    #[error("tool '{name}' failed: {source}")]
    Execution {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Callback asking the user to approve a tool execution.
#[async_trait]
pub trait ConfirmationCallback: Send + Sync {
    /// Returns whether the user approved running `tool_name` with `args`.
    /// May block arbitrarily long on a human response.
    async fn confirm(&self, prompt: &str, tool_name: &str, args: &Value) -> bool;
}

/// Context threaded through every tool execution.
#[derive(Clone)]
pub struct ToolExecutionContext {
    /// Chat the turn belongs to.
    pub chat_id: i64,
    /// IANA timezone name for user-facing time rendering.
    pub timezone: String,
    /// Confirmation callback supplied by the chat interface, when present.
    pub confirmation: Option<Arc<dyn ConfirmationCallback>>,
}

impl ToolExecutionContext {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            timezone: "UTC".to_string(),
            confirmation: None,
        }
    }

    pub fn with_confirmation(mut self, callback: Arc<dyn ConfirmationCallback>) -> Self {
        self.confirmation = Some(callback);
        self
    }
}

/// A source of tool definitions and executions.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Tool definitions in the neutral format handed to LLM clients.
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError>;

    /// Execute the named tool.
    ///
    /// Fails with [`ToolError::NotFound`] when this provider does not
    /// handle `name`; composition relies on that to try the next provider.
    async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> Result<ToolResult, ToolError>;
}
