//! The provider client contract and its shared input/output types.

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, LlmResult};
use crate::messages::{Message, ToolCall, ToolDefinition};
use crate::structured::StructuredSchema;

/// Default number of validation retries for structured output generation.
pub const DEFAULT_STRUCTURED_RETRIES: u32 = 2;

/// How the model may use the provided tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model decides whether to call tools.
    #[default]
    Auto,
    /// No tool calls allowed.
    None,
    /// The model must call at least one tool.
    Required,
    /// The model must call the named tool.
    Tool(String),
}

impl ToolChoice {
    /// Canonical string form, used in request records and recordings.
    pub fn as_str(&self) -> &str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
            ToolChoice::Required => "required",
            ToolChoice::Tool(name) => name,
        }
    }
}

/// Standardized output of a unary LLM call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Vendor usage and reasoning metadata as a flat JSON map. Copied
    /// verbatim; the core never interprets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<crate::messages::ProviderMetadata>,
}

impl LlmOutput {
    /// True when the model produced neither text nor tool calls.
    pub fn is_empty(&self) -> bool {
        let no_content = self.content.as_deref().is_none_or(|content| content.is_empty());
        let no_calls = self.tool_calls.as_deref().is_none_or(|calls| calls.is_empty());
        no_content && no_calls
    }
}

/// A single unit of a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text. Concatenating all `Content` events recovers the
    /// full response text; fragmentation is not stable across runs.
    Content(String),
    /// A fully assembled tool call, emitted once per call.
    ToolCall(ToolCall),
    /// Tool-result surrogate, present only in playback/synthetic streams.
    ToolResult { tool_call_id: String, result: String },
    /// Terminal failure. Exactly one of `Error` or `Done` ends a stream.
    Error {
        message: String,
        error_id: Option<String>,
        error_type: Option<String>,
    },
    /// Terminal success, with optional metadata such as `reasoning_info`.
    Done { metadata: Option<Value> },
}

impl StreamEvent {
    pub(crate) fn from_error(error: &LlmError) -> Self {
        StreamEvent::Error {
            message: error.to_string(),
            error_id: Some(error.error_type().to_string()),
            error_type: Some(error.error_type().to_string()),
        }
    }
}

/// Lazy sequence of stream events. Terminates with exactly one `Done` or
/// `Error` event; consumers must tolerate both.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// The uniform contract every provider client implements.
///
/// Clients are immutable after construction and shared across turns. The
/// trait is object-safe; the typed structured-output surface lives on
/// [`StructuredExt`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// The configured model identifier.
    fn model(&self) -> &str;

    /// Provider name used in logs and error context.
    fn provider_name(&self) -> &str;

    /// Whether this provider accepts images and documents inside tool
    /// results natively.
    fn supports_multimodal_tools(&self) -> bool {
        false
    }

    /// Run a unary completion.
    async fn generate_response(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmOutput>;

    /// Run a streaming completion.
    async fn generate_response_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<EventStream>;

    /// Generate a JSON value validated against `schema`.
    ///
    /// The default implementation is the instruction-and-parse fallback:
    /// it asks for JSON matching the schema, extracts a candidate from the
    /// reply, validates, and feeds validation errors back for up to
    /// `max_retries` further attempts. Providers with native structured
    /// output override this.
    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &StructuredSchema,
        max_retries: u32,
    ) -> LlmResult<Value> {
        crate::structured::generate_with_instructions(self, messages, schema, max_retries).await
    }

    /// Build a `User` message carrying a file in whatever shape this
    /// provider supports: inline image data URI, native document part, or
    /// truncated inline text.
    async fn format_user_message_with_file(
        &self,
        prompt_text: Option<&str>,
        file_path: Option<&Path>,
        mime_type: Option<&str>,
        max_text_length: Option<usize>,
    ) -> LlmResult<Message>;
}

/// Typed structured-output surface on top of the object-safe trait.
#[async_trait]
pub trait StructuredExt {
    /// Generate an instance of `T`, validating and retrying per
    /// [`LlmClient::generate_structured`].
    async fn structured<T: crate::structured::StructuredResponse>(&self, messages: &[Message]) -> LlmResult<T>;
}

#[async_trait]
impl<C: LlmClient + ?Sized> StructuredExt for C {
    async fn structured<T: crate::structured::StructuredResponse>(&self, messages: &[Message]) -> LlmResult<T> {
        let schema = StructuredSchema::of::<T>();
        let value = self
            .generate_structured(messages, &schema, DEFAULT_STRUCTURED_RETRIES)
            .await?;

        serde_json::from_value(value).map_err(|error| LlmError::StructuredOutput {
            provider: self.provider_name().to_string(),
            model: self.model().to_string(),
            message: "validated response no longer deserializes".to_string(),
            raw_response: None,
            validation_error: Some(error.to_string()),
        })
    }
}

/// Reject calls whose last user message is empty before they reach the
/// vendor. Empty input would fail there anyway, with a worse error.
pub(crate) fn validate_user_input(messages: &[Message], provider: &str, model: &str) -> LlmResult<()> {
    let last_user = messages.iter().rev().find_map(|message| match message {
        Message::User { content } => Some(content),
        _ => None,
    });

    match last_user {
        Some(content) if content.is_empty() => Err(LlmError::InvalidRequest {
            provider: provider.to_string(),
            model: model.to_string(),
            message: "User message cannot be empty".to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ContentPart, MessageContent};

    #[test]
    fn empty_last_user_message_is_rejected() {
        let messages = vec![Message::system("sys"), Message::user("  ")];
        let result = validate_user_input(&messages, "openai", "gpt-4.1");
        assert!(matches!(result, Err(LlmError::InvalidRequest { .. })));
    }

    #[test]
    fn non_text_parts_count_as_input() {
        let messages = vec![Message::user(MessageContent::Parts(vec![ContentPart::image_url(
            "data:image/png;base64,eA==",
        )]))];
        assert!(validate_user_input(&messages, "openai", "gpt-4.1").is_ok());
    }

    #[test]
    fn conversations_without_user_messages_pass() {
        let messages = vec![Message::system("sys"), Message::assistant("hello")];
        assert!(validate_user_input(&messages, "openai", "gpt-4.1").is_ok());
    }

    #[test]
    fn output_emptiness() {
        assert!(LlmOutput::default().is_empty());
        assert!(
            LlmOutput {
                content: Some(String::new()),
                tool_calls: Some(vec![]),
                ..Default::default()
            }
            .is_empty()
        );
        assert!(
            !LlmOutput {
                content: Some("hi".to_string()),
                ..Default::default()
            }
            .is_empty()
        );
    }
}
