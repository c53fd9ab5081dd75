//! Neutral message model shared by every provider client.
//!
//! Messages are a tagged sum discriminated by `role`. Translation to vendor
//! wire formats lives in the provider clients; the model itself carries no
//! provider knowledge beyond the opaque [`metadata::ProviderMetadata`]
//! pass-through.

pub mod metadata;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attachment::{ToolAttachment, ToolResult};

pub use metadata::{ProviderMetadata, ThoughtSignature};

/// A single conversational message.
///
/// Transient fields (`Tool::attachments`) exist only to carry
/// provider-conversion hints across one call boundary. They are never
/// serialized and never reach persistence or the wire in transient form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// Instructions that steer model behavior.
    System { content: String },

    /// End-user input, either plain text or multimodal parts.
    User { content: MessageContent },

    /// Model output. At least one of `content` or `tool_calls` is non-empty.
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },

    /// Result of executing a tool call. `tool_call_id` echoes the id of a
    /// tool call in a preceding assistant message.
    Tool {
        tool_call_id: String,
        name: String,
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_traceback: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
        /// In-memory attachments awaiting provider conversion. Transient.
        #[serde(skip)]
        attachments: Vec<ToolAttachment>,
        /// Persisted references to externally stored attachments.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_refs: Vec<String>,
    },

    /// An error surfaced into the conversation.
    Error {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_traceback: Option<String>,
    },
}

/// Message content: a plain string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all textual content, ignoring non-text parts.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// True when the content holds no usable input: empty text, an empty
    /// part list, or parts that are all blank text.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.trim().is_empty(),
            MessageContent::Parts(parts) => parts.iter().all(|part| match part {
                ContentPart::Text { text } => text.trim().is_empty(),
                // Non-text parts (images, attachments) count as content.
                _ => false,
            }),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// A typed piece of multimodal message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// An image, by URL or `data:` URI.
    ImageUrl { image_url: ImageUrl },
    /// Reference to an externally stored attachment.
    Attachment { attachment_id: String },
    /// An inline or provider-hosted file.
    File { file: FileReference },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }

    /// An inline file carried as a `data:` URI.
    pub fn file_data(data_uri: impl Into<String>, filename: Option<String>, format: Option<String>) -> Self {
        ContentPart::File {
            file: FileReference {
                file_data: Some(data_uri.into()),
                file_id: None,
                filename,
                format,
            },
        }
    }
}

/// Image reference inside a content part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// File reference inside a content part. Either inline data (`file_data` as
/// a `data:` URI) or a provider-hosted file id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<ProviderMetadata>,
}

impl ToolCall {
    /// A `function`-typed tool call with JSON string arguments.
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: ToolArguments::Json(arguments.into()),
            },
            provider_metadata: None,
        }
    }
}

/// The function a tool call targets, with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: ToolArguments,
}

/// Tool call arguments.
///
/// Callers may supply a structured value, but arguments always serialize as
/// a JSON string: that matches the OpenAI/Anthropic wire conventions and
/// keeps record equality stable for the playback client.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    /// Arguments as a JSON string.
    Json(String),
    /// Arguments as a structured value, normalized to a string on the wire.
    Structured(Value),
}

impl ToolArguments {
    /// The arguments as a JSON string, serializing structured values.
    pub fn as_json_string(&self) -> String {
        match self {
            ToolArguments::Json(raw) => raw.clone(),
            ToolArguments::Structured(value) => serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    /// The arguments parsed to a JSON value.
    pub fn parse(&self) -> Result<Value, serde_json::Error> {
        match self {
            ToolArguments::Json(raw) => serde_json::from_str(raw),
            ToolArguments::Structured(value) => Ok(value.clone()),
        }
    }
}

impl Serialize for ToolArguments {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_json_string())
    }
}

impl<'de> Deserialize<'de> for ToolArguments {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(raw) => Ok(ToolArguments::Json(raw)),
            other => Ok(ToolArguments::Structured(other)),
        }
    }
}

/// A tool made available to the model.
///
/// `parameters` is a JSON Schema subset; each provider strips the pieces its
/// API does not accept before sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
            provider_metadata: None,
        }
    }

    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content,
            tool_calls: Some(tool_calls),
            provider_metadata: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Message::Error {
            content: content.into(),
            error_traceback: None,
        }
    }

    /// Build the `Tool` message answering `tool_call_id` from a tool result.
    ///
    /// Attachments travel on the transient field; provider clients convert
    /// them to native blocks or synthetic follow-up messages at send time.
    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, result: ToolResult) -> Self {
        let attachment_refs = result
            .attachments
            .iter()
            .filter_map(|attachment| attachment.attachment_id.clone())
            .collect();

        Message::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: MessageContent::Text(result.text),
            error_traceback: None,
            provider_metadata: None,
            attachments: result.attachments,
            attachment_refs,
        }
    }

    /// The tool calls carried by an assistant message, if any.
    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        match self {
            Message::Assistant {
                tool_calls: Some(calls),
                ..
            } if !calls.is_empty() => Some(calls),
            _ => None,
        }
    }
}

/// Serialize a message to its canonical JSON form.
///
/// This serialization is the single wire- and storage-neutral shape used by
/// the request buffer, the recorder/player, and debug logging. Transient
/// fields are omitted by construction.
pub fn message_to_json(message: &Message) -> Value {
    serde_json::to_value(message).unwrap_or_else(|error| {
        log::error!("Failed to serialize message: {error}");
        Value::Null
    })
}

/// Serialize a message slice to canonical JSON.
pub fn messages_to_json(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(message_to_json).collect()
}

/// Rebuild a message from its canonical JSON form.
pub fn message_from_json(value: Value) -> Result<Message, serde_json::Error> {
    serde_json::from_value(value)
}
