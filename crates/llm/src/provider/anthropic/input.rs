//! Request types for the Anthropic Messages wire format.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::client::ToolChoice;
use crate::messages::{ContentPart, Message, MessageContent, ToolDefinition};

/// Anthropic requires `max_tokens`; this default applies when no call
/// parameter sets one.
const DEFAULT_MAX_TOKENS: u64 = 8192;

/// Request body for `POST /v1/messages`.
#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnthropicMessage {
    pub role: AnthropicRole,
    pub content: Vec<AnthropicContent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum AnthropicRole {
    User,
    Assistant,
}

/// Content blocks. Tool results nest their own block list.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicContent {
    Text {
        text: String,
    },
    Image {
        source: AnthropicSource,
    },
    Document {
        source: AnthropicSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<AnthropicContent>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum AnthropicSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

pub(crate) fn build_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| AnthropicTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.parameters.clone(),
        })
        .collect()
}

/// `none` maps to an absent tool choice; the tool list is still sent.
pub(crate) fn tool_choice_to_wire(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::None => None,
        ToolChoice::Auto => Some(json!({"type": "auto"})),
        ToolChoice::Required => Some(json!({"type": "any"})),
        ToolChoice::Tool(name) => Some(json!({"type": "tool", "name": name})),
    }
}

/// Extract call parameters this wire expresses as typed fields.
pub(crate) struct CallParams {
    pub max_tokens: u64,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub stop_sequences: Option<Vec<String>>,
}

impl CallParams {
    pub(crate) fn from_params(params: &BTreeMap<String, Value>) -> Self {
        Self {
            max_tokens: params
                .get("max_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: params.get("temperature").and_then(Value::as_f64),
            top_p: params.get("top_p").and_then(Value::as_f64),
            top_k: params.get("top_k").and_then(Value::as_i64),
            stop_sequences: params
                .get("stop_sequences")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(Value::as_str).map(str::to_string).collect()),
        }
    }
}

/// Translate the neutral message list to Anthropic shape.
///
/// System messages are extracted to the top-level `system` parameter, tool
/// results become `tool_result` blocks under the user role, and consecutive
/// same-role messages are merged because this API requires strictly
/// alternating roles.
pub(crate) fn build_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut converted: Vec<AnthropicMessage> = Vec::new();

    for message in messages {
        match message {
            Message::System { content } => system_parts.push(content.clone()),
            Message::User { content } => converted.push(AnthropicMessage {
                role: AnthropicRole::User,
                content: content_blocks(content),
            }),
            Message::Assistant {
                content, tool_calls, ..
            } => {
                let mut blocks = Vec::new();

                if let Some(text) = content.as_ref().filter(|text| !text.is_empty()) {
                    blocks.push(AnthropicContent::Text { text: text.clone() });
                }

                for call in tool_calls.as_deref().unwrap_or_default() {
                    let input = match call.function.arguments.parse() {
                        Ok(Value::Null) => json!({}),
                        Ok(value) => value,
                        Err(error) => {
                            log::warn!(
                                "Tool call '{}' arguments are not valid JSON ({error}), sending empty object",
                                call.function.name
                            );
                            json!({})
                        }
                    };

                    blocks.push(AnthropicContent::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input,
                    });
                }

                if !blocks.is_empty() {
                    converted.push(AnthropicMessage {
                        role: AnthropicRole::Assistant,
                        content: blocks,
                    });
                }
            }
            Message::Tool {
                tool_call_id, content, ..
            } => converted.push(AnthropicMessage {
                role: AnthropicRole::User,
                content: vec![AnthropicContent::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: content_blocks(content),
                }],
            }),
            Message::Error { content, .. } => {
                log::warn!("Dropping error message from outgoing request: {content}");
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, merge_consecutive_roles(converted))
}

fn content_blocks(content: &MessageContent) -> Vec<AnthropicContent> {
    match content {
        MessageContent::Text(text) => vec![AnthropicContent::Text { text: text.clone() }],
        MessageContent::Parts(parts) => parts.iter().filter_map(part_to_block).collect(),
    }
}

fn part_to_block(part: &ContentPart) -> Option<AnthropicContent> {
    match part {
        ContentPart::Text { text } => Some(AnthropicContent::Text { text: text.clone() }),
        ContentPart::ImageUrl { image_url } => {
            let source = match parse_data_uri(&image_url.url) {
                Some((media_type, data)) => AnthropicSource::Base64 { media_type, data },
                None => AnthropicSource::Url {
                    url: image_url.url.clone(),
                },
            };
            Some(AnthropicContent::Image { source })
        }
        ContentPart::Attachment { attachment_id } => Some(AnthropicContent::Text {
            text: format!("[Attachment ID: {attachment_id}]"),
        }),
        ContentPart::File { file } => {
            let (media_type, data) = file.file_data.as_deref().and_then(parse_data_uri)?;
            Some(AnthropicContent::Document {
                source: AnthropicSource::Base64 { media_type, data },
            })
        }
    }
}

fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(",")?;
    let media_type = header.strip_suffix(";base64")?;
    Some((media_type.to_string(), data.to_string()))
}

/// Merge consecutive same-role messages by concatenating their block lists.
fn merge_consecutive_roles(messages: Vec<AnthropicMessage>) -> Vec<AnthropicMessage> {
    let mut merged: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        match merged.last_mut() {
            Some(previous) if previous.role == message.role => {
                previous.content.extend(message.content);
            }
            _ => merged.push(message),
        }
    }

    merged
}
