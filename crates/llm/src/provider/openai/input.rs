//! Request types for the OpenAI chat completions wire format.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::client::ToolChoice;
use crate::messages::{ContentPart, Message, MessageContent, ToolDefinition};

/// Request body for `POST /chat/completions`.
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    /// Merged default and model-pattern parameters (temperature, max_tokens,
    /// and the hoisted `reasoning` block on proxy models).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireFunctionCall {
    pub name: String,
    /// Always a JSON string on this wire.
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireToolFunction,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub(crate) fn build_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|tool| WireTool {
            kind: "function",
            function: WireToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        })
        .collect()
}

pub(crate) fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Translate the neutral message list to wire messages.
///
/// `Error` messages are an internal device and never sent; they are dropped
/// with a warning.
pub(crate) fn build_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len());

    for message in messages {
        match message {
            Message::System { content } => wire.push(WireMessage {
                role: "system",
                content: Some(json!(content)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            }),
            Message::User { content } => wire.push(WireMessage {
                role: "user",
                content: Some(content_to_wire(content)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            }),
            Message::Assistant {
                content, tool_calls, ..
            } => {
                let calls = tool_calls.as_ref().filter(|calls| !calls.is_empty()).map(|calls| {
                    calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            kind: call.kind.clone(),
                            function: WireFunctionCall {
                                name: call.function.name.clone(),
                                arguments: call.function.arguments.as_json_string(),
                            },
                        })
                        .collect()
                });

                wire.push(WireMessage {
                    role: "assistant",
                    content: content.as_ref().map(|content| json!(content)),
                    tool_calls: calls,
                    tool_call_id: None,
                    name: None,
                });
            }
            Message::Tool {
                tool_call_id,
                name,
                content,
                ..
            } => wire.push(WireMessage {
                role: "tool",
                // Tool content is a plain string on this wire; multimodal
                // parts never reach here because the OpenAI family converts
                // attachments to synthetic user messages instead.
                content: Some(json!(content.text())),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
                name: Some(name.clone()),
            }),
            Message::Error { content, .. } => {
                log::warn!("Dropping error message from outgoing request: {content}");
            }
        }
    }

    wire
}

fn content_to_wire(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(text) => json!(text),
        MessageContent::Parts(parts) => {
            let wire_parts: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::ImageUrl { image_url } => {
                        json!({"type": "image_url", "image_url": {"url": image_url.url}})
                    }
                    // This wire has no attachment reference concept; leave a
                    // textual marker the model can correlate with tool output.
                    ContentPart::Attachment { attachment_id } => {
                        json!({"type": "text", "text": format!("[Attachment ID: {attachment_id}]")})
                    }
                    ContentPart::File { file } => json!({"type": "file", "file": file}),
                })
                .collect();
            json!(wire_parts)
        }
    }
}
