//! Tool-result attachments and their conversion into model context.
//!
//! Attachment storage is an external collaborator; the core only consumes
//! records and decides how to surface their content to a model. Providers
//! with native multimodal tool results rewrite the tool message itself;
//! everyone else gets a synthetic user message injected after it.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::messages::{ContentPart, Message, MessageContent};

/// Inline-vs-summary boundary for textual attachments. Policy, not a
/// correctness guarantee: above it, schema inference plus an external query
/// tool is expected to be enough for the model.
const INLINE_SIZE_THRESHOLD: usize = 10 * 1024;

/// An attachment produced by a tool, as seen by the core.
///
/// `content` may be unresolved (path- or URL-only); a provider client
/// materializes it when it needs inline bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolAttachment {
    pub attachment_id: Option<String>,
    pub mime_type: String,
    pub size: Option<u64>,
    pub description: Option<String>,
    pub content: Option<Vec<u8>>,
    pub file_path: Option<PathBuf>,
    pub url: Option<String>,
}

impl ToolAttachment {
    /// An attachment with inline bytes.
    pub fn inline(attachment_id: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            attachment_id: Some(attachment_id.into()),
            mime_type: mime_type.into(),
            size: Some(content.len() as u64),
            description: None,
            content: Some(content),
            file_path: None,
            url: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Inline content encoded as base64, when bytes are present.
    pub fn content_as_base64(&self) -> Option<String> {
        self.content.as_ref().map(|bytes| BASE64.encode(bytes))
    }

    /// Inline content as a `data:` URI, when bytes are present.
    pub fn content_as_data_uri(&self) -> Option<String> {
        self.content_as_base64()
            .map(|encoded| format!("data:{};base64,{}", self.mime_type, encoded))
    }

    fn is_textual(&self) -> bool {
        self.mime_type == "application/json" || self.mime_type == "text/csv" || self.mime_type.starts_with("text/")
    }
}

/// Rich result of a tool execution.
///
/// Tools may return plain text or text plus attachments and structured data
/// for downstream consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResult {
    pub text: String,
    pub attachments: Vec<ToolAttachment>,
    pub structured_data: Option<Value>,
}

impl ToolResult {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
            structured_data: None,
        }
    }
}

impl From<String> for ToolResult {
    fn from(text: String) -> Self {
        ToolResult::from_text(text)
    }
}

/// Build the synthetic user message carrying an attachment's content.
///
/// The message is a model-context device, never shown to the end user. Small
/// decodable text inlines in full; large JSON gets an inferred schema plus
/// guidance toward symbolic querying; everything else gets a description.
pub fn create_attachment_injection(attachment: &ToolAttachment) -> Message {
    if let Some(bytes) = attachment.content.as_deref()
        && attachment.is_textual()
        && let Ok(decoded) = std::str::from_utf8(bytes)
    {
        let size = bytes.len();

        if size <= INLINE_SIZE_THRESHOLD {
            let mut content = String::from("[System: File from previous tool response]\n");
            if let Some(description) = &attachment.description {
                content.push_str(&format!("[Description: {description}]\n"));
            }
            if let Some(id) = &attachment.attachment_id {
                content.push_str(&format!("[Attachment ID: {id}]\n"));
            }
            content.push_str(&format!("[Content ({size} bytes)]:\n{decoded}"));
            return Message::user(content);
        }

        if attachment.mime_type == "application/json"
            && let Ok(parsed) = serde_json::from_str::<Value>(decoded)
        {
            let schema = infer_json_schema(&parsed);
            let schema_text = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| schema.to_string());
            let id = attachment.attachment_id.as_deref().unwrap_or("unknown");

            let mut content = String::from("[System: Large data attachment from previous tool response]\n");
            if let Some(description) = &attachment.description {
                content.push_str(&format!("[Description: {description}]\n"));
            }
            content.push_str(&format!("[Size: {size} bytes ({:.1} KB)]\n", size as f64 / 1024.0));
            content.push_str(&format!("[Attachment ID: {id}]\n"));
            content.push_str(&format!("\nData structure (JSON Schema):\n{schema_text}\n"));
            content.push_str("\nNote: Use the 'jq' tool to query this data symbolically. ");
            content.push_str(&format!("Reference attachment ID {id} in tool calls."));
            return Message::user(content);
        }

        // Large CSV or other text: metadata summary only.
        let mut content = String::from("[System: Large text file from previous tool response]\n");
        if let Some(description) = &attachment.description {
            content.push_str(&format!("[Description: {description}]\n"));
        }
        content.push_str(&format!("[Size: {size} bytes ({:.1} KB)]\n", size as f64 / 1024.0));
        if let Some(id) = &attachment.attachment_id {
            content.push_str(&format!("[Attachment ID: {id}]\n"));
        }
        content.push_str(&format!("[MIME type: {}]\n", attachment.mime_type));
        content.push_str("\nNote: Content too large for inline display. Use tools to access this data.");
        return Message::user(content);
    }

    let mut content = format!(
        "[System: File from previous tool response - {}]",
        attachment.description.as_deref().unwrap_or(&attachment.mime_type)
    );
    if let Some(id) = &attachment.attachment_id {
        content.push_str(&format!("\n[Attachment ID: {id}]"));
    }
    Message::user(content)
}

/// Rewrite tool messages so their transient attachments reach the model.
///
/// Multimodal providers get image and PDF attachments as content parts on
/// the tool message itself; other attachment types, and every attachment on
/// non-multimodal providers, become synthetic user messages injected after
/// the tool message. The transient attachment list is cleared on the copies
/// returned; callers' messages are never mutated.
pub(crate) fn process_tool_messages(messages: &[Message], supports_multimodal: bool) -> Vec<Message> {
    let mut processed = Vec::with_capacity(messages.len());

    for message in messages {
        let Message::Tool {
            tool_call_id,
            name,
            content,
            error_traceback,
            provider_metadata,
            attachments,
            attachment_refs,
        } = message
        else {
            processed.push(message.clone());
            continue;
        };

        if attachments.is_empty() {
            processed.push(message.clone());
            continue;
        }

        let mut injections: Vec<Message> = Vec::new();
        let mut text = content.text();

        let new_content = if supports_multimodal {
            let mut parts = vec![ContentPart::text(text.clone())];

            for attachment in attachments {
                if attachment.content.is_some() && attachment.mime_type.starts_with("image/") {
                    if let Some(uri) = attachment.content_as_data_uri() {
                        parts.push(ContentPart::image_url(uri));
                    }
                } else if attachment.content.is_some() && attachment.mime_type == "application/pdf" {
                    if let Some(uri) = attachment.content_as_data_uri() {
                        parts.push(ContentPart::file_data(
                            uri,
                            attachment.description.clone(),
                            Some(attachment.mime_type.clone()),
                        ));
                    }
                } else if attachment.content.is_some() || attachment.file_path.is_some() {
                    if attachment.content.is_some() {
                        log::warn!(
                            "Unsupported attachment type {} for multimodal tool result, falling back to text injection",
                            attachment.mime_type
                        );
                    } else {
                        log::warn!(
                            "File-path-only attachment {:?} for multimodal tool result, falling back to text injection",
                            attachment.file_path
                        );
                    }

                    if let ContentPart::Text { text } = &mut parts[0] {
                        text.push_str("\n[File content in following message]");
                    }
                    injections.push(create_attachment_injection(attachment));
                }
            }

            MessageContent::Parts(parts)
        } else {
            if attachments.len() == 1 {
                text.push_str("\n[File content in following message]");
            } else {
                text.push_str(&format!(
                    "\n[{} file(s) content in following message(s)]",
                    attachments.len()
                ));
            }

            for attachment in attachments {
                injections.push(create_attachment_injection(attachment));
            }

            MessageContent::Text(text)
        };

        processed.push(Message::Tool {
            tool_call_id: tool_call_id.clone(),
            name: name.clone(),
            content: new_content,
            error_traceback: error_traceback.clone(),
            provider_metadata: provider_metadata.clone(),
            attachments: Vec::new(),
            attachment_refs: attachment_refs.clone(),
        });
        processed.append(&mut injections);
    }

    processed
}

/// Infer a JSON Schema by structural induction over a value.
///
/// Object keys become `properties` and `required`; array item schemas come
/// from the first element. Good enough for a model to plan `jq`-style
/// queries, not a validator.
pub(crate) fn infer_json_schema(value: &Value) -> Value {
    match value {
        Value::Null => json!({"type": "null"}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(number) => {
            if number.is_i64() || number.is_u64() {
                json!({"type": "integer"})
            } else {
                json!({"type": "number"})
            }
        }
        Value::String(_) => json!({"type": "string"}),
        Value::Array(items) => match items.first() {
            Some(first) => json!({"type": "array", "items": infer_json_schema(first)}),
            None => json!({"type": "array"}),
        },
        Value::Object(map) => {
            let properties: serde_json::Map<String, Value> = map
                .iter()
                .map(|(key, value)| (key.clone(), infer_json_schema(value)))
                .collect();
            let required: Vec<&String> = map.keys().collect();

            json!({
                "type": "object",
                "properties": properties,
                "required": required,
            })
        }
    }
}
