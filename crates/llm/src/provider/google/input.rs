//! Request types for the Google Gemini GenerateContent wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::ToolChoice;
use crate::messages::{ContentPart, Message, MessageContent, ToolDefinition};

/// Request body for `POST /models/{model}:generateContent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest {
    pub contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GoogleTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<GoogleToolConfig>,
}

/// One turn of content. Shared between request and response parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GoogleContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GooglePart>,
}

/// A single part of a content turn.
///
/// `thought_signature` is a sibling of `function_call` on the part itself:
/// opaque bytes from the model, base64 on the wire, which must go back
/// byte-identical on the next turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GooglePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GoogleFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GoogleFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl GooglePart {
    pub(crate) fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub file_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GoogleFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GoogleFunctionResponse {
    pub name: String,
    /// Must be a JSON object; non-object tool output is wrapped.
    pub response: Value,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}

impl GenerationConfig {
    /// Map the merged call parameters onto the config fields this API knows.
    pub(crate) fn from_params(params: &BTreeMap<String, Value>) -> Option<Self> {
        if params.is_empty() {
            return None;
        }

        Some(Self {
            temperature: params.get("temperature").and_then(Value::as_f64),
            max_output_tokens: params.get("max_tokens").and_then(Value::as_i64),
            top_p: params.get("top_p").and_then(Value::as_f64),
            top_k: params.get("top_k").and_then(Value::as_i64),
            stop_sequences: params
                .get("stop_sequences")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(Value::as_str).map(str::to_string).collect()),
            response_mime_type: None,
            response_schema: None,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleTool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum FunctionCallingMode {
    None,
    Any,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleToolConfig {
    pub function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FunctionCallingConfig {
    pub mode: FunctionCallingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

/// Recursively remove JSON Schema pieces this API rejects.
///
/// `additionalProperties`, `$schema` and `default` are unsupported, and
/// string `format`s other than `enum` and `date-time` are stripped.
pub(crate) fn strip_unsupported_schema_fields(mut value: Value) -> Value {
    if let Some(object) = value.as_object_mut() {
        object.remove("additionalProperties");
        object.remove("$schema");
        object.remove("default");

        if object.get("type").and_then(Value::as_str) == Some("string")
            && let Some(format) = object.get("format").and_then(Value::as_str)
            && format != "enum"
            && format != "date-time"
        {
            object.remove("format");
        }

        if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
            for (_, property) in properties.iter_mut() {
                *property = strip_unsupported_schema_fields(property.take());
            }
        }

        if let Some(items) = object.get_mut("items") {
            *items = strip_unsupported_schema_fields(items.take());
        }
    }

    value
}

pub(crate) fn build_tools(tools: &[ToolDefinition]) -> Vec<GoogleTool> {
    let function_declarations = tools
        .iter()
        .map(|tool| FunctionDeclaration {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: strip_unsupported_schema_fields(tool.parameters.clone()),
        })
        .collect();

    vec![GoogleTool { function_declarations }]
}

/// Tool choice translation.
///
/// `auto` leaves the config off entirely so the model keeps its default
/// behavior; `none` produces a NONE config and the caller also omits the
/// tool list.
pub(crate) fn tool_choice_to_config(choice: &ToolChoice) -> Option<GoogleToolConfig> {
    let (mode, allowed) = match choice {
        ToolChoice::Auto => return None,
        ToolChoice::None => (FunctionCallingMode::None, None),
        ToolChoice::Required => (FunctionCallingMode::Any, None),
        ToolChoice::Tool(name) => (FunctionCallingMode::Any, Some(vec![name.clone()])),
    };

    Some(GoogleToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode,
            allowed_function_names: allowed,
        },
    })
}

/// Translate the neutral message list to contents plus system instruction.
pub(crate) fn build_contents(messages: &[Message]) -> (Option<GoogleContent>, Vec<GoogleContent>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut contents: Vec<GoogleContent> = Vec::new();

    for message in messages {
        match message {
            Message::System { content } => system_parts.push(content.clone()),
            Message::User { content } => contents.push(GoogleContent {
                role: Some("user".to_string()),
                parts: content_parts(content),
            }),
            Message::Assistant {
                content, tool_calls, ..
            } => {
                let mut parts = Vec::new();

                if let Some(text) = content.as_ref().filter(|text| !text.is_empty()) {
                    parts.push(GooglePart::text(text.clone()));
                }

                for call in tool_calls.as_deref().unwrap_or_default() {
                    let args = call.function.arguments.parse().unwrap_or_else(|error| {
                        log::warn!(
                            "Tool call '{}' arguments are not valid JSON ({error}), sending empty object",
                            call.function.name
                        );
                        json!({})
                    });

                    parts.push(GooglePart {
                        function_call: Some(GoogleFunctionCall {
                            name: call.function.name.clone(),
                            args,
                        }),
                        thought_signature: call
                            .provider_metadata
                            .as_ref()
                            .and_then(|metadata| metadata.thought_signature())
                            .map(|signature| signature.to_storage_string()),
                        ..Default::default()
                    });
                }

                if !parts.is_empty() {
                    contents.push(GoogleContent {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
            }
            Message::Tool { name, content, .. } => {
                let mut parts = vec![GooglePart {
                    function_response: Some(GoogleFunctionResponse {
                        name: name.clone(),
                        response: wrap_tool_response(&content.text()),
                    }),
                    ..Default::default()
                }];

                // Native multimodal tool results travel as sibling parts of
                // the function response.
                if let MessageContent::Parts(content_parts) = content {
                    for part in content_parts {
                        if let Some(converted) = non_text_part(part) {
                            parts.push(converted);
                        }
                    }
                }

                contents.push(GoogleContent {
                    role: Some("user".to_string()),
                    parts,
                });
            }
            Message::Error { content, .. } => {
                log::warn!("Dropping error message from outgoing request: {content}");
            }
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(GoogleContent {
            role: None,
            parts: vec![GooglePart::text(system_parts.join("\n\n"))],
        })
    };

    (system_instruction, contents)
}

fn content_parts(content: &MessageContent) -> Vec<GooglePart> {
    match content {
        MessageContent::Text(text) => vec![GooglePart::text(text.clone())],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => GooglePart::text(text.clone()),
                other => non_text_part(other).unwrap_or_else(|| GooglePart::text(String::new())),
            })
            .collect(),
    }
}

fn non_text_part(part: &ContentPart) -> Option<GooglePart> {
    match part {
        ContentPart::Text { .. } => None,
        ContentPart::ImageUrl { image_url } => Some(match parse_data_uri(&image_url.url) {
            Some((mime_type, data)) => GooglePart {
                inline_data: Some(InlineData { mime_type, data }),
                ..Default::default()
            },
            None => GooglePart {
                file_data: Some(FileData {
                    mime_type: None,
                    file_uri: image_url.url.clone(),
                }),
                ..Default::default()
            },
        }),
        ContentPart::Attachment { attachment_id } => Some(GooglePart::text(format!("[Attachment ID: {attachment_id}]"))),
        ContentPart::File { file } => {
            if let Some((mime_type, data)) = file.file_data.as_deref().and_then(parse_data_uri) {
                Some(GooglePart {
                    inline_data: Some(InlineData { mime_type, data }),
                    ..Default::default()
                })
            } else if let Some(file_id) = &file.file_id {
                Some(GooglePart {
                    file_data: Some(FileData {
                        mime_type: file.format.clone(),
                        file_uri: file_id.clone(),
                    }),
                    ..Default::default()
                })
            } else {
                log::warn!("File part without data or id, dropping");
                None
            }
        }
    }
}

fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(",")?;
    let mime_type = header.strip_suffix(";base64")?;
    Some((mime_type.to_string(), data.to_string()))
}

/// This API requires `function_response.response` to be a JSON object.
/// Object-shaped tool output passes through; anything else is wrapped.
pub(crate) fn wrap_tool_response(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(value) if value.is_object() => value,
        _ => json!({"result": content}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::ToolResult;
    use crate::messages::{ProviderMetadata, ThoughtSignature, ToolCall};

    #[test]
    fn system_messages_concatenate_into_system_instruction() {
        let messages = vec![
            Message::system("first"),
            Message::system("second"),
            Message::user("hi"),
        ];

        let (system, contents) = build_contents(&messages);

        assert_eq!(system.unwrap().parts[0].text.as_deref(), Some("first\n\nsecond"));
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let (_, contents) = build_contents(&[Message::user("q"), Message::assistant("a")]);
        assert_eq!(contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn thought_signature_round_trips_byte_identical() {
        let raw: Vec<u8> = vec![0xde, 0xad, 0x00, 0xbe, 0xef];
        let mut call = ToolCall::function("c1", "search", r#"{"q":"x"}"#);
        call.provider_metadata = Some(ProviderMetadata::google_signature(ThoughtSignature::new(raw.clone())));

        let (_, contents) = build_contents(&[
            Message::user("q"),
            Message::assistant_with_tools(None, vec![call]),
        ]);

        let part = &contents[1].parts[0];
        let on_wire = part.thought_signature.as_deref().unwrap();
        let decoded = ThoughtSignature::from_storage_string(on_wire).unwrap();
        assert_eq!(decoded.as_bytes(), raw.as_slice());
    }

    #[test]
    fn tool_results_become_function_response_parts() {
        let messages = vec![
            Message::user("q"),
            Message::assistant_with_tools(None, vec![ToolCall::function("c1", "lookup", "{}")]),
            Message::tool_result("c1", "lookup", ToolResult::from_text("plain text result")),
        ];

        let (_, contents) = build_contents(&messages);
        let response = contents[2].parts[0].function_response.as_ref().unwrap();

        assert_eq!(response.name, "lookup");
        assert_eq!(response.response, json!({"result": "plain text result"}));
        assert_eq!(contents[2].role.as_deref(), Some("user"));
    }

    #[test]
    fn object_tool_output_passes_through_unwrapped() {
        assert_eq!(wrap_tool_response(r#"{"ok": true}"#), json!({"ok": true}));
        assert_eq!(wrap_tool_response("[1, 2]"), json!({"result": "[1, 2]"}));
        assert_eq!(wrap_tool_response("plain"), json!({"result": "plain"}));
    }

    #[test]
    fn tool_choice_translation() {
        assert!(tool_choice_to_config(&ToolChoice::Auto).is_none());

        let none = tool_choice_to_config(&ToolChoice::None).unwrap();
        assert_eq!(none.function_calling_config.mode, FunctionCallingMode::None);

        let required = tool_choice_to_config(&ToolChoice::Required).unwrap();
        assert_eq!(required.function_calling_config.mode, FunctionCallingMode::Any);
        assert!(required.function_calling_config.allowed_function_names.is_none());

        let specific = tool_choice_to_config(&ToolChoice::Tool("search".to_string())).unwrap();
        assert_eq!(specific.function_calling_config.mode, FunctionCallingMode::Any);
        assert_eq!(
            specific.function_calling_config.allowed_function_names,
            Some(vec!["search".to_string()])
        );
    }

    #[test]
    fn schema_stripping_is_recursive() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "host": {"type": "string", "format": "hostname", "default": "localhost"},
                "when": {"type": "string", "format": "date-time"},
                "nested": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"inner": {"type": "string", "format": "uuid"}},
                },
                "list": {"type": "array", "items": {"type": "object", "additionalProperties": true}},
            },
        });

        let cleaned = strip_unsupported_schema_fields(schema);

        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned["properties"]["host"].get("format").is_none());
        assert!(cleaned["properties"]["host"].get("default").is_none());
        assert_eq!(cleaned["properties"]["when"]["format"], json!("date-time"));
        assert!(cleaned["properties"]["nested"]["properties"]["inner"].get("format").is_none());
        assert!(cleaned["properties"]["list"]["items"].get("additionalProperties").is_none());
    }

    #[test]
    fn image_data_uris_become_inline_data() {
        let messages = vec![Message::user(MessageContent::Parts(vec![
            ContentPart::text("see"),
            ContentPart::image_url("data:image/png;base64,aGk="),
        ]))];

        let (_, contents) = build_contents(&messages);
        let inline = contents[0].parts[1].inline_data.as_ref().unwrap();

        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "aGk=");
    }
}
