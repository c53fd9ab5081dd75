//! Provider client implementations and their shared plumbing.

pub(crate) mod anthropic;
pub(crate) mod google;
pub(crate) mod openai;
pub(crate) mod proxy;

use std::sync::LazyLock;
use std::time::Instant;

use jiff::Timestamp;
use serde_json::Value;

use crate::client::{LlmOutput, ToolChoice};
use crate::error::LlmError;
use crate::messages::{Message, ToolDefinition, messages_to_json};
use crate::request_buffer::{RequestRecord, get_request_buffer};

pub use anthropic::AnthropicClient;
pub use google::GoogleClient;
pub use openai::OpenAiClient;
pub use proxy::ProxyClient;

/// Default per-call timeout applied to every vendor HTTP client.
pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Build the shared HTTP client shape used by every provider.
pub(crate) fn default_http_client(headers: reqwest::header::HeaderMap) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|error| LlmError::Internal(format!("failed to build HTTP client: {error}")))
}

/// Map a vendor HTTP status to the common error taxonomy.
///
/// 400 bodies mentioning context or token limits become `ContextLength`;
/// other 400s are `InvalidRequest`.
pub(crate) fn map_status_error(provider: &str, model: &str, status: u16, body: String) -> LlmError {
    let provider = provider.to_string();
    let model = model.to_string();

    match status {
        401 | 403 => LlmError::Authentication {
            provider,
            model,
            message: body,
        },
        404 => LlmError::ModelNotFound {
            provider,
            model,
            message: body,
        },
        408 => LlmError::ProviderTimeout {
            provider,
            model,
            message: body,
        },
        429 => LlmError::RateLimit {
            provider,
            model,
            message: body,
        },
        400 => {
            let lowered = body.to_lowercase();
            if lowered.contains("context length") || lowered.contains("too many tokens") || lowered.contains("token limit")
            {
                LlmError::ContextLength {
                    provider,
                    model,
                    message: body,
                }
            } else {
                LlmError::InvalidRequest {
                    provider,
                    model,
                    message: body,
                }
            }
        }
        500..=599 => LlmError::ServiceUnavailable {
            provider,
            model,
            message: body,
        },
        _ => LlmError::Provider {
            provider,
            model,
            message: format!("unexpected status {status}: {body}"),
        },
    }
}

/// Map a reqwest transport error to the common taxonomy.
pub(crate) fn map_transport_error(provider: &str, model: &str, error: reqwest::Error) -> LlmError {
    let provider = provider.to_string();
    let model = model.to_string();

    if error.is_timeout() {
        LlmError::ProviderTimeout {
            provider,
            model,
            message: error.to_string(),
        }
    } else {
        LlmError::ProviderConnection {
            provider,
            model,
            message: error.to_string(),
        }
    }
}

/// Per-call request-buffer recorder.
///
/// Captures the request shape up front so both the success and failure paths
/// can commit a record. Recording never masks the call outcome: buffer
/// problems are logged at debug and swallowed.
pub(crate) struct CallRecorder {
    timestamp: Timestamp,
    started: Instant,
    request_id: String,
    model_id: String,
    messages: Vec<Value>,
    tools: Option<Vec<ToolDefinition>>,
    tool_choice: String,
}

impl CallRecorder {
    pub(crate) fn start(
        provider: &str,
        model_id: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &ToolChoice,
    ) -> Self {
        Self {
            timestamp: Timestamp::now(),
            started: Instant::now(),
            request_id: format!("{provider}_{}", uuid::Uuid::new_v4().simple()),
            model_id: model_id.to_string(),
            messages: messages_to_json(messages),
            tools: tools.map(<[ToolDefinition]>::to_vec),
            tool_choice: tool_choice.as_str().to_string(),
        }
    }

    fn commit(self, response: Option<Value>, error: Option<String>) {
        let record = RequestRecord {
            timestamp: self.timestamp,
            request_id: self.request_id,
            model_id: self.model_id,
            messages: self.messages,
            tools: self.tools,
            tool_choice: Some(self.tool_choice),
            response,
            duration_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            error,
        };

        get_request_buffer().add(record);
    }

    pub(crate) fn success(self, output: &LlmOutput) {
        let response = serde_json::to_value(output)
            .map_err(|error| log::debug!("Failed to serialize LLM output for request record: {error}"))
            .ok();
        self.commit(response, None);
    }

    pub(crate) fn success_streaming(self, metadata: &Value) {
        let response = serde_json::json!({"streaming": true, "metadata": metadata});
        self.commit(Some(response), None);
    }

    pub(crate) fn failure(self, error: &LlmError) {
        self.commit(None, Some(error.to_string()));
    }
}

/// Deep-copy tool definitions and strip `format` specifiers the
/// OpenAI-family schema subset does not support.
///
/// Only `enum` and `date-time` survive on string-typed properties. The
/// caller's definitions are never mutated.
pub(crate) fn sanitize_tool_definitions(tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
    let mut sanitized = tools.to_vec();

    for tool in &mut sanitized {
        let Some(properties) = tool
            .parameters
            .get_mut("properties")
            .and_then(Value::as_object_mut)
        else {
            continue;
        };

        for (param_name, details) in properties.iter_mut() {
            let Some(details) = details.as_object_mut() else {
                continue;
            };

            let is_string = details.get("type").and_then(Value::as_str) == Some("string");
            let format = details.get("format").and_then(Value::as_str);

            if is_string && format.is_some_and(|format| format != "enum" && format != "date-time") {
                log::warn!(
                    "Sanitizing tool '{}': removing unsupported format '{}' from string parameter '{param_name}'",
                    tool.name,
                    format.unwrap_or_default(),
                );
                details.remove("format");
            }
        }
    }

    sanitized
}

/// Build a `User` message carrying a file, in the neutral model.
///
/// Images and binary files become data-URI parts (the wire layers turn
/// those into whatever block type the vendor wants); text files inline with
/// optional truncation. File read failures degrade to the prompt text so a
/// bad path never kills the turn.
pub(crate) async fn format_with_file(
    provider: &str,
    model: &str,
    prompt_text: Option<&str>,
    file_path: Option<&std::path::Path>,
    mime_type: Option<&str>,
    max_text_length: Option<usize>,
) -> Result<Message, LlmError> {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;

    use crate::messages::{ContentPart, MessageContent};

    let prompt = prompt_text.unwrap_or("Process the provided file.");

    let Some(path) = file_path else {
        let Some(text) = prompt_text else {
            return Err(LlmError::InvalidRequest {
                provider: provider.to_string(),
                model: model.to_string(),
                message: "Cannot format user message with no input (file or text)".to_string(),
            });
        };

        return Ok(Message::user(truncate_text(text.to_string(), max_text_length)));
    };

    let mime = mime_type.unwrap_or("application/octet-stream");

    if mime.starts_with("image/") {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let uri = format!("data:{mime};base64,{}", BASE64.encode(&bytes));
                return Ok(Message::user(MessageContent::Parts(vec![
                    ContentPart::text(prompt),
                    ContentPart::image_url(uri),
                ])));
            }
            Err(error) => {
                log::error!("Failed to read/encode image {}: {error}", path.display());
                return Ok(Message::user(prompt));
            }
        }
    }

    if mime.starts_with("text/") {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let combined = format!("{prompt}\n\n--- File Content ---\n{content}");
                return Ok(Message::user(truncate_text(combined, max_text_length)));
            }
            Err(error) => {
                log::error!("Failed to read text file {}: {error}", path.display());
                return Ok(Message::user(prompt));
            }
        }
    }

    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let uri = format!("data:{mime};base64,{}", BASE64.encode(&bytes));
            let filename = path.file_name().map(|name| name.to_string_lossy().into_owned());
            Ok(Message::user(MessageContent::Parts(vec![
                ContentPart::text(prompt),
                ContentPart::file_data(uri, filename, Some(mime.to_string())),
            ])))
        }
        Err(error) => {
            log::error!("Failed to read/encode file {} as base64: {error}", path.display());
            Ok(Message::user(prompt))
        }
    }
}

pub(crate) fn truncate_text(text: String, max_text_length: Option<usize>) -> String {
    match max_text_length {
        Some(limit) if text.len() > limit => {
            log::info!("Truncating text from {} to {limit} chars", text.len());
            let cut = text
                .char_indices()
                .take_while(|(index, _)| *index < limit)
                .last()
                .map(|(index, character)| index + character.len_utf8())
                .unwrap_or(0);
            text[..cut].to_string()
        }
        _ => text,
    }
}

/// Whether zero-event vendor streams may fall back to a unary call.
///
/// Record/replay harnesses cannot replay SSE; replaying a stream through the
/// unary path is only wanted there, so the fallback is gated on the replay
/// flag rather than always on.
pub(crate) fn replay_fallback_enabled() -> bool {
    static ENABLED: LazyLock<bool> =
        LazyLock::new(|| std::env::var("LLM_RECORD_MODE").is_ok_and(|mode| mode == "replay"));
    *ENABLED
}
