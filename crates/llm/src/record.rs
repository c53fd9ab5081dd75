//! Interaction journaling: a decorator that records every call to an
//! append-only JSON Lines file.
//!
//! Each line is `{"input": {...}, "output": {...}}` with the input in the
//! canonical neutral serialization. The playback client matches these
//! inputs by exact structural equality, so everything recorded here must be
//! deterministic; the neutral serialization uses no unordered collections.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;

use crate::client::{EventStream, LlmClient, LlmOutput, ToolChoice};
use crate::error::{LlmError, LlmResult};
use crate::messages::{Message, ToolDefinition, message_to_json, messages_to_json};
use crate::structured::StructuredSchema;

/// Canonical input object for `generate_response`.
pub(crate) fn response_input(messages: &[Message], tools: Option<&[ToolDefinition]>, tool_choice: &ToolChoice) -> Value {
    json!({
        "method": "generate_response",
        "messages": messages_to_json(messages),
        "tools": tools.map(|tools| serde_json::to_value(tools).unwrap_or(Value::Null)),
        "tool_choice": tool_choice.as_str(),
    })
}

/// Canonical input object for `generate_structured`.
pub(crate) fn structured_input(messages: &[Message], schema: &StructuredSchema) -> Value {
    json!({
        "method": "generate_structured",
        "messages": messages_to_json(messages),
        "response_model_name": schema.name,
        "response_model_schema": schema.schema,
    })
}

/// Canonical input object for `format_user_message_with_file`.
pub(crate) fn format_file_input(
    prompt_text: Option<&str>,
    file_path: Option<&Path>,
    mime_type: Option<&str>,
    max_text_length: Option<usize>,
) -> Value {
    json!({
        "method": "format_user_message_with_file",
        "prompt_text": prompt_text,
        "file_path": file_path.map(|path| path.to_string_lossy()),
        "mime_type": mime_type,
        "max_text_length": max_text_length,
    })
}

/// Records interactions while proxying calls to a wrapped client.
///
/// Streaming is passed through without recording. Write failures are logged
/// and never mask the wrapped call's outcome, and cancelled calls commit no
/// record because the write happens after the call returns.
pub struct RecordingClient {
    inner: Arc<dyn LlmClient>,
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl RecordingClient {
    pub fn new(inner: Arc<dyn LlmClient>, path: impl Into<PathBuf>) -> LlmResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|error| LlmError::Internal(format!("failed to create recording directory: {error}")))?;
        }

        log::info!("RecordingClient initialized. Recording to: {}", path.display());

        Ok(Self {
            inner,
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn write_record(&self, input: Value, output: Value) {
        let record = json!({"input": input, "output": output});

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(error) => {
                log::error!("Failed to serialize interaction record: {error}");
                return;
            }
        };

        // Append mode per write, under a lock, so concurrent turns never
        // interleave partial lines.
        let _guard = self.write_lock.lock().await;

        let open = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await;

        let mut file = match open {
            Ok(file) => file,
            Err(error) => {
                log::error!("Failed to open recording file {}: {error}", self.path.display());
                return;
            }
        };

        if let Err(error) = file.write_all(format!("{line}\n").as_bytes()).await {
            log::error!("Failed to write interaction to {}: {error}", self.path.display());
            return;
        }

        if let Err(error) = file.flush().await {
            log::error!("Failed to flush interaction to {}: {error}", self.path.display());
        }
    }
}

#[async_trait]
impl LlmClient for RecordingClient {
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn supports_multimodal_tools(&self) -> bool {
        self.inner.supports_multimodal_tools()
    }

    async fn generate_response(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmOutput> {
        let input = response_input(messages, tools, &tool_choice);

        let output = self.inner.generate_response(messages, tools, tool_choice).await?;

        let serialized = serde_json::to_value(&output).unwrap_or(Value::Null);
        self.write_record(input, serialized).await;

        Ok(output)
    }

    async fn generate_response_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<EventStream> {
        // Streams pass through unrecorded.
        self.inner.generate_response_stream(messages, tools, tool_choice).await
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &StructuredSchema,
        max_retries: u32,
    ) -> LlmResult<Value> {
        let input = structured_input(messages, schema);

        let value = self.inner.generate_structured(messages, schema, max_retries).await?;

        let output = json!({"model_name": schema.name, "model_data": value});
        self.write_record(input, output).await;

        Ok(value)
    }

    async fn format_user_message_with_file(
        &self,
        prompt_text: Option<&str>,
        file_path: Option<&Path>,
        mime_type: Option<&str>,
        max_text_length: Option<usize>,
    ) -> LlmResult<Message> {
        let input = format_file_input(prompt_text, file_path, mime_type, max_text_length);

        let message = self
            .inner
            .format_user_message_with_file(prompt_text, file_path, mime_type, max_text_length)
            .await?;

        self.write_record(input, message_to_json(&message)).await;

        Ok(message)
    }
}
