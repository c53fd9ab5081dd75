//! Playback of recorded interactions.
//!
//! The counterpart to [`crate::record::RecordingClient`]: loads a JSON Lines
//! recording at construction and answers calls by exact structural equality
//! on the canonical input object. Exactness puts correctness on whoever
//! generated the trace; inputs must be canonical.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::client::{EventStream, LlmClient, LlmOutput, StreamEvent, ToolChoice};
use crate::error::{LlmError, LlmResult};
use crate::messages::{Message, ToolDefinition};
use crate::record::{format_file_input, response_input, structured_input};
use crate::structured::StructuredSchema;

/// Replays recorded interactions by input matching.
pub struct PlaybackClient {
    path: PathBuf,
    records: Vec<(Value, Value)>,
}

impl PlaybackClient {
    /// Load all records from the recording file.
    ///
    /// Malformed lines are skipped with a warning; a file with no valid
    /// records is an error, since every later call would miss anyway.
    pub fn new(path: impl Into<PathBuf>) -> LlmResult<Self> {
        let path = path.into();

        let content = std::fs::read_to_string(&path)
            .map_err(|error| LlmError::Internal(format!("failed to read recording file {}: {error}", path.display())))?;

        let mut records = Vec::new();

        for (line_number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parsed: Value = match serde_json::from_str(line) {
                Ok(parsed) => parsed,
                Err(_) => {
                    log::warn!(
                        "Skipping invalid JSON on line {} in {}",
                        line_number + 1,
                        path.display()
                    );
                    continue;
                }
            };

            let Value::Object(mut object) = parsed else {
                log::warn!("Skipping non-object record on line {} in {}", line_number + 1, path.display());
                continue;
            };

            match (object.remove("input"), object.remove("output")) {
                (Some(input), Some(output)) => records.push((input, output)),
                _ => log::warn!(
                    "Skipping line {} in {}: missing 'input' or 'output' key",
                    line_number + 1,
                    path.display()
                ),
            }
        }

        if records.is_empty() {
            return Err(LlmError::Internal(format!(
                "No valid interactions loaded from {}",
                path.display()
            )));
        }

        log::info!(
            "PlaybackClient initialized. Loaded {} interactions from: {}",
            records.len(),
            path.display()
        );

        Ok(Self { path, records })
    }

    fn find(&self, input: &Value) -> Option<&Value> {
        self.records
            .iter()
            .find(|(recorded, _)| recorded == input)
            .map(|(_, output)| output)
    }

    fn miss(&self, input: &Value) -> LlmError {
        log::error!(
            "No matching recorded interaction found in {} for the provided input",
            self.path.display()
        );
        log::error!(
            "Unmatched input:\n{}",
            serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string())
        );

        LlmError::PlaybackMiss {
            message: format!(
                "no matching recorded interaction found in {}",
                self.path.display()
            ),
        }
    }
}

#[async_trait]
impl LlmClient for PlaybackClient {
    fn model(&self) -> &str {
        "playback"
    }

    fn provider_name(&self) -> &str {
        "playback"
    }

    async fn generate_response(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmOutput> {
        let input = response_input(messages, tools, &tool_choice);

        let Some(output) = self.find(&input) else {
            return Err(self.miss(&input));
        };

        serde_json::from_value(output.clone()).map_err(|error| LlmError::PlaybackMiss {
            message: format!("matched recorded output does not deserialize: {error}"),
        })
    }

    /// A streaming call is satisfied by the matching unary record, with
    /// events synthesized from its output.
    async fn generate_response_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<EventStream> {
        let output = self.generate_response(messages, tools, tool_choice).await?;

        let mut events = Vec::new();

        if let Some(content) = output.content {
            events.push(StreamEvent::Content(content));
        }
        for call in output.tool_calls.unwrap_or_default() {
            events.push(StreamEvent::ToolCall(call));
        }
        events.push(StreamEvent::Done {
            metadata: output
                .reasoning_info
                .map(|info| serde_json::json!({"reasoning_info": info})),
        });

        Ok(futures::stream::iter(events).boxed())
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &StructuredSchema,
        _max_retries: u32,
    ) -> LlmResult<Value> {
        let input = structured_input(messages, schema);

        let Some(output) = self.find(&input) else {
            return Err(self.miss(&input));
        };

        let Some(model_data) = output.get("model_data") else {
            return Err(LlmError::PlaybackMiss {
                message: "recorded structured output missing 'model_data' field".to_string(),
            });
        };

        schema
            .validate(model_data)
            .map_err(|error| LlmError::StructuredOutput {
                provider: "playback".to_string(),
                model: "playback".to_string(),
                message: "recorded structured output no longer validates".to_string(),
                raw_response: Some(model_data.to_string()),
                validation_error: Some(error),
            })?;

        Ok(model_data.clone())
    }

    async fn format_user_message_with_file(
        &self,
        prompt_text: Option<&str>,
        file_path: Option<&Path>,
        mime_type: Option<&str>,
        max_text_length: Option<usize>,
    ) -> LlmResult<Message> {
        let input = format_file_input(prompt_text, file_path, mime_type, max_text_length);

        let Some(output) = self.find(&input) else {
            return Err(self.miss(&input));
        };

        serde_json::from_value(output.clone()).map_err(|error| LlmError::PlaybackMiss {
            message: format!("matched recorded message does not deserialize: {error}"),
        })
    }
}
