//! Response types for the Anthropic Messages wire format, unary and
//! streaming.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::client::{LlmOutput, StreamEvent};
use crate::messages::ToolCall;

/// Unary response body.
#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    #[serde(default)]
    pub content: Vec<ResponseContent>,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// A response content block. Unknown types deserialize to `Other` so new
/// block kinds do not break parsing.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ResponseContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
}

impl AnthropicUsage {
    /// Flat usage map in the shape shared across providers.
    pub(crate) fn reasoning_info(&self) -> Value {
        json!({
            "prompt_tokens": self.input_tokens,
            "completion_tokens": self.output_tokens,
            "total_tokens": self.input_tokens + self.output_tokens,
        })
    }
}

impl MessagesResponse {
    pub(crate) fn into_output(self) -> LlmOutput {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in self.content {
            match block {
                ResponseContent::Text { text: chunk } => text.push_str(&chunk),
                ResponseContent::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::function(
                        id,
                        name,
                        serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                    ));
                }
                ResponseContent::Other(value) => {
                    log::debug!("Ignoring unknown response content block: {value}");
                }
            }
        }

        LlmOutput {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            reasoning_info: self.usage.map(|usage| usage.reasoning_info()),
            provider_metadata: None,
        }
    }
}

/// Streaming SSE events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicStreamEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        #[allow(dead_code)]
        index: u32,
        content_block: ResponseContent,
    },
    ContentBlockDelta {
        #[allow(dead_code)]
        index: u32,
        delta: ContentDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: u32,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamErrorBody,
    },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageStartBody {
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamErrorBody {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug)]
struct PartialToolUse {
    id: String,
    name: String,
    arguments: String,
}

/// Translates the block lifecycle into neutral stream events.
///
/// A tool-use block opens on `content_block_start`, accumulates
/// `input_json_delta` fragments, and emits one `ToolCall` at
/// `content_block_stop`. Usage arrives split across `message_start` (input
/// tokens) and `message_delta` (output tokens).
#[derive(Debug, Default)]
pub(crate) struct StreamProcessor {
    current_tool: Option<PartialToolUse>,
    input_tokens: i64,
    output_tokens: i64,
}

impl StreamProcessor {
    pub(crate) fn process(&mut self, event: AnthropicStreamEvent) -> Option<StreamEvent> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                }
                None
            }
            AnthropicStreamEvent::ContentBlockStart { content_block, .. } => {
                if let ResponseContent::ToolUse { id, name, .. } = content_block {
                    self.current_tool = Some(PartialToolUse {
                        id,
                        name,
                        arguments: String::new(),
                    });
                }
                None
            }
            AnthropicStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ContentDelta::TextDelta { text } => Some(StreamEvent::Content(text)),
                ContentDelta::InputJsonDelta { partial_json } => {
                    if let Some(tool) = &mut self.current_tool {
                        tool.arguments.push_str(&partial_json);
                    }
                    None
                }
                ContentDelta::Other(value) => {
                    log::debug!("Ignoring unknown content delta: {value}");
                    None
                }
            },
            AnthropicStreamEvent::ContentBlockStop { .. } => {
                let tool = self.current_tool.take()?;
                let arguments = if tool.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    tool.arguments
                };
                Some(StreamEvent::ToolCall(ToolCall::function(tool.id, tool.name, arguments)))
            }
            AnthropicStreamEvent::MessageDelta { usage } => {
                if let Some(usage) = usage {
                    self.output_tokens = usage.output_tokens;
                }
                None
            }
            AnthropicStreamEvent::MessageStop => {
                let usage = AnthropicUsage {
                    input_tokens: self.input_tokens,
                    output_tokens: self.output_tokens,
                };
                Some(StreamEvent::Done {
                    metadata: Some(json!({"reasoning_info": usage.reasoning_info()})),
                })
            }
            AnthropicStreamEvent::Ping => None,
            AnthropicStreamEvent::Error { error } => {
                log::error!("Anthropic stream error event: {} - {}", error.error_type, error.message);
                Some(StreamEvent::Error {
                    message: error.message,
                    error_id: Some(error.error_type.clone()),
                    error_type: Some(error.error_type),
                })
            }
            AnthropicStreamEvent::Other(value) => {
                log::debug!("Ignoring unknown stream event: {value}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &str) -> AnthropicStreamEvent {
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn unary_response_collects_text_and_tool_use() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "x"}},
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4},
        }))
        .unwrap();

        let output = response.into_output();
        assert_eq!(output.content.as_deref(), Some("Let me check."));

        let calls = output.tool_calls.unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.arguments.as_json_string(), r#"{"q":"x"}"#);

        let usage = output.reasoning_info.unwrap();
        assert_eq!(usage["total_tokens"], json!(14));
    }

    #[test]
    fn tool_use_block_assembles_across_deltas() {
        let mut processor = StreamProcessor::default();

        assert!(processor
            .process(parse(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"search","input":{}}}"#,
            ))
            .is_none());
        assert!(processor
            .process(parse(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#,
            ))
            .is_none());
        assert!(processor
            .process(parse(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"x\"}"}}"#,
            ))
            .is_none());

        let event = processor
            .process(parse(r#"{"type":"content_block_stop","index":0}"#))
            .unwrap();

        let StreamEvent::ToolCall(call) = event else {
            panic!("expected tool call event");
        };
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.function.arguments.as_json_string(), r#"{"q":"x"}"#);
    }

    #[test]
    fn message_stop_carries_combined_usage() {
        let mut processor = StreamProcessor::default();

        processor.process(parse(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":0}}}"#,
        ));
        processor.process(parse(r#"{"type":"message_delta","usage":{"output_tokens":7}}"#));

        let event = processor.process(parse(r#"{"type":"message_stop"}"#)).unwrap();
        let StreamEvent::Done { metadata } = event else {
            panic!("expected done event");
        };

        let usage = &metadata.unwrap()["reasoning_info"];
        assert_eq!(usage["prompt_tokens"], json!(12));
        assert_eq!(usage["completion_tokens"], json!(7));
        assert_eq!(usage["total_tokens"], json!(19));
    }

    #[test]
    fn text_deltas_pass_through() {
        let mut processor = StreamProcessor::default();
        let event = processor
            .process(parse(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            ))
            .unwrap();

        assert_eq!(event, StreamEvent::Content("Hi".to_string()));
    }
}
