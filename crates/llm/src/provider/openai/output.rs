//! Response types for the OpenAI chat completions wire format, unary and
//! streaming.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::client::LlmOutput;
use crate::messages::ToolCall;

/// Unary response body.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<String>,
}

impl ChatCompletionResponse {
    /// Convert to the neutral output shape, copying usage verbatim into
    /// `reasoning_info`.
    pub(crate) fn into_output(self) -> Option<LlmOutput> {
        let choice = self.choices.into_iter().next()?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let mut converted = ToolCall::function(
                    call.id,
                    call.function.name,
                    call.function.arguments.unwrap_or_else(|| "{}".to_string()),
                );
                if let Some(kind) = call.kind {
                    converted.kind = kind;
                }
                converted
            })
            .collect();

        Some(LlmOutput {
            content: choice.message.content.filter(|content| !content.is_empty()),
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            reasoning_info: self.usage,
            provider_metadata: None,
        })
    }
}

/// Streaming chunk body.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One slice of an indexed streaming tool call.
#[derive(Debug, Deserialize)]
pub(crate) struct ToolCallDelta {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    kind: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Assembles indexed tool-call deltas into complete tool calls.
///
/// Argument fragments concatenate in arrival order; calls are only emitted
/// when the stream ends. The accumulator is the only buffering the streaming
/// path performs.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub(crate) fn ingest(&mut self, delta: ToolCallDelta) {
        let index = delta.index.unwrap_or_else(|| {
            log::warn!("Tool call delta missing index, defaulting to 0; multiple tool calls may interleave");
            0
        });

        let partial = self.calls.entry(index).or_default();

        if let Some(id) = delta.id {
            partial.id = Some(id);
        }
        if let Some(kind) = delta.kind {
            partial.kind = Some(kind);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                partial.name = Some(name);
            }
            if let Some(arguments) = function.arguments {
                partial.arguments.push_str(&arguments);
            }
        }
    }

    /// Emit all completed calls, index order. Fragments without an id and
    /// name never became a call and are dropped with a warning.
    pub(crate) fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .filter_map(|partial| {
                let (Some(id), Some(name)) = (partial.id, partial.name) else {
                    log::warn!("Dropping incomplete streamed tool call fragment");
                    return None;
                };

                let arguments = if partial.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    partial.arguments
                };

                let mut call = ToolCall::function(id, name, arguments);
                if let Some(kind) = partial.kind {
                    call.kind = kind;
                }
                Some(call)
            })
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index: Some(index),
            id: id.map(str::to_string),
            kind: None,
            function: Some(FunctionDelta {
                name: name.map(str::to_string),
                arguments: arguments.map(str::to_string),
            }),
        }
    }

    #[test]
    fn argument_fragments_concatenate_in_arrival_order() {
        let mut accumulator = ToolCallAccumulator::default();
        accumulator.ingest(delta(0, Some("c1"), Some("search"), None));
        accumulator.ingest(delta(0, None, None, Some(r#"{"q":"#)));
        accumulator.ingest(delta(0, None, None, Some(r#""x"}"#)));

        let calls = accumulator.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments.as_json_string(), r#"{"q":"x"}"#);
    }

    #[test]
    fn interleaved_indexes_assemble_separately() {
        let mut accumulator = ToolCallAccumulator::default();
        accumulator.ingest(delta(0, Some("c1"), Some("first"), Some("{")));
        accumulator.ingest(delta(1, Some("c2"), Some("second"), Some(r#"{"a":1}"#)));
        accumulator.ingest(delta(0, None, None, Some("}")));

        let calls = accumulator.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[0].function.arguments.as_json_string(), "{}");
        assert_eq!(calls[1].function.name, "second");
    }

    #[test]
    fn incomplete_fragments_are_dropped() {
        let mut accumulator = ToolCallAccumulator::default();
        accumulator.ingest(delta(0, None, None, Some(r#"{"orphan":true}"#)));

        assert!(accumulator.finish().is_empty());
    }
}
