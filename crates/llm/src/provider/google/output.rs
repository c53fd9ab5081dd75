//! Response types for the Google Gemini GenerateContent wire format.

use serde::Deserialize;
use serde_json::Value;

use super::input::GoogleContent;
use crate::client::LlmOutput;
use crate::messages::{FunctionCall, ProviderMetadata, ThoughtSignature, ToolArguments, ToolCall};

/// Unary (and per-chunk streaming) response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub content: Option<GoogleContent>,
    #[serde(default)]
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

/// Pieces extracted from one response (or one streaming chunk).
#[derive(Debug, Default)]
pub(crate) struct ExtractedParts {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl GenerateContentResponse {
    /// Pull text and function calls out of the first candidate.
    ///
    /// Function calls get locally generated ids (this wire has none), and a
    /// part-level thought signature is preserved as provider metadata on the
    /// corresponding call.
    pub(crate) fn extract(&self) -> ExtractedParts {
        let mut extracted = ExtractedParts::default();

        let Some(content) = self.candidates.first().and_then(|candidate| candidate.content.as_ref()) else {
            return extracted;
        };

        for part in &content.parts {
            if let Some(text) = &part.text {
                extracted.text.push_str(text);
            }

            let Some(function_call) = &part.function_call else {
                continue;
            };

            let metadata = part.thought_signature.as_deref().and_then(|signature| {
                match ThoughtSignature::from_storage_string(signature) {
                    Ok(signature) => Some(ProviderMetadata::google_signature(signature)),
                    Err(error) => {
                        log::warn!("Discarding malformed thought signature: {error}");
                        None
                    }
                }
            });

            extracted.tool_calls.push(ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: function_call.name.clone(),
                    arguments: ToolArguments::Structured(function_call.args.clone()),
                },
                provider_metadata: metadata,
            });
        }

        extracted
    }

    pub(crate) fn into_output(self) -> LlmOutput {
        let extracted = self.extract();

        let provider_metadata = extracted
            .tool_calls
            .iter()
            .find_map(|call| call.provider_metadata.clone());

        LlmOutput {
            content: if extracted.text.is_empty() {
                None
            } else {
                Some(extracted.text)
            },
            tool_calls: if extracted.tool_calls.is_empty() {
                None
            } else {
                Some(extracted.tool_calls)
            },
            reasoning_info: self.usage_metadata,
            provider_metadata,
        }
    }
}
