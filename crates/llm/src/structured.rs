//! Schema-driven structured output generation.
//!
//! The engine asks a model for JSON matching a schema and validates what
//! comes back, feeding validation errors into a bounded retry loop. Clients
//! with native schema enforcement (OpenAI `response_format`, Gemini
//! `responseSchema`) override [`crate::LlmClient::generate_structured`] but
//! share this module's extraction, feedback, and termination behavior.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::{LlmClient, ToolChoice};
use crate::error::{LlmError, LlmResult};
use crate::messages::Message;

/// A type a model can be asked to produce: schema plus decoder.
pub trait StructuredResponse: DeserializeOwned + Serialize + JsonSchema + Send {}

impl<T: DeserializeOwned + Serialize + JsonSchema + Send> StructuredResponse for T {}

/// A JSON Schema with a bound validation predicate.
///
/// Validation is deserialization into the target type; the predicate is
/// carried as a closure so the schema can cross the object-safe
/// [`LlmClient`] boundary.
#[derive(Clone)]
pub struct StructuredSchema {
    pub name: String,
    pub schema: Value,
    validator: Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>,
}

impl StructuredSchema {
    /// Schema and validator for a [`StructuredResponse`] type.
    pub fn of<T: StructuredResponse>() -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|error| {
            log::error!("Failed to serialize schema for structured output: {error}");
            Value::Object(serde_json::Map::new())
        });

        Self {
            name: T::schema_name().into_owned(),
            schema,
            validator: Arc::new(|value| {
                serde_json::from_value::<T>(value.clone())
                    .map(drop)
                    .map_err(|error| error.to_string())
            }),
        }
    }

    /// Validate a candidate value against the schema's target type.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        (self.validator)(value)
    }
}

impl fmt::Debug for StructuredSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*\n([\s\S]*?)\n```").expect("valid code block pattern"));

/// Extract the JSON candidate from a model reply.
///
/// Accepts bare JSON (reply starts with `{` or `[`) or the first fenced
/// code block. Anything else is returned as-is so the JSON parser produces
/// the error; the model was prompted to reply with JSON only, so we do not
/// hunt for embedded objects.
pub(crate) fn extract_json_candidate(raw: &str) -> &str {
    let content = raw.trim();

    if content.starts_with('{') || content.starts_with('[') {
        return content;
    }

    if let Some(captures) = CODE_BLOCK.captures(content)
        && let Some(body) = captures.get(1)
    {
        return body.as_str().trim();
    }

    content
}

fn schema_instruction(schema: &StructuredSchema) -> String {
    let pretty = serde_json::to_string_pretty(&schema.schema).unwrap_or_else(|_| schema.schema.to_string());

    format!(
        "You must respond with valid JSON that matches this schema:\n```json\n{pretty}\n```\n\n\
         Respond ONLY with the JSON object, no additional text or markdown."
    )
}

/// Prepend the schema instruction, appending to an existing leading system
/// message rather than stacking a second one.
pub(crate) fn with_schema_instruction(messages: &[Message], schema: &StructuredSchema) -> Vec<Message> {
    let instruction = schema_instruction(schema);
    let mut prepared: Vec<Message> = messages.to_vec();

    match prepared.first_mut() {
        Some(Message::System { content }) => {
            content.push_str("\n\n");
            content.push_str(&instruction);
        }
        _ => prepared.insert(0, Message::system(instruction)),
    }

    prepared
}

pub(crate) fn append_validation_feedback(messages: &mut Vec<Message>, raw_response: &str, error: &str, parse_error: bool) {
    messages.push(Message::assistant(raw_response.to_string()));

    let feedback = if parse_error {
        format!(
            "Your response was not valid JSON. Parse error: {error}\n\n\
             Please try again. Respond ONLY with valid JSON, no markdown or extra text."
        )
    } else {
        format!(
            "Your response was not valid JSON matching the required schema. Error: {error}\n\n\
             Please try again. Respond ONLY with valid JSON matching the schema."
        )
    };

    messages.push(Message::user(feedback));
}

/// The instruction-and-parse fallback loop.
///
/// Terminates after at most `max_retries + 1` model calls: either a
/// validated value comes back or the caller gets `StructuredOutput` carrying
/// the last raw response and validation error. Provider errors break out of
/// the loop immediately rather than burning retries.
pub(crate) async fn generate_with_instructions<C>(
    client: &C,
    messages: &[Message],
    schema: &StructuredSchema,
    max_retries: u32,
) -> LlmResult<Value>
where
    C: LlmClient + ?Sized,
{
    let mut prepared = with_schema_instruction(messages, schema);

    let mut last_error: Option<String> = None;
    let mut raw_response: Option<String> = None;

    for attempt in 0..=max_retries {
        let response = match client.generate_response(&prepared, None, ToolChoice::Auto).await {
            Ok(response) => response,
            Err(error) => {
                log::error!("Provider error in structured output generation: {error}");
                last_error = Some(error.to_string());
                break;
            }
        };

        let Some(content) = response.content.filter(|content| !content.is_empty()) else {
            last_error = Some("LLM returned empty response".to_string());
            break;
        };

        raw_response = Some(content.clone());
        let candidate = extract_json_candidate(&content);

        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => match schema.validate(&value) {
                Ok(()) => return Ok(value),
                Err(error) => {
                    log::warn!(
                        "Structured output validation failed (attempt {}/{}): {error}",
                        attempt + 1,
                        max_retries + 1
                    );
                    last_error = Some(error.clone());

                    if attempt < max_retries {
                        append_validation_feedback(&mut prepared, &content, &error, false);
                    }
                }
            },
            Err(error) => {
                log::warn!(
                    "Structured output JSON parsing failed (attempt {}/{}): {error}",
                    attempt + 1,
                    max_retries + 1
                );
                let error = error.to_string();
                last_error = Some(error.clone());

                if attempt < max_retries {
                    append_validation_feedback(&mut prepared, &content, &error, true);
                }
            }
        }
    }

    Err(LlmError::StructuredOutput {
        provider: client.provider_name().to_string(),
        model: client.model().to_string(),
        message: format!(
            "Failed to generate valid structured output after {} attempts",
            max_retries + 1
        ),
        raw_response,
        validation_error: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StructuredExt;
    use crate::testing::ScriptedClient;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize, JsonSchema)]
    struct NoteSummary {
        name: String,
    }

    #[test]
    fn candidate_extraction_accepts_bare_json_and_fences() {
        assert_eq!(extract_json_candidate(r#"{"a": 1}"#), r#"{"a": 1}"#);
        assert_eq!(extract_json_candidate("[1, 2]"), "[1, 2]");
        assert_eq!(
            extract_json_candidate("Here you go:\n```json\n{\"a\": 1}\n```\ndone"),
            r#"{"a": 1}"#
        );
        assert_eq!(extract_json_candidate("```\n{\"b\": 2}\n```"), r#"{"b": 2}"#);
        assert_eq!(extract_json_candidate("no json here"), "no json here");
    }

    #[test]
    fn schema_instruction_merges_into_leading_system_message() {
        let schema = StructuredSchema::of::<NoteSummary>();

        let prepared = with_schema_instruction(&[Message::system("base prompt"), Message::user("go")], &schema);
        assert_eq!(prepared.len(), 2);
        let Message::System { content } = &prepared[0] else {
            panic!("expected system message");
        };
        assert!(content.starts_with("base prompt"));
        assert!(content.contains("valid JSON"));

        let prepared = with_schema_instruction(&[Message::user("go")], &schema);
        assert_eq!(prepared.len(), 2);
        assert!(matches!(prepared[0], Message::System { .. }));
    }

    #[tokio::test]
    async fn retries_invalid_json_then_succeeds() {
        // First reply: unparseable. Second: schema-invalid. Third: valid.
        let client = ScriptedClient::new("test-model", "test")
            .with_unary(Ok(crate::LlmOutput {
                content: Some("{name: 1}".to_string()),
                ..Default::default()
            }))
            .with_unary(Ok(crate::LlmOutput {
                content: Some(r#"{"other":"x"}"#.to_string()),
                ..Default::default()
            }))
            .with_unary(Ok(crate::LlmOutput {
                content: Some(r#"{"name":"ok"}"#.to_string()),
                ..Default::default()
            }));

        let summary: NoteSummary = client.structured(&[Message::user("summarize")]).await.unwrap();

        assert_eq!(summary.name, "ok");
        assert_eq!(client.unary_calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_carry_last_raw_response() {
        let client = ScriptedClient::new("test-model", "test")
            .with_unary(Ok(crate::LlmOutput {
                content: Some(r#"{"wrong": 1}"#.to_string()),
                ..Default::default()
            }))
            .with_unary(Ok(crate::LlmOutput {
                content: Some(r#"{"still": "wrong"}"#.to_string()),
                ..Default::default()
            }));

        let schema = StructuredSchema::of::<NoteSummary>();
        let error = client
            .generate_structured(&[Message::user("summarize")], &schema, 1)
            .await
            .unwrap_err();

        let LlmError::StructuredOutput {
            raw_response,
            validation_error,
            ..
        } = error
        else {
            panic!("expected structured output error");
        };

        assert_eq!(raw_response.as_deref(), Some(r#"{"still": "wrong"}"#));
        assert!(validation_error.is_some());
        assert_eq!(client.unary_calls(), 2);
    }

    #[tokio::test]
    async fn provider_errors_bypass_the_retry_loop() {
        let client = ScriptedClient::new("test-model", "test").with_unary(Err(LlmError::Authentication {
            provider: "test".to_string(),
            model: "test-model".to_string(),
            message: "bad key".to_string(),
        }));

        let schema = StructuredSchema::of::<NoteSummary>();
        let error = client
            .generate_structured(&[Message::user("summarize")], &schema, 2)
            .await
            .unwrap_err();

        assert!(matches!(error, LlmError::StructuredOutput { .. }));
        assert_eq!(client.unary_calls(), 1);
    }

    #[test]
    fn validator_accepts_matching_values() {
        let schema = StructuredSchema::of::<NoteSummary>();
        assert!(schema.validate(&json!({"name": "ok"})).is_ok());
        assert!(schema.validate(&json!({"name": 1})).is_err());
        assert!(schema.validate(&json!({"other": "x"})).is_err());
    }
}
