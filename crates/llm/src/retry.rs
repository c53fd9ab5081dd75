//! Retry and fallback policy, composed around provider clients.
//!
//! The policy lives in this wrapper rather than inside the clients: each
//! client makes exactly one vendor attempt per call, which keeps them simple
//! and makes the schedule testable with scripted fakes.
//!
//! Unary schedule: primary, primary again after a retriable error, then the
//! fallback once when one is configured and differs from the primary. For
//! streaming the same schedule applies only until the first event reaches
//! the caller; after that, failures surface as a terminal error event.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::client::{EventStream, LlmClient, LlmOutput, StreamEvent, ToolChoice};
use crate::error::{LlmError, LlmResult};
use crate::messages::{Message, ToolDefinition};
use crate::structured::StructuredSchema;

/// Whether `InvalidRequest` counts as retriable.
///
/// Some vendors return transient 400s; retrying them once costs little.
/// Kept as an explicit named policy rather than buried in a match arm.
pub(crate) const RETRY_INVALID_REQUEST: bool = true;

/// Wraps a primary client and an optional fallback with the retry schedule.
pub struct RetryingClient {
    primary: Arc<dyn LlmClient>,
    fallback: Option<Arc<dyn LlmClient>>,
}

impl RetryingClient {
    pub fn new(primary: Arc<dyn LlmClient>, fallback: Option<Arc<dyn LlmClient>>) -> Self {
        log::info!(
            "RetryingClient initialized with primary model: {}, fallback model: {}",
            primary.model(),
            fallback.as_ref().map(|client| client.model()).unwrap_or("None"),
        );

        Self { primary, fallback }
    }

    /// The fallback, unless it targets the same model as the primary.
    fn usable_fallback(&self) -> Option<&Arc<dyn LlmClient>> {
        let fallback = self.fallback.as_ref()?;

        if fallback.model() == self.primary.model() {
            log::warn!(
                "Fallback model '{}' is the same as the primary model. Skipping fallback.",
                fallback.model(),
            );
            return None;
        }

        Some(fallback)
    }

    async fn unary_attempt(
        client: &Arc<dyn LlmClient>,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &ToolChoice,
    ) -> LlmResult<LlmOutput> {
        let output = client
            .generate_response(messages, tools, tool_choice.clone())
            .await?;

        if output.is_empty() {
            log::warn!("Model {} returned empty response", client.model());
            return Err(LlmError::EmptyResponse {
                provider: client.provider_name().to_string(),
                model: client.model().to_string(),
            });
        }

        Ok(output)
    }

    /// Open a stream and commit to it only once the first event arrives.
    ///
    /// A stream that ends before any event, or whose first event is an
    /// error, counts as a failed attempt and is eligible for the schedule.
    async fn stream_attempt(
        client: &Arc<dyn LlmClient>,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &ToolChoice,
    ) -> LlmResult<EventStream> {
        let mut stream = client
            .generate_response_stream(messages, tools, tool_choice.clone())
            .await?;

        match stream.next().await {
            None => Err(LlmError::EmptyResponse {
                provider: client.provider_name().to_string(),
                model: client.model().to_string(),
            }),
            Some(StreamEvent::Error {
                message, error_type, ..
            }) => Err(LlmError::from_stream_error(
                client.provider_name(),
                client.model(),
                message,
                error_type.as_deref(),
            )),
            Some(first) => Ok(futures::stream::once(std::future::ready(first)).chain(stream).boxed()),
        }
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    fn model(&self) -> &str {
        self.primary.model()
    }

    fn provider_name(&self) -> &str {
        self.primary.provider_name()
    }

    fn supports_multimodal_tools(&self) -> bool {
        self.primary.supports_multimodal_tools()
    }

    async fn generate_response(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmOutput> {
        log::info!("Attempt 1: Primary model ({})", self.primary.model());
        let mut last_error = match Self::unary_attempt(&self.primary, messages, tools, &tool_choice).await {
            Ok(output) => return Ok(output),
            Err(error) => {
                log::warn!(
                    "Attempt 1 (Primary model {}) failed: {error}. Retriable: {}",
                    self.primary.model(),
                    error.is_retriable(),
                );
                error
            }
        };

        if last_error.is_retriable() {
            log::info!("Attempt 2: Retrying primary model ({})", self.primary.model());
            last_error = match Self::unary_attempt(&self.primary, messages, tools, &tool_choice).await {
                Ok(output) => return Ok(output),
                Err(error) => {
                    log::warn!(
                        "Attempt 2 (Retry primary model {}) failed: {error}. Proceeding to fallback.",
                        self.primary.model(),
                    );
                    error
                }
            };
        }

        if let Some(fallback) = self.usable_fallback() {
            log::info!("Attempt 3: Fallback model ({})", fallback.model());
            last_error = match Self::unary_attempt(fallback, messages, tools, &tool_choice).await {
                Ok(output) => return Ok(output),
                Err(error) => {
                    log::error!("Attempt 3 (Fallback model {}) also failed: {error}", fallback.model());
                    error
                }
            };
        }

        log::error!("All LLM attempts failed. Raising last recorded error: {last_error}");
        Err(last_error)
    }

    async fn generate_response_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<EventStream> {
        log::info!("Attempt 1: Primary model ({}) (streaming)", self.primary.model());
        let mut last_error = match Self::stream_attempt(&self.primary, messages, tools, &tool_choice).await {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                log::warn!(
                    "Attempt 1 (Primary model {}, streaming) failed: {error}",
                    self.primary.model(),
                );
                error
            }
        };

        if last_error.is_retriable() {
            log::info!("Attempt 2: Retrying primary model ({}) (streaming)", self.primary.model());
            last_error = match Self::stream_attempt(&self.primary, messages, tools, &tool_choice).await {
                Ok(stream) => return Ok(stream),
                Err(error) => {
                    log::warn!(
                        "Attempt 2 (Retry primary model {}, streaming) failed: {error}",
                        self.primary.model(),
                    );
                    error
                }
            };
        }

        if let Some(fallback) = self.usable_fallback() {
            log::info!("Attempt 3: Fallback model ({}) (streaming)", fallback.model());
            last_error = match Self::stream_attempt(fallback, messages, tools, &tool_choice).await {
                Ok(stream) => return Ok(stream),
                Err(error) => {
                    log::error!(
                        "Attempt 3 (Fallback model {}, streaming) also failed: {error}",
                        fallback.model(),
                    );
                    error
                }
            };
        }

        // A failed turn still produces a well-formed stream: one terminal
        // error event.
        log::error!("All streaming attempts failed: {last_error}");
        let terminal = StreamEvent::from_error(&last_error);
        Ok(futures::stream::once(std::future::ready(terminal)).boxed())
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &StructuredSchema,
        max_retries: u32,
    ) -> LlmResult<Value> {
        self.primary.generate_structured(messages, schema, max_retries).await
    }

    async fn format_user_message_with_file(
        &self,
        prompt_text: Option<&str>,
        file_path: Option<&Path>,
        mime_type: Option<&str>,
        max_text_length: Option<usize>,
    ) -> LlmResult<Message> {
        self.primary
            .format_user_message_with_file(prompt_text, file_path, mime_type, max_text_length)
            .await
    }
}
