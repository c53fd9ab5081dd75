pub(crate) mod input;
pub(crate) mod output;

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use config::{LlmClientConfig, ModelParameters, ProviderType};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use self::input::{CallParams, MessagesRequest};
use self::output::{AnthropicStreamEvent, MessagesResponse, StreamProcessor};

use crate::attachment::process_tool_messages;
use crate::client::{EventStream, LlmClient, LlmOutput, StreamEvent, ToolChoice, validate_user_input};
use crate::error::{LlmError, LlmResult};
use crate::messages::{Message, ToolDefinition, messages_to_json};
use crate::provider::{
    CallRecorder, default_http_client, map_status_error, map_transport_error, replay_fallback_enabled,
    sanitize_tool_definitions,
};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API.
///
/// Structured output uses the shared instruction-and-parse fallback; this
/// API has no schema-constrained response mode.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    default_params: BTreeMap<String, Value>,
    model_parameters: ModelParameters,
}

impl AnthropicClient {
    pub fn new(config: &LlmClientConfig) -> LlmResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| config::api_key_from_env(ProviderType::Anthropic));

        let Some(api_key) = api_key else {
            return Err(LlmError::Authentication {
                provider: "anthropic".to_string(),
                model: config.model.clone(),
                message: format!("API key not found in environment: {}", config::ENV_ANTHROPIC_API_KEY),
            });
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, reqwest::header::HeaderValue::from_static("application/json"));
        headers.insert(
            "anthropic-version",
            reqwest::header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let http = default_http_client(headers)?;
        let base_url = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string());

        log::info!(
            "anthropic client initialized for model: {} (base: {base_url})",
            config.model
        );

        Ok(Self {
            http,
            base_url,
            api_key,
            model: config.model.clone(),
            default_params: config.default_params.clone(),
            model_parameters: config.model_parameters.clone(),
        })
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &ToolChoice,
        stream: bool,
    ) -> MessagesRequest {
        let merged = self.model_parameters.merge_for_model(&self.model, &self.default_params);
        let params = CallParams::from_params(&merged.params);

        let (system, converted) = input::build_messages(messages);

        let wire_tools = tools.map(|tools| input::build_tools(&sanitize_tool_definitions(tools)));
        let tool_choice = wire_tools
            .as_ref()
            .and_then(|_| input::tool_choice_to_wire(tool_choice));

        MessagesRequest {
            model: self.model.clone(),
            messages: converted,
            max_tokens: params.max_tokens,
            system,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            stop_sequences: params.stop_sequences,
            stream: stream.then_some(true),
            tools: wire_tools,
            tool_choice,
        }
    }

    async fn send(&self, request: &MessagesRequest) -> LlmResult<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|error| map_transport_error("anthropic", &self.model, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Anthropic API error ({status}): {body}");
            return Err(map_status_error("anthropic", &self.model, status.as_u16(), body));
        }

        Ok(response)
    }

    async fn unary_attempt(
        &self,
        processed: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &ToolChoice,
    ) -> LlmResult<LlmOutput> {
        let recorder = CallRecorder::start("anthropic", &self.model, processed, tools, tool_choice);
        crate::debug::log_request(&self.model, &messages_to_json(processed), tools, tool_choice);

        let request = self.build_request(processed, tools, tool_choice, false);

        let response = match self.send(&request).await {
            Ok(response) => response,
            Err(error) => {
                recorder.failure(&error);
                return Err(error);
            }
        };

        let parsed: MessagesResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                let error = LlmError::Provider {
                    provider: "anthropic".to_string(),
                    model: self.model.clone(),
                    message: format!("failed to parse messages response: {error}"),
                };
                recorder.failure(&error);
                return Err(error);
            }
        };

        let output = parsed.into_output();

        log::debug!(
            "Anthropic response received from model {}. Content: {}. Tool calls: {}",
            self.model,
            output.content.is_some(),
            output.tool_calls.as_deref().map(<[_]>::len).unwrap_or(0),
        );

        recorder.success(&output);
        Ok(output)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn supports_multimodal_tools(&self) -> bool {
        true
    }

    async fn generate_response(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmOutput> {
        validate_user_input(messages, "anthropic", &self.model)?;
        let processed = process_tool_messages(messages, true);
        self.unary_attempt(&processed, tools, &tool_choice).await
    }

    async fn generate_response_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<EventStream> {
        validate_user_input(messages, "anthropic", &self.model)?;
        let processed = process_tool_messages(messages, true);

        let recorder = CallRecorder::start("anthropic", &self.model, &processed, tools, &tool_choice);
        crate::debug::log_request(&self.model, &messages_to_json(&processed), tools, &tool_choice);

        let request = self.build_request(&processed, tools, &tool_choice, true);

        let response = match self.send(&request).await {
            Ok(response) => response,
            Err(error) => {
                recorder.failure(&error);
                return Err(error);
            }
        };

        let driver = StreamDriver {
            client: self.clone(),
            messages: processed,
            tools: tools.map(<[ToolDefinition]>::to_vec),
            tool_choice,
            events: Box::pin(response.bytes_stream().eventsource()),
            processor: StreamProcessor::default(),
            pending: VecDeque::new(),
            recorder: Some(recorder),
            produced_output: false,
            finished: false,
        };

        let stream = futures::stream::unfold(driver, |mut driver| async move {
            driver.next_event().await.map(|event| (event, driver))
        });

        Ok(Box::pin(stream))
    }

    async fn format_user_message_with_file(
        &self,
        prompt_text: Option<&str>,
        file_path: Option<&Path>,
        mime_type: Option<&str>,
        max_text_length: Option<usize>,
    ) -> LlmResult<Message> {
        crate::provider::format_with_file("anthropic", &self.model, prompt_text, file_path, mime_type, max_text_length)
            .await
    }
}

type SseStream =
    Pin<Box<dyn Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>;

/// Streaming state machine wrapping [`StreamProcessor`].
struct StreamDriver {
    client: AnthropicClient,
    messages: Vec<Message>,
    tools: Option<Vec<ToolDefinition>>,
    tool_choice: ToolChoice,
    events: SseStream,
    processor: StreamProcessor,
    pending: VecDeque<StreamEvent>,
    recorder: Option<CallRecorder>,
    produced_output: bool,
    finished: bool,
}

impl StreamDriver {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            match self.events.next().await {
                None => self.finalize().await,
                Some(Ok(event)) => {
                    let parsed: AnthropicStreamEvent = match serde_json::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(error) => {
                            log::warn!("Failed to parse Anthropic streaming event: {error}");
                            continue;
                        }
                    };

                    if let Some(event) = self.processor.process(parsed) {
                        match &event {
                            StreamEvent::Content(_) | StreamEvent::ToolCall(_) => {
                                self.produced_output = true;
                            }
                            StreamEvent::Done { metadata } => {
                                self.finished = true;
                                if let Some(recorder) = self.recorder.take() {
                                    recorder.success_streaming(metadata.as_ref().unwrap_or(&Value::Null));
                                }
                            }
                            StreamEvent::Error { message, .. } => {
                                self.finished = true;
                                if let Some(recorder) = self.recorder.take() {
                                    recorder.failure(&LlmError::Provider {
                                        provider: "anthropic".to_string(),
                                        model: self.client.model.clone(),
                                        message: message.clone(),
                                    });
                                }
                            }
                            StreamEvent::ToolResult { .. } => {}
                        }
                        self.pending.push_back(event);
                    }
                }
                Some(Err(error)) => {
                    let error = LlmError::ProviderConnection {
                        provider: "anthropic".to_string(),
                        model: self.client.model.clone(),
                        message: format!("stream failed: {error}"),
                    };
                    log::error!("{error}");

                    if let Some(recorder) = self.recorder.take() {
                        recorder.failure(&error);
                    }
                    self.pending.push_back(StreamEvent::from_error(&error));
                    self.finished = true;
                }
            }
        }
    }

    /// The vendor closed the connection without a terminal event.
    async fn finalize(&mut self) {
        self.finished = true;

        if !self.produced_output && replay_fallback_enabled() {
            match self
                .client
                .unary_attempt(&self.messages, self.tools.as_deref(), &self.tool_choice)
                .await
            {
                Ok(output) => {
                    if let Some(content) = output.content {
                        self.pending.push_back(StreamEvent::Content(content));
                    }
                    for call in output.tool_calls.unwrap_or_default() {
                        self.pending.push_back(StreamEvent::ToolCall(call));
                    }

                    let metadata = output.reasoning_info.map(|info| json!({"reasoning_info": info}));
                    if let Some(recorder) = self.recorder.take() {
                        recorder.success_streaming(metadata.as_ref().unwrap_or(&Value::Null));
                    }
                    self.pending.push_back(StreamEvent::Done { metadata });
                    return;
                }
                Err(error) => {
                    log::debug!("Fallback non-streaming completion failed: {error}");
                }
            }
        }

        if let Some(recorder) = self.recorder.take() {
            recorder.success_streaming(&Value::Null);
        }
        self.pending.push_back(StreamEvent::Done { metadata: None });
    }
}
