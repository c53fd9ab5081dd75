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

use self::input::ChatCompletionRequest;
use self::output::{ChatCompletionChunk, ChatCompletionResponse, ToolCallAccumulator};

use crate::attachment::process_tool_messages;
use crate::client::{EventStream, LlmClient, LlmOutput, StreamEvent, ToolChoice, validate_user_input};
use crate::error::{LlmError, LlmResult};
use crate::messages::{Message, ToolDefinition, messages_to_json};
use crate::provider::{
    CallRecorder, default_http_client, map_status_error, map_transport_error, replay_fallback_enabled,
    sanitize_tool_definitions,
};
use crate::structured::{StructuredSchema, append_validation_feedback, extract_json_candidate};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Client for the OpenAI chat completions API and compatible endpoints.
///
/// The generic proxy client wraps this with a different provider name, base
/// URL handling, and `reasoning` passthrough.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    provider_name: &'static str,
    default_params: BTreeMap<String, Value>,
    model_parameters: ModelParameters,
    reasoning_passthrough: bool,
}

impl OpenAiClient {
    pub fn new(config: &LlmClientConfig) -> LlmResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| config::api_key_from_env(ProviderType::Openai));

        let Some(api_key) = api_key else {
            return Err(LlmError::Authentication {
                provider: "openai".to_string(),
                model: config.model.clone(),
                message: format!("API key not found in environment: {}", config::ENV_OPENAI_API_KEY),
            });
        };

        Self::from_parts(config, Some(api_key), "openai", DEFAULT_OPENAI_API_URL, false)
    }

    /// Shared constructor for the native client and the proxy wrapper.
    pub(crate) fn from_parts(
        config: &LlmClientConfig,
        api_key: Option<SecretString>,
        provider_name: &'static str,
        default_base_url: &str,
        reasoning_passthrough: bool,
    ) -> LlmResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, reqwest::header::HeaderValue::from_static("application/json"));

        let http = default_http_client(headers)?;
        let base_url = config
            .api_base
            .clone()
            .unwrap_or_else(|| default_base_url.to_string());

        log::info!(
            "{provider_name} client initialized for model: {} (base: {base_url})",
            config.model
        );

        Ok(Self {
            http,
            base_url,
            api_key,
            model: config.model.clone(),
            provider_name,
            default_params: config.default_params.clone(),
            model_parameters: config.model_parameters.clone(),
            reasoning_passthrough,
        })
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &ToolChoice,
        stream: bool,
        response_format: Option<Value>,
    ) -> ChatCompletionRequest {
        let merged = self.model_parameters.merge_for_model(&self.model, &self.default_params);
        let mut extra = merged.params;

        if self.reasoning_passthrough
            && let Some(reasoning) = merged.reasoning
        {
            log::debug!("Adding 'reasoning' parameter for proxy model '{}'", self.model);
            extra.insert("reasoning".to_string(), reasoning);
        }

        let wire_tools = tools.map(|tools| input::build_tools(&sanitize_tool_definitions(tools)));

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: input::build_messages(messages),
            tool_choice: wire_tools
                .as_ref()
                .map(|_| input::tool_choice_to_wire(tool_choice)),
            tools: wire_tools,
            stream: stream.then_some(true),
            response_format,
            extra,
        }
    }

    async fn send(&self, request: &ChatCompletionRequest) -> LlmResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self.http.post(&url).json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|error| map_transport_error(self.provider_name, &self.model, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("{} API error ({status}): {body}", self.provider_name);
            return Err(map_status_error(self.provider_name, &self.model, status.as_u16(), body));
        }

        Ok(response)
    }

    /// One unary call without retry policy; the retry wrapper owns that.
    async fn unary_attempt(
        &self,
        processed: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &ToolChoice,
        response_format: Option<Value>,
    ) -> LlmResult<LlmOutput> {
        let recorder = CallRecorder::start(self.provider_name, &self.model, processed, tools, tool_choice);
        crate::debug::log_request(&self.model, &messages_to_json(processed), tools, tool_choice);

        let request = self.build_request(processed, tools, tool_choice, false, response_format);

        let response = match self.send(&request).await {
            Ok(response) => response,
            Err(error) => {
                recorder.failure(&error);
                return Err(error);
            }
        };

        let parsed: ChatCompletionResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                let error = LlmError::Provider {
                    provider: self.provider_name.to_string(),
                    model: self.model.clone(),
                    message: format!("failed to parse chat completion response: {error}"),
                };
                recorder.failure(&error);
                return Err(error);
            }
        };

        let Some(output) = parsed.into_output() else {
            let error = LlmError::EmptyResponse {
                provider: self.provider_name.to_string(),
                model: self.model.clone(),
            };
            recorder.failure(&error);
            return Err(error);
        };

        log::debug!(
            "{} response received from model {}. Content: {}. Tool calls: {}",
            self.provider_name,
            self.model,
            output.content.is_some(),
            output.tool_calls.as_deref().map(<[_]>::len).unwrap_or(0),
        );

        recorder.success(&output);
        Ok(output)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        self.provider_name
    }

    async fn generate_response(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmOutput> {
        validate_user_input(messages, self.provider_name, &self.model)?;
        let processed = process_tool_messages(messages, self.supports_multimodal_tools());
        self.unary_attempt(&processed, tools, &tool_choice, None).await
    }

    async fn generate_response_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<EventStream> {
        validate_user_input(messages, self.provider_name, &self.model)?;
        let processed = process_tool_messages(messages, self.supports_multimodal_tools());

        let recorder = CallRecorder::start(self.provider_name, &self.model, &processed, tools, &tool_choice);
        crate::debug::log_request(&self.model, &messages_to_json(&processed), tools, &tool_choice);

        let request = self.build_request(&processed, tools, &tool_choice, true, None);

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
            accumulator: ToolCallAccumulator::default(),
            pending: VecDeque::new(),
            recorder: Some(recorder),
            usage: None,
            produced_output: false,
            finished: false,
        };

        let stream = futures::stream::unfold(driver, |mut driver| async move {
            driver.next_event().await.map(|event| (event, driver))
        });

        Ok(Box::pin(stream))
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &StructuredSchema,
        max_retries: u32,
    ) -> LlmResult<Value> {
        let mut prepared = process_tool_messages(messages, self.supports_multimodal_tools());

        let response_format = json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "schema": schema.schema,
                "strict": false,
            },
        });

        let mut last_error: Option<String> = None;
        let mut raw_response: Option<String> = None;

        for attempt in 0..=max_retries {
            let output = match self
                .unary_attempt(&prepared, None, &ToolChoice::Auto, Some(response_format.clone()))
                .await
            {
                Ok(output) => output,
                Err(error) => {
                    log::error!("Provider error in structured output generation: {error}");
                    last_error = Some(error.to_string());
                    break;
                }
            };

            let Some(content) = output.content.filter(|content| !content.is_empty()) else {
                last_error = Some("LLM returned empty content".to_string());
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
            provider: self.provider_name.to_string(),
            model: self.model.clone(),
            message: format!(
                "Failed to generate valid structured output after {} attempts",
                max_retries + 1
            ),
            raw_response,
            validation_error: last_error,
        })
    }

    async fn format_user_message_with_file(
        &self,
        prompt_text: Option<&str>,
        file_path: Option<&Path>,
        mime_type: Option<&str>,
        max_text_length: Option<usize>,
    ) -> LlmResult<Message> {
        crate::provider::format_with_file(
            self.provider_name,
            &self.model,
            prompt_text,
            file_path,
            mime_type,
            max_text_length,
        )
        .await
    }
}

type SseStream =
    Pin<Box<dyn Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>;

/// Pull-based state machine behind the streaming event sequence.
///
/// Buffers only what tool-call assembly needs; content chunks flow straight
/// through, so the consumer naturally backpressures the vendor stream.
struct StreamDriver {
    client: OpenAiClient,
    messages: Vec<Message>,
    tools: Option<Vec<ToolDefinition>>,
    tool_choice: ToolChoice,
    events: SseStream,
    accumulator: ToolCallAccumulator,
    pending: VecDeque<StreamEvent>,
    recorder: Option<CallRecorder>,
    usage: Option<Value>,
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
                Some(Ok(event)) if event.data == "[DONE]" => self.finalize().await,
                Some(Ok(event)) => self.ingest_chunk(&event.data),
                Some(Err(error)) => {
                    let error = LlmError::ProviderConnection {
                        provider: self.client.provider_name.to_string(),
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

    fn ingest_chunk(&mut self, data: &str) {
        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(error) => {
                log::warn!("Failed to parse streaming chunk: {error}");
                return;
            }
        };

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        for choice in chunk.choices {
            let Some(delta) = choice.delta else { continue };

            if let Some(content) = delta.content.filter(|content| !content.is_empty()) {
                self.produced_output = true;
                self.pending.push_back(StreamEvent::Content(content));
            }

            for tool_delta in delta.tool_calls.unwrap_or_default() {
                self.accumulator.ingest(tool_delta);
            }
        }
    }

    async fn finalize(&mut self) {
        self.finished = true;

        for call in std::mem::take(&mut self.accumulator).finish() {
            self.produced_output = true;
            self.pending.push_back(StreamEvent::ToolCall(call));
        }

        // Replay harnesses cannot serve SSE; synthesize the stream from a
        // unary call when the vendor stream came back empty.
        if !self.produced_output && replay_fallback_enabled() {
            match self
                .client
                .unary_attempt(&self.messages, self.tools.as_deref(), &self.tool_choice, None)
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

        let metadata = self.usage.take().map(|usage| json!({"reasoning_info": usage}));
        if let Some(recorder) = self.recorder.take() {
            recorder.success_streaming(metadata.as_ref().unwrap_or(&Value::Null));
        }
        self.pending.push_back(StreamEvent::Done { metadata });
    }
}
