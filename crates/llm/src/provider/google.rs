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

use self::input::{GenerateContentRequest, GenerationConfig};
use self::output::GenerateContentResponse;

use crate::attachment::process_tool_messages;
use crate::client::{EventStream, LlmClient, LlmOutput, StreamEvent, ToolChoice, validate_user_input};
use crate::error::{LlmError, LlmResult};
use crate::messages::{Message, ToolDefinition, messages_to_json};
use crate::provider::{CallRecorder, default_http_client, map_status_error, map_transport_error, replay_fallback_enabled};
use crate::structured::{StructuredSchema, append_validation_feedback, extract_json_candidate};

const DEFAULT_GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Google Gemini GenerateContent API.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    default_params: BTreeMap<String, Value>,
    model_parameters: ModelParameters,
}

impl GoogleClient {
    pub fn new(config: &LlmClientConfig) -> LlmResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| config::api_key_from_env(ProviderType::Google));

        let Some(api_key) = api_key else {
            return Err(LlmError::Authentication {
                provider: "google".to_string(),
                model: config.model.clone(),
                message: format!("API key not found in environment: {}", config::ENV_GEMINI_API_KEY),
            });
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, reqwest::header::HeaderValue::from_static("application/json"));

        let http = default_http_client(headers)?;
        let base_url = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_GOOGLE_API_URL.to_string());

        log::info!("google client initialized for model: {} (base: {base_url})", config.model);

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
        response_schema: Option<Value>,
    ) -> GenerateContentRequest {
        let merged = self.model_parameters.merge_for_model(&self.model, &self.default_params);
        let mut generation_config = GenerationConfig::from_params(&merged.params);

        if let Some(schema) = response_schema {
            let mut config = generation_config.take().unwrap_or_default();
            config.response_mime_type = Some("application/json".to_string());
            config.response_schema = Some(input::strip_unsupported_schema_fields(schema));
            generation_config = Some(config);
        }

        let (system_instruction, contents) = input::build_contents(messages);

        // `none` must also omit the tool list; some models still call
        // functions when declarations are present.
        let tools = match tool_choice {
            ToolChoice::None => None,
            _ => tools.map(input::build_tools),
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config,
            tools,
            tool_config: input::tool_choice_to_config(tool_choice),
        }
    }

    async fn send(&self, request: &GenerateContentRequest, stream: bool) -> LlmResult<reqwest::Response> {
        let url = if stream {
            format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, self.model)
        } else {
            format!("{}/models/{}:generateContent", self.base_url, self.model)
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|error| map_transport_error("google", &self.model, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Google API error ({status}): {body}");
            return Err(map_status_error("google", &self.model, status.as_u16(), body));
        }

        Ok(response)
    }

    async fn unary_attempt(
        &self,
        processed: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: &ToolChoice,
        response_schema: Option<Value>,
    ) -> LlmResult<LlmOutput> {
        let recorder = CallRecorder::start("google", &self.model, processed, tools, tool_choice);
        crate::debug::log_request(&self.model, &messages_to_json(processed), tools, tool_choice);

        let request = self.build_request(processed, tools, tool_choice, response_schema);

        let response = match self.send(&request, false).await {
            Ok(response) => response,
            Err(error) => {
                recorder.failure(&error);
                return Err(error);
            }
        };

        let parsed: GenerateContentResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                let error = LlmError::Provider {
                    provider: "google".to_string(),
                    model: self.model.clone(),
                    message: format!("failed to parse generate content response: {error}"),
                };
                recorder.failure(&error);
                return Err(error);
            }
        };

        let output = parsed.into_output();

        log::debug!(
            "Google response received from model {}. Content: {}. Tool calls: {}",
            self.model,
            output.content.is_some(),
            output.tool_calls.as_deref().map(<[_]>::len).unwrap_or(0),
        );

        recorder.success(&output);
        Ok(output)
    }
}

#[async_trait]
impl LlmClient for GoogleClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "google"
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
        validate_user_input(messages, "google", &self.model)?;
        let processed = process_tool_messages(messages, true);
        self.unary_attempt(&processed, tools, &tool_choice, None).await
    }

    async fn generate_response_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<EventStream> {
        validate_user_input(messages, "google", &self.model)?;
        let processed = process_tool_messages(messages, true);

        let recorder = CallRecorder::start("google", &self.model, &processed, tools, &tool_choice);
        crate::debug::log_request(&self.model, &messages_to_json(&processed), tools, &tool_choice);

        let request = self.build_request(&processed, tools, &tool_choice, None);

        let response = match self.send(&request, true).await {
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
        let mut prepared = process_tool_messages(messages, true);

        let mut last_error: Option<String> = None;
        let mut raw_response: Option<String> = None;

        for attempt in 0..=max_retries {
            let output = match self
                .unary_attempt(&prepared, None, &ToolChoice::Auto, Some(schema.schema.clone()))
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
            provider: "google".to_string(),
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
        crate::provider::format_with_file("google", &self.model, prompt_text, file_path, mime_type, max_text_length)
            .await
    }
}

type SseStream =
    Pin<Box<dyn Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>;

/// Streaming state machine. Gemini chunks carry complete function calls, so
/// no cross-chunk assembly is needed; text parts flow straight through.
struct StreamDriver {
    client: GoogleClient,
    messages: Vec<Message>,
    tools: Option<Vec<ToolDefinition>>,
    tool_choice: ToolChoice,
    events: SseStream,
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
                Some(Ok(event)) => self.ingest_chunk(&event.data),
                Some(Err(error)) => {
                    let error = LlmError::ProviderConnection {
                        provider: "google".to_string(),
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
        let chunk: GenerateContentResponse = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(error) => {
                log::warn!("Failed to parse Google streaming chunk: {error}");
                return;
            }
        };

        if let Some(usage) = &chunk.usage_metadata {
            self.usage = Some(usage.clone());
        }

        let extracted = chunk.extract();

        if !extracted.text.is_empty() {
            self.produced_output = true;
            self.pending.push_back(StreamEvent::Content(extracted.text));
        }

        for call in extracted.tool_calls {
            self.produced_output = true;
            self.pending.push_back(StreamEvent::ToolCall(call));
        }
    }

    async fn finalize(&mut self) {
        self.finished = true;

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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Captured {
        body: Arc<Mutex<Option<Value>>>,
        response: Arc<Mutex<Option<Value>>>,
    }

    async fn handle_generate(State(state): State<Captured>, Json(body): Json<Value>) -> impl IntoResponse {
        *state.body.lock().unwrap() = Some(body);
        let response = state
            .response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| json!({"candidates": []}));
        (StatusCode::OK, Json(response))
    }

    async fn start_server(state: Captured, model: &str) -> String {
        let app = Router::new()
            .route(
                &format!("/v1beta/models/{model}:generateContent"),
                post(handle_generate),
            )
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}/v1beta")
    }

    fn client_for(base_url: String) -> GoogleClient {
        let mut config = LlmClientConfig::new("gemini-2.0-flash");
        config.api_key = Some(SecretString::from("test-key".to_string()));
        config.api_base = Some(base_url);
        GoogleClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn unary_success_extracts_text() {
        let state = Captured::default();
        *state.response.lock().unwrap() = Some(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello"}]}}],
            "usageMetadata": {"totalTokenCount": 5},
        }));

        let base_url = start_server(state.clone(), "gemini-2.0-flash").await;
        let client = client_for(base_url);

        let output = client
            .generate_response(&[Message::user("Hi")], None, ToolChoice::Auto)
            .await
            .unwrap();

        assert_eq!(output.content.as_deref(), Some("Hello"));

        let body = state.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["contents"][0]["role"], json!("user"));
    }

    #[tokio::test]
    async fn tool_choice_none_omits_tools_and_sets_none_mode() {
        let state = Captured::default();
        *state.response.lock().unwrap() = Some(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "ok"}]}}],
        }));

        let base_url = start_server(state.clone(), "gemini-2.0-flash").await;
        let client = client_for(base_url);

        let tools = vec![ToolDefinition::new(
            "search",
            "Search things",
            json!({"type": "object", "properties": {}}),
        )];

        client
            .generate_response(&[Message::user("hi")], Some(&tools), ToolChoice::None)
            .await
            .unwrap();

        let body = state.body.lock().unwrap().clone().unwrap();
        assert!(body.get("tools").is_none());
        assert_eq!(
            body["toolConfig"]["functionCallingConfig"]["mode"],
            json!("NONE")
        );
    }

    #[tokio::test]
    async fn specific_tool_choice_restricts_allowed_names() {
        let state = Captured::default();
        *state.response.lock().unwrap() = Some(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "ok"}]}}],
        }));

        let base_url = start_server(state.clone(), "gemini-2.0-flash").await;
        let client = client_for(base_url);

        let tools = vec![ToolDefinition::new(
            "search",
            "Search things",
            json!({"type": "object", "properties": {}}),
        )];

        client
            .generate_response(
                &[Message::user("hi")],
                Some(&tools),
                ToolChoice::Tool("search".to_string()),
            )
            .await
            .unwrap();

        let body = state.body.lock().unwrap().clone().unwrap();
        assert!(body.get("tools").is_some());
        assert_eq!(body["toolConfig"]["functionCallingConfig"]["mode"], json!("ANY"));
        assert_eq!(
            body["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"],
            json!(["search"])
        );
    }

    #[tokio::test]
    async fn received_thought_signature_is_sent_back_byte_identical() {
        let raw: Vec<u8> = vec![0xaa, 0x00, 0x55, 0xff];
        let signature = crate::messages::ThoughtSignature::new(raw.clone());

        let state = Captured::default();
        *state.response.lock().unwrap() = Some(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "functionCall": {"name": "lookup", "args": {}},
                        "thoughtSignature": signature.to_storage_string(),
                    }],
                },
            }],
        }));

        let base_url = start_server(state.clone(), "gemini-2.0-flash").await;
        let client = client_for(base_url);

        // Turn 1: model replies with a tool call carrying a signature.
        let output = client
            .generate_response(&[Message::user("q")], None, ToolChoice::Auto)
            .await
            .unwrap();
        let call = output.tool_calls.unwrap().remove(0);

        // Turn 2: conversation history goes back to the vendor.
        let history = vec![
            Message::user("q"),
            Message::assistant_with_tools(None, vec![call.clone()]),
            Message::tool_result(
                call.id.clone(),
                "lookup",
                crate::attachment::ToolResult::from_text("found"),
            ),
        ];
        client
            .generate_response(&history, None, ToolChoice::Auto)
            .await
            .unwrap();

        let body = state.body.lock().unwrap().clone().unwrap();
        let sent = body["contents"][1]["parts"][0]["thoughtSignature"]
            .as_str()
            .unwrap();
        let round_tripped = crate::messages::ThoughtSignature::from_storage_string(sent).unwrap();
        assert_eq!(round_tripped.as_bytes(), raw.as_slice());
    }
}
