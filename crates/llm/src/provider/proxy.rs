//! Generic OpenAI-compatible proxy client.
//!
//! Speaks the OpenAI chat completions wire against a configurable endpoint
//! (aggregators, local gateways). Model ids pass through untouched, so
//! router-style identifiers like `openrouter/deepseek/deepseek-r1` work, and
//! the `reasoning` model parameter is forwarded rather than dropped.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use config::LlmClientConfig;
use serde_json::Value;

use crate::client::{EventStream, LlmClient, LlmOutput, ToolChoice};
use crate::error::LlmResult;
use crate::messages::{Message, ToolDefinition};
use crate::provider::openai::OpenAiClient;
use crate::structured::StructuredSchema;

const DEFAULT_PROXY_API_URL: &str = "http://localhost:4000/v1";

static VERBOSE: LazyLock<bool> = LazyLock::new(|| {
    let enabled = config::env_flag("PROXY_LLM_DEBUG");
    if enabled {
        log::info!("Enabled verbose proxy logging because PROXY_LLM_DEBUG is set.");
    }
    enabled
});

/// Client for arbitrary OpenAI-compatible proxy endpoints.
pub struct ProxyClient {
    inner: OpenAiClient,
}

impl ProxyClient {
    pub fn new(config: &LlmClientConfig) -> LlmResult<Self> {
        // Proxies often run keyless on localhost; no environment fallback.
        let inner = OpenAiClient::from_parts(config, config.api_key.clone(), "proxy", DEFAULT_PROXY_API_URL, true)?;

        Ok(Self { inner })
    }
}

#[async_trait]
impl LlmClient for ProxyClient {
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn provider_name(&self) -> &str {
        "proxy"
    }

    async fn generate_response(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<LlmOutput> {
        if *VERBOSE {
            log::info!(
                "proxy call: model={} messages={} tools={}",
                self.model(),
                messages.len(),
                tools.map(<[_]>::len).unwrap_or(0),
            );
        }

        let result = self.inner.generate_response(messages, tools, tool_choice).await;

        if *VERBOSE {
            match &result {
                Ok(output) => log::info!(
                    "proxy response: content={} tool_calls={}",
                    output.content.is_some(),
                    output.tool_calls.as_deref().map(<[_]>::len).unwrap_or(0),
                ),
                Err(error) => log::info!("proxy error: {error}"),
            }
        }

        result
    }

    async fn generate_response_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: ToolChoice,
    ) -> LlmResult<EventStream> {
        self.inner.generate_response_stream(messages, tools, tool_choice).await
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &StructuredSchema,
        max_retries: u32,
    ) -> LlmResult<Value> {
        self.inner.generate_structured(messages, schema, max_retries).await
    }

    async fn format_user_message_with_file(
        &self,
        prompt_text: Option<&str>,
        file_path: Option<&Path>,
        mime_type: Option<&str>,
        max_text_length: Option<usize>,
    ) -> LlmResult<Message> {
        self.inner
            .format_user_message_with_file(prompt_text, file_path, mime_type, max_text_length)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::routing::post;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reasoning_parameter_reaches_the_proxy_wire() {
        let captured: Arc<Mutex<Option<Value>>> = Arc::default();

        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(|State(state): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                    *state.lock().unwrap() = Some(body);
                    Json(serde_json::json!({"choices": [{"message": {"content": "ok"}}]}))
                }),
            )
            .with_state(captured.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = LlmClientConfig::new("openrouter/deepseek-r1");
        config.api_base = Some(format!("http://{address}/v1"));

        let mut patterns = indexmap::IndexMap::new();
        patterns.insert(
            "openrouter/deepseek-".to_string(),
            [
                ("reasoning".to_string(), serde_json::json!({"effort": "high"})),
                ("temperature".to_string(), serde_json::json!(0.6)),
            ]
            .into_iter()
            .collect(),
        );
        config.model_parameters = config::ModelParameters::new(patterns);

        let client = ProxyClient::new(&config).unwrap();
        client
            .generate_response(&[Message::user("think")], None, ToolChoice::Auto)
            .await
            .unwrap();

        let body = captured.lock().unwrap().clone().unwrap();
        assert_eq!(body["reasoning"], serde_json::json!({"effort": "high"}));
        assert_eq!(body["temperature"], serde_json::json!(0.6));
        assert_eq!(body["model"], serde_json::json!("openrouter/deepseek-r1"));
    }
}
