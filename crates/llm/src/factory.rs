//! Client construction from configuration.

use std::sync::Arc;

use config::{LlmClientConfig, ProviderType};

use crate::client::LlmClient;
use crate::error::LlmResult;
use crate::provider::{AnthropicClient, GoogleClient, OpenAiClient, ProxyClient};
use crate::retry::RetryingClient;

/// Build the provider client a configuration selects.
///
/// The explicit `provider` field wins; otherwise the model id prefix decides
/// (`gpt-`/`o1-`/`o3-` for OpenAI, `gemini-` for Google, `claude-` for
/// Anthropic, anything else the generic proxy).
pub fn create_client(config: &LlmClientConfig) -> LlmResult<Arc<dyn LlmClient>> {
    let provider = config.resolved_provider();
    log::info!("Creating {provider} client for model: {}", config.model);

    let client: Arc<dyn LlmClient> = match provider {
        ProviderType::Openai => Arc::new(OpenAiClient::new(config)?),
        ProviderType::Google => Arc::new(GoogleClient::new(config)?),
        ProviderType::Anthropic => Arc::new(AnthropicClient::new(config)?),
        ProviderType::Proxy => Arc::new(ProxyClient::new(config)?),
    };

    Ok(client)
}

/// Build the configured client, wrapped with retry/fallback when a fallback
/// model is configured.
///
/// The fallback inherits the default parameters, and the endpoint and
/// credentials too when it resolves to the same provider family; otherwise
/// its credentials come from the environment.
pub fn create_client_with_fallback(config: &LlmClientConfig) -> LlmResult<Arc<dyn LlmClient>> {
    let primary = create_client(config)?;

    let Some(fallback_model) = &config.fallback_model_id else {
        return Ok(primary);
    };

    let mut fallback_config = LlmClientConfig::new(fallback_model.clone());
    fallback_config.default_params = config.default_params.clone();
    fallback_config.model_parameters = config.fallback_model_parameters.clone();

    if fallback_config.resolved_provider() == config.resolved_provider() {
        fallback_config.api_key = config.api_key.clone();
        fallback_config.api_base = config.api_base.clone();
    }

    let fallback = create_client(&fallback_config)?;

    Ok(Arc::new(RetryingClient::new(primary, Some(fallback))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config_with_key(model: &str) -> LlmClientConfig {
        let mut config = LlmClientConfig::new(model);
        config.api_key = Some(SecretString::from("test-key".to_string()));
        config
    }

    #[test]
    fn model_prefix_selects_the_provider() {
        let cases = [
            ("gpt-4.1", "openai"),
            ("o3-mini", "openai"),
            ("gemini-2.0-flash", "google"),
            ("claude-sonnet-4-0", "anthropic"),
            ("openrouter/meta/llama-3", "proxy"),
        ];

        for (model, expected) in cases {
            let client = create_client(&config_with_key(model)).unwrap();
            assert_eq!(client.provider_name(), expected, "model {model}");
            assert_eq!(client.model(), model);
        }
    }

    #[test]
    fn explicit_provider_overrides_the_prefix() {
        let mut config = config_with_key("gpt-4.1");
        config.provider = Some(config::ProviderType::Proxy);

        let client = create_client(&config).unwrap();
        assert_eq!(client.provider_name(), "proxy");
    }

    #[test]
    fn fallback_configuration_wraps_with_retry() {
        let mut config = config_with_key("gpt-4.1");
        config.fallback_model_id = Some("gpt-4.1-mini".to_string());

        let client = create_client_with_fallback(&config).unwrap();

        // The wrapper reports the primary's identity.
        assert_eq!(client.model(), "gpt-4.1");
        assert_eq!(client.provider_name(), "openai");
    }

    #[test]
    fn no_fallback_returns_the_bare_client() {
        let client = create_client_with_fallback(&config_with_key("claude-sonnet-4-0")).unwrap();
        assert_eq!(client.provider_name(), "anthropic");
    }
}
