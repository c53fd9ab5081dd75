//! Client configuration for AI model providers.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;

use crate::model_params::ModelParameters;

/// The vendor family a model identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI chat completions API.
    Openai,
    /// Google Gemini GenerateContent API.
    Google,
    /// Anthropic Messages API.
    Anthropic,
    /// A generic OpenAI-compatible proxy endpoint.
    Proxy,
}

impl ProviderType {
    /// Infer the provider from a model identifier prefix.
    ///
    /// Model ids without a recognized prefix route to the generic proxy,
    /// which accepts arbitrary `vendor/model` identifiers.
    pub fn infer(model: &str) -> ProviderType {
        const PREFIXES: &[(&str, ProviderType)] = &[
            ("gpt-", ProviderType::Openai),
            ("o1-", ProviderType::Openai),
            ("o3-", ProviderType::Openai),
            ("gemini-", ProviderType::Google),
            ("claude-", ProviderType::Anthropic),
        ];

        for (prefix, provider) in PREFIXES {
            if model.starts_with(prefix) {
                return *provider;
            }
        }

        ProviderType::Proxy
    }

    /// Short identifier used in logs and error context.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Openai => "openai",
            ProviderType::Google => "google",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Proxy => "proxy",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a single LLM client instance.
///
/// The same structure configures every provider family. Provider selection
/// uses the explicit `provider` field when present, otherwise the model id
/// prefix decides.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmClientConfig {
    /// Vendor-specific model identifier, e.g. `gpt-4.1` or `claude-sonnet-4-0`.
    pub model: String,

    /// Explicit provider selection. Overrides model-prefix inference.
    #[serde(default)]
    pub provider: Option<ProviderType>,

    /// API key. Falls back to the provider's environment variable when absent.
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Base URL override for custom endpoints and proxies.
    #[serde(default)]
    pub api_base: Option<String>,

    /// Parameters forwarded to every call, e.g. `temperature`, `max_tokens`.
    #[serde(default)]
    pub default_params: BTreeMap<String, Value>,

    /// Model-pattern keyed parameter overrides. See [`ModelParameters`].
    #[serde(default)]
    pub model_parameters: ModelParameters,

    /// Model to fall back to when the primary model fails.
    #[serde(default)]
    pub fallback_model_id: Option<String>,

    /// Parameter overrides applied when calling the fallback model.
    #[serde(default)]
    pub fallback_model_parameters: ModelParameters,
}

impl LlmClientConfig {
    /// Create a minimal configuration for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: None,
            api_key: None,
            api_base: None,
            default_params: BTreeMap::new(),
            model_parameters: ModelParameters::default(),
            fallback_model_id: None,
            fallback_model_parameters: ModelParameters::default(),
        }
    }

    /// The provider this configuration resolves to.
    pub fn resolved_provider(&self) -> ProviderType {
        self.provider.unwrap_or_else(|| ProviderType::infer(&self.model))
    }
}
