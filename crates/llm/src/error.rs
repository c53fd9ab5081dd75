use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Errors produced by LLM clients and the wrappers composed around them.
///
/// Every provider-originated variant carries the provider name and model id
/// so callers can tell which leg of a retry/fallback chain failed. Vendor
/// error bodies are carried as plain strings; vendor SDK types never cross
/// this boundary.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Credential rejected by the provider.
    #[error("[{provider}/{model}] authentication failed: {message}")]
    Authentication {
        provider: String,
        model: String,
        message: String,
    },

    /// Provider quota exhausted.
    #[error("[{provider}/{model}] rate limit exceeded: {message}")]
    RateLimit {
        provider: String,
        model: String,
        message: String,
    },

    /// The requested model id is unknown to the provider.
    #[error("[{provider}/{model}] model not found: {message}")]
    ModelNotFound {
        provider: String,
        model: String,
        message: String,
    },

    /// The input exceeds the model's context window.
    #[error("[{provider}/{model}] context length exceeded: {message}")]
    ContextLength {
        provider: String,
        model: String,
        message: String,
    },

    /// Malformed request, including empty user input caught before the
    /// vendor call.
    #[error("[{provider}/{model}] invalid request: {message}")]
    InvalidRequest {
        provider: String,
        model: String,
        message: String,
    },

    /// Transport-level failure reaching the provider.
    #[error("[{provider}/{model}] connection error: {message}")]
    ProviderConnection {
        provider: String,
        model: String,
        message: String,
    },

    /// The vendor call timed out.
    #[error("[{provider}/{model}] request timed out: {message}")]
    ProviderTimeout {
        provider: String,
        model: String,
        message: String,
    },

    /// Provider overloaded or returning 5xx.
    #[error("[{provider}/{model}] service unavailable: {message}")]
    ServiceUnavailable {
        provider: String,
        model: String,
        message: String,
    },

    /// The vendor returned neither content nor tool calls.
    #[error("[{provider}/{model}] received empty response from LLM")]
    EmptyResponse { provider: String, model: String },

    /// The structured-output validation loop exhausted its retries.
    #[error("[{provider}/{model}] structured output failed: {message}")]
    StructuredOutput {
        provider: String,
        model: String,
        message: String,
        /// The last raw model response, when one was received.
        raw_response: Option<String>,
        /// The last parse or validation error.
        validation_error: Option<String>,
    },

    /// No recorded interaction matched the playback input.
    #[error("playback miss: {message}")]
    PlaybackMiss { message: String },

    /// Provider error that fits no other kind.
    #[error("[{provider}/{model}] provider error: {message}")]
    Provider {
        provider: String,
        model: String,
        message: String,
    },

    /// Internal failure (serialization, file I/O) unrelated to the vendor.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LlmError {
    /// Whether the retry/fallback wrapper may retry the primary model after
    /// this error.
    ///
    /// `InvalidRequest` is retriable by explicit policy: some providers
    /// return transient 400s, and the cost of one extra attempt is low. See
    /// `retry::RETRY_INVALID_REQUEST`.
    pub fn is_retriable(&self) -> bool {
        match self {
            LlmError::RateLimit { .. }
            | LlmError::ProviderConnection { .. }
            | LlmError::ProviderTimeout { .. }
            | LlmError::ServiceUnavailable { .. }
            | LlmError::EmptyResponse { .. } => true,
            LlmError::InvalidRequest { .. } => crate::retry::RETRY_INVALID_REQUEST,
            _ => false,
        }
    }

    /// Stable identifier for this error kind, used in stream error events.
    pub fn error_type(&self) -> &'static str {
        match self {
            LlmError::Authentication { .. } => "authentication",
            LlmError::RateLimit { .. } => "rate_limit",
            LlmError::ModelNotFound { .. } => "model_not_found",
            LlmError::ContextLength { .. } => "context_length",
            LlmError::InvalidRequest { .. } => "invalid_request",
            LlmError::ProviderConnection { .. } => "connection",
            LlmError::ProviderTimeout { .. } => "timeout",
            LlmError::ServiceUnavailable { .. } => "service_unavailable",
            LlmError::EmptyResponse { .. } => "empty_response",
            LlmError::StructuredOutput { .. } => "structured_output",
            LlmError::PlaybackMiss { .. } => "playback_miss",
            LlmError::Provider { .. } => "provider",
            LlmError::Internal(_) => "internal",
        }
    }

    /// Rebuild a typed error from a stream error event's `error_type` slug.
    ///
    /// Streams carry failures as events rather than results, so the retry
    /// wrapper uses this to recover the error class when deciding whether a
    /// zero-progress stream attempt may be retried.
    pub(crate) fn from_stream_error(
        provider: &str,
        model: &str,
        message: String,
        error_type: Option<&str>,
    ) -> LlmError {
        let provider = provider.to_string();
        let model = model.to_string();

        match error_type {
            Some("authentication") => LlmError::Authentication {
                provider,
                model,
                message,
            },
            Some("rate_limit") => LlmError::RateLimit {
                provider,
                model,
                message,
            },
            Some("model_not_found") => LlmError::ModelNotFound {
                provider,
                model,
                message,
            },
            Some("context_length") => LlmError::ContextLength {
                provider,
                model,
                message,
            },
            Some("invalid_request") => LlmError::InvalidRequest {
                provider,
                model,
                message,
            },
            Some("connection") => LlmError::ProviderConnection {
                provider,
                model,
                message,
            },
            Some("timeout") => LlmError::ProviderTimeout {
                provider,
                model,
                message,
            },
            Some("service_unavailable") => LlmError::ServiceUnavailable {
                provider,
                model,
                message,
            },
            Some("empty_response") => LlmError::EmptyResponse { provider, model },
            _ => LlmError::Provider {
                provider,
                model,
                message,
            },
        }
    }
}
