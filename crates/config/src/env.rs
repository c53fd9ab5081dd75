//! Environment variable lookups for credentials and debug flags.

use secrecy::SecretString;

use crate::llm::ProviderType;

/// Environment variable holding the OpenAI API key.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Environment variable holding the Google Gemini API key.
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
/// Environment variable holding the Anthropic API key.
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

/// Read the API key for a provider from its environment variable.
///
/// The proxy has no well-known credential variable; keys for it must come
/// from configuration.
pub fn api_key_from_env(provider: ProviderType) -> Option<SecretString> {
    let var = match provider {
        ProviderType::Openai => ENV_OPENAI_API_KEY,
        ProviderType::Google => ENV_GEMINI_API_KEY,
        ProviderType::Anthropic => ENV_ANTHROPIC_API_KEY,
        ProviderType::Proxy => return None,
    };

    std::env::var(var).ok().map(SecretString::from)
}

/// Boolean-ish environment flag: `true`, `1` and `yes` enable it.
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_accepts_boolean_ish_values() {
        // Process-global environment, use a name no other test touches.
        unsafe { std::env::set_var("HEARTH_TEST_FLAG", "YES") };
        assert!(env_flag("HEARTH_TEST_FLAG"));

        unsafe { std::env::set_var("HEARTH_TEST_FLAG", "0") };
        assert!(!env_flag("HEARTH_TEST_FLAG"));

        unsafe { std::env::remove_var("HEARTH_TEST_FLAG") };
        assert!(!env_flag("HEARTH_TEST_FLAG"));
    }
}
