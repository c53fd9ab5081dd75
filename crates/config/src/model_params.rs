//! Model-pattern keyed parameter overrides.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// Per-model parameter overrides keyed by a model-name pattern.
///
/// A pattern either matches the model id exactly, or, when it ends in `-`,
/// matches any model id starting with that prefix. The first matching pattern
/// wins; its parameters override the defaults for that call.
///
/// The `reasoning` subkey is special: it is hoisted out of the merged map and
/// only honored by the proxy client. Native providers drop it.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(transparent)]
pub struct ModelParameters(IndexMap<String, BTreeMap<String, Value>>);

/// Result of merging defaults with the first matching pattern's overrides.
#[derive(Debug, Default)]
pub struct MergedParams {
    /// Call parameters, defaults overridden by pattern parameters.
    pub params: BTreeMap<String, Value>,
    /// Hoisted `reasoning` configuration, when the matched pattern had one.
    pub reasoning: Option<Value>,
}

impl ModelParameters {
    /// Create parameter overrides from an ordered pattern map.
    pub fn new(patterns: IndexMap<String, BTreeMap<String, Value>>) -> Self {
        Self(patterns)
    }

    /// True when no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge the defaults with the first pattern matching `model_id`.
    pub fn merge_for_model(&self, model_id: &str, defaults: &BTreeMap<String, Value>) -> MergedParams {
        let mut merged = MergedParams {
            params: defaults.clone(),
            reasoning: None,
        };

        for (pattern, params) in &self.0 {
            if !pattern_matches(pattern, model_id) {
                continue;
            }

            log::debug!("Applying parameters for model '{model_id}' using pattern '{pattern}'");

            for (key, value) in params {
                if key == "reasoning" {
                    merged.reasoning = Some(value.clone());
                    continue;
                }

                merged.params.insert(key.clone(), value.clone());
            }

            break;
        }

        merged
    }
}

fn pattern_matches(pattern: &str, model_id: &str) -> bool {
    match pattern.strip_suffix('-') {
        Some(prefix) => model_id.starts_with(prefix),
        None => model_id == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn exact_pattern_overrides_defaults() {
        let mut patterns = IndexMap::new();
        patterns.insert("gpt-4.1".to_string(), params(&[("temperature", json!(0.0))]));

        let model_params = ModelParameters::new(patterns);
        let defaults = params(&[("temperature", json!(0.7)), ("max_tokens", json!(1024))]);

        let merged = model_params.merge_for_model("gpt-4.1", &defaults);

        assert_eq!(merged.params["temperature"], json!(0.0));
        assert_eq!(merged.params["max_tokens"], json!(1024));
        assert!(merged.reasoning.is_none());
    }

    #[test]
    fn trailing_dash_matches_prefix() {
        let mut patterns = IndexMap::new();
        patterns.insert("gemini-".to_string(), params(&[("top_k", json!(40))]));

        let model_params = ModelParameters::new(patterns);
        let merged = model_params.merge_for_model("gemini-2.0-flash", &BTreeMap::new());

        assert_eq!(merged.params["top_k"], json!(40));
    }

    #[test]
    fn non_matching_pattern_leaves_defaults() {
        let mut patterns = IndexMap::new();
        patterns.insert("claude-".to_string(), params(&[("max_tokens", json!(2048))]));

        let model_params = ModelParameters::new(patterns);
        let defaults = params(&[("temperature", json!(0.5))]);
        let merged = model_params.merge_for_model("gpt-4.1", &defaults);

        assert_eq!(merged.params, defaults);
    }

    #[test]
    fn reasoning_subkey_is_hoisted() {
        let mut patterns = IndexMap::new();
        patterns.insert(
            "openrouter/".to_string(),
            params(&[("reasoning", json!({"effort": "high"}))]),
        );
        patterns.insert(
            "openrouter/deepseek/deepseek-r1".to_string(),
            params(&[("temperature", json!(0.6))]),
        );

        let model_params = ModelParameters::new(patterns);

        // `openrouter/` has no trailing dash, so only the exact pattern matches.
        let merged = model_params.merge_for_model("openrouter/deepseek/deepseek-r1", &BTreeMap::new());
        assert!(merged.reasoning.is_none());
        assert_eq!(merged.params["temperature"], json!(0.6));

        let mut patterns = IndexMap::new();
        patterns.insert(
            "openrouter/deepseek-".to_string(),
            params(&[("reasoning", json!({"effort": "high"})), ("temperature", json!(0.6))]),
        );

        let model_params = ModelParameters::new(patterns);
        let merged = model_params.merge_for_model("openrouter/deepseek-r1", &BTreeMap::new());

        assert_eq!(merged.reasoning, Some(json!({"effort": "high"})));
        assert!(!merged.params.contains_key("reasoning"));
        assert_eq!(merged.params["temperature"], json!(0.6));
    }

    #[test]
    fn first_matching_pattern_wins() {
        let mut patterns = IndexMap::new();
        patterns.insert("gpt-".to_string(), params(&[("temperature", json!(0.1))]));
        patterns.insert("gpt-4.1".to_string(), params(&[("temperature", json!(0.9))]));

        let model_params = ModelParameters::new(patterns);
        let merged = model_params.merge_for_model("gpt-4.1", &BTreeMap::new());

        assert_eq!(merged.params["temperature"], json!(0.1));
    }
}
