//! Optional pretty-printing of outgoing requests, gated by
//! `DEBUG_LLM_MESSAGES`.

use std::sync::LazyLock;

use serde_json::Value;

use crate::client::ToolChoice;
use crate::messages::ToolDefinition;

static ENABLED: LazyLock<bool> = LazyLock::new(|| {
    let enabled = config::env_flag("DEBUG_LLM_MESSAGES");
    if enabled {
        log::info!("Debug LLM messages logging is enabled (DEBUG_LLM_MESSAGES is set).");
    }
    enabled
});

const MAX_CONTENT_PREVIEW: usize = 500;

/// Log the full request at info level when `DEBUG_LLM_MESSAGES` is set.
pub(crate) fn log_request(model: &str, messages: &[Value], tools: Option<&[ToolDefinition]>, tool_choice: &ToolChoice) {
    if !*ENABLED {
        return;
    }

    let mut lines = Vec::with_capacity(messages.len() + 2);

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("?");
        let content = message
            .get("content")
            .map(format_content)
            .unwrap_or_else(|| "<no content>".to_string());

        let mut line = format!("  [{role}] {content}");

        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            let names: Vec<&str> = calls
                .iter()
                .filter_map(|call| call.pointer("/function/name").and_then(Value::as_str))
                .collect();
            line.push_str(&format!(" (tool_calls: {})", names.join(", ")));
        }

        lines.push(line);
    }

    if let Some(tools) = tools {
        let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
        lines.push(format!("  tools: [{}]", names.join(", ")));
    }
    lines.push(format!("  tool_choice: {}", tool_choice.as_str()));

    log::info!("LLM Request to {model}:\n{}", lines.join("\n"));
}

fn format_content(content: &Value) -> String {
    match content {
        Value::String(text) => truncate(text),
        Value::Array(parts) => {
            let rendered: Vec<String> = parts
                .iter()
                .map(|part| {
                    let kind = part.get("type").and_then(Value::as_str).unwrap_or("?");
                    match part.get("text").and_then(Value::as_str) {
                        Some(text) => format!("{kind}:{}", truncate(text)),
                        None => kind.to_string(),
                    }
                })
                .collect();
            format!("[{}]", rendered.join(", "))
        }
        other => truncate(&other.to_string()),
    }
}

/// Shorten long content for logs; summarize `data:` URIs instead of dumping
/// base64.
fn truncate(content: &str) -> String {
    if content.len() <= MAX_CONTENT_PREVIEW {
        return content.to_string();
    }

    if content.starts_with("data:") && content.contains(";base64,") {
        let media_type = content
            .strip_prefix("data:")
            .and_then(|rest| rest.split(';').next())
            .unwrap_or("unknown");
        return format!("<data URI: {media_type}, {} bytes>", content.len());
    }

    let cut = content
        .char_indices()
        .take_while(|(index, _)| *index < MAX_CONTENT_PREVIEW)
        .last()
        .map(|(index, character)| index + character.len_utf8())
        .unwrap_or(0);

    format!("{}... ({} chars total)", &content[..cut], content.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_passes_through() {
        assert_eq!(truncate("hello"), "hello");
    }

    #[test]
    fn long_content_is_truncated_with_length() {
        let long = "x".repeat(600);
        let preview = truncate(&long);
        assert!(preview.len() < long.len());
        assert!(preview.contains("600 chars total"));
    }

    #[test]
    fn data_uris_are_summarized() {
        let uri = format!("data:image/png;base64,{}", "A".repeat(600));
        let preview = truncate(&uri);
        assert!(preview.contains("image/png"));
        assert!(!preview.contains("AAAA"));
    }
}
