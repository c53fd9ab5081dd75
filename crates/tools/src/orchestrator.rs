//! The model-calls-tools loop for one chat turn.

use std::sync::Arc;

use llm::{LlmClient, LlmError, Message, ToolChoice, ToolResult};
use serde_json::Value;
use thiserror::Error;

use crate::{ToolError, ToolExecutionContext, ToolProvider};

/// Safety limit for tool call loops.
const DEFAULT_MAX_ITERATIONS: usize = 5;

/// A turn that could not complete.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Tools(#[from] ToolError),
}

/// One tool execution performed during a turn.
#[derive(Debug, Clone)]
pub struct ExecutedTool {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: Value,
    pub response: String,
}

/// Result of a completed turn.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Final assistant text, when the model produced any.
    pub content: Option<String>,
    /// Every tool executed across all loop iterations, in order.
    pub executed_tools: Vec<ExecutedTool>,
    /// Usage metadata from the final LLM call.
    pub reasoning_info: Option<Value>,
}

/// Drives a turn: call the model, service its tool calls, loop.
///
/// Tool calls within one assistant message are serviced serially in the
/// order given; their result messages append in the same order. Parallel
/// execution would break providers with ordering expectations and tangle
/// user confirmation.
pub struct Orchestrator {
    client: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolProvider>,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn LlmClient>, tools: Arc<dyn ToolProvider>) -> Self {
        Self {
            client,
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Run the loop to completion.
    ///
    /// Tool failures are reported back to the model as `Error: …` tool
    /// results so it can react; only confirmation hand-off
    /// ([`ToolError::ConfirmationRequired`]) short-circuits the turn, since
    /// the chat interface must take over.
    pub async fn run_turn(
        &self,
        mut messages: Vec<Message>,
        context: &ToolExecutionContext,
    ) -> Result<TurnOutcome, TurnError> {
        let definitions = self.tools.get_tool_definitions().await?;
        let definitions = (!definitions.is_empty()).then_some(definitions);

        match &definitions {
            Some(definitions) => log::info!("Providing {} tools to LLM", definitions.len()),
            None => log::info!("No tools available from provider"),
        }

        let mut outcome = TurnOutcome::default();
        let mut iteration = 1;

        while iteration <= self.max_iterations {
            log::debug!("LLM interaction loop iteration {iteration}/{}", self.max_iterations);

            // The final permitted iteration forces a terminal text reply.
            let tool_choice = if definitions.is_some() && iteration < self.max_iterations {
                ToolChoice::Auto
            } else {
                ToolChoice::None
            };

            let output = self
                .client
                .generate_response(&messages, definitions.as_deref(), tool_choice)
                .await?;

            outcome.content = output
                .content
                .as_deref()
                .map(str::trim)
                .filter(|content| !content.is_empty())
                .map(str::to_string);
            outcome.reasoning_info = output.reasoning_info.clone();

            let Some(calls) = output.tool_calls.clone().filter(|calls| !calls.is_empty()) else {
                log::info!("LLM response received with no further tool calls");
                break;
            };

            log::info!("LLM requested {} tool call(s) in iteration {iteration}", calls.len());

            messages.push(Message::Assistant {
                content: output.content,
                tool_calls: Some(calls.clone()),
                provider_metadata: output.provider_metadata,
            });

            for call in calls {
                let name = call.function.name.clone();

                let (arguments, result) = match call.function.arguments.parse() {
                    Ok(arguments) => {
                        let result = self.execute_call(&name, arguments.clone(), context).await?;
                        (arguments, result)
                    }
                    Err(error) => {
                        log::error!("Failed to parse arguments for tool call {name}: {error}");
                        (
                            serde_json::json!({"error": "Failed to parse arguments"}),
                            ToolResult::from_text(format!("Error: Invalid arguments format for {name}.")),
                        )
                    }
                };

                outcome.executed_tools.push(ExecutedTool {
                    tool_call_id: call.id.clone(),
                    name: name.clone(),
                    arguments,
                    response: result.text.clone(),
                });

                messages.push(Message::tool_result(call.id, name, result));
            }

            iteration += 1;
        }

        if iteration > self.max_iterations {
            log::warn!("Reached maximum tool call iterations ({})", self.max_iterations);

            outcome.content = Some(match outcome.content.take() {
                Some(content) => format!("{content}\n\n(Note: Reached maximum processing depth.)"),
                None => "(Note: Reached maximum processing depth.)".to_string(),
            });
        }

        if outcome.content.is_none() {
            log::warn!("Final LLM response content was empty");
        }

        Ok(outcome)
    }

    /// Execute one tool call, folding recoverable failures into the result
    /// text the model sees.
    async fn execute_call(
        &self,
        name: &str,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> Result<ToolResult, TurnError> {
        match self.tools.execute_tool(name, arguments, context).await {
            Ok(result) => Ok(result),
            Err(error @ ToolError::ConfirmationRequired { .. }) => Err(error.into()),
            Err(error) => {
                log::error!("Tool execution failed: {error}");
                Ok(ToolResult::from_text(format!("Error: {error}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalProvider, Tool};
    use async_trait::async_trait;
    use llm::{EventStream, LlmOutput, LlmResult, ToolCall, ToolDefinition};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    /// Scripted client that records what each call received.
    struct ScriptedLlm {
        outputs: Mutex<VecDeque<LlmOutput>>,
        calls: Mutex<Vec<(Vec<Message>, ToolChoice)>>,
    }

    impl ScriptedLlm {
        fn new(outputs: Vec<LlmOutput>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call(&self, index: usize) -> (Vec<Message>, ToolChoice) {
            self.calls.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn model(&self) -> &str {
            "scripted"
        }

        fn provider_name(&self) -> &str {
            "test"
        }

        async fn generate_response(
            &self,
            messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            tool_choice: ToolChoice,
        ) -> LlmResult<LlmOutput> {
            self.calls.lock().unwrap().push((messages.to_vec(), tool_choice));
            Ok(self.outputs.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn generate_response_stream(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _tool_choice: ToolChoice,
        ) -> LlmResult<EventStream> {
            unimplemented!("not used by orchestrator tests")
        }

        async fn format_user_message_with_file(
            &self,
            prompt_text: Option<&str>,
            _file_path: Option<&Path>,
            _mime_type: Option<&str>,
            _max_text_length: Option<usize>,
        ) -> LlmResult<Message> {
            Ok(Message::user(prompt_text.unwrap_or_default()))
        }
    }

    struct AddNote;

    #[async_trait]
    impl Tool for AddNote {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                "add_or_update_note",
                "Create or update a note",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "content": {"type": "string"},
                    },
                    "required": ["title", "content"],
                }),
            )
        }

        async fn invoke(&self, _arguments: Value, _context: &ToolExecutionContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::from_text("OK. Note added."))
        }
    }

    fn note_tools() -> Arc<dyn ToolProvider> {
        let mut provider = LocalProvider::new();
        provider.register(Box::new(AddNote)).unwrap();
        Arc::new(provider)
    }

    fn tool_call_output(id: &str, name: &str, arguments: &str) -> LlmOutput {
        LlmOutput {
            content: None,
            tool_calls: Some(vec![ToolCall::function(id, name, arguments)]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn tool_call_loop_feeds_results_back_to_the_model() {
        let client = ScriptedLlm::new(vec![
            tool_call_output("c1", "add_or_update_note", r#"{"title":"t","content":"c"}"#),
            LlmOutput {
                content: Some("Done.".to_string()),
                ..Default::default()
            },
        ]);

        let orchestrator = Orchestrator::new(client.clone(), note_tools());
        let outcome = orchestrator
            .run_turn(
                vec![Message::system("sys"), Message::user("add note")],
                &ToolExecutionContext::new(1),
            )
            .await
            .unwrap();

        assert_eq!(outcome.content.as_deref(), Some("Done."));
        assert_eq!(outcome.executed_tools.len(), 1);
        assert_eq!(outcome.executed_tools[0].response, "OK. Note added.");
        assert_eq!(client.call_count(), 2);

        // The second call sees the assistant tool call and the tool result
        // stitched into the conversation.
        let (messages, _) = client.call(1);
        assert_eq!(messages.len(), 4);
        assert!(matches!(&messages[2], Message::Assistant { tool_calls: Some(calls), .. }
            if calls[0].id == "c1"));
        assert!(matches!(&messages[3], Message::Tool { tool_call_id, content, .. }
            if tool_call_id == "c1" && content.text() == "OK. Note added."));
    }

    #[tokio::test]
    async fn iteration_cap_forces_terminal_text_and_appends_note() {
        // The model asks for a tool on every call, including the forced
        // final one.
        let outputs = (0..5)
            .map(|i| tool_call_output(&format!("c{i}"), "add_or_update_note", r#"{"title":"t","content":"c"}"#))
            .collect();
        let client = ScriptedLlm::new(outputs);

        let orchestrator = Orchestrator::new(client.clone(), note_tools());
        let outcome = orchestrator
            .run_turn(vec![Message::user("loop")], &ToolExecutionContext::new(1))
            .await
            .unwrap();

        assert_eq!(client.call_count(), 5);
        assert_eq!(outcome.executed_tools.len(), 5);
        assert_eq!(
            outcome.content.as_deref(),
            Some("(Note: Reached maximum processing depth.)")
        );

        // Intermediate iterations allow tools, the final one forbids them.
        assert_eq!(client.call(0).1, ToolChoice::Auto);
        assert_eq!(client.call(3).1, ToolChoice::Auto);
        assert_eq!(client.call(4).1, ToolChoice::None);
    }

    #[tokio::test]
    async fn unknown_tools_are_reported_to_the_model_not_raised() {
        let client = ScriptedLlm::new(vec![
            tool_call_output("c1", "nonexistent_tool", "{}"),
            LlmOutput {
                content: Some("Understood.".to_string()),
                ..Default::default()
            },
        ]);

        let orchestrator = Orchestrator::new(client.clone(), note_tools());
        let outcome = orchestrator
            .run_turn(vec![Message::user("go")], &ToolExecutionContext::new(1))
            .await
            .unwrap();

        assert_eq!(outcome.content.as_deref(), Some("Understood."));

        let (messages, _) = client.call(1);
        assert!(matches!(&messages[2], Message::Tool { content, .. }
            if content.text().starts_with("Error: tool 'nonexistent_tool' not found")));
    }

    #[tokio::test]
    async fn malformed_arguments_produce_an_error_result() {
        let client = ScriptedLlm::new(vec![
            tool_call_output("c1", "add_or_update_note", "{not json"),
            LlmOutput {
                content: Some("Sorry.".to_string()),
                ..Default::default()
            },
        ]);

        let orchestrator = Orchestrator::new(client.clone(), note_tools());
        let outcome = orchestrator
            .run_turn(vec![Message::user("go")], &ToolExecutionContext::new(1))
            .await
            .unwrap();

        assert_eq!(outcome.executed_tools.len(), 1);
        assert!(
            outcome.executed_tools[0]
                .response
                .contains("Invalid arguments format for add_or_update_note")
        );
    }

    #[tokio::test]
    async fn confirmation_required_short_circuits_the_turn() {
        let client = ScriptedLlm::new(vec![tool_call_output(
            "c1",
            "add_or_update_note",
            r#"{"title":"t","content":"c"}"#,
        )]);

        let gated = crate::ConfirmingProvider::new(note_tools(), ["add_or_update_note".to_string()]);
        let orchestrator = Orchestrator::new(client, Arc::new(gated));

        // No confirmation callback in the context.
        let error = orchestrator
            .run_turn(vec![Message::user("add note")], &ToolExecutionContext::new(1))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            TurnError::Tools(ToolError::ConfirmationRequired { .. })
        ));
    }

    #[tokio::test]
    async fn declined_tools_are_reported_as_errors_to_the_model() {
        struct AlwaysNo;

        #[async_trait]
        impl crate::ConfirmationCallback for AlwaysNo {
            async fn confirm(&self, _prompt: &str, _tool_name: &str, _args: &Value) -> bool {
                false
            }
        }

        let client = ScriptedLlm::new(vec![
            tool_call_output("c1", "add_or_update_note", r#"{"title":"t","content":"c"}"#),
            LlmOutput {
                content: Some("Okay, I won't.".to_string()),
                ..Default::default()
            },
        ]);

        let gated = crate::ConfirmingProvider::new(note_tools(), ["add_or_update_note".to_string()]);
        let orchestrator = Orchestrator::new(client.clone(), Arc::new(gated));

        let context = ToolExecutionContext::new(1).with_confirmation(Arc::new(AlwaysNo));
        let outcome = orchestrator
            .run_turn(vec![Message::user("add note")], &context)
            .await
            .unwrap();

        assert_eq!(outcome.content.as_deref(), Some("Okay, I won't."));

        let (messages, _) = client.call(1);
        assert!(matches!(&messages[2], Message::Tool { content, .. }
            if content.text().contains("declined")));
    }
}
