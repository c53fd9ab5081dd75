//! Scripted fake client for exercising wrappers without a vendor.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;

use crate::client::{EventStream, LlmClient, LlmOutput, StreamEvent, ToolChoice};
use crate::error::{LlmError, LlmResult};
use crate::messages::{Message, ToolDefinition};

/// An [`LlmClient`] that replays scripted outcomes in order.
///
/// Unary calls pop from the unary script, stream calls from the stream
/// script. Running off the end of a script is a test bug and reported as an
/// internal error.
pub(crate) struct ScriptedClient {
    model: String,
    provider: String,
    multimodal: bool,
    unary: Mutex<VecDeque<LlmResult<LlmOutput>>>,
    streams: Mutex<VecDeque<LlmResult<Vec<StreamEvent>>>>,
    unary_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl ScriptedClient {
    pub(crate) fn new(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
            multimodal: false,
            unary: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            unary_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_unary(self, outcome: LlmResult<LlmOutput>) -> Self {
        if let Ok(mut script) = self.unary.lock() {
            script.push_back(outcome);
        }
        self
    }

    pub(crate) fn with_stream(self, outcome: LlmResult<Vec<StreamEvent>>) -> Self {
        if let Ok(mut script) = self.streams.lock() {
            script.push_back(outcome);
        }
        self
    }

    pub(crate) fn unary_calls(&self) -> usize {
        self.unary_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    fn exhausted(&self) -> LlmError {
        LlmError::Internal(format!("scripted client '{}' ran out of scripted outcomes", self.model))
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn supports_multimodal_tools(&self) -> bool {
        self.multimodal
    }

    async fn generate_response(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        _tool_choice: ToolChoice,
    ) -> LlmResult<LlmOutput> {
        self.unary_calls.fetch_add(1, Ordering::SeqCst);
        let Ok(mut script) = self.unary.lock() else {
            return Err(self.exhausted());
        };
        script.pop_front().unwrap_or_else(|| Err(self.exhausted()))
    }

    async fn generate_response_stream(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        _tool_choice: ToolChoice,
    ) -> LlmResult<EventStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let Ok(mut script) = self.streams.lock() else {
                return Err(self.exhausted());
            };
            script.pop_front().unwrap_or_else(|| Err(self.exhausted()))
        };

        let events = outcome?;
        Ok(futures::stream::iter(events).boxed())
    }

    async fn format_user_message_with_file(
        &self,
        prompt_text: Option<&str>,
        _file_path: Option<&Path>,
        _mime_type: Option<&str>,
        _max_text_length: Option<usize>,
    ) -> LlmResult<Message> {
        Ok(Message::user(prompt_text.unwrap_or("Process the provided file.")))
    }
}
