//! LLM orchestration core.
//!
//! Mediates between chat services and heterogeneous LLM providers behind
//! one typed contract: a neutral message model, per-vendor wire translation
//! for unary and streaming calls, schema-validated structured output, a
//! retry/fallback policy, interaction recording/playback, and a bounded
//! in-memory buffer of recent requests for diagnostics.

mod attachment;
mod client;
mod debug;
mod error;
mod factory;
mod messages;
mod playback;
pub mod provider;
mod record;
mod request_buffer;
mod retry;
mod structured;
#[cfg(test)]
mod testing;

pub use attachment::{ToolAttachment, ToolResult, create_attachment_injection};
pub use client::{
    DEFAULT_STRUCTURED_RETRIES, EventStream, LlmClient, LlmOutput, StreamEvent, StructuredExt, ToolChoice,
};
pub use error::{LlmError, LlmResult};
pub use factory::{create_client, create_client_with_fallback};
pub use messages::{
    ContentPart, FileReference, FunctionCall, ImageUrl, Message, MessageContent, ProviderMetadata, ThoughtSignature,
    ToolArguments, ToolCall, ToolDefinition, message_from_json, message_to_json, messages_to_json,
};
pub use playback::PlaybackClient;
pub use record::RecordingClient;
pub use request_buffer::{
    DEFAULT_BUFFER_SIZE, RequestBuffer, RequestRecord, get_request_buffer, reset_request_buffer,
};
pub use retry::RetryingClient;
pub use structured::{StructuredResponse, StructuredSchema};
