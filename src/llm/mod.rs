//! Model boundary.
//!
//! The orchestrator only sees [`LlmClient`]: it hands over the conversation
//! and the tool catalogue and gets back a stream of [`StreamChunk`]s that
//! ends with exactly one [`StreamChunk::Finished`] carrying the assembled
//! assistant message.

mod openai;
pub mod scripted;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::conversation::{Message, ToolCall};
use crate::tools::ToolSchema;

pub use openai::OpenAiClient;
pub use scripted::ScriptedClient;

/// One model invocation.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSchema],
    /// Whether the model may request several tool calls in one message.
    pub parallel_tool_calls: bool,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// The assembled assistant message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn into_message(self) -> Message {
        Message::Assistant {
            content: self.content.filter(|c| !c.is_empty()),
            tool_calls: self.tool_calls,
        }
    }
}

/// Incremental output of a model call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A piece of visible assistant text.
    TextDelta(String),
    /// The final assembled message. Nothing follows it.
    Finished(ChatResponse),
}

pub type ChatStream = BoxStream<'static, Result<StreamChunk, LlmError>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Request to the model failed: {0}")]
    Transport(String),

    #[error("Model API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model API error: {0}")]
    Api(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Model stream ended before the response was complete")]
    StreamEnded,
}

/// A chat model that can call tools.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Start a streamed completion.
    async fn stream_chat(&self, request: ChatRequest<'_>) -> Result<ChatStream, LlmError>;
}
