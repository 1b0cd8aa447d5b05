//! A deterministic [`LlmClient`] that replays canned responses.
//!
//! Used by the orchestrator tests and handy for offline demos. Each call
//! to [`LlmClient::stream_chat`] pops the next scripted step; text is
//! streamed word by word before the final message.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{ChatRequest, ChatResponse, ChatStream, LlmClient, LlmError, StreamChunk, TokenUsage};
use crate::conversation::ToolCall;

enum Step {
    Respond(ChatResponse),
    Fail(LlmError),
}

/// What the client does once the script runs out.
enum Fallback {
    Answer(String),
    /// Request the same tool on every call. Used to exercise the loop limit.
    CallTool { name: String, arguments: Value },
}

pub struct ScriptedClient {
    script: Mutex<VecDeque<Step>>,
    fallback: Fallback,
    requests: Mutex<Vec<usize>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Fallback::Answer("done".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A client that asks for `name` forever.
    pub fn always_calling(name: &str, arguments: Value) -> Self {
        Self {
            fallback: Fallback::CallTool {
                name: name.to_string(),
                arguments,
            },
            ..Self::new()
        }
    }

    /// Queue a plain text answer.
    pub fn text(self, content: &str) -> Self {
        self.respond(ChatResponse {
            content: Some(content.to_string()),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        })
    }

    /// Queue an assistant message requesting `calls` as `(id, name, arguments)`.
    pub fn tool_calls(self, calls: &[(&str, &str, Value)]) -> Self {
        let tool_calls = calls
            .iter()
            .map(|(id, name, arguments)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.clone(),
            })
            .collect();
        self.respond(ChatResponse {
            tool_calls,
            finish_reason: Some("tool_calls".to_string()),
            ..Default::default()
        })
    }

    pub fn respond(self, response: ChatResponse) -> Self {
        self.push(Step::Respond(response))
    }

    /// Queue a failed model call.
    pub fn fail(self, error: LlmError) -> Self {
        self.push(Step::Fail(error))
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Conversation length seen by each call, in order.
    pub fn request_sizes(&self) -> Vec<usize> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_step(&self) -> Step {
        let queued = self.script.lock().ok().and_then(|mut s| s.pop_front());
        queued.unwrap_or_else(|| match &self.fallback {
            Fallback::Answer(content) => Step::Respond(ChatResponse {
                content: Some(content.clone()),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            }),
            Fallback::CallTool { name, arguments } => Step::Respond(ChatResponse {
                tool_calls: vec![ToolCall {
                    id: format!("call_{}", self.call_count()),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }],
                finish_reason: Some("tool_calls".to_string()),
                ..Default::default()
            }),
        })
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: ChatRequest<'_>) -> Result<ChatStream, LlmError> {
        let step = self.next_step();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.messages.len());
        }

        let mut response = match step {
            Step::Respond(response) => response,
            Step::Fail(error) => return Err(error),
        };
        response.usage.get_or_insert(TokenUsage {
            prompt_tokens: request.messages.len() as u64,
            completion_tokens: 1,
            total_tokens: request.messages.len() as u64 + 1,
        });

        let mut chunks: Vec<Result<StreamChunk, LlmError>> = response
            .content
            .as_deref()
            .map(word_deltas)
            .unwrap_or_default()
            .into_iter()
            .map(|delta| Ok(StreamChunk::TextDelta(delta)))
            .collect();
        chunks.push(Ok(StreamChunk::Finished(response)));

        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Split text into deltas that concatenate back to the input.
fn word_deltas(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn request() -> ChatRequest<'static> {
        ChatRequest {
            messages: &[],
            tools: &[],
            parallel_tool_calls: false,
        }
    }

    #[tokio::test]
    async fn replays_script_then_falls_back() {
        let client = ScriptedClient::new()
            .tool_calls(&[("a", "get_public_ip", json!({}))])
            .text("two words");

        let first: Vec<_> = client.stream_chat(request()).await.unwrap().collect().await;
        match first.last() {
            Some(Ok(StreamChunk::Finished(r))) => assert_eq!(r.tool_calls[0].id, "a"),
            other => panic!("unexpected: {:?}", other),
        }

        let second: Vec<_> = client.stream_chat(request()).await.unwrap().collect().await;
        assert_eq!(
            second[..2]
                .iter()
                .map(|c| match c {
                    Ok(StreamChunk::TextDelta(t)) => t.as_str(),
                    _ => "",
                })
                .collect::<String>(),
            "two words"
        );

        let third: Vec<_> = client.stream_chat(request()).await.unwrap().collect().await;
        assert!(matches!(
            third.last(),
            Some(Ok(StreamChunk::Finished(r))) if r.content.as_deref() == Some("done")
        ));
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn scripted_failure_is_returned() {
        let client = ScriptedClient::new().fail(LlmError::StreamEnded);
        assert!(matches!(
            client.stream_chat(request()).await,
            Err(LlmError::StreamEnded)
        ));
    }

    #[test]
    fn word_deltas_rejoin() {
        assert_eq!(word_deltas("ping ok now").concat(), "ping ok now");
    }
}
