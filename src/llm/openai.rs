//! OpenAI Chat Completions client (streamed over SSE).
//!
//! Works with any OpenAI-compatible endpoint. Tool-call fragments are
//! reassembled by index; text fragments are forwarded as they arrive.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{ChatRequest, ChatResponse, ChatStream, LlmClient, LlmError, StreamChunk, TokenUsage};
use crate::config::Config;
use crate::conversation::{Message, ToolCall};

const CANCELLED_TOOL_RESULT: &str = "Error: this tool call was cancelled before it completed.";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest silence tolerated between two stream events.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible streaming chat client.
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    idle_timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str, model: &str, temperature: f32) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.api_key,
            &config.base_url,
            &config.model,
            config.temperature,
        )
    }

    fn build_request_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": wire_messages(request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["parallel_tool_calls"] = Value::Bool(request.parallel_tool_calls);
        }

        body
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: ChatRequest<'_>) -> Result<ChatStream, LlmError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(model = %self.model, url = %url, messages = request.messages.len(), "calling chat completions");

        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);
        let mut source =
            EventSource::new(builder).map_err(|e| LlmError::Transport(e.to_string()))?;
        // A failed turn is retried by the caller, never by the transport.
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let idle_timeout = self.idle_timeout;
        let stream = async_stream::stream! {
            let mut acc = StreamAccumulator::default();
            let mut done = false;
            loop {
                let event = match tokio::time::timeout(idle_timeout, source.next()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => {
                        source.close();
                        tracing::error!(idle_secs = idle_timeout.as_secs(), "model stream stalled");
                        yield Err(LlmError::Transport(format!(
                            "SSE stream timeout after {}s",
                            idle_timeout.as_secs()
                        )));
                        return;
                    }
                };
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => {
                        if message.data.trim() == "[DONE]" {
                            done = true;
                            break;
                        }
                        match parse_chunk(&message.data) {
                            Ok(chunk) => {
                                if let Some(text) = acc.apply(chunk) {
                                    yield Ok(StreamChunk::TextDelta(text));
                                }
                            }
                            Err(e) => {
                                source.close();
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        source.close();
                        yield Err(map_sse_error(e).await);
                        return;
                    }
                }
            }
            source.close();

            // Without `[DONE]` or a finish reason the response may be cut off.
            if !done && acc.finish_reason.is_none() {
                tracing::error!("model stream closed before the response completed");
                yield Err(LlmError::StreamEnded);
                return;
            }
            yield Ok(StreamChunk::Finished(acc.finish()));
        };

        Ok(Box::pin(stream))
    }
}

/// Serialize the conversation into Chat Completions messages.
///
/// Assistant tool calls that never received a result (the turn was
/// cancelled mid-execution) get a synthetic result so the provider always
/// sees a well-formed history.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    let mut unanswered: Vec<&ToolCall> = Vec::new();

    for message in messages {
        if let Message::Tool {
            tool_call_id,
            output,
            ..
        } = message
        {
            unanswered.retain(|call| &call.id != tool_call_id);
            out.push(json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": output.to_string_lossy(),
            }));
            continue;
        }

        flush_unanswered(&mut unanswered, &mut out);

        match message {
            Message::System { content } => out.push(json!({ "role": "system", "content": content })),
            Message::User { content } => out.push(json!({ "role": "user", "content": content })),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut wire = json!({ "role": "assistant", "content": content });
                if !tool_calls.is_empty() {
                    wire["tool_calls"] = tool_calls.iter().map(wire_tool_call).collect();
                    unanswered = tool_calls.iter().collect();
                } else if content.is_none() {
                    wire["content"] = Value::String(String::new());
                }
                out.push(wire);
            }
            Message::Tool { .. } => {}
        }
    }

    flush_unanswered(&mut unanswered, &mut out);
    out
}

fn flush_unanswered(unanswered: &mut Vec<&ToolCall>, out: &mut Vec<Value>) {
    for call in unanswered.drain(..) {
        out.push(json!({
            "role": "tool",
            "tool_call_id": call.id,
            "content": CANCELLED_TOOL_RESULT,
        }));
    }
}

fn wire_tool_call(call: &ToolCall) -> Value {
    let arguments = match &call.arguments {
        // Unparseable arguments are kept verbatim.
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": arguments,
        }
    })
}

async fn map_sse_error(error: reqwest_eventsource::Error) -> LlmError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "chat completions request rejected");
            LlmError::Status {
                status: status.as_u16(),
                body,
            }
        }
        reqwest_eventsource::Error::InvalidContentType(content_type, response) => {
            let body = response.text().await.unwrap_or_default();
            LlmError::MalformedResponse(format!(
                "expected an event stream, got {:?}: {}",
                content_type, body
            ))
        }
        reqwest_eventsource::Error::Transport(e) => LlmError::Transport(e.to_string()),
        other => LlmError::MalformedResponse(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn parse_chunk(data: &str) -> Result<ChatCompletionChunk, LlmError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| LlmError::MalformedResponse(format!("{}: {}", e, data)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming");
        return Err(LlmError::Api(message.to_string()));
    }

    serde_json::from_value(value).map_err(|e| LlmError::MalformedResponse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Accumulation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl StreamAccumulator {
    /// Fold one chunk in, returning any new visible text.
    fn apply(&mut self, chunk: ChatCompletionChunk) -> Option<String> {
        if let Some(usage) = chunk.usage {
            self.usage = Some(TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content {
                    text.push_str(&content);
                }
                for fragment in delta.tool_calls.unwrap_or_default() {
                    let entry = self.tool_calls.entry(fragment.index).or_default();
                    if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                        entry.id = id;
                    }
                    if let Some(function) = fragment.function {
                        if let Some(name) = function.name {
                            entry.name.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            entry.arguments.push_str(&arguments);
                        }
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }

        if text.is_empty() {
            None
        } else {
            self.content.push_str(&text);
            Some(text)
        }
    }

    fn finish(self) -> ChatResponse {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|(index, partial)| ToolCall {
                id: if partial.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    partial.id
                },
                name: partial.name,
                arguments: parse_arguments(&partial.arguments),
            })
            .collect();

        ChatResponse {
            content: (!self.content.is_empty()).then_some(self.content),
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
