//! Turn progress notifications.
//!
//! The orchestrator never renders anything itself. It reports progress
//! through a [`TurnObserver`], which the presentation layer implements
//! directly or via [`ChannelObserver`] to receive [`AgentEvent`]s on a
//! channel.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::agent_loop::TurnError;
use crate::conversation::ToolCall;
use crate::tools::ToolOutput;

/// Callbacks fired while a turn runs. All methods default to no-ops.
pub trait TurnObserver: Send + Sync {
    /// A piece of model text arrived.
    fn on_model_text_delta(&self, _text: &str) {}

    /// A tool is about to run.
    fn on_tool_call_started(&self, _call: &ToolCall) {}

    /// A tool finished (successfully or not).
    fn on_tool_call_finished(&self, _call: &ToolCall, _output: &ToolOutput) {}

    /// The turn produced its final answer.
    fn on_turn_complete(&self, _answer: &str) {}

    /// The turn failed; `error.user_message()` is the text to show.
    fn on_turn_failed(&self, _error: &TurnError) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

/// Turn progress as data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Text content being streamed.
    TextDelta { content: String },
    /// Agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        result: ToolOutput,
    },
    /// Turn finished with a final answer.
    TurnComplete { answer: String },
    /// Turn failed.
    Error { message: String },
}

/// Forwards every notification as an [`AgentEvent`] on an unbounded channel.
///
/// Sends after the receiver is dropped are ignored.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }
}

impl TurnObserver for ChannelObserver {
    fn on_model_text_delta(&self, text: &str) {
        self.send(AgentEvent::TextDelta {
            content: text.to_string(),
        });
    }

    fn on_tool_call_started(&self, call: &ToolCall) {
        self.send(AgentEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args: call.arguments.clone(),
        });
    }

    fn on_tool_call_finished(&self, call: &ToolCall, output: &ToolOutput) {
        self.send(AgentEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            result: output.clone(),
        });
    }

    fn on_turn_complete(&self, answer: &str) {
        self.send(AgentEvent::TurnComplete {
            answer: answer.to_string(),
        });
    }

    fn on_turn_failed(&self, error: &TurnError) {
        self.send(AgentEvent::Error {
            message: error.user_message(),
        });
    }
}
