//! Core agent loop implementation.
//!
//! One call to [`Agent::run_turn`] drives a single user prompt to a final
//! answer, alternating between asking the model and executing the tools
//! it requests. The conversation is only ever appended to.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::events::TurnObserver;
use crate::config::{Config, DEFAULT_MAX_ITERATIONS};
use crate::conversation::{Conversation, Message, ToolCall};
use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError, StreamChunk, TokenUsage};
use crate::tools::{ToolRegistry, ToolSchema};

/// Orchestrator settings.
#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    /// Maximum model calls per turn.
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl From<&Config> for AgentConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_iterations: config.max_iterations,
        }
    }
}

/// Where a turn currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingModel,
    ExecutingTools,
    Done,
}

/// How a turn ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed {
        answer: String,
        usage: TokenUsage,
        /// Model calls made during the turn.
        iterations: usize,
    },
    /// Cancelled from outside. Nothing past the last completed step was kept.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Model call failed: {0}")]
    ModelCall(#[from] LlmError),

    #[error("Max iterations ({limit}) reached without completion")]
    LoopLimitExceeded { limit: usize },
}

impl TurnError {
    /// The apology shown to the user in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            TurnError::ModelCall(e) => format!(
                "Sorry, I couldn't get an answer from the language model ({}). Please try again.",
                e
            ),
            TurnError::LoopLimitExceeded { limit } => format!(
                "Sorry, I couldn't finish this request within {} steps. Try narrowing the question or naming the exact hosts to check.",
                limit
            ),
        }
    }
}

/// The tool-calling agent.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    schemas: Vec<ToolSchema>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent. The registry must be fully populated.
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        let schemas = tools.describe_all();
        Self {
            llm,
            tools,
            schemas,
            config,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> AgentConfig {
        self.config
    }

    /// Run one turn: append `prompt` and loop until the model answers
    /// without requesting tools.
    ///
    /// Tool failures are fed back to the model as data. Only a failed
    /// model call or the iteration limit end the turn with an error; on
    /// the latter the apology is appended as the final assistant message.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        prompt: &str,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        conversation.push(Message::user(prompt));

        let mut state = TurnState::AwaitingModel;
        let mut iterations = 0;
        let mut usage = TokenUsage::default();
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut answer = String::new();

        loop {
            match state {
                TurnState::AwaitingModel => {
                    if iterations >= self.config.max_iterations {
                        let error = TurnError::LoopLimitExceeded {
                            limit: self.config.max_iterations,
                        };
                        tracing::warn!(limit = self.config.max_iterations, "turn hit the iteration limit");
                        conversation.push(Message::assistant(error.user_message()));
                        observer.on_turn_failed(&error);
                        return Err(error);
                    }
                    iterations += 1;

                    tracing::debug!(
                        iteration = iterations,
                        messages = conversation.len(),
                        tools = self.schemas.len(),
                        "Agent iteration {}",
                        iterations
                    );

                    let response = match self.call_model(conversation, observer, cancel).await {
                        Ok(Some(response)) if !cancel.is_cancelled() => response,
                        Ok(_) => return Ok(self.cancelled()),
                        Err(e) => return Err(self.fail(TurnError::ModelCall(e), observer)),
                    };

                    if let Some(reported) = &response.usage {
                        usage = usage.add(reported);
                    }

                    if response.has_tool_calls() {
                        if response.tool_calls.len() > 1 {
                            tracing::debug!(
                                count = response.tool_calls.len(),
                                "model requested several tool calls; running them in order"
                            );
                        }
                        pending = response.tool_calls.clone();
                        conversation.push(response.into_message());
                        state = TurnState::ExecutingTools;
                    } else {
                        match response.content.filter(|c| !c.is_empty()) {
                            Some(content) => {
                                conversation.push(Message::assistant(content.clone()));
                                observer.on_turn_complete(&content);
                                answer = content;
                                state = TurnState::Done;
                            }
                            None => {
                                let error = TurnError::ModelCall(LlmError::MalformedResponse(
                                    "LLM returned empty response".to_string(),
                                ));
                                return Err(self.fail(error, observer));
                            }
                        }
                    }
                }
                TurnState::ExecutingTools => {
                    for call in std::mem::take(&mut pending) {
                        if cancel.is_cancelled() {
                            return Ok(self.cancelled());
                        }

                        tracing::info!(tool = %call.name, id = %call.id, "Calling tool");
                        observer.on_tool_call_started(&call);

                        let output = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(self.cancelled()),
                            output = self.tools.execute(&call.name, call.arguments.clone()) => output,
                        };

                        tracing::debug!(
                            tool = %call.name,
                            id = %call.id,
                            failed = output.is_failure(),
                            len = output.to_string_lossy().len(),
                            "tool finished"
                        );
                        conversation.push(Message::tool_result(&call, output.clone()));
                        observer.on_tool_call_finished(&call, &output);
                    }
                    state = TurnState::AwaitingModel;
                }
                TurnState::Done => {
                    return Ok(TurnOutcome::Completed {
                        answer,
                        usage,
                        iterations,
                    });
                }
            }
        }
    }

    /// Stream one model response, forwarding text as it arrives.
    ///
    /// Returns `Ok(None)` if cancelled first.
    async fn call_model(
        &self,
        conversation: &Conversation,
        observer: &dyn TurnObserver,
        cancel: &CancellationToken,
    ) -> Result<Option<ChatResponse>, LlmError> {
        let request = ChatRequest {
            messages: conversation.messages(),
            tools: &self.schemas,
            parallel_tool_calls: false,
        };

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            stream = self.llm.stream_chat(request) => stream?,
        };

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(StreamChunk::TextDelta(text))) => observer.on_model_text_delta(&text),
                Some(Ok(StreamChunk::Finished(response))) => return Ok(Some(response)),
                Some(Err(e)) => return Err(e),
                None => return Err(LlmError::StreamEnded),
            }
        }
    }

    fn fail(&self, error: TurnError, observer: &dyn TurnObserver) -> TurnError {
        tracing::error!(model = %self.llm.model(), "turn failed: {}", error);
        observer.on_turn_failed(&error);
        error
    }

    fn cancelled(&self) -> TurnOutcome {
        tracing::info!("turn cancelled");
        TurnOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::llm::ScriptedClient;
    use crate::tools::{ParamKind, ParamSpec, Tool, ToolArgs, ToolOutput};

    struct Lookup;

    #[async_trait]
    impl Tool for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }
        fn description(&self) -> &str {
            "Look something up"
        }
        fn parameters(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("key", ParamKind::String, "What to look up")]
        }
        async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::Text(format!("value of {}", args.str("key")?)))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Takes a while"
        }
        async fn execute(&self, _args: ToolArgs) -> anyhow::Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::Text("finally".to_string()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl TurnObserver for Recorder {
        fn on_model_text_delta(&self, text: &str) {
            self.push(format!("delta:{}", text));
        }
        fn on_tool_call_started(&self, call: &ToolCall) {
            self.push(format!("start:{}", call.id));
        }
        fn on_tool_call_finished(&self, call: &ToolCall, _output: &ToolOutput) {
            self.push(format!("finish:{}", call.id));
        }
        fn on_turn_complete(&self, answer: &str) {
            self.push(format!("complete:{}", answer));
        }
        fn on_turn_failed(&self, _error: &TurnError) {
            self.push("failed".to_string());
        }
    }

    fn agent(client: Arc<ScriptedClient>, max_iterations: usize) -> Agent {
        let mut registry = ToolRegistry::new();
        registry.register(Lookup).unwrap();
        registry.register(Slow).unwrap();
        Agent::new(client, Arc::new(registry), AgentConfig { max_iterations })
    }

    fn history() -> Conversation {
        Conversation::from_messages(vec![
            Message::system("You are a test."),
            Message::assistant("How can I help you?"),
        ])
    }

    #[tokio::test]
    async fn plain_answer_completes_in_one_call() {
        let client = Arc::new(ScriptedClient::new().text("All interfaces are up."));
        let agent = agent(client.clone(), 5);
        let recorder = Recorder::default();
        let mut conversation = history();

        let outcome = agent
            .run_turn(&mut conversation, "status?", &recorder, &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            TurnOutcome::Completed {
                answer, iterations, ..
            } => {
                assert_eq!(answer, "All interfaces are up.");
                assert_eq!(iterations, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(conversation.len(), 4);
        assert_eq!(client.call_count(), 1);

        let events = recorder.events();
        assert_eq!(events.first().map(String::as_str), Some("delta:All "));
        assert_eq!(
            events.last().map(String::as_str),
            Some("complete:All interfaces are up.")
        );
    }

    #[tokio::test]
    async fn tool_results_follow_call_order_and_history_only_grows() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(&[
                    ("call_a", "lookup", json!({"key": "first"})),
                    ("call_b", "lookup", json!({"key": "second"})),
                ])
                .text("Both looked up."),
        );
        let agent = agent(client.clone(), 5);
        let recorder = Recorder::default();
        let mut conversation = history();
        let before = conversation.messages().to_vec();

        agent
            .run_turn(&mut conversation, "look both up", &recorder, &CancellationToken::new())
            .await
            .unwrap();

        let messages = conversation.messages();
        assert_eq!(&messages[..before.len()], &before[..]);
        assert_eq!(messages.len(), before.len() + 5);

        let tool_ids: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Tool {
                    tool_call_id,
                    output,
                    ..
                } => Some((tool_call_id.as_str(), output.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            tool_ids,
            vec![
                ("call_a", ToolOutput::Text("value of first".to_string())),
                ("call_b", ToolOutput::Text("value of second".to_string())),
            ]
        );

        // The second model call saw the user message, the tool request and both results.
        assert_eq!(client.request_sizes(), vec![before.len() + 1, before.len() + 4]);

        let progress: Vec<_> = recorder
            .events()
            .into_iter()
            .filter(|e| e.starts_with("start") || e.starts_with("finish"))
            .collect();
        assert_eq!(
            progress,
            vec!["start:call_a", "finish:call_a", "start:call_b", "finish:call_b"]
        );
    }

    #[tokio::test]
    async fn answer_without_tool_calls_stops_the_loop() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(&[("call_a", "lookup", json!({"key": "x"}))])
                .text("Done.")
                .text("should never be requested"),
        );
        let agent = agent(client.clone(), 5);
        let mut conversation = history();

        agent
            .run_turn(&mut conversation, "go", &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(client.call_count(), 2);
        assert_eq!(conversation.last().and_then(Message::text), Some("Done."));
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_the_loop_limit() {
        let client = Arc::new(ScriptedClient::always_calling("lookup", json!({"key": "again"})));
        let agent = agent(client.clone(), 3);
        let recorder = Recorder::default();
        let mut conversation = history();

        let err = agent
            .run_turn(&mut conversation, "loop forever", &recorder, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::LoopLimitExceeded { limit: 3 }));
        assert_eq!(client.call_count(), 3);
        assert_eq!(
            conversation.last().and_then(Message::text),
            Some(err.user_message().as_str())
        );
        assert_eq!(recorder.events().last().map(String::as_str), Some("failed"));
    }

    #[tokio::test]
    async fn model_failure_appends_nothing_after_the_prompt() {
        let client = Arc::new(ScriptedClient::new().fail(LlmError::Api("overloaded".to_string())));
        let agent = agent(client, 5);
        let recorder = Recorder::default();
        let mut conversation = history();

        let err = agent
            .run_turn(&mut conversation, "hello", &recorder, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::ModelCall(LlmError::Api(_))));
        assert!(err.user_message().starts_with("Sorry"));
        assert_eq!(conversation.len(), 3);
        assert!(matches!(conversation.last(), Some(Message::User { .. })));
        assert_eq!(recorder.events(), vec!["failed"]);
    }

    #[tokio::test]
    async fn empty_model_response_is_a_model_failure() {
        let client = Arc::new(ScriptedClient::new().respond(ChatResponse::default()));
        let agent = agent(client, 5);
        let mut conversation = history();

        let err = agent
            .run_turn(&mut conversation, "hello", &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::ModelCall(LlmError::MalformedResponse(_))));
        assert_eq!(conversation.len(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back_as_data() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(&[("call_a", "teleport", Value::Null)])
                .text("That tool does not exist."),
        );
        let agent = agent(client, 5);
        let mut conversation = history();

        let outcome = agent
            .run_turn(&mut conversation, "teleport", &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        let failure = conversation.messages().iter().find_map(|m| match m {
            Message::Tool { output, .. } => Some(output.clone()),
            _ => None,
        });
        assert_eq!(
            failure,
            Some(ToolOutput::Failure("Unknown tool: teleport".to_string()))
        );
    }

    #[tokio::test]
    async fn cancelling_during_a_tool_discards_its_result() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(&[("call_a", "slow", json!({}))])
                .text("never delivered"),
        );
        let agent = agent(client.clone(), 5);
        let recorder = Recorder::default();
        let mut conversation = history();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            agent.run_turn(&mut conversation, "slow please", &recorder, &cancel),
        )
        .await
        .expect("cancellation should end the turn promptly")
        .unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        // User prompt and the tool request; no tool result.
        assert_eq!(conversation.len(), 4);
        assert!(matches!(conversation.last(), Some(Message::Assistant { .. })));
        assert_eq!(client.call_count(), 1);

        let events = recorder.events();
        assert_eq!(events.last().map(String::as_str), Some("start:call_a"));
        assert!(!events.iter().any(|e| e.starts_with("complete") || e.starts_with("finish")));
    }

    #[tokio::test]
    async fn cancelled_before_the_model_answers() {
        let client = Arc::new(ScriptedClient::new().text("too late"));
        let agent = agent(client, 5);
        let recorder = Recorder::default();
        let mut conversation = history();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = agent
            .run_turn(&mut conversation, "hi", &recorder, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(conversation.len(), 3);
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn usage_is_summed_across_model_calls() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(&[("call_a", "lookup", json!({"key": "k"}))])
                .text("ok"),
        );
        let agent = agent(client.clone(), 5);
        let mut conversation = history();

        let outcome = agent
            .run_turn(&mut conversation, "go", &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();

        let expected_prompt: u64 = client.request_sizes().iter().map(|&n| n as u64).sum();
        match outcome {
            TurnOutcome::Completed {
                usage, iterations, ..
            } => {
                assert_eq!(iterations, 2);
                assert_eq!(usage.prompt_tokens, expected_prompt);
                assert_eq!(usage.completion_tokens, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
