//! A chat session: one conversation, one turn at a time.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::agent_loop::{Agent, TurnError, TurnOutcome};
use super::events::TurnObserver;
use super::prompt::initial_conversation;
use crate::conversation::{Conversation, Message};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A turn is already in progress for this session")]
    Busy,

    #[error(transparent)]
    Turn(#[from] TurnError),
}

/// Owns a conversation and serializes turns against it.
///
/// A prompt that arrives while a turn is running is rejected with
/// [`SessionError::Busy`] rather than queued.
pub struct ChatSession {
    id: Uuid,
    agent: Arc<Agent>,
    conversation: tokio::sync::Mutex<Conversation>,
    active_turn: Mutex<Option<CancellationToken>>,
}

impl ChatSession {
    /// New session seeded with the system prompt and greeting.
    pub fn new(agent: Arc<Agent>) -> Self {
        let conversation = initial_conversation(agent.tools());
        Self::with_conversation(agent, conversation)
    }

    pub fn with_conversation(agent: Arc<Agent>, conversation: Conversation) -> Self {
        let id = Uuid::new_v4();
        tracing::info!(session_id = %id, "session started");
        Self {
            id,
            agent,
            conversation: tokio::sync::Mutex::new(conversation),
            active_turn: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run one turn for `prompt`.
    pub async fn send(
        &self,
        prompt: &str,
        observer: &dyn TurnObserver,
    ) -> Result<TurnOutcome, SessionError> {
        let mut conversation = self.conversation.try_lock().map_err(|_| {
            tracing::warn!(session_id = %self.id, "rejected prompt while a turn is running");
            SessionError::Busy
        })?;

        let token = CancellationToken::new();
        let _active = ActiveTurn::register(self, token.clone());

        let outcome = self
            .agent
            .run_turn(&mut conversation, prompt, observer, &token)
            .instrument(tracing::info_span!("turn", session_id = %self.id))
            .await?;

        Ok(outcome)
    }

    /// Cancel the running turn, if any. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        match self.active_turn.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.conversation.try_lock().is_err()
    }

    /// Snapshot of the conversation. Waits for a running turn to finish.
    pub async fn history(&self) -> Vec<Message> {
        self.conversation.lock().await.messages().to_vec()
    }
}

/// Publishes the running turn's token and clears it when the turn ends,
/// including when the `send` future is dropped.
struct ActiveTurn<'a> {
    session: &'a ChatSession,
}

impl<'a> ActiveTurn<'a> {
    fn register(session: &'a ChatSession, token: CancellationToken) -> Self {
        if let Ok(mut slot) = session.active_turn.lock() {
            *slot = Some(token);
        }
        Self { session }
    }
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.session.active_turn.lock() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::agent::{AgentConfig, NoopObserver};
    use crate::llm::ScriptedClient;
    use crate::tools::{Tool, ToolArgs, ToolOutput, ToolRegistry};

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

    fn session(client: ScriptedClient) -> Arc<ChatSession> {
        let mut registry = ToolRegistry::new();
        registry.register(Slow).unwrap();
        let agent = Agent::new(
            Arc::new(client),
            Arc::new(registry),
            AgentConfig { max_iterations: 4 },
        );
        Arc::new(ChatSession::new(Arc::new(agent)))
    }

    async fn wait_until_busy(session: &ChatSession) {
        for _ in 0..100 {
            if session.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("turn never started");
    }

    #[tokio::test]
    async fn completed_turns_extend_history() {
        let session = session(ScriptedClient::new().text("first").text("second"));
        assert_eq!(session.history().await.len(), 2);

        tokio_test::assert_ok!(session.send("one", &NoopObserver).await);
        tokio_test::assert_ok!(session.send("two", &NoopObserver).await);

        let history = session.history().await;
        assert_eq!(history.len(), 6);
        assert_eq!(history[5].text(), Some("second"));
        assert!(!session.cancel());
    }

    #[tokio::test]
    async fn second_prompt_is_rejected_while_busy() {
        let session = session(
            ScriptedClient::new()
                .tool_calls(&[("call_a", "slow", json!({}))])
                .text("unused"),
        );

        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.send("slow", &NoopObserver).await })
        };
        wait_until_busy(&session).await;

        let rejected = session.send("another", &NoopObserver).await;
        assert!(matches!(rejected, Err(SessionError::Busy)));

        assert!(session.cancel());
        let outcome = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("turn should stop after cancel")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert!(!session.is_busy());

        // Greeting pair, prompt and the tool request. The rejected prompt left no trace.
        assert_eq!(session.history().await.len(), 4);
    }

    #[tokio::test]
    async fn turn_failure_surfaces_as_session_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Instant).unwrap();
        let agent = Agent::new(
            Arc::new(ScriptedClient::always_calling("instant", json!({}))),
            Arc::new(registry),
            AgentConfig { max_iterations: 2 },
        );
        let session = ChatSession::new(Arc::new(agent));

        let err = tokio_test::assert_err!(session.send("loop", &NoopObserver).await);
        assert!(matches!(
            err,
            SessionError::Turn(TurnError::LoopLimitExceeded { limit: 2 })
        ));
    }

    struct Instant;

    #[async_trait]
    impl Tool for Instant {
        fn name(&self) -> &str {
            "instant"
        }
        fn description(&self) -> &str {
            "Returns immediately"
        }
        async fn execute(&self, _args: ToolArgs) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::Text("ok".to_string()))
        }
    }
}
