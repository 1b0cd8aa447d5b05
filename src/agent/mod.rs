//! Agent module - the tool-calling orchestrator.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Append the user prompt to the conversation
//! 2. Call the model with the conversation and the tool catalogue
//! 3. If the model requests tool calls, run them in order and append the results
//! 4. Repeat until the model answers without tools or the iteration limit is hit

mod agent_loop;
mod events;
mod prompt;
mod session;

pub use agent_loop::{Agent, AgentConfig, TurnError, TurnOutcome, TurnState};
pub use events::{AgentEvent, ChannelObserver, NoopObserver, TurnObserver};
pub use prompt::{build_system_prompt, initial_conversation, GREETING, SHOWCASE_PROMPTS};
pub use session::{ChatSession, SessionError};
