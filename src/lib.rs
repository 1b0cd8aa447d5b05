//! # NetOps Agent
//!
//! A conversational network-operations assistant.
//!
//! This library provides:
//! - A tool-calling agent loop driven by an OpenAI-compatible chat model
//! - Nine diagnostic tools (interfaces, ping, port scan, DNS, traceroute,
//!   MAC vendor, public IP, web search)
//! - Chat sessions with streaming progress and cancellation
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Receive a prompt from the chat shell
//! 2. Call the model with the conversation and the tool catalogue
//! 3. Execute any requested tool calls, feeding results (or failures) back
//! 4. Repeat until the model answers without requesting tools
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use netops_agent::{agent::{Agent, AgentConfig, ChatSession, NoopObserver}, llm::OpenAiClient, tools::ToolRegistry, Config};
//!
//! let config = Config::from_env()?;
//! let tools = ToolRegistry::with_network_tools(&config.tool_timeouts)?;
//! let agent = Agent::new(Arc::new(OpenAiClient::from_config(&config)), Arc::new(tools), AgentConfig::from(&config));
//! let session = ChatSession::new(Arc::new(agent));
//! let outcome = session.send("What is my public IP?", &NoopObserver).await?;
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod tools;

pub use config::Config;
