//! NetOps Agent - terminal chat shell.
//!
//! Reads prompts from stdin, runs each as a turn and renders streamed
//! progress on stdout. Logs go to stderr.

use std::io::Write;
use std::sync::Arc;

use netops_agent::agent::{
    Agent, AgentConfig, AgentEvent, ChannelObserver, ChatSession, SessionError, TurnOutcome,
    GREETING, SHOWCASE_PROMPTS,
};
use netops_agent::config::{Config, ConfigError};
use netops_agent::llm::OpenAiClient;
use netops_agent::tools::ToolRegistry;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netops_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let config = load_config(&mut lines).await?;
    info!("Loaded configuration: model={}", config.model);

    let tools = ToolRegistry::with_network_tools(&config.tool_timeouts)?;
    let agent = Agent::new(
        Arc::new(OpenAiClient::from_config(&config)),
        Arc::new(tools),
        AgentConfig::from(&config),
    );
    let session = Arc::new(ChatSession::new(Arc::new(agent)));

    print_banner();

    // Ctrl-C cancels the running turn; with nothing running it quits.
    let interrupts = session.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !interrupts.cancel() {
                println!();
                std::process::exit(130);
            }
        }
    });

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        match prompt {
            "" => continue,
            "/exit" | "/quit" => break,
            "/history" => {
                println!("{} messages in this conversation", session.history().await.len());
                continue;
            }
            _ => {}
        }

        let (observer, events) = ChannelObserver::new();
        let renderer = tokio::spawn(render(events));
        let result = session.send(prompt, &observer).await;
        drop(observer);
        let _ = renderer.await;

        match result {
            Ok(TurnOutcome::Completed {
                usage, iterations, ..
            }) => {
                info!(
                    iterations,
                    total_tokens = usage.total_tokens,
                    "turn complete"
                );
            }
            Ok(TurnOutcome::Cancelled) => println!("\n[cancelled]"),
            // The apology was already rendered from the error event.
            Err(SessionError::Turn(_)) => {}
            Err(e @ SessionError::Busy) => println!("{}", e),
        }
    }

    info!("Goodbye");
    Ok(())
}

/// Build the config, asking for the API key when it is not in the environment.
async fn load_config(lines: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<Config> {
    match Config::from_env() {
        Ok(config) => Ok(config),
        Err(ConfigError::MissingEnvVar(var)) => {
            print!("{} is not set. Enter your API key: ", var);
            std::io::stdout().flush()?;
            let api_key = lines
                .next_line()
                .await?
                .map(|line| line.trim().to_string())
                .filter(|key| !key.is_empty())
                .ok_or_else(|| anyhow::anyhow!("Please enter your {} to continue", var))?;
            Ok(Config::from_env_with_api_key(api_key)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_banner() {
    println!("AI Net Ops Agent");
    println!("AI agent showcasing network operations and troubleshooting\n");
    println!("Example prompts to try out:");
    for prompt in SHOWCASE_PROMPTS {
        println!("  - {}", prompt);
    }
    println!("\nCommands: /history, /exit. Ctrl-C cancels a running answer.\n");
    println!("Assistant: {}", GREETING);
}

async fn render(mut events: UnboundedReceiver<AgentEvent>) {
    let mut mid_line = false;
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::TextDelta { content } => {
                print!("{}", content);
                mid_line = true;
            }
            AgentEvent::ToolCall { name, args, .. } => {
                if mid_line {
                    println!();
                    mid_line = false;
                }
                println!("  [running {} {}]", name, args);
            }
            AgentEvent::ToolResult { name, result, .. } => {
                let status = if result.is_failure() { "failed" } else { "done" };
                println!("  [{} {}]", name, status);
            }
            AgentEvent::TurnComplete { .. } => {
                println!();
                mid_line = false;
            }
            AgentEvent::Error { message } => {
                if mid_line {
                    println!();
                    mid_line = false;
                }
                println!("{}", message);
            }
        }
        let _ = std::io::stdout().flush();
    }
}
