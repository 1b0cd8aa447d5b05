//! System prompt and canned conversation text.

use crate::conversation::{Conversation, Message};
use crate::tools::ToolRegistry;

/// First assistant message shown in a fresh conversation.
pub const GREETING: &str = "How can I help you?";

/// Example questions exercising the tool chain.
pub const SHOWCASE_PROMPTS: [&str; 4] = [
    "Run a comprehensive network diagnostic: list all interfaces with their IPs and MACs, get stats for each interface.",
    "I'm seeing high latency to our key services. Investigate and summarize what you find.",
    "I can't reach my web server. Figure out why and suggest next steps.",
    "Audit connectivity to my multiple web servers",
];

/// Build the system prompt with tool descriptions.
pub fn build_system_prompt(tools: &ToolRegistry) -> String {
    let tool_descriptions = tools
        .describe_all()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a network-operations assistant with a full toolbox: interface discovery, stats, pings, port scanning, DNS, traceroute, MAC lookup, public-IP, plus general web search.

## Your Tools

{tool_descriptions}

## Rules

1. When a user asks a broad network-troubleshooting question, proactively select and chain the relevant tools in the logical order needed to diagnose or inventory their network.

2. Explain your plan, execute the tools, then summarize the results.

3. Do not use placeholder values like [key service IP] or [hostname]; always extract actual values from the user query or ask for clarification if missing.

4. If the user refers to abstract terms (e.g. 'key services', 'our servers') and you cannot resolve them to real hostnames or IPs, ask the user to specify the exact targets before running any tools.

5. If a tool returns an error, explain it in plain words or try a different approach. Never paste raw errors back to the user."#,
        tool_descriptions = tool_descriptions
    )
}

/// A new conversation: system prompt followed by the greeting.
pub fn initial_conversation(tools: &ToolRegistry) -> Conversation {
    Conversation::from_messages(vec![
        Message::system(build_system_prompt(tools)),
        Message::assistant(GREETING),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolTimeouts;

    #[test]
    fn prompt_lists_every_tool() {
        let registry = ToolRegistry::with_network_tools(&ToolTimeouts::default()).unwrap();
        let prompt = build_system_prompt(&registry);
        for schema in registry.describe_all() {
            assert!(prompt.contains(&format!("**{}**", schema.name)));
        }
    }

    #[test]
    fn fresh_conversation_ends_with_greeting() {
        let conversation = initial_conversation(&ToolRegistry::new());
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last().and_then(Message::text), Some(GREETING));
    }
}
