//! System prompt and delegation prompt building

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::agents::AgentDescriptor;
use crate::tools::ToolDefinition;

/// Build an agent's system prompt from its descriptor and the tools it may call
pub fn build_agent_system_prompt(agent: &AgentDescriptor, tools: &[ToolDefinition]) -> String {
    let mut prompt = String::new();

    prompt.push_str("# IDENTITY\n\n");
    prompt.push_str(&format!("You are {}", agent.name));
    if !agent.role.is_empty() {
        prompt.push_str(&format!(", acting as {}", agent.role));
    }
    prompt.push_str(".\n");
    if !agent.description.is_empty() {
        prompt.push_str(&agent.description);
        prompt.push('\n');
    }
    prompt.push('\n');

    if !agent.goals.is_empty() {
        prompt.push_str("# GOALS\n\n");
        for goal in &agent.goals {
            prompt.push_str(&format!("- {}\n", goal));
        }
        prompt.push('\n');
    }

    if !tools.is_empty() {
        prompt.push_str("# TOOLS\n\n");
        prompt.push_str(
            "To call a tool, write `@tool.name({\"arg\": \"value\"})` on its own line. \
             The call is replaced with its result before your reply is delivered.\n\n",
        );
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        prompt.push('\n');
    }

    prompt.push_str("# STYLE\n\n");
    prompt.push_str(&format!(
        "Tone: {}. Language: {}.\n\n",
        agent.style.tone, agent.style.language
    ));

    prompt.push_str("# CURRENT TIME\n\n");
    prompt.push_str(&chrono::Utc::now().to_rfc3339());
    prompt.push_str("\n\n");

    prompt.push_str("# INSTRUCTIONS\n\n");
    prompt.push_str("Stay within your role. ");
    prompt.push_str("Be concise but thorough. ");
    prompt.push_str("If the task needs a capability you do not have, say so plainly.\n");

    debug!(
        "Built system prompt for agent {} ({} chars)",
        agent.id,
        prompt.len()
    );

    prompt
}

/// Build the message handed to a delegated agent
pub fn build_delegation_prompt(
    agent: &AgentDescriptor,
    task: &str,
    shared_context: &BTreeMap<String, Value>,
    prior_delegations: usize,
) -> String {
    let mut prompt = format!("You are {}", agent.name);
    if !agent.role.is_empty() {
        prompt.push_str(&format!(", a {}", agent.role));
    }
    prompt.push_str(". A task has been delegated to you.\n\n");

    prompt.push_str("## Task\n\n");
    prompt.push_str(task);
    prompt.push_str("\n\n");

    if !shared_context.is_empty() {
        let serialized =
            serde_json::to_string_pretty(shared_context).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str("## Shared context\n\n");
        prompt.push_str(&serialized);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!(
        "Prior delegations in this conversation: {}\n",
        prior_delegations
    ));

    prompt
}

/// System prompt for the coordinator's own persona
pub fn build_coordinator_prompt(agents: &[AgentDescriptor]) -> String {
    let mut prompt = String::from(
        "# IDENTITY\n\nYou are the coordinator of a team of specialised agents. \
         You answer requests that no specialist is better suited for.\n\n",
    );
    if !agents.is_empty() {
        prompt.push_str("# TEAM\n\n");
        for agent in agents {
            let role = if agent.role.is_empty() { "generalist" } else { &agent.role };
            prompt.push_str(&format!("- {} ({}): {}\n", agent.name, role, agent.description));
        }
        prompt.push('\n');
    }
    prompt.push_str("# INSTRUCTIONS\n\nBe concise but thorough.\n");
    prompt
}
