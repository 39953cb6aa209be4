use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{BackendKind, SwitchboardConfig};
use switchboard_core::{
    AnthropicBackend, Coordinator, DelegationPolicy, InMemoryStore, Message, ModelBackend,
    OpenAiCompatBackend, ToolRegistry, WorkflowStatus,
};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Switchboard, a coordinator that routes work to specialised agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,

    /// Send one message through the coordinator
    Ask {
        /// The message to send
        message: String,

        /// Conversation id; a fresh one is generated when omitted
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Run a configured workflow
    Workflow {
        /// Workflow id
        id: String,

        /// Input passed to the first step as {{input}}
        input: String,

        #[arg(long)]
        conversation: Option<String>,
    },

    /// List configured agents
    Agents,

    /// List delegation rules in evaluation order
    Rules,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref(), filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Ask {
            message,
            conversation,
        } => cmd_ask(&cli.config, &message, conversation).await,
        Commands::Workflow {
            id,
            input,
            conversation,
        } => cmd_workflow(&cli.config, &id, &input, conversation).await,
        Commands::Agents => cmd_agents(&cli.config).await,
        Commands::Rules => cmd_rules(&cli.config).await,
    }
}

/// `RUST_LOG` wins over the `--debug` default when it parses
fn log_filter(rust_log: Option<&str>, default: &str) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Switchboard initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure your backend and agents.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let config = SwitchboardConfig::load(config_path)?;
    println!("Backend:      {:?}", config.backend.provider);
    println!("Base URL:     {}", config.backend.resolved_base_url());
    println!("Model:        {}", config.coordinator.default_model);
    println!("Timeout:      {}ms", config.coordinator.timeout_ms);
    println!(
        "Max delegations per conversation: {}",
        config.coordinator.max_delegations
    );
    println!("Allowed dirs: {:?}", config.tools.allowed_dirs);
    println!("Agents:       {}", config.agents.len());
    println!("Workflows:    {}", config.workflows.len());
    debug!("Full config: {:?}", config);
    Ok(())
}

fn build_backend(config: &SwitchboardConfig) -> Result<Arc<dyn ModelBackend>> {
    let backend = &config.backend;
    let base_url = backend.resolved_base_url();
    let model: Arc<dyn ModelBackend> = match backend.provider {
        BackendKind::Anthropic => {
            if backend.api_key.is_empty() {
                anyhow::bail!("No API key configured. Set ANTHROPIC_API_KEY or [backend].api_key");
            }
            Arc::new(AnthropicBackend::new(
                backend.api_key.clone(),
                base_url,
                backend.max_tokens,
            )?)
        }
        BackendKind::OpenaiCompat => Arc::new(OpenAiCompatBackend::new(
            backend.name.clone(),
            backend.api_key.clone(),
            base_url,
            backend.max_tokens,
        )?),
    };
    Ok(model)
}

fn build_coordinator(config: &SwitchboardConfig) -> Result<Coordinator> {
    let backend = build_backend(config)?;
    let mut coordinator = Coordinator::new(backend, config.coordinator.clone())
        .with_tools(ToolRegistry::with_builtins(config.tools.allowed_dirs.clone()))
        .with_memory(Arc::new(InMemoryStore::new()));

    for agent in &config.agents {
        coordinator.add_agent(agent.clone());
    }
    for workflow in &config.workflows {
        coordinator
            .add_workflow(workflow.clone())
            .with_context(|| format!("Invalid workflow '{}'", workflow.id))?;
    }

    info!(
        "Coordinator ready with {} agents and {} workflows",
        coordinator.agents().len(),
        coordinator.workflows().len()
    );
    Ok(coordinator)
}

fn conversation_id(conversation: Option<String>) -> String {
    conversation.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    message: &str,
    conversation: Option<String>,
) -> Result<()> {
    let config = SwitchboardConfig::load(config_path)?;
    let coordinator = build_coordinator(&config)?;

    let message = Message::user(conversation_id(conversation), message);
    let response = coordinator.handle_message(message).await?;

    if let Some(agent) = response.metadata.get("delegated_to").and_then(|v| v.as_str()) {
        debug!("Answered by agent '{}'", agent);
    }
    println!("{}", response.content);
    Ok(())
}

async fn cmd_workflow(
    config_path: &Option<PathBuf>,
    workflow_id: &str,
    input: &str,
    conversation: Option<String>,
) -> Result<()> {
    let config = SwitchboardConfig::load(config_path)?;
    let coordinator = build_coordinator(&config)?;

    let execution = coordinator
        .execute_workflow(workflow_id, input, &conversation_id(conversation))
        .await?;

    for (step, output) in &execution.results {
        debug!("Step '{}' output: {}", step, output);
    }

    match execution.status {
        WorkflowStatus::Completed => {
            if let Some(output) = &execution.output {
                println!("{}", output.content);
            }
            Ok(())
        }
        status => {
            for (key, error) in &execution.errors {
                eprintln!("{}: {}", key, error);
            }
            anyhow::bail!("Workflow '{}' finished with status {}", workflow_id, status)
        }
    }
}

async fn cmd_agents(config_path: &Option<PathBuf>) -> Result<()> {
    let config = SwitchboardConfig::load(config_path)?;
    if config.agents.is_empty() {
        println!("No agents configured.");
        return Ok(());
    }
    for agent in &config.agents {
        let tools: Vec<String> = agent.allowed_tools().into_iter().collect();
        println!("{:<16} {:<24} {}", agent.id, agent.name, agent.role);
        if !tools.is_empty() {
            println!("{:<16} tools: {}", "", tools.join(", "));
        }
    }
    Ok(())
}

async fn cmd_rules(config_path: &Option<PathBuf>) -> Result<()> {
    // Rules are built in; loading the config still validates it
    SwitchboardConfig::load(config_path)?;
    let mut rules: Vec<_> = DelegationPolicy::new()
        .list_rules()
        .iter()
        .map(|rule| rule.summary())
        .collect();
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    for rule in rules {
        println!("{:>3}  {:<14} {}", rule.priority, rule.id, rule.description);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_prefers_rust_log() {
        let filter = log_filter(Some("switchboard_core=trace"), "info");
        assert_eq!(filter.to_string(), "switchboard_core=trace");
    }

    #[test]
    fn test_log_filter_falls_back_to_default() {
        assert_eq!(log_filter(None, "debug").to_string(), "debug");
        assert_eq!(log_filter(Some(""), "info").to_string(), "info");
        assert_eq!(log_filter(Some("switchboard=loud"), "info").to_string(), "info");
    }
}
