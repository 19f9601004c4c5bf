//! Evoclaw CLI — entry point.
//!
//! # Commands
//!
//! - `evoclaw gateway` — run the orchestrator with all enabled channels
//! - `evoclaw agent [-m MESSAGE]` — chat with an agent (single-shot or REPL)
//! - `evoclaw status` — show configuration and provider status
//! - `evoclaw onboard` — initialize config + workspace

mod gateway;
mod helpers;
mod onboard;
mod repl;
mod status;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use evoclaw_agent::{Orchestrator, ToolLoop, ToolLoopConfig, ToolManager};
use evoclaw_core::bus::queue::MessageBus;
use evoclaw_core::config::{load_config, Config};
use evoclaw_core::rsi::RsiLogger;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// ⚙ Evoclaw — channel ↔ agent orchestrator
#[derive(Parser)]
#[command(name = "evoclaw", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator (all enabled channels)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Chat with an agent (single-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Agent id (defaults to the first configured agent)
        #[arg(short, long)]
        agent: Option<String>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and provider status
    Status,

    /// Initialize configuration and workspace
    Onboard,
}

/// Build a channel-less orchestrator for the interactive commands.
fn build_direct_orchestrator(config: &Config) -> Arc<Orchestrator> {
    let agents = Arc::new(gateway::build_agents(config));
    let providers = Arc::new(gateway::build_providers(config));

    let tool_loop = Arc::new(ToolLoop::new(
        Arc::new(ToolManager::new()),
        None,
        None,
        Arc::new(RsiLogger::disabled()),
        ToolLoopConfig::default(),
    ));

    Arc::new(Orchestrator::new(
        Arc::new(MessageBus::default()),
        vec![],
        agents,
        providers,
        tool_loop,
        config.routing.clone(),
        config.evaluation.clone(),
        None,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway { logs } => {
            helpers::init_logging(logs);
            gateway::run().await
        }
        Commands::Agent { message, agent, logs } => {
            helpers::init_logging(logs);
            let config = load_config(None);
            let orchestrator = build_direct_orchestrator(&config);

            let agent_id = agent
                .or_else(|| config.agents.first().map(|a| a.id.clone()))
                .unwrap_or_else(|| "assistant".into());

            match message {
                Some(message) => repl::run_once(orchestrator, &agent_id, &message).await,
                None => repl::run(orchestrator, &agent_id).await,
            }
        }
        Commands::Status => {
            helpers::init_logging(false);
            status::run();
            Ok(())
        }
        Commands::Onboard => {
            helpers::init_logging(false);
            onboard::run()
        }
    }
}
