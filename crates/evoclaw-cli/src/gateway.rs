//! Gateway command — wires config into a running orchestrator.
//!
//! Startup sequence:
//! 1. Load config, resolve the workspace
//! 2. Build the bus, agent registry, provider registry
//! 3. Build the tool manager (built-ins + schema discovery) and tool loop
//! 4. Build enabled channels (terminal, Telegram, MQTT, HTTP, WebSocket)
//! 5. Run the orchestrator; Ctrl+C triggers graceful shutdown

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use evoclaw_agent::{
    LocalBackend, LoggingEvolutionEngine, Orchestrator, PatternPolicy, ToolLoop, ToolLoopConfig,
    ToolManager,
};
use evoclaw_channels::{
    HttpChannel, MqttChannel, MqttTransport, TelegramChannel, TerminalChannel, WebSocketChannel,
};
use evoclaw_core::agent::{AgentDef, AgentRegistry};
use evoclaw_core::bus::queue::{MessageBus, DEFAULT_BUS_CAPACITY};
use evoclaw_core::channel::Channel;
use evoclaw_core::config::{load_config, Config};
use evoclaw_core::edge::EdgeTransport;
use evoclaw_core::rsi::RsiLogger;
use evoclaw_core::utils::expand_home;
use evoclaw_providers::{HttpProvider, ProviderRegistry};

use crate::helpers;

/// Known OpenAI-compatible API bases, by provider name.
fn default_api_base(name: &str) -> Option<&'static str> {
    match name {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "anthropic" => Some("https://api.anthropic.com/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        _ => None,
    }
}

/// Build the provider registry from config.
pub fn build_providers(config: &Config) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let default_model = ProviderRegistry::strip_prefix(&config.routing.complex).to_string();

    for (name, provider_config) in &config.providers {
        if !provider_config.is_configured() {
            continue;
        }
        let api_base = provider_config
            .api_base
            .clone()
            .or_else(|| default_api_base(name).map(String::from));
        let Some(api_base) = api_base else {
            warn!(provider = %name, "no API base known, provider skipped");
            continue;
        };

        let mut provider = HttpProvider::new(name, api_base, &provider_config.api_key, &default_model);
        if let Some(headers) = &provider_config.extra_headers {
            provider = provider.with_extra_headers(headers);
        }
        registry.register(Arc::new(provider));
    }
    registry
}

/// Build the agent registry from config; an empty config gets a default
/// assistant so the gateway is usable out of the box.
pub fn build_agents(config: &Config) -> AgentRegistry {
    let registry = AgentRegistry::new();
    if config.agents.is_empty() {
        registry.register(AgentDef {
            id: "assistant".into(),
            name: "Assistant".into(),
            agent_type: "assistant".into(),
            model: String::new(),
            system_prompt: "You are a helpful assistant with access to tools.".into(),
            capabilities: vec![],
        });
    } else {
        for def in &config.agents {
            registry.register(def.clone());
        }
    }
    registry
}

/// Resolve and create the workspace directory.
fn prepare_workspace(config: &Config) -> Result<PathBuf> {
    let workspace = expand_home(&config.tools.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;
    Ok(workspace)
}

/// Run the gateway.
pub async fn run() -> Result<()> {
    helpers::print_banner();
    println!("  Mode: Gateway\n");

    let config = load_config(None);
    let workspace = prepare_workspace(&config)?;

    let bus = Arc::new(MessageBus::new(DEFAULT_BUS_CAPACITY));
    let agents = Arc::new(build_agents(&config));
    let providers = Arc::new(build_providers(&config));
    if providers.is_empty() {
        warn!("no providers configured; run `evoclaw onboard` and add an API key");
    }

    // Tool backends + manager.
    let backend = Arc::new(LocalBackend::new(
        workspace.clone(),
        config.tools.restrict_to_workspace,
    ));
    let mut manager = ToolManager::with_builtins(
        backend.clone(),
        backend,
        Some(config.tools.exec_timeout_secs),
    );
    if !config.tools.schema_dir.is_empty() {
        let dir = expand_home(&config.tools.schema_dir);
        match manager.load_schema_dir(&dir) {
            Ok(count) => info!(count, "external tool schemas loaded"),
            Err(e) => warn!(error = %e, "tool schema discovery failed"),
        }
    }

    // Channels.
    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
    let mut edge: Option<Arc<dyn EdgeTransport>> = None;

    if config.channels.mqtt.enabled {
        let (transport, inbox_rx) = MqttTransport::new(&config.channels.mqtt);
        manager.attach_edge(transport.clone());
        edge = Some(transport.clone());
        channels.push(Arc::new(MqttChannel::new(transport, inbox_rx)));
    }
    if config.channels.terminal.enabled {
        channels.push(Arc::new(TerminalChannel::new()));
    }
    if config.channels.telegram.enabled && !config.channels.telegram.token.is_empty() {
        channels.push(Arc::new(TelegramChannel::new(
            &config.channels.telegram.token,
            config.channels.telegram.allowed_users.clone(),
            agents.clone(),
        )));
    }
    if config.channels.http.enabled {
        channels.push(Arc::new(HttpChannel::new(
            &config.channels.http.bind,
            Duration::from_secs(config.channels.http.request_timeout_secs),
        )));
    }
    if config.channels.websocket.enabled {
        channels.push(Arc::new(WebSocketChannel::new(
            &config.channels.websocket.bind,
            Duration::from_secs(config.channels.websocket.request_timeout_secs),
        )));
    }

    // RSI ledger.
    let rsi = if config.rsi.outcomes_file.is_empty() {
        RsiLogger::from_env()
    } else {
        RsiLogger::with_path(Some(expand_home(&config.rsi.outcomes_file)))
    };

    // Tool loop.
    let tool_loop = Arc::new(ToolLoop::new(
        Arc::new(manager),
        Some(Arc::new(PatternPolicy::new())),
        edge,
        Arc::new(rsi),
        ToolLoopConfig::default(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        bus,
        channels,
        agents,
        providers,
        tool_loop,
        config.routing.clone(),
        config.evaluation.clone(),
        Some(Arc::new(LoggingEvolutionEngine)),
    ));

    // Ctrl+C → graceful shutdown.
    let shutdown_handle = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            shutdown_handle.shutdown();
        }
    });

    orchestrator.run().await
}
