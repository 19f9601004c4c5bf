//! Configuration schema.
//!
//! Hierarchy: `Config` → agents, providers, routing, channels, tools,
//! evaluation, rsi. JSON on disk uses **camelCase** keys; Rust uses
//! snake_case, bridged with `#[serde(rename_all = "camelCase")]`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::agent::AgentDef;

// ─────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.evoclaw/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Configured agent personas. The first entry is the routing default.
    pub agents: Vec<AgentDef>,
    /// Provider name → credentials/endpoint.
    pub providers: HashMap<String, ProviderConfig>,
    pub routing: RoutingConfig,
    pub channels: ChannelsConfig,
    pub tools: ToolsConfig,
    pub evaluation: EvaluationConfig,
    pub rsi: RsiConfig,
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for a single LLM provider (API key, base URL, headers).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Custom API base URL (overrides the provider default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────

/// Model routing defaults, used when an agent has no model of its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    /// Default model for complex traffic (the standard fallback).
    pub complex: String,
    /// Default model for simple traffic (reserved for future routing hooks).
    pub simple: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            complex: "anthropic/claude-sonnet-4-20250514".to_string(),
            simple: "anthropic/claude-3-5-haiku-20241022".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

/// Per-channel enablement and settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    pub terminal: TerminalConfig,
    pub telegram: TelegramConfig,
    pub mqtt: MqttConfig,
    pub http: HttpConfig,
    pub websocket: WebSocketConfig,
}

/// Terminal (stdin/stdout) channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalConfig {
    pub enabled: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Telegram bot channel.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    pub enabled: bool,
    /// Bot token from @BotFather.
    pub token: String,
    /// Allow-list of user IDs / usernames. Empty = allow everyone.
    pub allowed_users: Vec<String>,
}

/// MQTT broker connection for the edge-worker fabric.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "evoclaw-orchestrator".to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 30,
        }
    }
}

/// HTTP + WebSocket API channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
    pub enabled: bool,
    /// Bind address for the listener (serves both `/chat` and `/ws`).
    pub bind: String,
    /// Seconds a caller waits for its correlated response.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8710".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// WebSocket API channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    /// Bind address for the WebSocket listener.
    pub bind: String,
    /// Seconds a connection waits for its correlated response.
    pub request_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8711".to_string(),
            request_timeout_secs: 30,
        }
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

/// Tool backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Workspace root for file and exec tools.
    pub workspace: String,
    /// If true, file/exec tools may not leave the workspace.
    pub restrict_to_workspace: bool,
    /// Per-command timeout for the `bash` tool, in seconds.
    pub exec_timeout_secs: u64,
    /// Directory of external tool schema files (JSON), optional.
    pub schema_dir: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace: "~/.evoclaw/workspace".to_string(),
            restrict_to_workspace: true,
            exec_timeout_secs: 60,
            schema_dir: String::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Evaluation
// ─────────────────────────────────────────────

/// Periodic metric evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationConfig {
    pub enabled: bool,
    /// Seconds between evaluation ticks.
    pub interval_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

// ─────────────────────────────────────────────
// RSI
// ─────────────────────────────────────────────

/// RSI outcome ledger settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RsiConfig {
    /// Explicit outcomes file; empty uses `$RSI_OUTCOMES_FILE` / the
    /// home-dir default.
    pub outcomes_file: String,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
