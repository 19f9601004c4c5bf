//! Edge-worker protocol: the JSON envelopes exchanged over MQTT and the
//! transport contract the tool loop dispatches through.
//!
//! Wire shapes are pinned; every field here round-trips losslessly. The
//! concrete broker client lives in `evoclaw-channels`; the tool loop only
//! sees the `EdgeTransport` trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::types::ToolResult;

/// Topic prefix for all orchestrator/worker traffic.
pub const TOPIC_PREFIX: &str = "evoclaw";

/// Edge agents are considered online for this long after their last report.
pub const ONLINE_WINDOW_SECS: i64 = 120;

/// Command topic for one agent (`evoclaw/agents/{id}/commands`).
pub fn commands_topic(agent_id: &str) -> String {
    format!("{TOPIC_PREFIX}/agents/{agent_id}/commands")
}

/// Reports topic for one agent (`evoclaw/agents/{id}/reports`).
pub fn reports_topic(agent_id: &str) -> String {
    format!("{TOPIC_PREFIX}/agents/{agent_id}/reports")
}

/// Broadcast topic (`evoclaw/broadcast`).
pub fn broadcast_topic() -> String {
    format!("{TOPIC_PREFIX}/broadcast")
}

// ─────────────────────────────────────────────
// Commands (orchestrator → worker)
// ─────────────────────────────────────────────

/// Command envelope published on an agent's command topic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EdgeAgentCommand {
    /// One of "message", "prompt", "tool".
    pub command: String,
    /// Correlation id echoed back in the worker's report.
    pub request_id: String,
    /// Command-specific payload.
    pub payload: serde_json::Value,
}

impl EdgeAgentCommand {
    /// Build a `prompt` command.
    pub fn prompt(request_id: impl Into<String>, prompt: &str, system_prompt: &str) -> Self {
        EdgeAgentCommand {
            command: "prompt".into(),
            request_id: request_id.into(),
            payload: serde_json::json!({
                "prompt": prompt,
                "system_prompt": system_prompt,
                "sent_at": Utc::now().timestamp(),
            }),
        }
    }

    /// Build a `tool` command.
    pub fn tool(
        request_id: impl Into<String>,
        tool: &str,
        parameters: serde_json::Value,
        timeout: Duration,
    ) -> Self {
        EdgeAgentCommand {
            command: "tool".into(),
            request_id: request_id.into(),
            payload: serde_json::json!({
                "tool": tool,
                "parameters": parameters,
                "timeout_ms": timeout.as_millis() as u64,
            }),
        }
    }

    /// Build a `message` command (plain text relayed to the worker).
    pub fn message(request_id: impl Into<String>, content: &str, reply_to: Option<&str>) -> Self {
        EdgeAgentCommand {
            command: "message".into(),
            request_id: request_id.into(),
            payload: serde_json::json!({
                "content": content,
                "reply_to": reply_to,
                "sent_at": Utc::now().timestamp(),
            }),
        }
    }
}

// ─────────────────────────────────────────────
// Reports (worker → orchestrator)
// ─────────────────────────────────────────────

/// Report envelope received on an agent's reports topic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentReport {
    pub agent_id: String,
    #[serde(default)]
    pub agent_type: String,
    /// One of "result", "error", "heartbeat", "metric".
    pub report_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub timestamp: i64,
}

/// Status message received on an agent's status topic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EdgeStatusReport {
    pub agent_id: String,
    pub status: EdgeStatus,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
}

/// Retained capability advertisement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CapabilityAd {
    pub agent_id: String,
    /// One-line summary of what the worker can do.
    pub capabilities: String,
}

/// Reported status of an edge worker.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    #[default]
    Online,
    Idle,
    Busy,
    Error,
}

// ─────────────────────────────────────────────
// Registry entries
// ─────────────────────────────────────────────

/// What the orchestrator knows about one edge worker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EdgeAgentInfo {
    pub agent_id: String,
    pub status: EdgeStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
    /// One-line capability summary from the retained advertisement.
    #[serde(default)]
    pub capabilities: String,
}

impl EdgeAgentInfo {
    /// Fresh entry for a worker that just reported.
    pub fn seen_now(agent_id: impl Into<String>, status: EdgeStatus) -> Self {
        EdgeAgentInfo {
            agent_id: agent_id.into(),
            status,
            last_seen: Utc::now(),
            uptime_seconds: None,
            cpu_percent: None,
            memory_mb: None,
            capabilities: String::new(),
        }
    }

    /// Online iff the last report is within the 2-minute window.
    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_seen < ChronoDuration::seconds(ONLINE_WINDOW_SECS)
    }

    /// Online relative to the current clock.
    pub fn is_online(&self) -> bool {
        self.is_online_at(Utc::now())
    }
}

// ─────────────────────────────────────────────
// Prompt responses
// ─────────────────────────────────────────────

/// Response to a `prompt` command, synthesized from the worker's report.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EdgeAgentResponse {
    pub agent_id: String,
    pub content: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// ─────────────────────────────────────────────
// Transport contract
// ─────────────────────────────────────────────

/// What the tool loop needs from the edge fabric.
///
/// Implementations must not hold agent locks across these calls; each call
/// carries its own timeout.
#[async_trait]
pub trait EdgeTransport: Send + Sync {
    /// Workers currently inside the online window.
    fn online_agents(&self) -> Vec<EdgeAgentInfo>;

    /// Online workers mapped to their capability one-liners.
    fn online_agents_with_capabilities(&self) -> HashMap<String, String>;

    /// Send a prompt to a worker and wait for its reply.
    async fn send_prompt_and_wait(
        &self,
        agent_id: &str,
        prompt: &str,
        system_prompt: &str,
        timeout: Duration,
    ) -> anyhow::Result<EdgeAgentResponse>;

    /// Invoke a remote tool on a worker and wait for the result.
    async fn call_tool(
        &self,
        agent_id: &str,
        tool: &str,
        parameters: serde_json::Value,
        timeout: Duration,
    ) -> anyhow::Result<ToolResult>;
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(commands_topic("pi1"), "evoclaw/agents/pi1/commands");
        assert_eq!(reports_topic("pi1"), "evoclaw/agents/pi1/reports");
        assert_eq!(broadcast_topic(), "evoclaw/broadcast");
    }

    #[test]
    fn test_prompt_command_shape() {
        let cmd = EdgeAgentCommand::prompt("req-1", "hi there", "be brief");
        let json = serde_json::to_value(&cmd).unwrap();

        assert_eq!(json["command"], "prompt");
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["payload"]["prompt"], "hi there");
        assert_eq!(json["payload"]["system_prompt"], "be brief");
        assert!(json["payload"]["sent_at"].is_i64());
    }

    #[test]
    fn test_tool_command_shape() {
        let cmd = EdgeAgentCommand::tool(
            "req-2",
            "sensor_read",
            serde_json::json!({"pin": 4}),
            Duration::from_secs(30),
        );
        let json = serde_json::to_value(&cmd).unwrap();

        assert_eq!(json["command"], "tool");
        assert_eq!(json["payload"]["tool"], "sensor_read");
        assert_eq!(json["payload"]["parameters"]["pin"], 4);
        assert_eq!(json["payload"]["timeout_ms"], 30_000);
    }

    #[test]
    fn test_command_round_trip() {
        let cmd = EdgeAgentCommand::message("req-3", "hello worker", Some("msg-9"));
        let s = serde_json::to_string(&cmd).unwrap();
        let back: EdgeAgentCommand = serde_json::from_str(&s).unwrap();
        assert_eq!(cmd, back);
    }

    #[test]
    fn test_report_round_trip() {
        let report = AgentReport {
            agent_id: "pi1".into(),
            agent_type: "edge".into(),
            report_type: "result".into(),
            payload: serde_json::json!({"request_id": "req-1", "content": "done"}),
            timestamp: 1_700_000_000,
        };

        let s = serde_json::to_string(&report).unwrap();
        let back: AgentReport = serde_json::from_str(&s).unwrap();
        assert_eq!(report, back);
    }

    #[test]
    fn test_report_defaults() {
        let report: AgentReport =
            serde_json::from_str(r#"{"agent_id": "pi1", "report_type": "heartbeat"}"#).unwrap();
        assert_eq!(report.agent_type, "");
        assert_eq!(report.timestamp, 0);
        assert!(report.payload.is_null());
    }

    #[test]
    fn test_status_report_optionals() {
        let json = r#"{"agent_id": "pi1", "status": "busy", "timestamp": 1, "cpu_percent": 42.5}"#;
        let status: EdgeStatusReport = serde_json::from_str(json).unwrap();

        assert_eq!(status.status, EdgeStatus::Busy);
        assert_eq!(status.cpu_percent, Some(42.5));
        assert!(status.uptime_seconds.is_none());
        assert!(status.memory_mb.is_none());
    }

    #[test]
    fn test_capability_ad_round_trip() {
        let ad = CapabilityAd {
            agent_id: "pi1".into(),
            capabilities: "sensor hub".into(),
        };
        let s = serde_json::to_string(&ad).unwrap();
        let back: CapabilityAd = serde_json::from_str(&s).unwrap();
        assert_eq!(ad, back);
    }

    #[test]
    fn test_online_window() {
        let now = Utc::now();
        let mut info = EdgeAgentInfo::seen_now("pi1", EdgeStatus::Online);
        assert!(info.is_online_at(now));

        info.last_seen = now - ChronoDuration::seconds(ONLINE_WINDOW_SECS - 1);
        assert!(info.is_online_at(now));

        info.last_seen = now - ChronoDuration::seconds(ONLINE_WINDOW_SECS);
        assert!(!info.is_online_at(now));

        info.last_seen = now - ChronoDuration::seconds(ONLINE_WINDOW_SECS + 60);
        assert!(!info.is_online_at(now));
    }

    #[test]
    fn test_edge_response_round_trip() {
        let resp = EdgeAgentResponse {
            agent_id: "pi1".into(),
            content: "21.5°C".into(),
            model: "local/tiny".into(),
            status: "ok".into(),
            error: None,
            metadata: HashMap::from([("topic".into(), "evoclaw/agents/pi1/reports".into())]),
        };
        let s = serde_json::to_string(&resp).unwrap();
        let back: EdgeAgentResponse = serde_json::from_str(&s).unwrap();
        assert_eq!(resp, back);
    }
}
