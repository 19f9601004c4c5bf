//! Protocol state for the edge fabric: worker registry, pending-request
//! correlation, and inbound payload classification.
//!
//! Everything here is broker-agnostic so the parsing order and registry
//! semantics are unit-testable without a connection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use evoclaw_core::bus::types::Message;
use evoclaw_core::edge::{
    AgentReport, CapabilityAd, EdgeAgentInfo, EdgeAgentResponse, EdgeStatus, EdgeStatusReport,
};
use evoclaw_core::pending::{PendingMap, WaitError};

/// What an inbound reports-topic payload turned out to be.
///
/// The variants mirror the parse attempts, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportKind {
    Heartbeat,
    ToolResult,
    Metric,
    PromptResponse,
    InboundMessage,
    Dropped,
}

/// Split `evoclaw/agents/{id}/{leaf}` into `(id, leaf)`.
pub fn parse_agent_topic(topic: &str) -> Option<(&str, &str)> {
    let mut parts = topic.split('/');
    if parts.next()? != evoclaw_core::edge::TOPIC_PREFIX {
        return None;
    }
    if parts.next()? != "agents" {
        return None;
    }
    let agent_id = parts.next()?;
    let leaf = parts.next()?;
    if parts.next().is_some() || agent_id.is_empty() {
        return None;
    }
    Some((agent_id, leaf))
}

/// Broker-agnostic edge protocol state.
pub struct EdgeRouter {
    registry: Mutex<HashMap<String, EdgeAgentInfo>>,
    /// Pending `prompt` requests. Separate from the tool-result slots so
    /// completing one can never deadlock against the other.
    prompts: PendingMap<EdgeAgentResponse>,
    /// Pending remote tool calls (the result callbacks).
    tool_results: PendingMap<serde_json::Value>,
    /// Inbox of synthesized messages for the MQTT channel.
    inbox_tx: mpsc::Sender<Message>,
}

impl EdgeRouter {
    pub fn new(inbox_tx: mpsc::Sender<Message>) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            prompts: PendingMap::new(),
            tool_results: PendingMap::new(),
            inbox_tx,
        }
    }

    // ─────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────

    /// Record a heartbeat or status report for a worker.
    pub fn upsert_status(&self, agent_id: &str, status: EdgeStatus) {
        let mut registry = self.registry.lock().expect("edge registry poisoned");
        let entry = registry
            .entry(agent_id.to_string())
            .or_insert_with(|| EdgeAgentInfo::seen_now(agent_id, status));
        entry.status = status;
        entry.last_seen = chrono::Utc::now();
    }

    /// Merge a full status report (uptime/cpu/memory included).
    pub fn apply_status_report(&self, report: &EdgeStatusReport) {
        let mut registry = self.registry.lock().expect("edge registry poisoned");
        let entry = registry
            .entry(report.agent_id.clone())
            .or_insert_with(|| EdgeAgentInfo::seen_now(&report.agent_id, report.status));
        entry.status = report.status;
        entry.last_seen = chrono::Utc::now();
        entry.uptime_seconds = report.uptime_seconds;
        entry.cpu_percent = report.cpu_percent;
        entry.memory_mb = report.memory_mb;
    }

    /// Record a (retained) capability advertisement. Counts as presence:
    /// a restarting orchestrator learns the fleet from retained ads alone.
    pub fn apply_capabilities(&self, ad: &CapabilityAd) {
        let mut registry = self.registry.lock().expect("edge registry poisoned");
        let entry = registry
            .entry(ad.agent_id.clone())
            .or_insert_with(|| EdgeAgentInfo::seen_now(&ad.agent_id, EdgeStatus::Online));
        entry.capabilities = ad.capabilities.clone();
        entry.last_seen = chrono::Utc::now();
    }

    /// Workers inside the online window.
    pub fn online_agents(&self) -> Vec<EdgeAgentInfo> {
        let now = chrono::Utc::now();
        let registry = self.registry.lock().expect("edge registry poisoned");
        let mut agents: Vec<EdgeAgentInfo> = registry
            .values()
            .filter(|info| info.is_online_at(now))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Online workers mapped to their capability one-liners.
    pub fn online_with_capabilities(&self) -> HashMap<String, String> {
        self.online_agents()
            .into_iter()
            .map(|info| (info.agent_id, info.capabilities))
            .collect()
    }

    /// Whether a specific worker is online.
    pub fn is_online(&self, agent_id: &str) -> bool {
        let registry = self.registry.lock().expect("edge registry poisoned");
        registry
            .get(agent_id)
            .map(|info| info.is_online())
            .unwrap_or(false)
    }

    // ─────────────────────────────────────────
    // Pending correlation
    // ─────────────────────────────────────────

    /// Register a pending prompt request.
    pub fn register_prompt(&self, request_id: &str) -> oneshot::Receiver<EdgeAgentResponse> {
        self.prompts.register(request_id)
    }

    /// Wait for a prompt response, deregistering on every exit.
    pub async fn await_prompt(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<EdgeAgentResponse>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> anyhow::Result<EdgeAgentResponse> {
        self.prompts
            .wait(request_id, rx, timeout, cancel)
            .await
            .map_err(|e| match e {
                WaitError::Timeout(t) => {
                    anyhow::anyhow!("edge prompt {request_id} timed out after {t:?}")
                }
                WaitError::Cancelled => anyhow::anyhow!("edge prompt {request_id} cancelled"),
                WaitError::Dropped => {
                    anyhow::anyhow!("edge prompt {request_id} dropped without response")
                }
            })
    }

    /// Drop a pending prompt (publish failed).
    pub fn cancel_prompt(&self, request_id: &str) {
        self.prompts.remove(request_id);
    }

    /// Number of in-flight prompt requests.
    pub fn pending_prompts(&self) -> usize {
        self.prompts.len()
    }

    /// Register a pending remote tool call.
    pub fn register_tool_call(&self, request_id: &str) -> oneshot::Receiver<serde_json::Value> {
        self.tool_results.register(request_id)
    }

    /// Wait for a remote tool result payload.
    pub async fn await_tool_result(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<serde_json::Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> anyhow::Result<serde_json::Value> {
        self.tool_results
            .wait(request_id, rx, timeout, cancel)
            .await
            .map_err(|e| match e {
                WaitError::Timeout(t) => {
                    anyhow::anyhow!("edge tool call {request_id} timed out after {t:?}")
                }
                WaitError::Cancelled => anyhow::anyhow!("edge tool call {request_id} cancelled"),
                WaitError::Dropped => {
                    anyhow::anyhow!("edge tool call {request_id} dropped without result")
                }
            })
    }

    /// Drop a pending tool call.
    pub fn cancel_tool_call(&self, request_id: &str) {
        self.tool_results.remove(request_id);
    }

    // ─────────────────────────────────────────
    // Inbound payload classification
    // ─────────────────────────────────────────

    /// Process one reports-topic payload. Shapes are tried in a fixed
    /// order; the first match wins.
    pub fn handle_report(&self, topic: &str, payload: &[u8]) -> ReportKind {
        // 1. Structured AgentReport envelope.
        if let Ok(report) = serde_json::from_slice::<AgentReport>(payload) {
            return self.handle_agent_report(report);
        }

        let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) else {
            warn!(topic = %topic, "malformed report payload, dropped");
            return ReportKind::Dropped;
        };

        let request_id = value.get("request_id").and_then(|v| v.as_str());

        // 2. Generic mapping carrying a pending prompt's request id.
        if let Some(rid) = request_id {
            if self.prompts.contains(rid) {
                let response = synthesize_prompt_response(topic, &value);
                self.prompts.complete(rid, response);
                return ReportKind::PromptResponse;
            }
        }

        // 3. Legacy tool-result shape.
        if value.get("tool").is_some() {
            if let Some(rid) = request_id {
                if self.tool_results.complete(rid, value.clone()) {
                    return ReportKind::ToolResult;
                }
                warn!(topic = %topic, request_id = %rid, "unmatched tool result");
                return ReportKind::Dropped;
            }
        }

        // 4. Legacy message shape.
        if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
            return self.synthesize_inbound(topic, &value, content);
        }

        warn!(topic = %topic, "unrecognized report shape, dropped");
        ReportKind::Dropped
    }

    fn handle_agent_report(&self, report: AgentReport) -> ReportKind {
        match report.report_type.as_str() {
            "heartbeat" => {
                self.upsert_status(&report.agent_id, EdgeStatus::Online);
                ReportKind::Heartbeat
            }
            "result" | "error" => {
                let rid = report
                    .payload
                    .get("request_id")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                let Some(rid) = rid else {
                    warn!(agent = %report.agent_id, "result report without request_id");
                    return ReportKind::Dropped;
                };

                if self.tool_results.complete(&rid, report.payload.clone()) {
                    return ReportKind::ToolResult;
                }
                // Workers may answer prompts through the report envelope.
                if self.prompts.contains(&rid) {
                    let response = synthesize_prompt_response(&report.agent_id, &report.payload);
                    self.prompts.complete(&rid, response);
                    return ReportKind::PromptResponse;
                }
                warn!(agent = %report.agent_id, request_id = %rid, "unmatched result report");
                ReportKind::Dropped
            }
            "metric" => {
                debug!(agent = %report.agent_id, "metric report");
                ReportKind::Metric
            }
            other => {
                warn!(agent = %report.agent_id, report_type = %other, "unknown report type");
                ReportKind::Dropped
            }
        }
    }

    fn synthesize_inbound(
        &self,
        topic: &str,
        value: &serde_json::Value,
        content: &str,
    ) -> ReportKind {
        let agent_id = value
            .get("agent_id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| parse_agent_topic(topic).map(|(id, _)| id.to_string()))
            .unwrap_or_else(|| "unknown".into());

        let mut msg = Message::new("", &agent_id, &agent_id, content).with_meta("topic", topic);
        if let Some(reply_to) = value.get("reply_to").and_then(|v| v.as_str()) {
            msg.reply_to = Some(reply_to.to_string());
        }

        // Non-blocking offer: a full inbox drops broker traffic rather
        // than stalling the read loop.
        match self.inbox_tx.try_send(msg) {
            Ok(()) => ReportKind::InboundMessage,
            Err(e) => {
                warn!(topic = %topic, error = %e, "edge message dropped, inbox full");
                ReportKind::Dropped
            }
        }
    }
}

/// Build an `EdgeAgentResponse` from a loosely-shaped payload.
fn synthesize_prompt_response(origin: &str, value: &serde_json::Value) -> EdgeAgentResponse {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let agent_id = {
        let explicit = text("agent_id");
        if explicit.is_empty() {
            parse_agent_topic(origin)
                .map(|(id, _)| id.to_string())
                .unwrap_or_else(|| origin.to_string())
        } else {
            explicit
        }
    };

    let metadata = value
        .get("metadata")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let rendered = v.as_str().map(String::from).unwrap_or_else(|| v.to_string());
                    (k.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default();

    EdgeAgentResponse {
        agent_id,
        content: text("content"),
        model: text("model"),
        status: text("status"),
        error: value
            .get("error")
            .and_then(|v| v.as_str())
            .map(String::from),
        metadata,
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
