//! rumqttc-backed edge transport.
//!
//! Drives the broker connection, keeps the topic discipline, and
//! implements `EdgeTransport` on top of the `EdgeRouter` state.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use evoclaw_core::bus::types::Message;
use evoclaw_core::channel::CHANNEL_BUFFER;
use evoclaw_core::config::schema::MqttConfig;
use evoclaw_core::edge::{
    broadcast_topic, commands_topic, CapabilityAd, EdgeAgentCommand, EdgeAgentInfo,
    EdgeAgentResponse, EdgeStatusReport, EdgeTransport, TOPIC_PREFIX,
};
use evoclaw_core::types::{ToolResult, ToolStatus};

use super::router::{parse_agent_topic, EdgeRouter};

/// How long a publish may wait for its broker ack.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Back-off after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// The broker-facing transport.
pub struct MqttTransport {
    router: Arc<EdgeRouter>,
    client: AsyncClient,
    event_loop: tokio::sync::Mutex<Option<EventLoop>>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl MqttTransport {
    /// Build the transport. Returns the receiver of messages the router
    /// synthesizes for the MQTT channel. The connection is established
    /// lazily by `run()`.
    pub fn new(config: &MqttConfig) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (inbox_tx, inbox_rx) = mpsc::channel(CHANNEL_BUFFER);

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        let (client, event_loop) = AsyncClient::new(options, 64);

        let transport = Arc::new(Self {
            router: Arc::new(EdgeRouter::new(inbox_tx)),
            client,
            event_loop: tokio::sync::Mutex::new(Some(event_loop)),
            connected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        (transport, inbox_rx)
    }

    /// The protocol state, shared with the channel.
    pub fn router(&self) -> &Arc<EdgeRouter> {
        &self.router
    }

    /// Whether the broker connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop the event loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Drive the broker connection until shutdown. Reconnects with backoff
    /// on connection errors; resubscribes on every connack (so a restart
    /// immediately replays retained capability ads).
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut event_loop = self
            .event_loop
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("mqtt transport already running"))?;

        info!("mqtt transport starting");
        loop {
            let event = tokio::select! {
                e = event_loop.poll() => e,
                _ = self.cancel.cancelled() => {
                    info!("mqtt transport shutting down");
                    break;
                }
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt connected");
                    self.connected.store(true, Ordering::SeqCst);
                    if let Err(e) = self.subscribe_all().await {
                        error!(error = %e, "mqtt subscribe failed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.dispatch_publish(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("mqtt broker disconnected");
                    self.connected.store(false, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    warn!(error = %e, "mqtt connection error, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Subscribe to the three agent wildcard patterns.
    async fn subscribe_all(&self) -> anyhow::Result<()> {
        for leaf in ["reports", "status", "capabilities"] {
            let filter = format!("{TOPIC_PREFIX}/agents/+/{leaf}");
            self.client.subscribe(&filter, QoS::AtLeastOnce).await?;
            debug!(filter = %filter, "subscribed");
        }
        Ok(())
    }

    /// Route one incoming publish to the right parser.
    fn dispatch_publish(&self, topic: &str, payload: &[u8]) {
        let Some((_agent_id, leaf)) = parse_agent_topic(topic) else {
            debug!(topic = %topic, "publish outside agent namespace");
            return;
        };

        match leaf {
            "reports" => {
                let kind = self.router.handle_report(topic, payload);
                debug!(topic = %topic, kind = ?kind, "report handled");
            }
            "status" => match serde_json::from_slice::<EdgeStatusReport>(payload) {
                Ok(report) => self.router.apply_status_report(&report),
                Err(e) => warn!(topic = %topic, error = %e, "malformed status"),
            },
            "capabilities" => match serde_json::from_slice::<CapabilityAd>(payload) {
                Ok(ad) => {
                    info!(agent = %ad.agent_id, capabilities = %ad.capabilities, "capability ad");
                    self.router.apply_capabilities(&ad);
                }
                Err(e) => warn!(topic = %topic, error = %e, "malformed capability ad"),
            },
            other => debug!(topic = %topic, leaf = %other, "ignored publish"),
        }
    }

    /// Publish a command envelope to one agent, awaiting the ack with a
    /// bounded timeout (publish-then-forget is not allowed).
    pub async fn publish_command(
        &self,
        agent_id: &str,
        command: &EdgeAgentCommand,
    ) -> anyhow::Result<()> {
        let topic = commands_topic(agent_id);
        let payload = serde_json::to_vec(command)?;

        tokio::time::timeout(
            PUBLISH_TIMEOUT,
            self.client.publish(&topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| anyhow::anyhow!("publish to {topic} timed out after {PUBLISH_TIMEOUT:?}"))?
        .map_err(|e| anyhow::anyhow!("publish to {topic} failed: {e}"))?;

        debug!(topic = %topic, command = %command.command, "command published");
        Ok(())
    }

    /// Publish to the broadcast topic.
    pub async fn publish_broadcast(&self, command: &EdgeAgentCommand) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(command)?;
        tokio::time::timeout(
            PUBLISH_TIMEOUT,
            self.client
                .publish(broadcast_topic(), QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| anyhow::anyhow!("broadcast publish timed out"))??;
        Ok(())
    }

    #[cfg(test)]
    fn force_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EdgeTransport for MqttTransport {
    fn online_agents(&self) -> Vec<EdgeAgentInfo> {
        self.router.online_agents()
    }

    fn online_agents_with_capabilities(&self) -> HashMap<String, String> {
        self.router.online_with_capabilities()
    }

    async fn send_prompt_and_wait(
        &self,
        agent_id: &str,
        prompt: &str,
        system_prompt: &str,
        timeout: Duration,
    ) -> anyhow::Result<EdgeAgentResponse> {
        // Fail fast before registering anything.
        if !self.is_connected() {
            anyhow::bail!("mqtt client not connected");
        }
        if !self.router.is_online(agent_id) {
            anyhow::bail!("edge agent {agent_id} is not online");
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let rx = self.router.register_prompt(&request_id);

        let command = EdgeAgentCommand::prompt(&request_id, prompt, system_prompt);
        if let Err(e) = self.publish_command(agent_id, &command).await {
            self.router.cancel_prompt(&request_id);
            return Err(e);
        }

        self.router
            .await_prompt(&request_id, rx, timeout, &self.cancel)
            .await
    }

    async fn call_tool(
        &self,
        agent_id: &str,
        tool: &str,
        parameters: serde_json::Value,
        timeout: Duration,
    ) -> anyhow::Result<ToolResult> {
        if !self.is_connected() {
            anyhow::bail!("mqtt client not connected");
        }
        if !self.router.is_online(agent_id) {
            anyhow::bail!("edge agent {agent_id} is not online");
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let rx = self.router.register_tool_call(&request_id);
        let started = Instant::now();

        let command = EdgeAgentCommand::tool(&request_id, tool, parameters, timeout);
        if let Err(e) = self.publish_command(agent_id, &command).await {
            self.router.cancel_tool_call(&request_id);
            return Err(e);
        }

        let payload = self
            .router
            .await_tool_result(&request_id, rx, timeout, &self.cancel)
            .await?;

        Ok(tool_result_from_payload(
            tool,
            &payload,
            started.elapsed().as_millis() as u64,
        ))
    }
}

/// Interpret a worker's tool-result payload.
fn tool_result_from_payload(tool: &str, payload: &serde_json::Value, elapsed_ms: u64) -> ToolResult {
    let status_ok = payload
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s == "success" || s == "ok")
        .unwrap_or_else(|| payload.get("error").is_none());

    let rendered = payload
        .get("result")
        .or_else(|| payload.get("output"))
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .unwrap_or_default();

    let mut result = if status_ok {
        ToolResult::success(tool, rendered, elapsed_ms)
    } else {
        let error = payload
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("edge tool failed")
            .to_string();
        ToolResult::error(tool, error, "edge_tool", elapsed_ms)
    };

    result.exit_code = payload
        .get("exit_code")
        .and_then(|v| v.as_i64())
        .map(|c| c as i32);
    if result.status == ToolStatus::Success && result.result.is_empty() {
        result.result = "(no output)".into();
    }
    result
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
