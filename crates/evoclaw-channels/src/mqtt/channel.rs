//! Channel adapter over the MQTT transport.
//!
//! Inbound: messages the router synthesizes from legacy edge payloads.
//! Outbound: `message` command envelopes published to the target agent's
//! command topic. The fan-in side uses drop-on-full backpressure so broker
//! traffic never head-of-line blocks the event loop.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use evoclaw_core::bus::types::{Message, Response};
use evoclaw_core::channel::{Backpressure, Channel};
use evoclaw_core::edge::EdgeAgentCommand;

use super::transport::MqttTransport;

/// The MQTT channel.
pub struct MqttChannel {
    transport: Arc<MqttTransport>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl MqttChannel {
    /// Wrap a transport and the inbox receiver it produced.
    pub fn new(transport: Arc<MqttTransport>, inbox_rx: mpsc::Receiver<Message>) -> Self {
        Self {
            transport,
            rx: Mutex::new(Some(inbox_rx)),
        }
    }

    /// The underlying transport (for `edge_call` wiring).
    pub fn transport(&self) -> Arc<MqttTransport> {
        self.transport.clone()
    }
}

#[async_trait]
impl Channel for MqttChannel {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.transport.run().await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.transport.shutdown();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> anyhow::Result<()> {
        let command = EdgeAgentCommand::message(
            uuid::Uuid::new_v4().to_string(),
            &resp.content,
            resp.reply_to.as_deref(),
        );
        self.transport.publish_command(&resp.chat_id, &command).await?;
        debug!(agent = %resp.chat_id, "edge message sent");
        Ok(())
    }

    fn receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx.lock().expect("mqtt receiver poisoned").take()
    }

    fn backpressure(&self) -> Backpressure {
        Backpressure::Drop
    }
}
