//! Terminal channel — line-oriented stdin/stdout adapter.
//!
//! Each stdin line becomes one inbound message; responses print to stdout
//! with the agent id as prefix. The widget layer lives elsewhere; this
//! channel is deliberately plain.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

use evoclaw_core::bus::types::{Message, Response};
use evoclaw_core::channel::{Channel, CHANNEL_BUFFER};

/// The stdin/stdout channel.
pub struct TerminalChannel {
    tx: mpsc::Sender<Message>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
    shutdown: std::sync::Arc<Notify>,
}

impl TerminalChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown: std::sync::Arc::new(Notify::new()),
        }
    }
}

impl Default for TerminalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for TerminalChannel {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("terminal channel reading stdin");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                l = lines.next_line() => l?,
                _ = self.shutdown.notified() => {
                    info!("terminal channel shutting down");
                    break;
                }
            };

            let Some(line) = line else {
                info!("stdin closed, terminal channel exiting");
                break;
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(chars = trimmed.len(), "terminal line");
            if self
                .tx
                .send(Message::new("", "local", "terminal", trimmed))
                .await
                .is_err()
            {
                break;
            }
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> anyhow::Result<()> {
        println!("\n[{}] {}\n", resp.agent_id, resp.content);
        Ok(())
    }

    fn receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx.lock().expect("terminal receiver poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(TerminalChannel::new().name(), "terminal");
    }

    #[test]
    fn test_receiver_yields_once() {
        let ch = TerminalChannel::new();
        assert!(ch.receiver().is_some());
        assert!(ch.receiver().is_none());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let ch = TerminalChannel::new();
        ch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_does_not_fail() {
        let ch = TerminalChannel::new();
        ch.send(&Response::new("alex", "terminal", "terminal", "hello"))
            .await
            .unwrap();
    }
}
