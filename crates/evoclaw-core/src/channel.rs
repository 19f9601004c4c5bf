//! Channel trait — the abstract interface every messaging channel implements.
//!
//! Each channel (terminal, Telegram, MQTT, HTTP, WebSocket) maps an external
//! transport onto the internal `Message`/`Response` types:
//! - `start()` — begin polling/connection; long-running, safe to call once
//! - `stop()` — graceful shutdown; idempotent and safe before `start()`
//! - `send()` — deliver one outbound response
//! - `receiver()` — hand out the inbound stream (once)
//!
//! The orchestrator spawns one fan-in task per channel that drains the
//! receiver into the bus inbox, stamping the channel name.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::types::{Message, Response};

/// How the fan-in task behaves when the bus inbox is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backpressure {
    /// Suspend the producer until the inbox drains (in-process channels).
    #[default]
    Block,
    /// Drop the message with a warning (external brokers, where blocking
    /// would head-of-line block the read loop).
    Drop,
}

/// Every messaging channel implements this trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name (e.g. "telegram", "mqtt", "terminal").
    ///
    /// Must match `Response.channel` for outbound routing.
    fn name(&self) -> &str;

    /// Start listening for incoming traffic. Runs until `stop()`.
    async fn start(&self) -> anyhow::Result<()>;

    /// Graceful shutdown — stop listening and release resources.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver one outbound response to this channel.
    async fn send(&self, resp: &Response) -> anyhow::Result<()>;

    /// Take the inbound message stream.
    ///
    /// Yields the receiver exactly once; later calls return `None`. The
    /// stream closing signals that the channel has shut down.
    fn receiver(&self) -> Option<mpsc::Receiver<Message>>;

    /// Inbox policy for this channel's fan-in task.
    fn backpressure(&self) -> Backpressure {
        Backpressure::Block
    }
}

/// Default buffer size for a channel's internal inbound stream.
pub const CHANNEL_BUFFER: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    struct MockChannel {
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        tx: mpsc::Sender<Message>,
        rx: Mutex<Option<mpsc::Receiver<Message>>>,
        sent: Arc<tokio::sync::Mutex<Vec<String>>>,
    }

    impl MockChannel {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
            Self {
                started: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
                tx,
                rx: Mutex::new(Some(rx)),
                sent: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            "mock"
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            self.tx
                .send(Message::new("", "local", "default", "first line"))
                .await?;
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, resp: &Response) -> anyhow::Result<()> {
            self.sent.lock().await.push(resp.content.clone());
            Ok(())
        }

        fn receiver(&self) -> Option<mpsc::Receiver<Message>> {
            self.rx.lock().unwrap().take()
        }
    }

    #[tokio::test]
    async fn test_receiver_yields_once() {
        let ch = MockChannel::new();
        assert!(ch.receiver().is_some());
        assert!(ch.receiver().is_none());
    }

    #[tokio::test]
    async fn test_start_feeds_receiver() {
        let ch = MockChannel::new();
        let mut rx = ch.receiver().unwrap();
        ch.start().await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.content, "first line");
        // The channel name is stamped by the fan-in task, not the channel.
        assert_eq!(msg.channel, "");
    }

    #[tokio::test]
    async fn test_stop_before_start_is_safe() {
        let ch = MockChannel::new();
        ch.stop().await.unwrap();
        assert!(ch.stopped.load(Ordering::SeqCst));
        assert!(!ch.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_send_records() {
        let ch = MockChannel::new();
        ch.send(&Response::new("helper", "mock", "c1", "Hello!"))
            .await
            .unwrap();
        assert_eq!(ch.sent.lock().await.as_slice(), ["Hello!"]);
    }
}
