//! Async message bus — the bounded inbox/outbox pair at the heart of the
//! orchestrator.
//!
//! Channels publish inbound `Message`s, the router consumes them; the
//! processing pipeline publishes outbound `Response`s, the fan-out task
//! consumes those. In-process producers block when a queue is full; the MQTT
//! path uses `try_publish_inbound` (drop on full) so a chatty broker cannot
//! stall its read loop.

use super::types::{Message, Response};
use tokio::sync::mpsc;

/// Default capacity of the inbox and outbox queues.
pub const DEFAULT_BUS_CAPACITY: usize = 1000;

/// Error returned by the non-blocking inbound offer.
#[derive(Debug, thiserror::Error)]
pub enum OfferError {
    #[error("inbox full, message dropped")]
    Full,
    #[error("inbox closed")]
    Closed,
}

/// The bounded message bus connecting channels and the orchestrator.
pub struct MessageBus {
    inbox_tx: mpsc::Sender<Message>,
    inbox_rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    outbox_tx: mpsc::Sender<Response>,
    outbox_rx: tokio::sync::Mutex<mpsc::Receiver<Response>>,
}

impl MessageBus {
    /// Create a new message bus with the given queue capacity.
    pub fn new(capacity: usize) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(capacity);
        let (outbox_tx, outbox_rx) = mpsc::channel(capacity);

        MessageBus {
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
            outbox_tx,
            outbox_rx: tokio::sync::Mutex::new(outbox_rx),
        }
    }

    /// Publish an inbound message, suspending while the inbox is full.
    pub async fn publish_inbound(&self, msg: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.inbox_tx.send(msg).await
    }

    /// Non-blocking inbound offer. Drops the message when the inbox is full.
    ///
    /// Used by the MQTT inbound path, where blocking would head-of-line
    /// block the broker read loop.
    pub fn try_publish_inbound(&self, msg: Message) -> Result<(), OfferError> {
        self.inbox_tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OfferError::Full,
            mpsc::error::TrySendError::Closed(_) => OfferError::Closed,
        })
    }

    /// Consume the next inbound message. Returns `None` once all senders
    /// are dropped.
    pub async fn consume_inbound(&self) -> Option<Message> {
        let mut rx = self.inbox_rx.lock().await;
        rx.recv().await
    }

    /// Publish an outbound response, suspending while the outbox is full.
    pub async fn publish_outbound(
        &self,
        resp: Response,
    ) -> Result<(), mpsc::error::SendError<Response>> {
        self.outbox_tx.send(resp).await
    }

    /// Consume the next outbound response. Returns `None` once all senders
    /// are dropped.
    pub async fn consume_outbound(&self) -> Option<Response> {
        let mut rx = self.outbox_rx.lock().await;
        rx.recv().await
    }

    /// Clone of the inbound sender, for fan-in tasks.
    pub fn inbound_sender(&self) -> mpsc::Sender<Message> {
        self.inbox_tx.clone()
    }

    /// Clone of the outbound sender, for processing tasks.
    pub fn outbound_sender(&self) -> mpsc::Sender<Response> {
        self.outbox_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
