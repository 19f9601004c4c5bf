//! Single-shot response mailboxes keyed by request id.
//!
//! The same register → wait → deregister-on-exit pattern backs request
//! correlation on the HTTP channel, the WebSocket channel, and the MQTT
//! transport, so it is implemented once here. Each id owns exactly one
//! `oneshot` slot; completing an unknown id is a no-op that tells the caller
//! nobody was waiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Errors produced while waiting on a pending slot.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timed out after {0:?} waiting for response")]
    Timeout(Duration),
    #[error("cancelled while waiting for response")]
    Cancelled,
    #[error("responder dropped without answering")]
    Dropped,
}

/// A map of in-flight requests, each with a single-slot response channel.
pub struct PendingMap<T> {
    slots: Mutex<HashMap<String, oneshot::Sender<T>>>,
}

impl<T: Send + 'static> PendingMap<T> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pending request and hand back its receiver.
    ///
    /// A second registration under the same id replaces the first; the
    /// original waiter then observes `Dropped`.
    pub fn register(&self, id: impl Into<String>) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().expect("pending map poisoned").insert(id.into(), tx);
        rx
    }

    /// Deliver a response to the waiter registered under `id`.
    ///
    /// Returns `false` when nobody is waiting (unknown id, or the waiter
    /// already timed out and deregistered).
    pub fn complete(&self, id: &str, value: T) -> bool {
        let tx = self.slots.lock().expect("pending map poisoned").remove(id);
        match tx {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the pending entry for `id`, if present.
    pub fn remove(&self, id: &str) {
        self.slots.lock().expect("pending map poisoned").remove(id);
    }

    /// Whether a waiter is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.slots.lock().expect("pending map poisoned").contains_key(id)
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("pending map poisoned").len()
    }

    /// Whether no requests are in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the response registered under `id`, deregistering on every
    /// exit path (response, timeout, cancellation, dropped sender).
    pub async fn wait(
        &self,
        id: &str,
        rx: oneshot::Receiver<T>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, WaitError> {
        let result = tokio::select! {
            res = rx => match res {
                Ok(value) => Ok(value),
                Err(_) => Err(WaitError::Dropped),
            },
            _ = tokio::time::sleep(timeout) => Err(WaitError::Timeout(timeout)),
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
        };
        self.remove(id);
        result
    }
}

impl<T: Send + 'static> Default for PendingMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
