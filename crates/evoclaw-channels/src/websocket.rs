//! WebSocket API channel — the same message-id correlation as the HTTP
//! channel, held open over a socket.
//!
//! Each client frame is a JSON request; the connection task registers a
//! pending slot, enqueues the message, and writes the correlated response
//! (or a timeout error) back on the same socket.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response as AxumResponse;
use axum::routing::any;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use evoclaw_core::bus::types::{Message, Response};
use evoclaw_core::channel::{Channel, CHANNEL_BUFFER};
use evoclaw_core::pending::{PendingMap, WaitError};

// ─────────────────────────────────────────────
// Frame types
// ─────────────────────────────────────────────

/// One inbound client frame.
#[derive(Debug, Deserialize)]
struct WsRequest {
    message: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
}

/// One outbound frame.
#[derive(Debug, Serialize)]
struct WsReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    message_id: String,
}

// ─────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────

#[derive(Clone)]
struct WsState {
    pending: Arc<PendingMap<Response>>,
    tx: mpsc::Sender<Message>,
    timeout: Duration,
    cancel: CancellationToken,
}

/// Correlate one client frame to its response.
async fn process_frame(state: &WsState, request: WsRequest) -> WsReply {
    let message_id = uuid::Uuid::new_v4().to_string();
    let rx = state.pending.register(&message_id);

    let mut msg = Message::new(
        "",
        request.user_id.as_deref().unwrap_or("websocket"),
        "ws",
        &request.message,
    )
    .with_meta("message_id", &message_id);
    if let Some(agent_id) = &request.agent_id {
        msg = msg.with_meta("agent_id", agent_id);
    }

    if state.tx.send(msg).await.is_err() {
        state.pending.remove(&message_id);
        return WsReply {
            response: None,
            agent_id: None,
            error: Some("channel shutting down".into()),
            message_id,
        };
    }

    match state
        .pending
        .wait(&message_id, rx, state.timeout, &state.cancel)
        .await
    {
        Ok(resp) => WsReply {
            response: Some(resp.content),
            agent_id: Some(resp.agent_id),
            error: None,
            message_id,
        },
        Err(WaitError::Timeout(t)) => WsReply {
            response: None,
            agent_id: None,
            error: Some(format!("no response within {t:?}")),
            message_id,
        },
        Err(_) => WsReply {
            response: None,
            agent_id: None,
            error: Some("request aborted".into()),
            message_id,
        },
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> AxumResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection loop: one request at a time.
async fn handle_socket(mut socket: WebSocket, state: WsState) {
    debug!("websocket client connected");
    loop {
        let frame = tokio::select! {
            f = socket.recv() => f,
            _ = state.cancel.cancelled() => break,
        };
        let Some(Ok(frame)) = frame else {
            break;
        };

        let text = match frame {
            WsFrame::Text(text) => text,
            WsFrame::Close(_) => break,
            _ => continue,
        };

        let reply = match serde_json::from_str::<WsRequest>(text.as_str()) {
            Ok(request) => process_frame(&state, request).await,
            Err(e) => WsReply {
                response: None,
                agent_id: None,
                error: Some(format!("malformed request: {e}")),
                message_id: String::new(),
            },
        };

        let json = match serde_json::to_string(&reply) {
            Ok(j) => j,
            Err(_) => continue,
        };
        if socket.send(WsFrame::Text(json.into())).await.is_err() {
            break;
        }
    }
    debug!("websocket client disconnected");
}

// ─────────────────────────────────────────────
// WebSocketChannel
// ─────────────────────────────────────────────

/// The WebSocket correlation channel.
pub struct WebSocketChannel {
    bind: String,
    state: WsState,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl WebSocketChannel {
    /// Channel serving `/ws` upgrades on `bind`.
    pub fn new(bind: impl Into<String>, request_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        Self {
            bind: bind.into(),
            state: WsState {
                pending: Arc::new(PendingMap::new()),
                tx,
                timeout: request_timeout,
                cancel: CancellationToken::new(),
            },
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Number of in-flight correlated requests.
    pub fn pending_len(&self) -> usize {
        self.state.pending.len()
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn start(&self) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/ws", any(ws_handler))
            .with_state(self.state.clone());

        let listener = tokio::net::TcpListener::bind(&self.bind).await?;
        info!(bind = %self.bind, "websocket channel listening");

        let cancel = self.state.cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("websocket channel stopped");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.state.cancel.cancel();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> anyhow::Result<()> {
        let Some(message_id) = &resp.message_id else {
            anyhow::bail!("websocket response without message_id");
        };

        if self.state.pending.complete(message_id, resp.clone()) {
            Ok(())
        } else {
            warn!(message_id = %message_id, "no pending websocket request");
            anyhow::bail!("no pending request for message_id {message_id}")
        }
    }

    fn receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx.lock().expect("websocket receiver poisoned").take()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> WebSocketChannel {
        WebSocketChannel::new("127.0.0.1:0", Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let ch = Arc::new(channel());
        let mut rx = ch.receiver().unwrap();

        let responder = ch.clone();
        tokio::spawn(async move {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.chat_id, "ws");
            let resp = Response::to_origin("alex", &msg, "pong");
            responder.send(&resp).await.unwrap();
        });

        let reply = process_frame(
            &ch.state,
            WsRequest {
                message: "ping".into(),
                user_id: None,
                agent_id: None,
            },
        )
        .await;

        assert_eq!(reply.response.as_deref(), Some("pong"));
        assert_eq!(reply.agent_id.as_deref(), Some("alex"));
        assert!(reply.error.is_none());
        assert_eq!(ch.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_frame_timeout() {
        let ch = channel();
        let _rx = ch.receiver().unwrap();

        let reply = process_frame(
            &ch.state,
            WsRequest {
                message: "lost".into(),
                user_id: None,
                agent_id: None,
            },
        )
        .await;

        assert!(reply.response.is_none());
        assert!(reply.error.unwrap().contains("no response"));
        assert_eq!(ch.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_send_without_waiter_is_error() {
        let ch = channel();
        let mut resp = Response::new("alex", "websocket", "ws", "late");
        resp.message_id = Some("ghost".into());
        assert!(ch.send(&resp).await.is_err());
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel().name(), "websocket");
    }
}
