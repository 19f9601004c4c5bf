//! HTTP API channel — request/response correlation over a bounded wait.
//!
//! `POST /chat` registers a pending slot keyed by a fresh `message_id`,
//! enqueues the message, and holds the request open until the correlated
//! response arrives or the timeout fires. `send()` with no waiting caller
//! is an error.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
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
// API types
// ─────────────────────────────────────────────

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatApiRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Optional explicit target agent.
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Reply body.
#[derive(Debug, Serialize)]
pub struct ChatApiResponse {
    pub response: String,
    pub agent_id: String,
    pub message_id: String,
}

// ─────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    pending: Arc<PendingMap<Response>>,
    tx: mpsc::Sender<Message>,
    timeout: Duration,
    cancel: CancellationToken,
}

/// Correlated request core, shared by the handler and the tests.
async fn process_chat(
    state: &AppState,
    request: ChatApiRequest,
) -> Result<ChatApiResponse, (StatusCode, String)> {
    let message_id = uuid::Uuid::new_v4().to_string();
    let rx = state.pending.register(&message_id);

    let mut msg = Message::new(
        "",
        request.user_id.as_deref().unwrap_or("http"),
        "api",
        &request.message,
    )
    .with_meta("message_id", &message_id);
    if let Some(agent_id) = &request.agent_id {
        msg = msg.with_meta("agent_id", agent_id);
    }

    if state.tx.send(msg).await.is_err() {
        state.pending.remove(&message_id);
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "channel shutting down".into(),
        ));
    }

    match state
        .pending
        .wait(&message_id, rx, state.timeout, &state.cancel)
        .await
    {
        Ok(response) => Ok(ChatApiResponse {
            response: response.content,
            agent_id: response.agent_id,
            message_id,
        }),
        Err(WaitError::Timeout(t)) => Err((
            StatusCode::GATEWAY_TIMEOUT,
            format!("no response within {t:?}"),
        )),
        Err(_) => Err((StatusCode::SERVICE_UNAVAILABLE, "request aborted".into())),
    }
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatApiRequest>,
) -> Result<Json<ChatApiResponse>, (StatusCode, String)> {
    process_chat(&state, request).await.map(Json)
}

// ─────────────────────────────────────────────
// HttpChannel
// ─────────────────────────────────────────────

/// The HTTP correlation channel.
pub struct HttpChannel {
    bind: String,
    state: AppState,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl HttpChannel {
    /// Channel serving `POST /chat` on `bind`.
    pub fn new(bind: impl Into<String>, request_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        Self {
            bind: bind.into(),
            state: AppState {
                pending: Arc::new(PendingMap::new()),
                tx,
                timeout: request_timeout,
                cancel: CancellationToken::new(),
            },
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Number of callers currently waiting for a response.
    pub fn pending_len(&self) -> usize {
        self.state.pending.len()
    }
}

#[async_trait]
impl Channel for HttpChannel {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/chat", post(chat_handler))
            .with_state(self.state.clone());

        let listener = tokio::net::TcpListener::bind(&self.bind).await?;
        info!(bind = %self.bind, "http channel listening");

        let cancel = self.state.cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("http channel stopped");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.state.cancel.cancel();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> anyhow::Result<()> {
        let Some(message_id) = &resp.message_id else {
            anyhow::bail!("http response without message_id");
        };

        if self.state.pending.complete(message_id, resp.clone()) {
            debug!(message_id = %message_id, "http response delivered");
            Ok(())
        } else {
            warn!(message_id = %message_id, "no pending http request");
            anyhow::bail!("no pending request for message_id {message_id}")
        }
    }

    fn receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx.lock().expect("http receiver poisoned").take()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
