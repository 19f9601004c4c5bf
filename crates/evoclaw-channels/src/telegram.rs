//! Telegram channel — raw Bot API over HTTPS long polling.
//!
//! Features:
//! - `getUpdates` long polling with monotonic offset tracking (no webhook)
//! - Text messages only; other update kinds are skipped
//! - Allow-list by user ID or username
//! - Commands: /start, /help, /status, /reset (with `@botname` stripping)
//! - Message splitting for >4096 char responses
//! - Outbound `sendMessage` with optional reply-to

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use evoclaw_core::agent::AgentRegistry;
use evoclaw_core::bus::types::{Message, Response};
use evoclaw_core::channel::{Channel, CHANNEL_BUFFER};

/// Telegram message length limit.
const TELEGRAM_MAX_LEN: usize = 4096;

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 60;

/// Back-off after a polling error, in seconds.
const POLL_RETRY_SECS: u64 = 5;

// ─────────────────────────────────────────────
// Bot API wire types
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    #[serde(default)]
    from: Option<TgUser>,
    chat: TgChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type", default)]
    chat_type: String,
}

// ─────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────

/// Parse a bot command: `/name args` → `(lowercased name, trimmed args)`.
///
/// An optional `@botname` suffix on the command is stripped. Returns `None`
/// for text that is not a command.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args),
        None => (rest, ""),
    };

    let name = name.split('@').next().unwrap_or(name);
    if name.is_empty() {
        return None;
    }

    Some((name.to_lowercase(), args.trim().to_string()))
}

/// Split a message into chunks that fit Telegram's length limit,
/// preferring newline boundaries.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split_inclusive('\n') {
        if current.chars().count() + line.chars().count() > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        // A single oversized line is hard-split.
        if line.chars().count() > max_len {
            let mut buf = String::new();
            for c in line.chars() {
                if buf.chars().count() == max_len {
                    chunks.push(std::mem::take(&mut buf));
                }
                buf.push(c);
            }
            current = buf;
        } else {
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ─────────────────────────────────────────────
// TelegramChannel
// ─────────────────────────────────────────────

/// Telegram bot channel using long polling.
pub struct TelegramChannel {
    /// Bot API base (e.g. `https://api.telegram.org/bot<token>`).
    api_base: String,
    http: reqwest::Client,
    /// Allow-list of user IDs / usernames. Empty = allow everyone.
    allowed_users: Vec<String>,
    /// Registry, for the /status command.
    agents: Arc<AgentRegistry>,
    tx: mpsc::Sender<Message>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
    shutdown: Arc<Notify>,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(token: &str, allowed_users: Vec<String>, agents: Arc<AgentRegistry>) -> Self {
        Self::with_api_base(
            format!("https://api.telegram.org/bot{token}"),
            allowed_users,
            agents,
        )
    }

    /// Channel against an explicit API base (used by tests).
    pub fn with_api_base(
        api_base: String,
        allowed_users: Vec<String>,
        agents: Arc<AgentRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        Self {
            api_base,
            http: reqwest::Client::new(),
            allowed_users,
            agents,
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Check if a sender is allowed. Matches user id or username; an empty
    /// allow-list allows everyone.
    fn is_allowed(&self, user_id: &str, username: &str) -> bool {
        if self.allowed_users.is_empty() {
            return true;
        }
        self.allowed_users
            .iter()
            .any(|u| u == user_id || (!username.is_empty() && u == username))
    }

    /// Render the /status reply.
    fn render_status(&self) -> String {
        let mut out = String::from("📊 Agent Status\n");
        let snapshots = self.agents.snapshots();
        if snapshots.is_empty() {
            out.push_str("\nNo agents registered.");
            return out;
        }
        for state in snapshots {
            let status = serde_json::to_value(state.status)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "unknown".into());
            out.push_str(&format!(
                "\n• {} — {} ({} messages, {} errors)",
                state.def.id, status, state.message_count, state.error_count
            ));
        }
        out
    }

    /// One `getUpdates` long poll. Returns the next offset.
    async fn poll_updates(&self, offset: i64) -> anyhow::Result<i64> {
        let url = format!("{}/getUpdates", self.api_base);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .send()
            .await?;

        let body: ApiResponse<Vec<Update>> = resp.json().await?;
        if !body.ok {
            anyhow::bail!(
                "getUpdates failed: {}",
                body.description.unwrap_or_else(|| "unknown error".into())
            );
        }

        let mut next_offset = offset;
        for update in body.result.unwrap_or_default() {
            next_offset = next_offset.max(update.update_id + 1);
            if let Some(message) = update.message {
                self.handle_message(message).await;
            }
        }
        Ok(next_offset)
    }

    /// Handle one incoming Telegram message.
    async fn handle_message(&self, message: TgMessage) {
        // Text only; media updates are skipped.
        let Some(text) = message.text else {
            debug!("skipping non-text telegram update");
            return;
        };

        let (user_id, username, first_name) = match &message.from {
            Some(user) => (
                user.id.to_string(),
                user.username.clone().unwrap_or_default(),
                user.first_name.clone().unwrap_or_default(),
            ),
            None => return,
        };
        let chat_id = message.chat.id.to_string();

        if !self.is_allowed(&user_id, &username) {
            warn!(user = %user_id, chat = %chat_id, "unauthorized telegram user, ignoring");
            return;
        }

        if let Some((command, _args)) = parse_command(&text) {
            self.handle_command(&command, &first_name, &chat_id).await;
            return;
        }

        let msg = Message::new("", &user_id, &chat_id, text)
            .with_meta("message_id", message.message_id.to_string())
            .with_meta("username", username)
            .with_meta("chat_type", message.chat.chat_type.clone());

        if self.tx.send(msg).await.is_err() {
            error!("telegram inbound stream closed");
        }
    }

    /// Handle a bot command with a direct reply.
    async fn handle_command(&self, command: &str, first_name: &str, chat_id: &str) {
        let reply = match command {
            "start" => format!(
                "👋 Hi {first_name}! I'm an Evoclaw agent.\n\n\
                 Send me any message and I'll route it to an agent.\n\n\
                 Commands:\n\
                 /status — Agent fleet status\n\
                 /help — Show available commands\n\
                 /reset — Clear conversation history"
            ),
            "help" => "🤖 Commands\n\n\
                 /start — Start the bot\n\
                 /status — Agent fleet status\n\
                 /reset — Clear conversation history\n\
                 /help — Show this message"
                .to_string(),
            "status" => self.render_status(),
            "reset" => "🔄 Conversation history cleared.".to_string(),
            _ => {
                debug!(command = command, "unknown telegram command");
                return;
            }
        };

        if let Err(e) = self.send_message(chat_id, &reply, None).await {
            error!(error = %e, "failed to send command reply");
        }
    }

    /// Issue one `sendMessage` call.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<i64>,
    ) -> anyhow::Result<()> {
        let url = format!("{}/sendMessage", self.api_base);
        let mut body = serde_json::json!({
            "chat_id": chat_id.parse::<i64>().unwrap_or_default(),
            "text": text,
        });
        if let Some(id) = reply_to {
            body["reply_to_message_id"] = serde_json::json!(id);
        }

        let resp = self.http.post(&url).json(&body).send().await?;
        let parsed: ApiResponse<serde_json::Value> = resp.json().await?;
        if !parsed.ok {
            anyhow::bail!(
                "sendMessage failed: {}",
                parsed.description.unwrap_or_else(|| "unknown error".into())
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("telegram channel polling for updates");
        let mut offset: i64 = 0;

        loop {
            tokio::select! {
                polled = self.poll_updates(offset) => {
                    match polled {
                        Ok(next) => offset = next,
                        Err(e) => {
                            error!(error = %e, "telegram polling error");
                            tokio::time::sleep(std::time::Duration::from_secs(POLL_RETRY_SECS)).await;
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("telegram channel shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> anyhow::Result<()> {
        let reply_to = resp.message_id.as_deref().and_then(|id| id.parse().ok());

        for chunk in split_message(&resp.content, TELEGRAM_MAX_LEN) {
            self.send_message(&resp.chat_id, &chunk, reply_to).await?;
        }
        debug!(chat_id = %resp.chat_id, "telegram message sent");
        Ok(())
    }

    fn receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx.lock().expect("telegram receiver poisoned").take()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
