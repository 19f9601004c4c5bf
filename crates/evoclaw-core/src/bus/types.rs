//! Bus event types — messages flowing between channels and the orchestrator.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// An inbound message from a channel to the orchestrator.
#[derive(Clone, Debug)]
pub struct Message {
    /// Unique message id (uuid v4).
    pub id: String,
    /// Channel name (e.g. "telegram", "mqtt", "terminal"). Stamped by the
    /// fan-in task before the message enters the inbox.
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier within the channel.
    pub chat_id: String,
    /// Text content of the message.
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Optional id of the message this one replies to.
    pub reply_to: Option<String>,
    /// Channel-specific metadata (e.g. username, chat type, mqtt topic,
    /// "message_id" for correlation-based channels).
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Create a new inbound message with minimal required fields.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            reply_to: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata key/value, builder-style.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An outbound response from the orchestrator to a channel.
#[derive(Clone, Debug)]
pub struct Response {
    /// Id of the agent that produced the response.
    pub agent_id: String,
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Id of the inbound message this responds to.
    pub reply_to: Option<String>,
    /// Channel-specific metadata.
    pub metadata: HashMap<String, String>,
    /// Correlation id for channels that route replies to a waiting caller
    /// (HTTP, WebSocket).
    pub message_id: Option<String>,
}

impl Response {
    /// Create a new response.
    pub fn new(
        agent_id: impl Into<String>,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Response {
            agent_id: agent_id.into(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            metadata: HashMap::new(),
            message_id: None,
        }
    }

    /// Build the response addressed back to the origin of `msg`, carrying
    /// over the correlation id if the channel set one.
    pub fn to_origin(agent_id: impl Into<String>, msg: &Message, content: impl Into<String>) -> Self {
        Response {
            agent_id: agent_id.into(),
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            content: content.into(),
            reply_to: Some(msg.id.clone()),
            metadata: HashMap::new(),
            message_id: msg.metadata.get("message_id").cloned(),
        }
    }
}
