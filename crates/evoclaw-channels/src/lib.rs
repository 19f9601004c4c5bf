//! Channel adapters mapping external transports onto the orchestrator's
//! `Message`/`Response` types.

pub mod http;
pub mod mqtt;
pub mod telegram;
pub mod terminal;
pub mod websocket;

pub use http::HttpChannel;
pub use mqtt::{MqttChannel, MqttTransport};
pub use telegram::TelegramChannel;
pub use terminal::TerminalChannel;
pub use websocket::WebSocketChannel;
