//! MQTT edge-worker transport.
//!
//! Split in three layers: `EdgeRouter` holds the protocol state (worker
//! registry, pending correlation, report parsing) with no broker I/O;
//! `MqttTransport` drives the rumqttc client and implements
//! `EdgeTransport`; `MqttChannel` adapts the transport to the channel
//! contract.

pub mod channel;
pub mod router;
pub mod transport;

pub use channel::MqttChannel;
pub use router::EdgeRouter;
pub use transport::MqttTransport;
