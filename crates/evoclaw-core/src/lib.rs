//! Core building blocks of the Evoclaw orchestrator: bus types and queues,
//! agent registry, chat/tool types, the edge-worker protocol, the pending
//! correlation mailbox, the RSI outcome ledger, and configuration.

pub mod agent;
pub mod bus;
pub mod channel;
pub mod config;
pub mod edge;
pub mod pending;
pub mod rsi;
pub mod types;
pub mod utils;

pub use agent::{AgentDef, AgentMetrics, AgentRegistry, AgentState, AgentStatus};
pub use channel::Channel;
pub use edge::{EdgeAgentCommand, EdgeAgentInfo, EdgeAgentResponse, EdgeTransport};
pub use pending::PendingMap;
pub use rsi::{RsiLogger, RsiOutcome};
