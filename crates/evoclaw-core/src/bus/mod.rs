//! The in-process message bus connecting channels and the orchestrator.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{Message, Response};
