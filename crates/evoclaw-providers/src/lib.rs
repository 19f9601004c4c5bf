//! LLM provider abstraction and implementations.

pub mod http_provider;
pub mod registry;
pub mod traits;

pub use http_provider::HttpProvider;
pub use registry::ProviderRegistry;
pub use traits::{ChatRequest, ChatResponse, ModelProvider};
