//! Provider registry — maps model-string prefixes to providers.
//!
//! Model strings look like `"openai/gpt-4o"`: the prefix up to the first
//! `/` names the provider, the rest is the model passed to it. An unknown
//! prefix falls back to the first registered provider (permissive by
//! design; single-provider deployments route everything).

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::traits::ModelProvider;

/// Insertion-ordered provider registry.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Register a provider. A duplicate name replaces the original in place.
    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        info!(provider = provider.name(), "registered provider");
        match self.providers.iter_mut().find(|p| p.name() == provider.name()) {
            Some(slot) => *slot = provider,
            None => self.providers.push(provider),
        }
    }

    /// Look up the provider for a model string.
    ///
    /// The prefix up to the first `/` selects by exact name; any other
    /// prefix (or no prefix) falls back to the first registered provider.
    /// Returns `None` only when the registry is empty.
    pub fn find(&self, model: &str) -> Option<Arc<dyn ModelProvider>> {
        let prefix = model.split('/').next().unwrap_or(model);

        if let Some(provider) = self.providers.iter().find(|p| p.name() == prefix) {
            return Some(provider.clone());
        }

        match self.providers.first() {
            Some(first) => {
                debug!(
                    model = %model,
                    fallback = first.name(),
                    "no provider matches prefix, using first registered"
                );
                Some(first.clone())
            }
            None => {
                warn!(model = %model, "no providers registered");
                None
            }
        }
    }

    /// Strip the provider prefix from a model string.
    ///
    /// `"openai/gpt-4o"` → `"gpt-4o"`; a string without `/` is returned
    /// unchanged.
    pub fn strip_prefix(model: &str) -> &str {
        match model.split_once('/') {
            Some((_, rest)) => rest,
            None => model,
        }
    }

    /// Names of all registered providers, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ChatRequest, ChatResponse};
    use async_trait::async_trait;

    struct NamedProvider {
        provider_name: String,
    }

    impl NamedProvider {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                provider_name: name.into(),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for NamedProvider {
        async fn chat(&self, _request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse::default())
        }

        fn name(&self) -> &str {
            &self.provider_name
        }

        fn default_model(&self) -> &str {
            "default"
        }
    }

    #[test]
    fn test_find_exact_prefix() {
        let mut reg = ProviderRegistry::new();
        reg.register(NamedProvider::new("openai"));
        reg.register(NamedProvider::new("anthropic"));

        let p = reg.find("anthropic/claude-sonnet-4-20250514").unwrap();
        assert_eq!(p.name(), "anthropic");
    }

    #[test]
    fn test_find_unknown_prefix_falls_back_to_first() {
        let mut reg = ProviderRegistry::new();
        reg.register(NamedProvider::new("openai"));
        reg.register(NamedProvider::new("anthropic"));

        let p = reg.find("mystery/model-x").unwrap();
        assert_eq!(p.name(), "openai");
    }

    #[test]
    fn test_find_no_prefix_falls_back_to_first() {
        let mut reg = ProviderRegistry::new();
        reg.register(NamedProvider::new("openai"));

        let p = reg.find("gpt-4o").unwrap();
        assert_eq!(p.name(), "openai");
    }

    #[test]
    fn test_find_empty_registry() {
        let reg = ProviderRegistry::new();
        assert!(reg.find("openai/gpt-4o").is_none());
    }

    #[test]
    fn test_register_replaces_same_name_in_place() {
        let mut reg = ProviderRegistry::new();
        reg.register(NamedProvider::new("openai"));
        reg.register(NamedProvider::new("anthropic"));
        reg.register(NamedProvider::new("openai"));

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.names(), vec!["openai", "anthropic"]);
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(ProviderRegistry::strip_prefix("openai/gpt-4o"), "gpt-4o");
        assert_eq!(
            ProviderRegistry::strip_prefix("anthropic/claude/extra"),
            "claude/extra"
        );
        assert_eq!(ProviderRegistry::strip_prefix("plainmodel"), "plainmodel");
    }
}
