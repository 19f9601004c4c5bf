//! ChatSync — the history-aware single-turn path used by interactive
//! channels and the CLI.
//!
//! Unlike the tool loop, this path performs exactly one provider call with
//! the caller-supplied history and keeps the agent's metrics current.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use evoclaw_core::agent::AgentRegistry;
use evoclaw_core::config::schema::RoutingConfig;
use evoclaw_core::types::ChatMessage;
use evoclaw_providers::{ChatRequest, ProviderRegistry};

use crate::evolution::{EvalSample, EvolutionEngine};

/// One synchronous chat request.
#[derive(Clone, Debug)]
pub struct ChatSyncRequest {
    pub agent_id: String,
    pub user_id: String,
    pub message: String,
    /// Prior conversation, oldest first.
    pub history: Vec<ChatMessage>,
}

/// The assembled reply.
#[derive(Clone, Debug)]
pub struct ChatSyncResponse {
    pub response: String,
    /// Full routed model string (prefix included).
    pub model: String,
    pub elapsed_ms: u64,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// The synchronous chat service.
pub struct ChatService {
    agents: Arc<AgentRegistry>,
    providers: Arc<ProviderRegistry>,
    routing: RoutingConfig,
    evaluator: Option<Arc<dyn EvolutionEngine>>,
}

impl ChatService {
    pub fn new(
        agents: Arc<AgentRegistry>,
        providers: Arc<ProviderRegistry>,
        routing: RoutingConfig,
        evaluator: Option<Arc<dyn EvolutionEngine>>,
    ) -> Self {
        Self {
            agents,
            providers,
            routing,
            evaluator,
        }
    }

    /// Resolve the model for an agent: its own preference, else the
    /// "complex" routing default.
    pub fn resolve_model(&self, agent_model: &str) -> String {
        if agent_model.is_empty() {
            self.routing.complex.clone()
        } else {
            agent_model.to_string()
        }
    }

    /// Run one chat turn.
    pub async fn chat_sync(
        &self,
        cancel: &CancellationToken,
        request: ChatSyncRequest,
    ) -> anyhow::Result<ChatSyncResponse> {
        let snapshot = self
            .agents
            .snapshot(&request.agent_id)
            .ok_or_else(|| anyhow::anyhow!("unknown agent: {}", request.agent_id))?;

        self.agents.mark_running(&request.agent_id);
        let result = self.chat_inner(cancel, &request, &snapshot.def).await;
        self.agents.mark_idle(&request.agent_id);

        if result.is_ok() {
            self.feed_evaluator(&request.agent_id).await;
        }
        result
    }

    async fn chat_inner(
        &self,
        cancel: &CancellationToken,
        request: &ChatSyncRequest,
        def: &evoclaw_core::agent::AgentDef,
    ) -> anyhow::Result<ChatSyncResponse> {
        let model = self.resolve_model(&def.model);
        let provider = self
            .providers
            .find(&model)
            .ok_or_else(|| anyhow::anyhow!("no providers registered"))?;

        let mut messages = request.history.clone();
        messages.push(ChatMessage::user(&request.message));

        let chat_request = ChatRequest::new(ProviderRegistry::strip_prefix(&model), messages)
            .with_system_prompt(&def.system_prompt);

        debug!(
            agent = %request.agent_id,
            user = %request.user_id,
            model = %model,
            history = request.history.len(),
            "chat_sync"
        );

        let started = Instant::now();
        let response = tokio::select! {
            r = provider.chat(&chat_request) => r,
            _ = cancel.cancelled() => Err(anyhow::anyhow!("chat cancelled")),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match response {
            Err(e) => {
                self.agents.update(&request.agent_id, |state| {
                    state.error_count += 1;
                    state.metrics.record_failure(elapsed_ms);
                });
                Err(e)
            }
            Ok(response) => {
                let (tokens_in, tokens_out) = response.token_counts();
                self.agents.update(&request.agent_id, |state| {
                    state
                        .metrics
                        .record_success(elapsed_ms, (tokens_in + tokens_out) as u64);
                });

                info!(
                    agent = %request.agent_id,
                    elapsed_ms,
                    tokens = tokens_in + tokens_out,
                    "chat_sync complete"
                );

                Ok(ChatSyncResponse {
                    response: response.content.unwrap_or_default(),
                    model,
                    elapsed_ms,
                    tokens_in,
                    tokens_out,
                })
            }
        }
    }

    /// Snapshot metrics under the lock, release, then evaluate by value.
    async fn feed_evaluator(&self, agent_id: &str) {
        let Some(evaluator) = &self.evaluator else {
            return;
        };
        let Some(snapshot) = self.agents.snapshot(agent_id) else {
            return;
        };
        let sample = EvalSample::from(&snapshot.metrics);
        if let Err(e) = evaluator.evaluate(agent_id, sample).await {
            tracing::warn!(agent = %agent_id, error = %e, "evaluator failed");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
