//! Evolution evaluator hook.
//!
//! After successful chat turns and on the periodic evaluation tick, agent
//! metrics are snapshotted under lock and handed to the registered engine
//! by value, outside any lock.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use evoclaw_core::agent::AgentMetrics;

/// A metrics snapshot passed to the evaluator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EvalSample {
    pub success_rate: f64,
    pub avg_response_ms: f64,
    pub cost_usd: f64,
    pub total_actions: u64,
}

impl From<&AgentMetrics> for EvalSample {
    fn from(metrics: &AgentMetrics) -> Self {
        EvalSample {
            success_rate: metrics.success_rate(),
            avg_response_ms: metrics.avg_response_ms,
            cost_usd: metrics.cost_usd,
            total_actions: metrics.total_actions,
        }
    }
}

/// Consumer of per-agent performance samples.
#[async_trait]
pub trait EvolutionEngine: Send + Sync {
    async fn evaluate(&self, agent_id: &str, sample: EvalSample) -> anyhow::Result<()>;
}

/// Default engine: traces the sample and does nothing else.
pub struct LoggingEvolutionEngine;

#[async_trait]
impl EvolutionEngine for LoggingEvolutionEngine {
    async fn evaluate(&self, agent_id: &str, sample: EvalSample) -> anyhow::Result<()> {
        debug!(
            agent = %agent_id,
            success_rate = sample.success_rate,
            avg_response_ms = sample.avg_response_ms,
            total_actions = sample.total_actions,
            "evaluation sample"
        );
        Ok(())
    }
}

/// Convenience alias for a shared engine.
pub type SharedEvolutionEngine = Arc<dyn EvolutionEngine>;
