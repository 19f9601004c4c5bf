//! Agent definitions, runtime state, and the registry.
//!
//! `AgentState` is owned by the orchestrator and shared by id. The registry
//! holds one `RwLock` per agent so metric updates never contend across
//! agents; the outer map lock is only held long enough to clone the `Arc`.
//! Neither lock is ever held across an external call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

// ─────────────────────────────────────────────
// Definitions (from config)
// ─────────────────────────────────────────────

/// A configured agent persona.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDef {
    /// Stable agent identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Agent type (free-form, e.g. "assistant", "worker").
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Preferred model; empty means "use the routing default".
    pub model: String,
    /// System prompt for every conversation on this agent's behalf.
    pub system_prompt: String,
    /// Declared skills/capabilities, used for tool filtering.
    pub capabilities: Vec<String>,
}

/// Lifecycle status of an agent.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Evolving,
    Error,
}

// ─────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────

/// Accumulated per-agent metrics.
///
/// Invariant: `successful_actions + failed_actions <= total_actions`, and
/// `avg_response_ms` is the arithmetic mean over `total_actions`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub avg_response_ms: f64,
    #[serde(default)]
    pub custom: HashMap<String, f64>,
}

impl AgentMetrics {
    /// Record one successful action, folding `elapsed_ms` into the running
    /// mean and accumulating token usage.
    pub fn record_success(&mut self, elapsed_ms: u64, tokens: u64) {
        self.total_actions += 1;
        self.successful_actions += 1;
        self.tokens_used += tokens;
        self.fold_elapsed(elapsed_ms);
    }

    /// Record one failed action.
    pub fn record_failure(&mut self, elapsed_ms: u64) {
        self.total_actions += 1;
        self.failed_actions += 1;
        self.fold_elapsed(elapsed_ms);
    }

    /// Fraction of total actions that succeeded (1.0 when nothing ran yet).
    pub fn success_rate(&self) -> f64 {
        if self.total_actions == 0 {
            1.0
        } else {
            self.successful_actions as f64 / self.total_actions as f64
        }
    }

    fn fold_elapsed(&mut self, elapsed_ms: u64) {
        let n = self.total_actions as f64;
        self.avg_response_ms = self.avg_response_ms * (n - 1.0) / n + elapsed_ms as f64 / n;
    }
}

// ─────────────────────────────────────────────
// State
// ─────────────────────────────────────────────

/// Runtime state of one agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub def: AgentDef,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub message_count: u64,
    pub error_count: u64,
    pub metrics: AgentMetrics,
}

impl AgentState {
    /// Fresh idle state for a definition.
    pub fn new(def: AgentDef) -> Self {
        let now = Utc::now();
        AgentState {
            def,
            status: AgentStatus::Idle,
            started_at: now,
            last_active: now,
            message_count: 0,
            error_count: 0,
            metrics: AgentMetrics::default(),
        }
    }
}

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Registry of agent states, keyed by id, with stable registration order.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<RwLock<AgentState>>>>,
    order: RwLock<Vec<String>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Register an agent. Overwrites state for a duplicate id but keeps its
    /// original position in the order.
    pub fn register(&self, def: AgentDef) {
        let id = def.id.clone();
        info!(agent = %id, "registered agent");

        let mut agents = self.agents.write().expect("agent map poisoned");
        if agents
            .insert(id.clone(), Arc::new(RwLock::new(AgentState::new(def))))
            .is_none()
        {
            self.order.write().expect("agent order poisoned").push(id);
        }
    }

    /// Handle to one agent's state.
    pub fn get(&self, id: &str) -> Option<Arc<RwLock<AgentState>>> {
        self.agents.read().expect("agent map poisoned").get(id).cloned()
    }

    /// Id of the first registered agent, if any.
    pub fn first_id(&self) -> Option<String> {
        self.order.read().expect("agent order poisoned").first().cloned()
    }

    /// All agent ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.order.read().expect("agent order poisoned").clone()
    }

    /// Clone of one agent's current state (snapshot taken under the lock,
    /// released before the caller does anything with it).
    pub fn snapshot(&self, id: &str) -> Option<AgentState> {
        self.get(id)
            .map(|state| state.read().expect("agent state poisoned").clone())
    }

    /// Snapshots of every agent, in registration order.
    pub fn snapshots(&self) -> Vec<AgentState> {
        self.ids().iter().filter_map(|id| self.snapshot(id)).collect()
    }

    /// Run a closure against one agent's state under its write lock.
    ///
    /// Returns `false` (with a warning) for unknown ids.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut AgentState),
    {
        match self.get(id) {
            Some(state) => {
                let mut guard = state.write().expect("agent state poisoned");
                f(&mut guard);
                true
            }
            None => {
                warn!(agent = %id, "update on unknown agent");
                false
            }
        }
    }

    /// Flip an agent to running and bump its message counter.
    pub fn mark_running(&self, id: &str) {
        self.update(id, |s| {
            s.status = AgentStatus::Running;
            s.last_active = Utc::now();
            s.message_count += 1;
        });
    }

    /// Revert an agent to idle.
    pub fn mark_idle(&self, id: &str) {
        self.update(id, |s| {
            s.status = AgentStatus::Idle;
            s.last_active = Utc::now();
        });
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.read().expect("agent map poisoned").len()
    }

    /// Whether no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: &str) -> AgentDef {
        AgentDef {
            id: id.into(),
            name: format!("Agent {id}"),
            agent_type: "assistant".into(),
            model: String::new(),
            system_prompt: "You are helpful.".into(),
            capabilities: vec![],
        }
    }

    #[test]
    fn test_register_and_snapshot() {
        let reg = AgentRegistry::new();
        reg.register(def("alex"));

        let snap = reg.snapshot("alex").unwrap();
        assert_eq!(snap.def.id, "alex");
        assert_eq!(snap.status, AgentStatus::Idle);
        assert_eq!(snap.message_count, 0);
    }

    #[test]
    fn test_first_id_is_registration_order() {
        let reg = AgentRegistry::new();
        reg.register(def("zeta"));
        reg.register(def("alpha"));

        assert_eq!(reg.first_id().as_deref(), Some("zeta"));
        assert_eq!(reg.ids(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_register_duplicate_keeps_position() {
        let reg = AgentRegistry::new();
        reg.register(def("a"));
        reg.register(def("b"));
        reg.register(def("a"));

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_registry() {
        let reg = AgentRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.first_id().is_none());
        assert!(reg.snapshot("nobody").is_none());
    }

    #[test]
    fn test_mark_running_and_idle() {
        let reg = AgentRegistry::new();
        reg.register(def("alex"));

        reg.mark_running("alex");
        let snap = reg.snapshot("alex").unwrap();
        assert_eq!(snap.status, AgentStatus::Running);
        assert_eq!(snap.message_count, 1);

        reg.mark_idle("alex");
        assert_eq!(reg.snapshot("alex").unwrap().status, AgentStatus::Idle);
    }

    #[test]
    fn test_update_unknown_agent() {
        let reg = AgentRegistry::new();
        assert!(!reg.update("ghost", |_| {}));
    }

    #[test]
    fn test_metrics_running_mean() {
        let mut m = AgentMetrics::default();
        m.record_success(100, 10);
        assert!((m.avg_response_ms - 100.0).abs() < f64::EPSILON);

        m.record_success(200, 5);
        assert!((m.avg_response_ms - 150.0).abs() < 1e-9);

        m.record_failure(300);
        assert!((m.avg_response_ms - 200.0).abs() < 1e-9);
        assert_eq!(m.tokens_used, 15);
    }

    #[test]
    fn test_metrics_invariant_holds() {
        let mut m = AgentMetrics::default();
        for i in 0..20 {
            if i % 3 == 0 {
                m.record_failure(50);
            } else {
                m.record_success(50, 1);
            }
        }
        assert!(m.successful_actions + m.failed_actions <= m.total_actions);
        assert_eq!(m.successful_actions + m.failed_actions, m.total_actions);
    }

    #[test]
    fn test_success_rate() {
        let mut m = AgentMetrics::default();
        assert!((m.success_rate() - 1.0).abs() < f64::EPSILON);

        m.record_success(10, 0);
        m.record_failure(10);
        assert!((m.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_agent_def_serde_roundtrip() {
        let d = AgentDef {
            id: "alex".into(),
            name: "Alex".into(),
            agent_type: "assistant".into(),
            model: "anthropic/claude-sonnet-4-20250514".into(),
            system_prompt: "Be concise.".into(),
            capabilities: vec!["file_ops".into(), "shell".into()],
        };

        let json = serde_json::to_string(&d).unwrap();
        let back: AgentDef = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_value(AgentStatus::Idle).unwrap(), "idle");
        assert_eq!(serde_json::to_value(AgentStatus::Running).unwrap(), "running");
        assert_eq!(serde_json::to_value(AgentStatus::Evolving).unwrap(), "evolving");
        assert_eq!(serde_json::to_value(AgentStatus::Error).unwrap(), "error");
    }
}
