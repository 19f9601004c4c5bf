//! The tool-use loop: a bounded LLM ↔ tool conversation state machine.
//!
//! Each run seeds a conversation with the user message and iterates: call
//! the model, execute any requested tools (in parallel for multi-call
//! batches), append results, repeat. The loop stops on a tool-free answer,
//! on the iteration cap (after a final summary call), or after too many
//! consecutive all-failed batches. Every exit path emits exactly one RSI
//! outcome record.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use evoclaw_core::agent::AgentDef;
use evoclaw_core::edge::EdgeTransport;
use evoclaw_core::rsi::{derive_quality, derive_task_type, RsiLogger, RsiOutcome};
use evoclaw_core::types::{ChatMessage, ToolCall, ToolResult};
use evoclaw_providers::{ChatRequest, ModelProvider, ProviderRegistry};

use crate::policy::{Action, Decision, SecurityPolicy};
use crate::tools::ToolManager;

// ─────────────────────────────────────────────
// Config & metrics
// ─────────────────────────────────────────────

/// Tunables for one tool loop instance.
#[derive(Clone, Debug)]
pub struct ToolLoopConfig {
    /// Maximum LLM ↔ tool iterations before the summary call.
    pub max_iterations: usize,
    /// Consecutive all-failed batches before aborting.
    pub error_limit: usize,
    /// Per-tool execution timeout.
    pub tool_timeout: Duration,
    /// Concurrent tool calls per batch.
    pub max_parallel: usize,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            error_limit: 3,
            tool_timeout: Duration::from_secs(30),
            max_parallel: 5,
        }
    }
}

/// Metrics accumulated over one loop run.
#[derive(Clone, Debug, Default)]
pub struct LoopMetrics {
    /// LLM iterations performed (excluding the summary call).
    pub iterations: u64,
    /// Total tool calls dispatched.
    pub tool_calls: u64,
    /// Tool calls that succeeded.
    pub success_count: u64,
    /// Tool calls that failed.
    pub error_count: u64,
    /// Batches with more than one call.
    pub parallel_batches: u64,
    /// Peak concurrent tool executions.
    pub max_concurrency: u64,
    /// Σ per-call elapsed − batch wall time, clamped at zero per batch.
    pub wall_time_saved_ms: u64,
    /// Prompt tokens consumed across all LLM calls.
    pub tokens_in: u64,
    /// Completion tokens produced across all LLM calls.
    pub tokens_out: u64,
    /// Distinct tool names invoked, in first-use order.
    pub tools_used: Vec<String>,
}

impl LoopMetrics {
    fn note_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }
}

/// Result of a completed loop run.
#[derive(Clone, Debug)]
pub struct LoopOutcome {
    /// Final answer text.
    pub content: String,
    pub metrics: LoopMetrics,
}

// ─────────────────────────────────────────────
// Tool executor
// ─────────────────────────────────────────────

/// Dispatches one tool call through the security gate to the right backend.
///
/// Cheap to clone; each parallel batch member gets its own copy.
#[derive(Clone)]
struct ToolExecutor {
    manager: Arc<ToolManager>,
    policy: Option<Arc<dyn SecurityPolicy>>,
    edge: Option<Arc<dyn EdgeTransport>>,
    timeout: Duration,
}

impl ToolExecutor {
    /// Execute one call and fold any failure into a `ToolResult`.
    async fn dispatch(&self, cancel: &CancellationToken, call: &ToolCall) -> ToolResult {
        let name = call.function.name.clone();
        let params = call.parsed_arguments();

        // Security gate, before any backend I/O.
        if let Some(policy) = &self.policy {
            let action = Action::from_call(&name, &params);
            if let Decision::Deny(reason) = policy.check(&action) {
                return ToolResult::error(
                    &name,
                    format!("denied by security policy: {reason}"),
                    "security_policy",
                    0,
                );
            }
        }

        // An already-cancelled parent returns immediately, regardless of
        // the tool's own timeout.
        if cancel.is_cancelled() {
            return ToolResult::error(&name, "cancelled", "cancelled", 0);
        }

        let started = Instant::now();

        if let Some(tool) = self.manager.get(&name) {
            let tool = tool.clone();
            return match tokio::time::timeout(self.timeout, tool.execute(params)).await {
                Ok(Ok(output)) => {
                    let mut result =
                        ToolResult::success(&name, output.text, started.elapsed().as_millis() as u64);
                    result.exit_code = output.exit_code;
                    result
                }
                Ok(Err(e)) => ToolResult::error(
                    &name,
                    e.to_string(),
                    "execution",
                    started.elapsed().as_millis() as u64,
                ),
                Err(_) => ToolResult::error(
                    &name,
                    format!("timed out after {:?}", self.timeout),
                    "timeout",
                    self.timeout.as_millis() as u64,
                ),
            };
        }

        if let Some(binding) = self.manager.external_binding(&name) {
            let Some(edge) = &self.edge else {
                return ToolResult::error(&name, "no edge transport configured", "edge_transport", 0);
            };
            let parameters =
                serde_json::Value::Object(params.into_iter().collect::<serde_json::Map<_, _>>());
            return match edge
                .call_tool(&binding.agent_id, &name, parameters, self.timeout)
                .await
            {
                Ok(result) => result,
                Err(e) => ToolResult::error(
                    &name,
                    e.to_string(),
                    "edge_transport",
                    started.elapsed().as_millis() as u64,
                ),
            };
        }

        ToolResult::error(&name, format!("tool '{name}' not found"), "unknown_tool", 0)
    }
}

// ─────────────────────────────────────────────
// ToolLoop
// ─────────────────────────────────────────────

/// The conversation state machine.
pub struct ToolLoop {
    manager: Arc<ToolManager>,
    executor: ToolExecutor,
    rsi: Arc<RsiLogger>,
    config: ToolLoopConfig,
}

impl ToolLoop {
    /// Create a loop over the given tool set.
    pub fn new(
        manager: Arc<ToolManager>,
        policy: Option<Arc<dyn SecurityPolicy>>,
        edge: Option<Arc<dyn EdgeTransport>>,
        rsi: Arc<RsiLogger>,
        config: ToolLoopConfig,
    ) -> Self {
        let executor = ToolExecutor {
            manager: manager.clone(),
            policy,
            edge,
            timeout: config.tool_timeout,
        };
        Self {
            manager,
            executor,
            rsi,
            config,
        }
    }

    /// Run one conversation to completion.
    ///
    /// `model` is the full routed model string (prefix included); the
    /// prefix is stripped for provider calls and kept for the outcome
    /// record.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        agent: &AgentDef,
        provider: Arc<dyn ModelProvider>,
        model: &str,
        user_message: &str,
    ) -> anyhow::Result<LoopOutcome> {
        let started = Instant::now();
        let mut metrics = LoopMetrics::default();

        let result = self
            .run_conversation(cancel, agent, &provider, model, user_message, &mut metrics)
            .await;

        // One outcome record per run, on every exit path.
        let quality = derive_quality(metrics.error_count, metrics.tool_calls);
        let task_type = derive_task_type(metrics.tools_used.iter().map(String::as_str));
        let mut outcome = RsiOutcome::new(
            &agent.id,
            task_type,
            model,
            result.is_ok(),
            quality,
            started.elapsed().as_millis() as u64,
        );
        outcome.tags.push("toolloop".into());
        if metrics.parallel_batches > 0 {
            outcome.tags.push("parallel".into());
        }
        if let Err(e) = &result {
            outcome.issues.push(e.to_string());
        }
        outcome.notes = format!(
            "{} iterations, {} tool calls",
            metrics.iterations, metrics.tool_calls
        );
        if let Err(e) = self.rsi.record(&outcome) {
            warn!(error = %e, "failed to record RSI outcome");
        }

        result.map(|content| LoopOutcome { content, metrics })
    }

    /// The iteration protocol. Mutates `metrics` so the caller can emit the
    /// outcome record regardless of how this returns.
    async fn run_conversation(
        &self,
        cancel: &CancellationToken,
        agent: &AgentDef,
        provider: &Arc<dyn ModelProvider>,
        model: &str,
        user_message: &str,
        metrics: &mut LoopMetrics,
    ) -> anyhow::Result<String> {
        let request_model = ProviderRegistry::strip_prefix(model).to_string();
        let tool_defs = self.manager.definitions_for(agent);
        let mut history = vec![ChatMessage::user(user_message)];
        let mut consecutive_errors = 0usize;

        for iteration in 0..self.config.max_iterations {
            debug!(agent = %agent.id, iteration, "LLM call");

            let request = ChatRequest::new(request_model.clone(), history.clone())
                .with_system_prompt(&agent.system_prompt)
                .with_tools(tool_defs.clone());

            let response = tokio::select! {
                r = provider.chat(&request) => r?,
                _ = cancel.cancelled() => anyhow::bail!("tool loop cancelled"),
            };
            metrics.iterations += 1;
            let (tokens_in, tokens_out) = response.token_counts();
            metrics.tokens_in += tokens_in as u64;
            metrics.tokens_out += tokens_out as u64;

            history.push(ChatMessage::assistant_turn(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            if !response.has_tool_calls() {
                // Natural termination: the content is the final answer.
                return Ok(response.content.unwrap_or_default());
            }

            let calls = response.tool_calls;
            info!(
                agent = %agent.id,
                iteration,
                batch = calls.len(),
                "executing tool batch"
            );

            let results = self.execute_batch(cancel, &calls, metrics).await;

            // Results are appended in the original call order so the model
            // sees a deterministic transcript.
            for (call, result) in calls.iter().zip(&results) {
                history.push(ChatMessage::tool_result(&call.id, &result.result));
            }

            let all_failed = results.iter().all(|r| r.is_error());
            if all_failed {
                consecutive_errors += 1;
            } else {
                consecutive_errors = 0;
            }
            if consecutive_errors >= self.config.error_limit {
                anyhow::bail!(
                    "too many consecutive errors ({consecutive_errors} all-failed tool batches)"
                );
            }
        }

        // Iteration cap reached with tool results as the last event: one
        // final call with no tool permission produces the answer.
        debug!(agent = %agent.id, "max iterations reached, requesting summary");
        let request =
            ChatRequest::new(request_model, history).with_system_prompt(&agent.system_prompt);
        let response = tokio::select! {
            r = provider.chat(&request) => r?,
            _ = cancel.cancelled() => anyhow::bail!("tool loop cancelled"),
        };
        let (tokens_in, tokens_out) = response.token_counts();
        metrics.tokens_in += tokens_in as u64;
        metrics.tokens_out += tokens_out as u64;

        Ok(response.content.unwrap_or_default())
    }

    /// Execute one batch of tool calls, preserving call order in the
    /// returned results.
    async fn execute_batch(
        &self,
        cancel: &CancellationToken,
        calls: &[ToolCall],
        metrics: &mut LoopMetrics,
    ) -> Vec<ToolResult> {
        metrics.tool_calls += calls.len() as u64;
        for call in calls {
            metrics.note_tool(&call.function.name);
        }

        let results = if calls.len() == 1 {
            // Synchronous fast path; parallel counters untouched.
            vec![self.executor.dispatch(cancel, &calls[0]).await]
        } else {
            self.execute_parallel(cancel, calls, metrics).await
        };

        for result in &results {
            if result.is_error() {
                metrics.error_count += 1;
            } else {
                metrics.success_count += 1;
            }
        }
        results
    }

    /// Concurrent execution for batches of size > 1, bounded by
    /// `max_parallel`. Each task writes a pre-allocated slot indexed by its
    /// position in the batch.
    async fn execute_parallel(
        &self,
        cancel: &CancellationToken,
        calls: &[ToolCall],
        metrics: &mut LoopMetrics,
    ) -> Vec<ToolResult> {
        metrics.parallel_batches += 1;
        let concurrency = calls.len().min(self.config.max_parallel) as u64;
        metrics.max_concurrency = metrics.max_concurrency.max(concurrency);

        let batch_started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut join_set = JoinSet::new();

        for (index, call) in calls.iter().cloned().enumerate() {
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("batch semaphore closed");

                // Short-circuit before any I/O when the parent is already
                // cancelled.
                if cancel.is_cancelled() {
                    return (
                        index,
                        ToolResult::error(call.function.name.clone(), "cancelled", "cancelled", 0),
                    );
                }
                (index, executor.dispatch(&cancel, &call).await)
            });
        }

        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "tool task panicked"),
            }
        }

        let wall_ms = batch_started.elapsed().as_millis() as u64;
        let results: Vec<ToolResult> = calls
            .iter()
            .zip(slots)
            .map(|(call, slot)| {
                slot.unwrap_or_else(|| {
                    ToolResult::error(call.function.name.clone(), "tool task aborted", "internal", 0)
                })
            })
            .collect();

        let total_ms: u64 = results.iter().map(|r| r.elapsed_ms).sum();
        metrics.wall_time_saved_ms += total_ms.saturating_sub(wall_ms);

        results
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
