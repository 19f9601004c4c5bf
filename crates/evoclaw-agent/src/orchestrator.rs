//! Orchestrator — owns the bus, the channels, and the processing pipeline.
//!
//! Wiring per component:
//! - one fan-in task per channel, stamping `Message.channel` before the
//!   message enters the inbox
//! - one router task that picks agent/model/provider and spawns per-message
//!   processing (messages do not serialize end-to-end)
//! - one fan-out task routing responses to channels by name; unknown names
//!   are logged and dropped
//! - a periodic evaluation tick feeding the evolution engine
//!
//! Shutdown cancels the root token; every task observes it and returns, and
//! `Channel::stop()` is called on every registered channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use evoclaw_core::agent::AgentRegistry;
use evoclaw_core::bus::queue::MessageBus;
use evoclaw_core::bus::types::{Message, Response};
use evoclaw_core::channel::{Backpressure, Channel};
use evoclaw_core::config::schema::{EvaluationConfig, RoutingConfig};
use evoclaw_providers::ProviderRegistry;

use crate::chat::{ChatService, ChatSyncRequest, ChatSyncResponse};
use crate::evolution::{EvalSample, EvolutionEngine};
use crate::tool_loop::ToolLoop;

/// The long-running core process.
pub struct Orchestrator {
    bus: Arc<MessageBus>,
    channels: HashMap<String, Arc<dyn Channel>>,
    agents: Arc<AgentRegistry>,
    providers: Arc<ProviderRegistry>,
    tool_loop: Arc<ToolLoop>,
    chat: ChatService,
    routing: RoutingConfig,
    evaluation: EvaluationConfig,
    evaluator: Option<Arc<dyn EvolutionEngine>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Assemble the orchestrator. Channels are registered by name; a
    /// duplicate name replaces the earlier channel.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        channels: Vec<Arc<dyn Channel>>,
        agents: Arc<AgentRegistry>,
        providers: Arc<ProviderRegistry>,
        tool_loop: Arc<ToolLoop>,
        routing: RoutingConfig,
        evaluation: EvaluationConfig,
        evaluator: Option<Arc<dyn EvolutionEngine>>,
    ) -> Self {
        let mut channel_map: HashMap<String, Arc<dyn Channel>> = HashMap::new();
        for channel in channels {
            let name = channel.name().to_string();
            info!(channel = %name, "registered channel");
            channel_map.insert(name, channel);
        }

        let chat = ChatService::new(
            agents.clone(),
            providers.clone(),
            routing.clone(),
            evaluator.clone(),
        );

        Self {
            bus,
            channels: channel_map,
            agents,
            providers,
            tool_loop,
            chat,
            routing,
            evaluation,
            evaluator,
            cancel: CancellationToken::new(),
        }
    }

    /// The root cancellation token (children derive from it).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal shutdown. `run` unwinds promptly.
    pub fn shutdown(&self) {
        info!("orchestrator shutdown requested");
        self.cancel.cancel();
    }

    /// Names of registered channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// The interactive single-turn path.
    pub async fn chat_sync(&self, request: ChatSyncRequest) -> anyhow::Result<ChatSyncResponse> {
        self.chat.chat_sync(&self.cancel, request).await
    }

    /// Run until shutdown: starts channels, fan-in, router, fan-out, and
    /// the evaluation tick; then stops every channel.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            channels = ?self.channel_names(),
            agents = self.agents.len(),
            "orchestrator starting"
        );

        let mut tasks = JoinSet::new();

        // Channel listeners + fan-in.
        for (name, channel) in &self.channels {
            let ch = channel.clone();
            let ch_name = name.clone();
            tasks.spawn(async move {
                info!(channel = %ch_name, "channel starting");
                if let Err(e) = ch.start().await {
                    error!(channel = %ch_name, error = %e, "channel start failed");
                }
                info!(channel = %ch_name, "channel listener ended");
            });

            match channel.receiver() {
                Some(rx) => {
                    let this = self.clone();
                    let ch_name = name.clone();
                    let mode = channel.backpressure();
                    tasks.spawn(async move {
                        this.fan_in(ch_name, rx, mode).await;
                    });
                }
                None => warn!(channel = %name, "channel yielded no receiver"),
            }
        }

        // Router.
        {
            let this = self.clone();
            tasks.spawn(async move {
                this.router().await;
            });
        }

        // Fan-out.
        {
            let this = self.clone();
            tasks.spawn(async move {
                this.fan_out().await;
            });
        }

        // Periodic evaluation.
        if self.evaluation.enabled && self.evaluator.is_some() {
            let this = self.clone();
            tasks.spawn(async move {
                this.evaluation_tick().await;
            });
        }

        self.cancel.cancelled().await;
        info!("orchestrator stopping");

        for (name, channel) in &self.channels {
            debug!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "channel stop failed");
            }
        }

        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        info!("orchestrator stopped");
        Ok(())
    }

    /// Copy one channel's stream into the inbox, stamping the channel name.
    async fn fan_in(
        &self,
        channel_name: String,
        mut rx: tokio::sync::mpsc::Receiver<Message>,
        mode: Backpressure,
    ) {
        debug!(channel = %channel_name, "fan-in started");
        loop {
            let msg = tokio::select! {
                m = rx.recv() => m,
                _ = self.cancel.cancelled() => break,
            };
            let Some(mut msg) = msg else {
                info!(channel = %channel_name, "channel stream closed");
                break;
            };
            msg.channel = channel_name.clone();

            match mode {
                Backpressure::Block => {
                    if self.bus.publish_inbound(msg).await.is_err() {
                        warn!(channel = %channel_name, "inbox closed, fan-in exiting");
                        break;
                    }
                }
                Backpressure::Drop => {
                    if let Err(e) = self.bus.try_publish_inbound(msg) {
                        warn!(channel = %channel_name, error = %e, "inbound message dropped");
                    }
                }
            }
        }
    }

    /// Dequeue from the inbox and launch per-message processing.
    ///
    /// Only the dequeue is serialized; each message is processed on its own
    /// task.
    async fn router(self: Arc<Self>) {
        info!("router started");
        loop {
            let msg = tokio::select! {
                m = self.bus.consume_inbound() => m,
                _ = self.cancel.cancelled() => break,
            };
            let Some(msg) = msg else {
                info!("inbox closed, router exiting");
                break;
            };

            let Some(agent_id) = self.select_agent(&msg) else {
                warn!(channel = %msg.channel, "no agent available, message dropped");
                continue;
            };

            let orchestrator = self.clone();
            tokio::spawn(async move {
                orchestrator.process_message(agent_id, msg).await;
            });
        }
    }

    /// Process one routed message through the tool loop and publish the
    /// response.
    async fn process_message(self: Arc<Self>, agent_id: String, msg: Message) {
        let Some(snapshot) = self.agents.snapshot(&agent_id) else {
            warn!(agent = %agent_id, "agent vanished before processing");
            return;
        };
        let def = snapshot.def;

        let model = if def.model.is_empty() {
            self.routing.complex.clone()
        } else {
            def.model.clone()
        };
        let Some(provider) = self.providers.find(&model) else {
            warn!(model = %model, "no provider available, message dropped");
            return;
        };

        debug!(
            agent = %agent_id,
            channel = %msg.channel,
            model = %model,
            "processing message"
        );

        self.agents.mark_running(&agent_id);
        let started = Instant::now();
        let result = self
            .tool_loop
            .execute(
                &self.cancel.child_token(),
                &def,
                provider,
                &model,
                &msg.content,
            )
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(outcome) => {
                let tokens = outcome.metrics.tokens_in + outcome.metrics.tokens_out;
                self.agents.update(&agent_id, |state| {
                    state.metrics.record_success(elapsed_ms, tokens);
                });
                Response::to_origin(&agent_id, &msg, outcome.content)
            }
            Err(e) => {
                error!(agent = %agent_id, error = %e, "tool loop failed");
                self.agents.update(&agent_id, |state| {
                    state.error_count += 1;
                    state.metrics.record_failure(elapsed_ms);
                });
                Response::to_origin(&agent_id, &msg, format!("I encountered an error: {e}"))
            }
        };
        self.agents.mark_idle(&agent_id);

        if self.bus.publish_outbound(response).await.is_err() {
            warn!("outbox closed, response dropped");
        }
    }

    /// Route outbound responses to their channels.
    async fn fan_out(&self) {
        info!("fan-out started");
        loop {
            let resp = tokio::select! {
                r = self.bus.consume_outbound() => r,
                _ = self.cancel.cancelled() => break,
            };
            let Some(resp) = resp else {
                info!("outbox closed, fan-out exiting");
                break;
            };

            match self.channels.get(&resp.channel) {
                Some(channel) => {
                    debug!(
                        channel = %resp.channel,
                        chat_id = %resp.chat_id,
                        content_len = resp.content.len(),
                        "dispatching response"
                    );
                    if let Err(e) = channel.send(&resp).await {
                        error!(channel = %resp.channel, error = %e, "send failed");
                    }
                }
                None => {
                    warn!(channel = %resp.channel, "no channel registered for response");
                }
            }
        }
    }

    /// Periodic evaluation: snapshot each agent's metrics under lock, then
    /// feed the evaluator outside it.
    async fn evaluation_tick(&self) {
        let Some(evaluator) = &self.evaluator else {
            return;
        };
        let period = Duration::from_secs(self.evaluation.interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh process
        // doesn't evaluate empty metrics.
        interval.tick().await;

        info!(interval_secs = period.as_secs(), "evaluation tick started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.cancel.cancelled() => break,
            }

            for state in self.agents.snapshots() {
                let sample = EvalSample::from(&state.metrics);
                if let Err(e) = evaluator.evaluate(&state.def.id, sample).await {
                    warn!(agent = %state.def.id, error = %e, "evaluation failed");
                }
            }
        }
    }

    /// Select the agent for a message: explicit metadata hook, else the
    /// first registered agent.
    fn select_agent(&self, msg: &Message) -> Option<String> {
        if let Some(explicit) = msg.metadata.get("agent_id") {
            if self.agents.get(explicit).is_some() {
                return Some(explicit.clone());
            }
            warn!(agent = %explicit, "requested agent not registered, using default");
        }
        self.agents.first_id()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_loop::ToolLoopConfig;
    use crate::tools::ToolManager;
    use async_trait::async_trait;
    use evoclaw_core::agent::AgentDef;
    use evoclaw_core::channel::CHANNEL_BUFFER;
    use evoclaw_core::rsi::RsiLogger;
    use evoclaw_providers::{ChatRequest, ChatResponse, ModelProvider};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Provider that answers every request with a fixed line.
    struct EchoProvider;

    #[async_trait]
    impl ModelProvider for EchoProvider {
        async fn chat(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            let user = request
                .messages
                .iter()
                .rev()
                .find_map(|m| match m {
                    evoclaw_core::types::ChatMessage::User { content } => Some(content.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            Ok(ChatResponse {
                content: Some(format!("echo: {user}")),
                ..Default::default()
            })
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }
    }

    /// Channel with an injectable inbound stream and a recorded outbox.
    struct TestChannel {
        channel_name: String,
        rx: Mutex<Option<mpsc::Receiver<Message>>>,
        tx: mpsc::Sender<Message>,
        sent: Arc<Mutex<Vec<Response>>>,
    }

    impl TestChannel {
        fn new(name: &str) -> Arc<Self> {
            let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
            Arc::new(Self {
                channel_name: name.into(),
                rx: Mutex::new(Some(rx)),
                tx,
                sent: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    #[async_trait]
    impl Channel for TestChannel {
        fn name(&self) -> &str {
            &self.channel_name
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send(&self, resp: &Response) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(resp.clone());
            Ok(())
        }

        fn receiver(&self) -> Option<mpsc::Receiver<Message>> {
            self.rx.lock().unwrap().take()
        }
    }

    fn build_orchestrator(
        channels: Vec<Arc<dyn Channel>>,
        agent_ids: &[&str],
    ) -> Arc<Orchestrator> {
        let bus = Arc::new(MessageBus::new(100));

        let agents = Arc::new(AgentRegistry::new());
        for id in agent_ids {
            agents.register(AgentDef {
                id: id.to_string(),
                ..Default::default()
            });
        }

        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(EchoProvider));
        let providers = Arc::new(providers);

        let tool_loop = Arc::new(ToolLoop::new(
            Arc::new(ToolManager::new()),
            None,
            None,
            Arc::new(RsiLogger::disabled()),
            ToolLoopConfig::default(),
        ));

        Arc::new(Orchestrator::new(
            bus,
            channels,
            agents,
            providers,
            tool_loop,
            RoutingConfig::default(),
            EvaluationConfig {
                enabled: false,
                interval_secs: 300,
            },
            None,
        ))
    }

    async fn wait_for_sent(channel: &Arc<TestChannel>, count: usize) -> Vec<Response> {
        for _ in 0..200 {
            {
                let sent = channel.sent.lock().unwrap();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        channel.sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_round_trip_through_orchestrator() {
        let channel = TestChannel::new("testchan");
        let orchestrator = build_orchestrator(vec![channel.clone()], &["alex"]);

        let runner = orchestrator.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        channel
            .tx
            .send(Message::new("", "user_1", "chat_1", "hello there"))
            .await
            .unwrap();

        let sent = wait_for_sent(&channel, 1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "echo: hello there");
        assert_eq!(sent[0].agent_id, "alex");
        // The fan-in stamped the channel name before routing.
        assert_eq!(sent[0].channel, "testchan");

        orchestrator.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_agent_metadata_hook() {
        let channel = TestChannel::new("testchan");
        let orchestrator = build_orchestrator(vec![channel.clone()], &["first", "second"]);

        let runner = orchestrator.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        let msg = Message::new("", "u", "c", "route me").with_meta("agent_id", "second");
        channel.tx.send(msg).await.unwrap();

        let sent = wait_for_sent(&channel, 1).await;
        assert_eq!(sent[0].agent_id, "second");

        orchestrator.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_metadata_agent_falls_back_to_first() {
        let channel = TestChannel::new("testchan");
        let orchestrator = build_orchestrator(vec![channel.clone()], &["first", "second"]);

        let runner = orchestrator.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        let msg = Message::new("", "u", "c", "route me").with_meta("agent_id", "ghost");
        channel.tx.send(msg).await.unwrap();

        let sent = wait_for_sent(&channel, 1).await;
        assert_eq!(sent[0].agent_id, "first");

        orchestrator.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_empty_registry_drops_message() {
        let channel = TestChannel::new("testchan");
        let orchestrator = build_orchestrator(vec![channel.clone()], &[]);

        let runner = orchestrator.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        channel
            .tx
            .send(Message::new("", "u", "c", "nobody home"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(channel.sent.lock().unwrap().is_empty());

        orchestrator.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_outbound_channel_is_dropped() {
        let channel = TestChannel::new("testchan");
        let orchestrator = build_orchestrator(vec![channel.clone()], &["alex"]);
        let bus = orchestrator.bus.clone();

        let runner = orchestrator.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        bus.publish_outbound(Response::new("alex", "nowhere", "c", "lost"))
            .await
            .unwrap();
        bus.publish_outbound(Response::new("alex", "testchan", "c", "found"))
            .await
            .unwrap();

        let sent = wait_for_sent(&channel, 1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "found");

        orchestrator.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_processing_updates_agent_metrics() {
        let channel = TestChannel::new("testchan");
        let orchestrator = build_orchestrator(vec![channel.clone()], &["alex"]);

        let runner = orchestrator.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        channel
            .tx
            .send(Message::new("", "u", "c", "count me"))
            .await
            .unwrap();
        wait_for_sent(&channel, 1).await;

        let snap = orchestrator.agents.snapshot("alex").unwrap();
        assert_eq!(snap.message_count, 1);
        assert_eq!(snap.metrics.total_actions, 1);
        assert_eq!(snap.metrics.successful_actions, 1);

        orchestrator.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_chat_sync_via_orchestrator() {
        let orchestrator = build_orchestrator(vec![], &["alex"]);

        let resp = orchestrator
            .chat_sync(ChatSyncRequest {
                agent_id: "alex".into(),
                user_id: "u".into(),
                message: "direct question".into(),
                history: vec![],
            })
            .await
            .unwrap();

        assert_eq!(resp.response, "echo: direct question");
    }
}
