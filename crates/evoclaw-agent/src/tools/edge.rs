//! `edge_call` — natural-language passthrough to an MQTT edge worker.
//!
//! Offered to the LLM only while at least one edge worker is online. The
//! query is forwarded via `SendPromptAndWait`; the worker's content becomes
//! the tool result.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use evoclaw_core::edge::EdgeTransport;

use super::base::{optional_string, Tool, ToolOutput};

/// Per-call timeout for edge passthrough prompts.
pub const EDGE_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// The synthetic passthrough tool.
pub struct EdgeCallTool {
    transport: Arc<dyn EdgeTransport>,
}

impl EdgeCallTool {
    pub fn new(transport: Arc<dyn EdgeTransport>) -> Self {
        Self { transport }
    }

    /// Build the query string: explicit `query`, else a readable rendering
    /// of `action` + `params`.
    fn build_query(params: &HashMap<String, Value>) -> Option<String> {
        if let Some(query) = optional_string(params, "query") {
            if !query.is_empty() {
                return Some(query);
            }
        }

        let action = optional_string(params, "action")?;
        let mut query = action;
        if let Some(extra) = params.get("params") {
            if !extra.is_null() {
                query.push_str(" with params ");
                query.push_str(&extra.to_string());
            }
        }
        Some(query)
    }
}

#[async_trait]
impl Tool for EdgeCallTool {
    fn name(&self) -> &str {
        "edge_call"
    }

    fn description(&self) -> &str {
        "Ask a remote edge agent to handle a request in natural language. \
         Use the agent_id of an online worker and describe what you need."
    }

    fn capability(&self) -> &str {
        "edge"
    }

    fn is_available(&self) -> bool {
        !self.transport.online_agents_with_capabilities().is_empty()
    }

    fn parameters(&self) -> Value {
        let agents = self.transport.online_agents_with_capabilities();
        let roster: Vec<String> = agents
            .iter()
            .map(|(id, caps)| format!("{id}: {caps}"))
            .collect();

        json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": format!("Target edge agent. Online: [{}]", roster.join("; "))
                },
                "query": {
                    "type": "string",
                    "description": "Natural-language request for the edge agent"
                },
                "action": {
                    "type": "string",
                    "description": "Alternative to query: a short action name"
                },
                "params": {
                    "type": "object",
                    "description": "Parameters accompanying `action`"
                }
            },
            "required": ["agent_id"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolOutput> {
        let agent_id = optional_string(&params, "agent_id")
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: agent_id"))?;
        let query = Self::build_query(&params)
            .ok_or_else(|| anyhow::anyhow!("edge_call needs either `query` or `action`"))?;

        info!(edge_agent = %agent_id, "edge_call passthrough");

        let response = self
            .transport
            .send_prompt_and_wait(&agent_id, &query, "", EDGE_CALL_TIMEOUT)
            .await?;

        if let Some(error) = response.error {
            anyhow::bail!("edge agent {agent_id} reported error: {error}");
        }
        Ok(response.content.into())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use evoclaw_core::edge::{EdgeAgentInfo, EdgeAgentResponse, EdgeStatus};
    use evoclaw_core::types::ToolResult;

    struct FakeTransport {
        online: bool,
        reply: String,
    }

    #[async_trait]
    impl EdgeTransport for FakeTransport {
        fn online_agents(&self) -> Vec<EdgeAgentInfo> {
            if self.online {
                vec![EdgeAgentInfo::seen_now("pi1", EdgeStatus::Online)]
            } else {
                vec![]
            }
        }

        fn online_agents_with_capabilities(&self) -> HashMap<String, String> {
            if self.online {
                HashMap::from([("pi1".to_string(), "sensor hub".to_string())])
            } else {
                HashMap::new()
            }
        }

        async fn send_prompt_and_wait(
            &self,
            agent_id: &str,
            prompt: &str,
            _system_prompt: &str,
            _timeout: Duration,
        ) -> anyhow::Result<EdgeAgentResponse> {
            Ok(EdgeAgentResponse {
                agent_id: agent_id.into(),
                content: format!("{}: {}", self.reply, prompt),
                ..Default::default()
            })
        }

        async fn call_tool(
            &self,
            _agent_id: &str,
            tool: &str,
            _parameters: Value,
            _timeout: Duration,
        ) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success(tool, "ok", 1))
        }
    }

    fn online_tool() -> EdgeCallTool {
        EdgeCallTool::new(Arc::new(FakeTransport {
            online: true,
            reply: "pi1 says".into(),
        }))
    }

    #[test]
    fn test_availability_tracks_online_set() {
        assert!(online_tool().is_available());

        let offline = EdgeCallTool::new(Arc::new(FakeTransport {
            online: false,
            reply: String::new(),
        }));
        assert!(!offline.is_available());
    }

    #[test]
    fn test_parameters_list_online_agents() {
        let schema = online_tool().parameters();
        let desc = schema["properties"]["agent_id"]["description"]
            .as_str()
            .unwrap();
        assert!(desc.contains("pi1: sensor hub"));
    }

    #[tokio::test]
    async fn test_execute_with_query() {
        let tool = online_tool();
        let mut params = HashMap::new();
        params.insert("agent_id".into(), json!("pi1"));
        params.insert("query".into(), json!("read the temperature"));

        let out = tool.execute(params).await.unwrap();
        assert_eq!(out.text, "pi1 says: read the temperature");
    }

    #[tokio::test]
    async fn test_execute_action_params_fallback() {
        let tool = online_tool();
        let mut params = HashMap::new();
        params.insert("agent_id".into(), json!("pi1"));
        params.insert("action".into(), json!("restart"));
        params.insert("params".into(), json!({"service": "telemetry"}));

        let out = tool.execute(params).await.unwrap();
        assert!(out.text.contains("restart with params"));
        assert!(out.text.contains("telemetry"));
    }

    #[tokio::test]
    async fn test_execute_requires_query_or_action() {
        let tool = online_tool();
        let mut params = HashMap::new();
        params.insert("agent_id".into(), json!("pi1"));

        let err = tool.execute(params).await.unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn test_execute_missing_agent_id() {
        let tool = online_tool();
        let err = tool.execute(HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("agent_id"));
    }
}
