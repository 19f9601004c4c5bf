//! Model provider trait — the uniform chat contract over heterogeneous
//! LLM back-ends.
//!
//! Every back-end implements `ModelProvider`. The main implementation is
//! `HttpProvider`, which covers any OpenAI-compatible `/chat/completions`
//! endpoint; tests use in-memory mocks.

use async_trait::async_trait;

use evoclaw_core::types::{ChatMessage, ToolCall, ToolDefinition, UsageInfo};

/// One chat completion request.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Model identifier with the provider prefix already stripped.
    pub model: String,
    /// Optional system prompt, prepended to the conversation.
    pub system_prompt: Option<String>,
    /// Conversation history, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Tool schemas the model may call; `None` forbids tool use.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
}

impl ChatRequest {
    /// Request with the standard defaults (`max_tokens: 4096`,
    /// `temperature: 0.7`).
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        ChatRequest {
            model: model.into(),
            system_prompt: None,
            messages,
            tools: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    /// Attach a system prompt, builder-style. Empty prompts are ignored.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        if !prompt.is_empty() {
            self.system_prompt = Some(prompt.to_string());
        }
        self
    }

    /// Attach tool schemas, builder-style.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        if !tools.is_empty() {
            self.tools = Some(tools);
        }
        self
    }
}

/// One chat completion response.
#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
    /// Text content from the assistant (`None` if only tool calls).
    pub content: Option<String>,
    /// Tool calls requested by the assistant.
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped generating.
    pub finish_reason: Option<String>,
    /// Token usage statistics.
    pub usage: Option<UsageInfo>,
}

impl ChatResponse {
    /// Whether the response contains tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Prompt/completion token counts, zero when the API reported none.
    pub fn token_counts(&self) -> (u32, u32) {
        match &self.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (0, 0),
        }
    }
}

/// Trait that all LLM providers implement.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// Transport and API errors propagate as `Err`; the caller owns the
    /// metric bookkeeping for failures.
    async fn chat(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse>;

    /// Registry name of this provider (the model-string prefix).
    fn name(&self) -> &str;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = ChatRequest::new("gpt-4o", vec![ChatMessage::user("hi")]);
        assert_eq!(req.max_tokens, 4096);
        assert!((req.temperature - 0.7).abs() < f64::EPSILON);
        assert!(req.system_prompt.is_none());
        assert!(req.tools.is_none());
    }

    #[test]
    fn test_request_builders() {
        let req = ChatRequest::new("m", vec![])
            .with_system_prompt("Be brief.")
            .with_tools(vec![evoclaw_core::types::ToolDefinition::new(
                "read",
                "Read a file",
                serde_json::json!({"type": "object", "properties": {}}),
            )]);

        assert_eq!(req.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(req.tools.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_system_prompt_ignored() {
        let req = ChatRequest::new("m", vec![]).with_system_prompt("");
        assert!(req.system_prompt.is_none());
    }

    #[test]
    fn test_response_helpers() {
        let mut resp = ChatResponse::default();
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.token_counts(), (0, 0));

        resp.usage = Some(UsageInfo {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        assert_eq!(resp.token_counts(), (10, 5));
    }
}
