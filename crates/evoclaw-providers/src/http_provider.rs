//! Generic HTTP-based LLM provider for OpenAI-compatible APIs.
//!
//! Talks directly to any `/chat/completions` endpoint via `reqwest`:
//! OpenAI, Anthropic (via OpenRouter), DeepSeek, Groq, local vLLM, etc.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use evoclaw_core::types::{ChatMessage, ToolCall, ToolDefinition, UsageInfo};

use crate::traits::{ChatRequest, ChatResponse, ModelProvider};

/// HTTP client timeout for provider calls.
const CLIENT_TIMEOUT_SECS: u64 = 120;

// ─────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────

/// Request body for an OpenAI-compatible chat completion API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

/// Raw chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A generic LLM provider over any OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// Registry name, doubling as the model-string prefix (e.g. "openai").
    name: String,
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// API key for Bearer authentication.
    api_key: String,
    /// Default model for this provider instance.
    default_model: String,
    /// Extra headers to send with each request.
    extra_headers: HeaderMap,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.name)
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    /// Create a new provider.
    pub fn new(
        name: impl Into<String>,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        HttpProvider {
            name: name.into(),
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            extra_headers: HeaderMap::new(),
        }
    }

    /// Add extra headers sent with every request (invalid entries are
    /// logged and skipped).
    pub fn with_extra_headers(
        mut self,
        headers: &std::collections::HashMap<String, String>,
    ) -> Self {
        for (key, value) in headers {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(val)) => {
                    self.extra_headers.insert(name, val);
                }
                _ => warn!("Invalid header: {}={}", key, value),
            }
        }
        self
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Assemble the wire body from a `ChatRequest`.
    fn build_body(&self, request: &ChatRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(request.messages.iter().cloned());

        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        ChatCompletionRequest {
            model,
            messages,
            tools: request.tools.clone(),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        }
    }
}

#[async_trait]
impl ModelProvider for HttpProvider {
    async fn chat(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let body = self.build_body(request);

        debug!(
            provider = %self.name,
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "chat completion request"
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "{} API error {}: {}",
                self.name,
                status,
                evoclaw_core::utils::truncate_string(&text, 500)
            );
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("{} returned no choices", self.name))?;

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: parsed.usage,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpProvider {
        HttpProvider::new("test", server.uri(), "sk-test", "test-model")
    }

    #[tokio::test]
    async fn test_chat_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": { "content": "Hello! How can I help?" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18 }
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let resp = provider
            .chat(&ChatRequest::new("test-model", vec![ChatMessage::user("Hi")]))
            .await
            .unwrap();

        assert_eq!(resp.content.as_deref(), Some("Hello! How can I help?"));
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.token_counts(), (10, 8));
    }

    #[tokio::test]
    async fn test_chat_with_tool_calls() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_42",
                            "type": "function",
                            "function": { "name": "bash", "arguments": "{\"command\": \"ls\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": null
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let resp = provider
            .chat(&ChatRequest::new("test-model", vec![ChatMessage::user("list files")]))
            .await
            .unwrap();

        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.name, "bash");
    }

    #[tokio::test]
    async fn test_chat_sends_system_prompt_first() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "messages": [
                    { "role": "system", "content": "Be brief." },
                    { "role": "user", "content": "Hi" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }],
                "usage": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let req = ChatRequest::new("test-model", vec![ChatMessage::user("Hi")])
            .with_system_prompt("Be brief.");
        provider.chat(&req).await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_api_error_propagates() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .chat(&ChatRequest::new("test-model", vec![ChatMessage::user("Hi")]))
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("401"), "unexpected error: {msg}");
        assert!(msg.contains("invalid key"));
    }

    #[tokio::test]
    async fn test_chat_empty_choices_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "choices": [], "usage": null })),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .chat(&ChatRequest::new("test-model", vec![ChatMessage::user("Hi")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn test_empty_model_uses_default() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }],
                "usage": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        provider
            .chat(&ChatRequest::new("", vec![ChatMessage::user("Hi")]))
            .await
            .unwrap();
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let p = HttpProvider::new("x", "https://api.example.com/v1/", "k", "m");
        assert_eq!(p.completions_url(), "https://api.example.com/v1/chat/completions");
    }
}
