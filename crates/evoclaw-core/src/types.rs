//! Chat and tool types shared across the workspace.
//!
//! These model the OpenAI chat completions format used by all LLM providers,
//! plus the `ToolResult` record produced by tool execution. Typed enums catch
//! format errors at compile time instead of at the provider boundary.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Messages (OpenAI chat completions format)
// ─────────────────────────────────────────────

/// A chat message in the OpenAI format.
///
/// Each variant maps to a `role` field value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: String },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },

    #[serde(rename = "tool")]
    Tool { content: String, tool_call_id: String },
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Create an assistant turn carrying tool calls (content may be empty).
    pub fn assistant_turn(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        ChatMessage::Assistant {
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        }
    }

    /// Create a tool result message linked to the originating call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }
}

// ─────────────────────────────────────────────
// Tool calls (function calling)
// ─────────────────────────────────────────────

/// A tool call from the assistant, requesting execution of a function.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// LLM-assigned id, used to correlate the result back.
    pub id: String,
    /// Always "function" in the current OpenAI API.
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function to call.
    pub function: FunctionCall,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the JSON-encoded arguments into a map. Malformed arguments
    /// yield an empty map rather than an error; the tool reports missing
    /// parameters itself.
    pub fn parsed_arguments(&self) -> std::collections::HashMap<String, serde_json::Value> {
        serde_json::from_str(&self.function.arguments).unwrap_or_default()
    }
}

/// The function name and arguments within a tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    /// Name of the function/tool to call.
    pub name: String,
    /// JSON-encoded arguments string.
    pub arguments: String,
}

// ─────────────────────────────────────────────
// Tool definitions (for LLM requests)
// ─────────────────────────────────────────────

/// Definition of a tool, sent to the LLM so it knows what tools exist.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Always "function".
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function schema.
    pub function: FunctionDefinition,
}

/// Schema of a function tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// Tool results
// ─────────────────────────────────────────────

/// Outcome status of a tool execution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// The record produced by executing one tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    /// Name of the tool that ran.
    pub tool: String,
    /// Success or error.
    pub status: ToolStatus,
    /// Result text handed back to the LLM.
    pub result: String,
    /// Error message, when status is error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error classification (e.g. "timeout", "security_policy", "cancelled").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Wall time of the execution in milliseconds.
    pub elapsed_ms: u64,
    /// Exit code for subprocess-backed tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ToolResult {
    /// A successful result.
    pub fn success(tool: impl Into<String>, result: impl Into<String>, elapsed_ms: u64) -> Self {
        ToolResult {
            tool: tool.into(),
            status: ToolStatus::Success,
            result: result.into(),
            error: None,
            error_type: None,
            elapsed_ms,
            exit_code: None,
        }
    }

    /// An error result with a classification.
    pub fn error(
        tool: impl Into<String>,
        error: impl Into<String>,
        error_type: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        let error = error.into();
        ToolResult {
            tool: tool.into(),
            status: ToolStatus::Error,
            result: format!("Error: {error}"),
            error: Some(error),
            error_type: Some(error_type.into()),
            elapsed_ms,
            exit_code: None,
        }
    }

    /// Whether this result is an error.
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

// ─────────────────────────────────────────────
// Token usage
// ─────────────────────────────────────────────

/// Token usage statistics from the LLM.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_message_serialization() {
        let msg = ChatMessage::system("You are a helpful assistant.");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "You are a helpful assistant.");
    }

    #[test]
    fn test_assistant_text_serialization() {
        let msg = ChatMessage::assistant("The answer is 42.");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "The answer is 42.");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_assistant_turn_with_tool_calls() {
        let calls = vec![ToolCall::new("call_123", "read", r#"{"path": "a.txt"}"#)];
        let msg = ChatMessage::assistant_turn(None, calls);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert!(json.get("content").is_none());

        let calls = json["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["id"], "call_123");
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[0]["function"]["name"], "read");
    }

    #[test]
    fn test_assistant_turn_empty_calls_omits_field() {
        let msg = ChatMessage::assistant_turn(Some("done".into()), vec![]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_tool_result_message_serialization() {
        let msg = ChatMessage::tool_result("call_123", "file says hello");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "tool");
        assert_eq!(json["content"], "file says hello");
        assert_eq!(json["tool_call_id"], "call_123");
    }

    #[test]
    fn test_assistant_deserialization_with_tool_calls() {
        let json = json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_abc",
                "type": "function",
                "function": {
                    "name": "bash",
                    "arguments": "{\"command\": \"ls\"}"
                }
            }]
        });
        let msg: ChatMessage = serde_json::from_value(json).unwrap();

        match msg {
            ChatMessage::Assistant {
                content, tool_calls, ..
            } => {
                assert!(content.is_none());
                let calls = tool_calls.unwrap();
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].function.name, "bash");
            }
            _ => panic!("Expected Assistant message"),
        }
    }

    #[test]
    fn test_message_round_trip() {
        let messages = vec![
            ChatMessage::system("You are an orchestrated agent."),
            ChatMessage::user("What is 2+2?"),
            ChatMessage::assistant("The answer is 4."),
            ChatMessage::tool_result("call_1", "done"),
        ];

        let json_str = serde_json::to_string(&messages).unwrap();
        let deserialized: Vec<ChatMessage> = serde_json::from_str(&json_str).unwrap();

        assert_eq!(messages, deserialized);
    }

    #[test]
    fn test_parsed_arguments() {
        let call = ToolCall::new("t1", "read", r#"{"path": "a.txt"}"#);
        let args = call.parsed_arguments();
        assert_eq!(args.get("path").unwrap(), "a.txt");
    }

    #[test]
    fn test_parsed_arguments_malformed_yields_empty() {
        let call = ToolCall::new("t1", "read", "not json");
        assert!(call.parsed_arguments().is_empty());
    }

    #[test]
    fn test_tool_definition_serialization() {
        let def = ToolDefinition::new(
            "read",
            "Read the contents of a file",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file" }
                },
                "required": ["path"]
            }),
        );
        let json = serde_json::to_value(&def).unwrap();

        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "read");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_tool_result_success() {
        let r = ToolResult::success("read", "hello", 12);
        assert_eq!(r.status, ToolStatus::Success);
        assert!(!r.is_error());
        assert_eq!(r.result, "hello");
        assert_eq!(r.elapsed_ms, 12);
    }

    #[test]
    fn test_tool_result_error() {
        let r = ToolResult::error("bash", "command not found", "execution", 5);
        assert!(r.is_error());
        assert_eq!(r.error.as_deref(), Some("command not found"));
        assert_eq!(r.error_type.as_deref(), Some("execution"));
        assert!(r.result.starts_with("Error:"));
    }

    #[test]
    fn test_tool_result_round_trip() {
        let mut r = ToolResult::error("bash", "boom", "timeout", 30_000);
        r.exit_code = Some(124);

        let json_str = serde_json::to_string(&r).unwrap();
        let back: ToolResult = serde_json::from_str(&json_str).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn test_tool_status_serialization() {
        assert_eq!(serde_json::to_value(ToolStatus::Success).unwrap(), "success");
        assert_eq!(serde_json::to_value(ToolStatus::Error).unwrap(), "error");
    }
}
