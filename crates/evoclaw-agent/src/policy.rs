//! Security policy gate for tool dispatch.
//!
//! Before any tool call touches a backend, it is mapped to an abstract
//! `Action` and passed to the configured policy. A denial never reaches the
//! backend; the loop sees a synthetic `security_policy` error result and
//! continues.

use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

// ─────────────────────────────────────────────
// Actions
// ─────────────────────────────────────────────

/// What a tool call is about to do, in policy terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    FileRead,
    FileWrite,
    Execute,
    Edge,
    Other,
}

/// Abstract view of one tool call.
#[derive(Clone, Debug)]
pub struct Action {
    pub kind: ActionKind,
    pub path: Option<String>,
    pub command: Option<String>,
    pub tool: String,
}

impl Action {
    /// Map a tool call to its abstract action.
    pub fn from_call(tool: &str, params: &HashMap<String, serde_json::Value>) -> Self {
        let str_param = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        let (kind, path, command) = match tool {
            "read" | "grep" | "find" => (ActionKind::FileRead, str_param("path"), None),
            "write" | "edit" => (ActionKind::FileWrite, str_param("path"), None),
            "bash" => (ActionKind::Execute, None, str_param("command")),
            "edge_call" => (ActionKind::Edge, None, None),
            _ => (ActionKind::Other, str_param("path"), str_param("command")),
        };

        Action {
            kind,
            path,
            command,
            tool: tool.to_string(),
        }
    }
}

/// Policy verdict for one action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

/// A pluggable security policy.
pub trait SecurityPolicy: Send + Sync {
    fn check(&self, action: &Action) -> Decision;
}

// ─────────────────────────────────────────────
// Pattern policy
// ─────────────────────────────────────────────

/// Command patterns that are always blocked.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

/// Path prefixes no tool may write to.
const PROTECTED_WRITE_PREFIXES: &[&str] = &["/etc", "/boot", "/sys", "/proc"];

/// Regex-based deny policy over commands and write paths.
pub struct PatternPolicy {
    deny_regexes: Vec<Regex>,
}

impl PatternPolicy {
    /// Policy with the built-in deny list.
    pub fn new() -> Self {
        let deny_regexes = DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { deny_regexes }
    }
}

impl Default for PatternPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityPolicy for PatternPolicy {
    fn check(&self, action: &Action) -> Decision {
        if let Some(command) = &action.command {
            let lower = command.to_lowercase();
            for re in &self.deny_regexes {
                if re.is_match(&lower) {
                    warn!(tool = %action.tool, command = %command, "command blocked by policy");
                    return Decision::Deny("dangerous command pattern".into());
                }
            }
        }

        if action.kind == ActionKind::FileWrite {
            if let Some(path) = &action.path {
                if PROTECTED_WRITE_PREFIXES.iter().any(|p| path.starts_with(p)) {
                    warn!(tool = %action.tool, path = %path, "write blocked by policy");
                    return Decision::Deny(format!("write to protected path {path}"));
                }
            }
        }

        Decision::Allow
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
