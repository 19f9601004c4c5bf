//! RSI outcome ledger — append-only JSON-lines records of tool-loop runs.
//!
//! Every tool-loop execution writes exactly one outcome with derived quality
//! and task-type. The ledger is a sidecar: when no writable location exists
//! the logger degrades to a no-op and the core keeps running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Environment variable overriding the outcomes file location.
pub const RSI_OUTCOMES_FILE_ENV: &str = "RSI_OUTCOMES_FILE";

/// Source tag stamped on every record written by this process.
pub const RSI_SOURCE: &str = "evoclaw";

// ─────────────────────────────────────────────
// Outcome record
// ─────────────────────────────────────────────

/// One tool-loop execution outcome.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RsiOutcome {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub agent_id: String,
    pub source: String,
    pub task_type: String,
    pub model: String,
    pub success: bool,
    /// Integer 1..5 derived from the error rate.
    pub quality: u8,
    pub duration_ms: u64,
    pub issues: Vec<String>,
    pub tags: Vec<String>,
    pub notes: String,
}

impl RsiOutcome {
    /// New record with auto-assigned id and timestamp.
    pub fn new(
        agent_id: impl Into<String>,
        task_type: impl Into<String>,
        model: impl Into<String>,
        success: bool,
        quality: u8,
        duration_ms: u64,
    ) -> Self {
        RsiOutcome {
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            agent_id: agent_id.into(),
            source: RSI_SOURCE.into(),
            task_type: task_type.into(),
            model: model.into(),
            success,
            quality,
            duration_ms,
            issues: Vec::new(),
            tags: Vec::new(),
            notes: String::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Derivations
// ─────────────────────────────────────────────

/// Derive the 1..5 quality score from the tool error rate.
///
/// Zero errors (or zero calls) is a 5; from there the score steps down at
/// 20%, 50%, and 80% error rates.
pub fn derive_quality(error_count: u64, tool_call_count: u64) -> u8 {
    if error_count == 0 || tool_call_count == 0 {
        return 5;
    }
    let rate = error_count as f64 / tool_call_count as f64;
    if rate < 0.20 {
        4
    } else if rate < 0.50 {
        3
    } else if rate < 0.80 {
        2
    } else {
        1
    }
}

/// Derive the task type from the set of tool names invoked during a run.
pub fn derive_task_type<'a, I>(tools_used: I) -> &'static str
where
    I: IntoIterator<Item = &'a str>,
{
    let used: HashSet<&str> = tools_used.into_iter().collect();

    let any = |names: &[&str]| names.iter().any(|n| used.contains(n));

    if any(&["bash", "execute", "shell", "exec", "write", "write_file", "edit", "edit_file"]) {
        "code_generation"
    } else if any(&["read", "read_file", "list_files", "list_dir", "glob", "grep", "find"]) {
        "file_ops"
    } else if any(&["websearch", "webfetch"]) {
        "web_search"
    } else if any(&["git_commit", "git_diff", "git_log"]) {
        "code_review"
    } else if used.contains("edge_call") {
        "infrastructure_ops"
    } else {
        "unknown"
    }
}

// ─────────────────────────────────────────────
// Logger
// ─────────────────────────────────────────────

/// Append-only JSON-lines writer for outcome records.
///
/// Location is resolved once at construction:
/// 1. `$RSI_OUTCOMES_FILE`, when set and its parent directory exists
/// 2. `~/.evoclaw/rsi_outcomes.jsonl` (directory created on demand)
/// 3. otherwise disabled — `record` becomes a logged no-op
pub struct RsiLogger {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl RsiLogger {
    /// Resolve the ledger location from the environment.
    pub fn from_env() -> Self {
        Self::with_path(Self::resolve_path())
    }

    /// Logger writing to an explicit location (`None` = disabled).
    pub fn with_path(path: Option<PathBuf>) -> Self {
        match &path {
            Some(p) => info!(path = %p.display(), "RSI outcome ledger enabled"),
            None => info!("RSI outcome ledger disabled (no writable location)"),
        }
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// A disabled logger.
    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Whether records actually land on disk.
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Append one record. Failures are surfaced so the caller can log them,
    /// but a disabled logger always returns `Ok`.
    pub fn record(&self, outcome: &RsiOutcome) -> anyhow::Result<()> {
        let path = match &self.path {
            Some(p) => p,
            None => {
                debug!(agent = %outcome.agent_id, "RSI ledger disabled, outcome dropped");
                return Ok(());
            }
        };

        let line = serde_json::to_string(outcome)?;
        let _guard = self.write_lock.lock().expect("rsi write lock poisoned");

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;

        debug!(
            agent = %outcome.agent_id,
            task_type = %outcome.task_type,
            quality = outcome.quality,
            "recorded RSI outcome"
        );
        Ok(())
    }

    fn resolve_path() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(RSI_OUTCOMES_FILE_ENV) {
            let path = PathBuf::from(&explicit);
            let parent_ok = path.parent().map(|d| d.is_dir()).unwrap_or(false);
            if parent_ok {
                return Some(path);
            }
            warn!(
                path = %explicit,
                "{RSI_OUTCOMES_FILE_ENV} points into a missing directory, falling back"
            );
        }

        let dir = crate::utils::get_data_path();
        if std::fs::create_dir_all(&dir).is_ok() {
            Some(dir.join("rsi_outcomes.jsonl"))
        } else {
            None
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
