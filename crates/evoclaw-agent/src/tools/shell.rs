//! Shell tool — execute commands through the configured `ExecOps` backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::base::{require_string, Tool, ToolOutput};
use crate::backend::ExecOps;

/// Default command timeout in seconds.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 60;

/// Execute shell commands in a subprocess.
pub struct BashTool {
    exec: Arc<dyn ExecOps>,
    timeout: Duration,
}

impl BashTool {
    /// Create a new bash tool with the given per-command timeout.
    pub fn new(exec: Arc<dyn ExecOps>, timeout_secs: Option<u64>) -> Self {
        Self {
            exec,
            timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_EXEC_TIMEOUT_SECS)),
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output. \
         Long-running commands are killed at the timeout."
    }

    fn capability(&self) -> &str {
        "shell"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolOutput> {
        let command = require_string(&params, "command")?;
        info!(command = %command, "bash tool");

        let outcome = self.exec.exec(&command, self.timeout).await?;
        Ok(ToolOutput {
            text: outcome.render(),
            exit_code: outcome.exit_code,
        })
    }
}
