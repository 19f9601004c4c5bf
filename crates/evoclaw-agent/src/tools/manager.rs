//! Tool manager — owns the tool set and decides what each agent sees.
//!
//! Tools come from two places: built-in factories (file/shell/edge tools)
//! and JSON schema files discovered on disk, which describe external tools
//! bound to an MQTT edge worker. Capability filtering narrows the set
//! presented to each agent.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use evoclaw_core::agent::AgentDef;
use evoclaw_core::edge::EdgeTransport;
use evoclaw_core::types::ToolDefinition;

use super::base::Tool;
use super::edge::EdgeCallTool;
use super::fs::{EditTool, FindTool, GrepTool, ReadTool, WriteTool};
use super::shell::BashTool;
use crate::backend::{ExecOps, FileOps};

// ─────────────────────────────────────────────
// External tools
// ─────────────────────────────────────────────

/// A tool executed on a remote edge worker, discovered from a schema file.
#[derive(Clone, Debug)]
pub struct ExternalTool {
    pub definition: ToolDefinition,
    /// Edge agent that serves this tool.
    pub agent_id: String,
    /// Capability group, for agent filtering.
    pub capability: String,
}

/// On-disk shape of one external tool schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalToolSchema {
    name: String,
    description: String,
    #[serde(default)]
    parameters: serde_json::Value,
    /// Edge agent serving this tool.
    edge_agent: String,
    #[serde(default)]
    capability: String,
}

// ─────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────

/// Stores tools keyed by name and computes per-agent tool sets.
pub struct ToolManager {
    tools: HashMap<String, Arc<dyn Tool>>,
    external: HashMap<String, ExternalTool>,
}

impl ToolManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            external: HashMap::new(),
        }
    }

    /// Manager populated with the built-in tool set.
    pub fn with_builtins(
        files: Arc<dyn FileOps>,
        exec: Arc<dyn ExecOps>,
        exec_timeout_secs: Option<u64>,
    ) -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(ReadTool::new(files.clone())));
        manager.register(Arc::new(WriteTool::new(files.clone())));
        manager.register(Arc::new(EditTool::new(files.clone())));
        manager.register(Arc::new(GrepTool::new(files.clone())));
        manager.register(Arc::new(FindTool::new(files)));
        manager.register(Arc::new(BashTool::new(exec, exec_timeout_secs)));
        manager
    }

    /// Attach the `edge_call` passthrough tool for a transport.
    pub fn attach_edge(&mut self, transport: Arc<dyn EdgeTransport>) {
        self.register(Arc::new(EdgeCallTool::new(transport)));
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Register an external (edge-bound) tool.
    pub fn register_external(&mut self, ext: ExternalTool) {
        info!(
            tool = %ext.definition.function.name,
            edge_agent = %ext.agent_id,
            "registered external tool"
        );
        self.external
            .insert(ext.definition.function.name.clone(), ext);
    }

    /// Discover external tool schemas from a directory of `*.json` files.
    ///
    /// Malformed files are logged and skipped. Returns how many tools were
    /// loaded.
    pub fn load_schema_dir(&mut self, dir: &Path) -> anyhow::Result<usize> {
        if !dir.is_dir() {
            anyhow::bail!("schema directory not found: {}", dir.display());
        }

        let mut loaded = 0;
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.flatten().collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "unreadable schema file");
                    continue;
                }
            };

            let schema: ExternalToolSchema = match serde_json::from_str(&content) {
                Ok(s) => s,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "malformed schema file");
                    continue;
                }
            };

            let parameters = if schema.parameters.is_null() {
                serde_json::json!({"type": "object", "properties": {}})
            } else {
                schema.parameters
            };

            self.register_external(ExternalTool {
                definition: ToolDefinition::new(&schema.name, &schema.description, parameters),
                agent_id: schema.edge_agent,
                capability: schema.capability,
            });
            loaded += 1;
        }

        info!(dir = %dir.display(), loaded, "external tool discovery complete");
        Ok(loaded)
    }

    /// Look up a built-in tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// The edge binding for an external tool, if one exists.
    pub fn external_binding(&self, name: &str) -> Option<&ExternalTool> {
        self.external.get(name)
    }

    /// Whether a tool of this name exists (built-in or external).
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name) || self.external.contains_key(name)
    }

    /// Names of all tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .keys()
            .chain(self.external.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// The LLM-facing tool set for one agent.
    ///
    /// An agent with no declared capabilities sees every available tool;
    /// otherwise a tool is included when its capability is `"general"` or
    /// appears in the agent's list. Unavailable tools (e.g. `edge_call`
    /// with no worker online) are dropped either way.
    pub fn definitions_for(&self, agent: &AgentDef) -> Vec<ToolDefinition> {
        let allows = |capability: &str| {
            agent.capabilities.is_empty()
                || capability == "general"
                || agent.capabilities.iter().any(|c| c == capability)
        };

        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| t.is_available() && allows(t.capability()))
            .map(|t| t.to_definition())
            .collect();

        defs.extend(
            self.external
                .values()
                .filter(|e| allows(&e.capability))
                .map(|e| e.definition.clone()),
        );

        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Number of tools (built-in + external).
    pub fn len(&self) -> usize {
        self.tools.len() + self.external.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
