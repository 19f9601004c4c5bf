//! File tools — `read`, `write`, `edit`, `grep`, `find`.
//!
//! Thin wrappers around the configured `FileOps` backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::base::{optional_string, require_string, Tool, ToolOutput};
use crate::backend::FileOps;

/// Cap on grep/find result counts.
const MAX_SEARCH_RESULTS: usize = 100;

// ─────────────────────────────────────────────
// read
// ─────────────────────────────────────────────

/// Reads and returns the entire content of a file.
pub struct ReadTool {
    files: Arc<dyn FileOps>,
}

impl ReadTool {
    pub fn new(files: Arc<dyn FileOps>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path. Returns the full text content."
    }

    fn capability(&self) -> &str {
        "file_ops"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or workspace-relative path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolOutput> {
        let path = require_string(&params, "path")?;
        Ok(self.files.read(&path).await?.into())
    }
}

// ─────────────────────────────────────────────
// write
// ─────────────────────────────────────────────

/// Creates or overwrites a file with the given content.
pub struct WriteTool {
    files: Arc<dyn FileOps>,
}

impl WriteTool {
    pub fn new(files: Arc<dyn FileOps>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if needed or overwriting if it exists. \
         Parent directories are created automatically."
    }

    fn capability(&self) -> &str {
        "file_ops"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path for the file" },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolOutput> {
        let path = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        Ok(self.files.write(&path, &content).await?.into())
    }
}

// ─────────────────────────────────────────────
// edit
// ─────────────────────────────────────────────

/// Replaces a text snippet within a file (first occurrence).
pub struct EditTool {
    files: Arc<dyn FileOps>,
}

impl EditTool {
    pub fn new(files: Arc<dyn FileOps>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of `old_text` with `new_text`. \
         Include enough context in `old_text` to uniquely identify the replacement site."
    }

    fn capability(&self) -> &str {
        "file_ops"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to edit" },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find (include surrounding context for uniqueness)"
                },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolOutput> {
        let path = require_string(&params, "path")?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;
        Ok(self.files.edit(&path, &old_text, &new_text).await?.into())
    }
}

// ─────────────────────────────────────────────
// grep
// ─────────────────────────────────────────────

/// Searches file contents for a regex pattern.
pub struct GrepTool {
    files: Arc<dyn FileOps>,
}

impl GrepTool {
    pub fn new(files: Arc<dyn FileOps>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents under a directory for a regex pattern. \
         Returns matching lines as `file:line: text`."
    }

    fn capability(&self) -> &str {
        "file_ops"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex pattern to search for" },
                "path": {
                    "type": "string",
                    "description": "Directory to search (defaults to the workspace root)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolOutput> {
        let pattern = require_string(&params, "pattern")?;
        let path = optional_string(&params, "path").unwrap_or_else(|| ".".into());
        Ok(self
            .files
            .grep(&pattern, &path, MAX_SEARCH_RESULTS)
            .await?
            .into())
    }
}

// ─────────────────────────────────────────────
// find
// ─────────────────────────────────────────────

/// Finds files by name fragment.
pub struct FindTool {
    files: Arc<dyn FileOps>,
}

impl FindTool {
    pub fn new(files: Arc<dyn FileOps>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for FindTool {
    fn name(&self) -> &str {
        "find"
    }

    fn description(&self) -> &str {
        "Find files under a directory whose names contain the given fragment. \
         Returns one path per line."
    }

    fn capability(&self) -> &str {
        "file_ops"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Name fragment to match" },
                "path": {
                    "type": "string",
                    "description": "Directory to search (defaults to the workspace root)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolOutput> {
        let pattern = require_string(&params, "pattern")?;
        let path = optional_string(&params, "path").unwrap_or_else(|| ".".into());
        Ok(self
            .files
            .find(&pattern, &path, MAX_SEARCH_RESULTS)
            .await?
            .into())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use serde_json::json;

    fn setup() -> (tempfile::TempDir, Arc<LocalBackend>) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalBackend::new(dir.path().to_path_buf(), true));
        (dir, backend)
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[tokio::test]
    async fn test_read_tool() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let tool = ReadTool::new(backend);
        let out = tool.execute(params(&[("path", "a.txt")])).await.unwrap();
        assert_eq!(out.text, "hello");
        assert!(out.exit_code.is_none());
    }

    #[tokio::test]
    async fn test_read_tool_missing_param() {
        let (_dir, backend) = setup();
        let tool = ReadTool::new(backend);
        let err = tool.execute(HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("Missing required parameter"));
    }

    #[tokio::test]
    async fn test_write_then_edit() {
        let (dir, backend) = setup();

        let write = WriteTool::new(backend.clone());
        write
            .execute(params(&[("path", "f.txt"), ("content", "one two")]))
            .await
            .unwrap();

        let edit = EditTool::new(backend);
        edit.execute(params(&[
            ("path", "f.txt"),
            ("old_text", "two"),
            ("new_text", "three"),
        ]))
        .await
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(content, "one three");
    }

    #[tokio::test]
    async fn test_grep_tool_defaults_to_workspace() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("x.txt"), "needle in here").unwrap();

        let tool = GrepTool::new(backend);
        let out = tool.execute(params(&[("pattern", "needle")])).await.unwrap();
        assert!(out.text.contains("x.txt:1: needle in here"));
    }

    #[tokio::test]
    async fn test_find_tool() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("target.rs"), "x").unwrap();

        let tool = FindTool::new(backend);
        let out = tool.execute(params(&[("pattern", "target")])).await.unwrap();
        assert!(out.text.contains("target.rs"));
    }

    #[test]
    fn test_tool_capabilities() {
        let (_dir, backend) = setup();
        assert_eq!(ReadTool::new(backend.clone()).capability(), "file_ops");
        assert_eq!(WriteTool::new(backend.clone()).capability(), "file_ops");
        assert_eq!(GrepTool::new(backend).capability(), "file_ops");
    }
}
