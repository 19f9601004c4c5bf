//! Pluggable file and exec backends for the built-in tools.
//!
//! Built-in tools never touch the filesystem or spawn processes directly;
//! they go through `FileOps`/`ExecOps` so the same tools can run against a
//! local workspace or a remote mount.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Maximum tool output length before truncation (characters).
pub const MAX_OUTPUT_LEN: usize = 10_000;

/// Outcome of one command execution.
#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecOutcome {
    /// Render stdout/stderr/exit code into the text the LLM reads.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.stdout.is_empty() {
            out.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("stderr:\n");
            out.push_str(&self.stderr);
        }
        match self.exit_code {
            Some(0) | None => {}
            Some(code) => {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("(exit code {code})"));
            }
        }
        if out.is_empty() {
            out.push_str("(no output)");
        }
        evoclaw_core::utils::truncate_string(&out, MAX_OUTPUT_LEN)
    }
}

/// File operations behind the `read`/`write`/`edit`/`grep`/`find` tools.
#[async_trait]
pub trait FileOps: Send + Sync {
    /// Read a file's entire content.
    async fn read(&self, path: &str) -> anyhow::Result<String>;

    /// Create or overwrite a file. Returns a confirmation line.
    async fn write(&self, path: &str, content: &str) -> anyhow::Result<String>;

    /// Replace the first occurrence of `old_text` with `new_text`.
    async fn edit(&self, path: &str, old_text: &str, new_text: &str) -> anyhow::Result<String>;

    /// Search file contents under `path` for a regex pattern. Returns
    /// `file:line: text` matches, capped at `max_results`.
    async fn grep(&self, pattern: &str, path: &str, max_results: usize) -> anyhow::Result<String>;

    /// Find files under `path` whose names contain `pattern`. Returns one
    /// path per line, capped at `max_results`.
    async fn find(&self, pattern: &str, path: &str, max_results: usize) -> anyhow::Result<String>;
}

/// Command execution behind the `bash` tool.
#[async_trait]
pub trait ExecOps: Send + Sync {
    /// Run a shell command with the given timeout.
    async fn exec(&self, command: &str, timeout: Duration) -> anyhow::Result<ExecOutcome>;
}

// ─────────────────────────────────────────────
// Local backend
// ─────────────────────────────────────────────

/// Backend operating on the local filesystem and shell.
pub struct LocalBackend {
    /// Working directory for commands and relative paths.
    workspace: PathBuf,
    /// If set, paths outside this directory are rejected.
    allowed_dir: Option<PathBuf>,
}

impl LocalBackend {
    /// Create a backend rooted at `workspace`.
    ///
    /// With `restrict` set, file access outside the workspace is rejected.
    pub fn new(workspace: PathBuf, restrict: bool) -> Self {
        let allowed_dir = restrict.then(|| workspace.clone());
        Self {
            workspace,
            allowed_dir,
        }
    }

    /// The workspace root.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolve a user-supplied path against the workspace, enforcing the
    /// allowed-dir restriction.
    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let expanded = evoclaw_core::utils::expand_home(path);
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.workspace.join(expanded)
        };

        // Canonicalize when possible so `..` segments cannot escape the
        // allowed directory. For not-yet-existing files, canonicalize the
        // parent and re-attach the file name.
        let resolved = if joined.exists() {
            joined.canonicalize().unwrap_or(joined)
        } else if let Some(parent) = joined.parent() {
            if parent.exists() {
                let canon = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
                match joined.file_name() {
                    Some(name) => canon.join(name),
                    None => joined,
                }
            } else {
                joined
            }
        } else {
            joined
        };

        if let Some(allowed) = &self.allowed_dir {
            let allowed = allowed
                .canonicalize()
                .unwrap_or_else(|_| allowed.to_path_buf());
            if !resolved.starts_with(&allowed) {
                anyhow::bail!(
                    "Access denied: path '{}' is outside allowed directory '{}'",
                    resolved.display(),
                    allowed.display()
                );
            }
        }

        Ok(resolved)
    }
}

#[async_trait]
impl FileOps for LocalBackend {
    async fn read(&self, path: &str) -> anyhow::Result<String> {
        let path = self.resolve(path)?;
        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        Ok(content)
    }

    async fn write(&self, path: &str, content: &str) -> anyhow::Result<String> {
        let path = self.resolve(path)?;
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow::anyhow!("Failed to create directory {}: {e}", parent.display())
                })?;
            }
        }

        let bytes = content.len();
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        Ok(format!("Wrote {bytes} bytes to {}", path.display()))
    }

    async fn edit(&self, path: &str, old_text: &str, new_text: &str) -> anyhow::Result<String> {
        let path = self.resolve(path)?;
        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;

        let count = content.matches(old_text).count();
        if count == 0 {
            anyhow::bail!("old_text not found in {}", path.display());
        }

        let mut warning = String::new();
        if count > 1 {
            warning = format!(
                "Warning: old_text appears {count} times; only the first occurrence was replaced. "
            );
        }

        let updated = content.replacen(old_text, new_text, 1);
        tokio::fs::write(&path, updated)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;

        Ok(format!("{warning}Edited {}", path.display()))
    }

    async fn grep(&self, pattern: &str, path: &str, max_results: usize) -> anyhow::Result<String> {
        let root = self.resolve(path)?;
        let re = regex::Regex::new(pattern)
            .map_err(|e| anyhow::anyhow!("invalid pattern '{pattern}': {e}"))?;

        // Directory walk is synchronous; run it off the async threads.
        let matches = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            let mut files: Vec<PathBuf> = Vec::new();
            collect_files(&root, &mut files);

            'outer: for file in files {
                let Ok(content) = std::fs::read_to_string(&file) else {
                    continue; // binary or unreadable
                };
                for (lineno, line) in content.lines().enumerate() {
                    if re.is_match(line) {
                        matches.push(format!("{}:{}: {}", file.display(), lineno + 1, line.trim()));
                        if matches.len() >= max_results {
                            break 'outer;
                        }
                    }
                }
            }
            matches
        })
        .await?;

        if matches.is_empty() {
            Ok(format!("No matches for '{pattern}'"))
        } else {
            Ok(matches.join("\n"))
        }
    }

    async fn find(&self, pattern: &str, path: &str, max_results: usize) -> anyhow::Result<String> {
        let root = self.resolve(path)?;
        let needle = pattern.to_lowercase();

        let found = tokio::task::spawn_blocking(move || {
            let mut files: Vec<PathBuf> = Vec::new();
            collect_files(&root, &mut files);

            files
                .into_iter()
                .filter(|f| {
                    f.file_name()
                        .map(|n| n.to_string_lossy().to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .take(max_results)
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
        })
        .await?;

        if found.is_empty() {
            Ok(format!("No files matching '{pattern}'"))
        } else {
            Ok(found.join("\n"))
        }
    }
}

/// Recursively collect regular files, skipping hidden entries and VCS dirs.
fn collect_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    let mut entries: Vec<_> = entries.flatten().collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

#[async_trait]
impl ExecOps for LocalBackend {
    async fn exec(&self, command: &str, timeout: Duration) -> anyhow::Result<ExecOutcome> {
        debug!(command = %command, cwd = %self.workspace.display(), "exec");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| anyhow::anyhow!("command timed out after {timeout:?}"))?
            .map_err(|e| anyhow::anyhow!("failed to spawn command: {e}"))?;

        Ok(ExecOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(dir: &Path, restrict: bool) -> LocalBackend {
        LocalBackend::new(dir.to_path_buf(), restrict)
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        b.write("notes.txt", "hello backend").await.unwrap();
        let content = b.read("notes.txt").await.unwrap();
        assert_eq!(content, "hello backend");
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        let msg = b.write("nested/deep/file.txt", "x").await.unwrap();
        assert!(msg.contains("1 bytes"));
        assert!(dir.path().join("nested/deep/file.txt").is_file());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);
        let err = b.read("ghost.txt").await.unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_edit_replaces_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        b.write("f.txt", "aaa bbb aaa").await.unwrap();
        b.edit("f.txt", "aaa", "zzz").await.unwrap();
        assert_eq!(b.read("f.txt").await.unwrap(), "zzz bbb aaa");
    }

    #[tokio::test]
    async fn test_edit_warns_on_multiple_matches() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        b.write("f.txt", "x x").await.unwrap();
        let msg = b.edit("f.txt", "x", "y").await.unwrap();
        assert!(msg.starts_with("Warning:"));
    }

    #[tokio::test]
    async fn test_edit_missing_old_text() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        b.write("f.txt", "content").await.unwrap();
        let err = b.edit("f.txt", "absent", "y").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_restricted_backend_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        let err = b.read("/etc/hostname").await.unwrap_err();
        assert!(err.to_string().contains("Access denied"));

        let err = b.read("../outside.txt").await.unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[tokio::test]
    async fn test_unrestricted_backend_allows_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("free.txt"), "free").unwrap();

        let b = backend(dir.path(), false);
        let content = b
            .read(other.path().join("free.txt").to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(content, "free");
    }

    #[tokio::test]
    async fn test_exec_captures_output_and_code() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        let out = b.exec("echo hi; exit 3", Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.exit_code, Some(3));
        assert!(out.render().contains("(exit code 3)"));
    }

    #[tokio::test]
    async fn test_exec_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        let out = b.exec("pwd", Duration::from_secs(5)).await.unwrap();
        let canon = dir.path().canonicalize().unwrap();
        assert_eq!(out.stdout.trim(), canon.to_string_lossy());
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        let err = b.exec("sleep 5", Duration::from_millis(100)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_grep_finds_lines() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        b.write("a.txt", "alpha\nbeta\ngamma").await.unwrap();
        b.write("sub/b.txt", "beta again").await.unwrap();

        let out = b.grep("beta", ".", 50).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("a.txt:2: beta"));
        assert!(lines[1].contains("b.txt:1: beta again"));
    }

    #[tokio::test]
    async fn test_grep_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);
        b.write("a.txt", "nothing here").await.unwrap();

        let out = b.grep("zzz", ".", 50).await.unwrap();
        assert!(out.contains("No matches"));
    }

    #[tokio::test]
    async fn test_grep_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);
        let err = b.grep("(unclosed", ".", 50).await.unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[tokio::test]
    async fn test_find_by_name_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);

        b.write("report_2026.md", "x").await.unwrap();
        b.write("sub/report_old.md", "x").await.unwrap();
        b.write("other.txt", "x").await.unwrap();

        let out = b.find("report", ".", 50).await.unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(!out.contains("other.txt"));
    }

    #[tokio::test]
    async fn test_find_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(dir.path(), true);
        for i in 0..5 {
            b.write(&format!("file_{i}.txt"), "x").await.unwrap();
        }

        let out = b.find("file_", ".", 3).await.unwrap();
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn test_render_empty_output() {
        let out = ExecOutcome {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        };
        assert_eq!(out.render(), "(no output)");
    }

    #[test]
    fn test_render_stderr_section() {
        let out = ExecOutcome {
            stdout: "ok".into(),
            stderr: "warning".into(),
            exit_code: Some(0),
        };
        let rendered = out.render();
        assert!(rendered.contains("ok"));
        assert!(rendered.contains("stderr:\nwarning"));
    }
}
