//! Repository hook scripts
//!
//! Supported hooks, looked up in `<repo>/hooks/`:
//! - pre-commit: runs before any version is written (can reject)
//! - post-commit: runs after a branch head advanced (notification)
//! - post-merge: runs after a merge request resolves (notification)
//!
//! Hook scripts receive one `KEY: value` line per field on stdin and
//! `SNAPVC_REPO` in the environment. Values never span lines: `\`, line feeds
//! and carriage returns inside a value arrive as `\\`, `\n` and `\r`. Scripts
//! run on tokio's blocking pool. A pre-hook that exits non-zero rejects the
//! operation with its stderr (or stdout) as the message.

use crate::error::{Result, VcsError};
use crate::object::{CommitKind, Version};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Data describing a write about to happen
#[derive(Debug, Clone)]
pub struct PendingCommit<'a> {
    pub content_id: &'a str,
    pub branch_name: &'a str,
    pub author_id: &'a str,
    pub kind: CommitKind,
    pub message: &'a str,
}

/// Manages hook scripts for a repository.
pub struct HookManager {
    hooks_dir: PathBuf,
}

impl HookManager {
    /// Hooks are expected in `<repo_path>/hooks/`.
    pub fn new(repo_path: PathBuf) -> Self {
        Self {
            hooks_dir: repo_path.join("hooks"),
        }
    }

    /// Return the path to a named hook script.
    pub fn hook_path(&self, name: &str) -> PathBuf {
        self.hooks_dir.join(name)
    }

    /// Run a hook on the blocking pool so a slow script does not stall the
    /// async workers.
    async fn run_hook(
        &self,
        name: &'static str,
        stdin_data: String,
    ) -> std::result::Result<(), String> {
        let hooks_dir = self.hooks_dir.clone();
        tokio::task::spawn_blocking(move || run_script(&hooks_dir, name, &stdin_data))
            .await
            .map_err(|e| format!("hook '{}' did not complete: {}", name, e))?
    }

    /// Run the **pre-commit** hook; a non-zero exit becomes `HookRejected`.
    pub async fn run_pre_commit(&self, pending: &PendingCommit<'_>) -> Result<()> {
        let mut data = String::new();
        data.push_str(&line("CONTENT", pending.content_id));
        data.push_str(&line("BRANCH", pending.branch_name));
        data.push_str(&line("AUTHOR", pending.author_id));
        data.push_str(&line("KIND", &pending.kind.to_string()));
        data.push_str(&line("LOG", pending.message));
        self.run_hook("pre-commit", data).await.map_err(|msg| {
            tracing::warn!(content_id = pending.content_id, "pre-commit hook rejected: {}", msg);
            VcsError::HookRejected(msg)
        })
    }

    /// Run the **post-commit** hook. Errors are logged and ignored; the
    /// version is already reachable from its branch.
    pub async fn run_post_commit(&self, version: &Version, kind: CommitKind) {
        let mut data = String::new();
        data.push_str(&line("CONTENT", &version.content_id));
        data.push_str(&line("BRANCH", &version.branch_name));
        data.push_str(&line("AUTHOR", &version.author_id));
        data.push_str(&line("KIND", &kind.to_string()));
        data.push_str(&line("VERSION", &version.version_number.to_string()));
        data.push_str(&line("VERSION-ID", &version.version_id.to_string()));
        data.push_str(&line("LOG", &version.commit_message));
        if let Err(e) = self.run_hook("post-commit", data).await {
            tracing::warn!("post-commit hook error (ignored): {}", e);
        }
    }

    /// Run the **post-merge** hook (fire-and-forget).
    pub async fn run_post_merge(
        &self,
        content_id: &str,
        merge_id: &str,
        source_branch: &str,
        target_branch: &str,
        status: &str,
    ) {
        let mut data = String::new();
        data.push_str(&line("CONTENT", content_id));
        data.push_str(&line("MERGE-ID", merge_id));
        data.push_str(&line("SOURCE", source_branch));
        data.push_str(&line("TARGET", target_branch));
        data.push_str(&line("STATUS", status));
        if let Err(e) = self.run_hook("post-merge", data).await {
            tracing::warn!("post-merge hook error (ignored): {}", e);
        }
    }

    /// Ensure the hooks directory exists (creates it if missing).
    pub fn ensure_hooks_dir(&self) -> anyhow::Result<()> {
        if !self.hooks_dir.exists() {
            std::fs::create_dir_all(&self.hooks_dir)?;
        }
        Ok(())
    }
}

/// One `KEY: value` stdin line with the value escaped onto a single line.
fn line(key: &str, value: &str) -> String {
    let mut out = String::with_capacity(key.len() + value.len() + 3);
    out.push_str(key);
    out.push_str(": ");
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\n');
    out
}

/// Execute a hook script, piping `stdin_data` to its stdin.
/// A missing hook allows the operation.
fn run_script(hooks_dir: &Path, name: &str, stdin_data: &str) -> std::result::Result<(), String> {
    let hook_path = hooks_dir.join(name);
    if !hook_path.exists() {
        return Ok(());
    }

    let mut child = Command::new(&hook_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("SNAPVC_REPO", hooks_dir.parent().unwrap_or(Path::new(".")))
        .spawn()
        .map_err(|e| format!("failed to execute hook '{}': {}", name, e))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A hook may exit without reading its input
        let _ = stdin.write_all(stdin_data.as_bytes());
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("failed to wait for hook '{}': {}", name, e))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let msg = if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else if !stdout.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        format!(
            "hook '{}' exited with code {}",
            name,
            output.status.code().unwrap_or(-1)
        )
    };
    Err(msg)
}
