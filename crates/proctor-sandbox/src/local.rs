//! In-process sandbox backed by a local directory tree.
//!
//! Each session gets its own subdirectory under a base directory.  Logical
//! workspace paths (`/workspace/...`) are mapped into that subdirectory, and
//! `.`/`..` components are resolved lexically before the containment check so
//! a traversal cannot escape the session root even when the target does not
//! exist yet.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};
use crate::{CommandOutput, FileEntry, FileKind, Sandbox};

/// Default command timeout in seconds.
const COMMAND_TIMEOUT_SECS: u64 = 60;

/// Maximum bytes kept from each of stdout and stderr.
const MAX_OUTPUT_BYTES: usize = 100 * 1024;

/// A sandbox rooted at a local directory, one subdirectory per session.
pub struct LocalSandbox {
    /// Directory containing one subdirectory per session.
    base_dir: PathBuf,
    /// The logical workspace root that tool paths are expressed against
    /// (e.g. `/workspace`).
    workspace_root: String,
    /// Command timeout in seconds.
    command_timeout_secs: u64,
}

impl LocalSandbox {
    /// Create a sandbox storing session workspaces under `base_dir`, with
    /// tool paths expressed against `workspace_root`.
    pub fn new(base_dir: impl Into<PathBuf>, workspace_root: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            workspace_root: workspace_root.into(),
            command_timeout_secs: COMMAND_TIMEOUT_SECS,
        }
    }

    /// Override the command timeout.
    pub fn with_command_timeout(mut self, seconds: u64) -> Self {
        self.command_timeout_secs = seconds;
        self
    }

    /// The on-disk root for a session, created lazily.
    async fn session_root(&self, session_id: &str) -> Result<PathBuf> {
        let root = self.base_dir.join(session_id);
        tokio::fs::create_dir_all(&root).await?;
        Ok(root)
    }

    /// Map a logical workspace path onto the session's on-disk tree and
    /// verify it stays inside the session root.
    fn resolve(&self, session_root: &Path, logical_path: &str) -> Result<PathBuf> {
        let root = self.workspace_root.trim_end_matches('/');
        let relative = logical_path
            .strip_prefix(root)
            .map(|r| r.trim_start_matches('/'))
            .unwrap_or_else(|| logical_path.trim_start_matches('/'));

        let candidate = session_root.join(relative);
        let normalized = normalize_path(&candidate);

        if !normalized.starts_with(session_root) {
            return Err(SandboxError::PathEscapes {
                path: logical_path.to_owned(),
            });
        }
        Ok(normalized)
    }

    /// Convert an on-disk path back to its logical workspace form.
    fn logical_path(&self, session_root: &Path, on_disk: &Path) -> String {
        let root = self.workspace_root.trim_end_matches('/');
        match on_disk.strip_prefix(session_root) {
            Ok(rel) if rel.as_os_str().is_empty() => root.to_owned(),
            Ok(rel) => format!("{root}/{}", rel.display()),
            Err(_) => on_disk.display().to_string(),
        }
    }
}

/// Resolve `.` and `..` components lexically, without touching the
/// filesystem (the target may not exist yet).
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

/// Truncate raw command output, converting to a lossy UTF-8 string.
fn truncate_output(raw: &[u8]) -> String {
    if raw.len() <= MAX_OUTPUT_BYTES {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        let mut s = String::from_utf8_lossy(&raw[..MAX_OUTPUT_BYTES]).into_owned();
        s.push_str("\n... [output truncated at 100 KB]");
        s
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn read_file(&self, session_id: &str, path: &str) -> Result<String> {
        let root = self.session_root(session_id).await?;
        let full = self.resolve(&root, path)?;
        debug!(session_id, path, "sandbox read");

        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SandboxError::NotFound {
                path: path.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, session_id: &str, path: &str, content: &str) -> Result<u64> {
        let root = self.session_root(session_id).await?;
        let full = self.resolve(&root, path)?;
        debug!(session_id, path, bytes = content.len(), "sandbox write");

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        Ok(content.len() as u64)
    }

    async fn run_command(&self, session_id: &str, command: &str) -> Result<CommandOutput> {
        let root = self.session_root(session_id).await?;
        debug!(session_id, command, "sandbox command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&root)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Process {
                reason: format!("failed to spawn process: {e}"),
            })?;

        // On timeout the child is dropped and killed via kill_on_drop(true).
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(self.command_timeout_secs),
            child.wait_with_output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: truncate_output(&output.stdout),
                stderr: truncate_output(&output.stderr),
                exit_code: output.status.code().unwrap_or(-1),
            }),
            Ok(Err(e)) => Err(SandboxError::Process {
                reason: format!("process error: {e}"),
            }),
            Err(_) => {
                warn!(session_id, command, "sandbox command timed out");
                Err(SandboxError::Timeout {
                    seconds: self.command_timeout_secs,
                })
            }
        }
    }

    async fn list_tree(&self, session_id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let root = self.session_root(session_id).await?;
        let start = self.resolve(&root, path)?;

        let mut entries = Vec::new();
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(SandboxError::NotFound {
                        path: path.to_owned(),
                    });
                }
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let file_type = entry.file_type().await?;
                let meta = entry.metadata().await?;
                let on_disk = entry.path();

                let kind = if file_type.is_dir() {
                    pending.push(on_disk.clone());
                    FileKind::Directory
                } else {
                    FileKind::File
                };

                entries.push(FileEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: self.logical_path(&root, &on_disk),
                    kind,
                    size: if file_type.is_dir() { 0 } else { meta.len() },
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
