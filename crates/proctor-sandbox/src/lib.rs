//! Sandbox interface for the Proctor interview runtime.
//!
//! Tool calls never touch the host filesystem or shell directly; they go
//! through a [`Sandbox`], the isolated per-candidate environment where file
//! and process operations actually take effect.  In production this is a
//! remote execution service; [`LocalSandbox`] is an in-process
//! implementation used by the CLI and the test suite.

pub mod error;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{Result, SandboxError};
pub use local::LocalSandbox;

/// Whether a tree entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// One entry in a workspace file tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Base name of the entry.
    pub name: String,
    /// Workspace-relative absolute path (e.g. `/workspace/src/main.py`).
    pub path: String,
    /// File or directory.
    pub kind: FileKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

/// Output of a command executed inside the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// The isolated execution and storage environment for one or more interview
/// sessions.  All operations are scoped by `session_id`.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Read the full contents of a file.
    async fn read_file(&self, session_id: &str, path: &str) -> Result<String>;

    /// Write (or overwrite) a file, creating parent directories as needed.
    /// Returns the number of bytes written.
    async fn write_file(&self, session_id: &str, path: &str, content: &str) -> Result<u64>;

    /// Run a shell command in the session workspace.
    async fn run_command(&self, session_id: &str, command: &str) -> Result<CommandOutput>;

    /// Recursively list the tree under `path` (the workspace root when
    /// `path` is the root itself).
    async fn list_tree(&self, session_id: &str, path: &str) -> Result<Vec<FileEntry>>;
}
