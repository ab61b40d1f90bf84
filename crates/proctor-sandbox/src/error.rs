//! Sandbox error types.

/// Unified error type for sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// An I/O operation failed inside the sandbox.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested path does not exist in the session workspace.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The path resolves outside the session workspace.
    #[error("path `{path}` escapes the session workspace")]
    PathEscapes { path: String },

    /// A spawned process could not be started or waited on.
    #[error("process error: {reason}")]
    Process { reason: String },

    /// A command exceeded its time limit.
    #[error("command timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, SandboxError>;
