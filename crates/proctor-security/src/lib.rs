//! Security gate for the Proctor interview runtime.
//!
//! Every surface between the candidate-facing model and the sandbox passes
//! through this crate: shell commands, file paths, inbound conversation
//! history, and outbound tool output.  All checks are pure functions over
//! their inputs and return a [`Verdict`] rather than an error -- an expected
//! denial is a value, not an exception.
//!
//! ## Modules
//!
//! - [`command`] -- shell command denylist + allowlist.
//! - [`path`] -- workspace path containment and blocked segments.
//! - [`redact`] -- secret redaction for logs and model-visible output.
//! - [`inbound`] -- inbound message sanitization and rate limits.

pub mod command;
pub mod inbound;
pub mod path;
pub mod redact;

pub use command::CommandPolicy;
pub use inbound::{InboundMessage, RateLimits, sanitize_messages, sanitize_text};
pub use path::PathPolicy;
pub use redact::redact_secrets;

/// The outcome of a security check.
///
/// Denials carry a human-readable reason suitable for feeding back to the
/// model so it can self-correct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The input passed all checks.
    Allow,
    /// The input was rejected.
    Deny {
        /// Why the input was rejected.
        reason: String,
    },
}

impl Verdict {
    /// Construct a denial with the given reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    /// Whether the check passed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// The denial reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason } => Some(reason),
        }
    }
}
