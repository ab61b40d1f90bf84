//! Agent error types.
//!
//! Only configuration problems and non-retryable model failures reach the
//! direct caller as errors.  Anything that goes wrong inside a tool call is
//! converted to an error tool result and fed back into the conversation so
//! the model can adapt.

use std::time::Duration;

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Model errors --------------------------------------------------------
    /// An HTTP request to the model provider failed.
    #[error("model request failed: {reason}")]
    ModelRequestFailed { reason: String },

    /// The provider is rate-limiting or overloaded (HTTP 429/503/529).
    /// Retried transparently by the retrying client.
    #[error("model provider overloaded (status {status})")]
    ModelOverloaded {
        status: u16,
        /// Server-supplied retry delay, when present.
        retry_after: Option<Duration>,
    },

    /// The model response could not be parsed into the expected format.
    #[error("model response parse error: {reason}")]
    ModelParseFailed { reason: String },

    /// The streaming SSE connection was interrupted or produced invalid data.
    #[error("model stream error: {reason}")]
    ModelStreamError { reason: String },

    /// The API key is missing or empty.
    #[error("missing api key for model provider")]
    MissingApiKey,

    // -- Caller-facing configuration errors ----------------------------------
    /// Session or tool configuration is invalid or incomplete.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The conversation exceeded its per-question budget.
    #[error("rate limited: {reason}")]
    RateLimited { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether the retrying client should try this error again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelOverloaded { .. })
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::ModelRequestFailed {
            reason: err.to_string(),
        }
    }
}
