//! Agent runtime for proctored coding interviews.
//!
//! Drives an LLM assistant against a sandboxed candidate workspace: the
//! blocking [`runtime::AgentLoop`] and streaming
//! [`streaming::StreamingAgentLoop`] handle interactive turns, and the
//! [`evaluation::FastEvaluationLoop`] scores a finished session.  Tool
//! access is scoped by [`config::HelpfulnessLevel`] and every call passes
//! through the security gate in `proctor-security` before touching the
//! sandbox.

pub mod config;
pub mod conversation;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod prompt;
pub mod registry;
pub mod runtime;
pub mod streaming;
pub mod tools;

#[cfg(test)]
mod testutil;

pub use config::{HelpfulnessLevel, SessionConfig};
pub use conversation::{ConversationStore, Message, Role, ToolResultBlock, ToolUseBlock};
pub use error::{AgentError, Result};
pub use evaluation::{Evaluation, EvaluationSource, FastEvaluationLoop, TestResults};
pub use model::{AnthropicClient, AnthropicConfig, LanguageModel, RetryingClient};
pub use registry::{MetricsSnapshot, SessionMetrics, SessionRegistry};
pub use runtime::{AgentLoop, AgentResponse, ResponseMetadata};
pub use streaming::{AbortHandle, AgentEvent, StreamingAgentLoop};
pub use tools::{ToolExecutor, ToolRegistry, parse_test_counts};
