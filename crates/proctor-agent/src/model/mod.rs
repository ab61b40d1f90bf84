//! Model client layer: provider-agnostic types, the Anthropic Messages API
//! client, SSE stream parsing, and the retrying wrapper.

pub mod client;
pub mod retry;
pub mod streaming;
pub mod types;

pub use client::{AnthropicClient, AnthropicConfig, LanguageModel};
pub use retry::{Attempt, RetryingClient, next_delay};
pub use streaming::SseParser;
pub use types::{
    ModelRequest, ModelStreamEvent, ModelTurn, StopReason, StreamDelta, SystemBlock,
    ToolDefinition, Usage,
};
