//! Provider-agnostic types for model interaction.
//!
//! These model the data flowing between the agent loops and the model
//! provider; [`super::client`] translates them into the Messages API wire
//! format.

use serde::{Deserialize, Serialize};

use crate::conversation::{Message, ToolUseBlock};

/// One block of the system prompt.  Cacheable blocks are marked for provider
/// prompt caching; the dynamic problem-statement block is not.
#[derive(Debug, Clone)]
pub struct SystemBlock {
    pub text: String,
    pub cacheable: bool,
}

impl SystemBlock {
    /// A static block eligible for prompt caching (security rules, role
    /// description, tool usage guide).
    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cacheable: true,
        }
    }

    /// A dynamic, non-cached block (current problem statement).
    pub fn dynamic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cacheable: false,
        }
    }
}

/// A tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    pub input_schema: serde_json::Value,
}

/// A full request for one model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Model identifier.
    pub model: String,
    /// Maximum tokens the model may generate this turn.
    pub max_tokens: u32,
    /// System prompt, split into cacheable and dynamic blocks.
    pub system: Vec<SystemBlock>,
    /// Conversation history.
    pub messages: Vec<Message>,
    /// Tools the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Pin the model's next move to a specific tool (forced submission).
    pub tool_choice: Option<String>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl StopReason {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "end_turn" => Some(Self::EndTurn),
            "tool_use" => Some(Self::ToolUse),
            "max_tokens" => Some(Self::MaxTokens),
            _ => None,
        }
    }
}

/// Token usage for one model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
}

impl Usage {
    /// Accumulate another call's usage into this total.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

/// The finalized result of one model call: the authoritative source for
/// text, tool inputs, stop reason, and usage.  Streaming consumers must take
/// tool inputs from here rather than from incrementally-parsed JSON.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    /// Concatenated text content.
    pub text: String,
    /// Tool-use blocks, in emission order.
    pub tool_uses: Vec<ToolUseBlock>,
    /// Why the model stopped.
    pub stop_reason: StopReason,
    /// Token usage for this call.
    pub usage: Usage,
}

impl ModelTurn {
    pub fn has_tool_uses(&self) -> bool {
        !self.tool_uses.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Streaming events
// ---------------------------------------------------------------------------

/// Events emitted while consuming an SSE stream from the Messages API.
/// These map to the `event:` field in the SSE stream.
#[derive(Debug, Clone)]
pub enum ModelStreamEvent {
    /// The stream has started; input tokens are known at stream start.
    MessageStart {
        message_id: String,
        model: String,
        usage: Usage,
    },

    /// A new content block has started.  `content_type` is `"text"` or
    /// `"tool_use"`; tool-use blocks carry their id and name immediately.
    ContentBlockStart {
        index: u32,
        content_type: String,
        id: Option<String>,
        name: Option<String>,
    },

    /// An incremental delta within a content block.
    ContentBlockDelta { index: u32, delta: StreamDelta },

    /// A content block has finished streaming.
    ContentBlockStop { index: u32 },

    /// The overall message is complete; carries stop reason and output
    /// token count.
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: u32,
    },

    /// The stream has fully terminated.
    MessageStop,

    /// A ping / keepalive event (no payload).
    Ping,
}

/// Incremental delta within a streaming content block.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text.
    TextDelta(String),
    /// A chunk of JSON for a tool-use input.  Unreliable until the block
    /// stops; the finalized [`ModelTurn`] is authoritative.
    InputJsonDelta(String),
}
