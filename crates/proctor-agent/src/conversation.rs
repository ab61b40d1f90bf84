//! Conversation store -- the ordered message log for one session.
//!
//! The store owns every message of exactly one session and maintains the
//! role-alternation invariant: roles strictly alternate starting with
//! `user`.  Tool results are encoded as user turns, matching the Messages
//! API convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum messages retained before the oldest are trimmed away.
pub const MAX_MESSAGES: usize = 40;

/// Who produced a message.  Tool results ride on user turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Provider-assigned id correlating this call with its result.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments as a JSON value; validated against the tool's input type
    /// at dispatch time.
    pub input: Value,
}

/// The runtime's structured response to a [`ToolUseBlock`], echoed back into
/// the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// The [`ToolUseBlock::id`] this result corresponds to.
    pub tool_use_id: String,
    /// Serialized result content (already truncated and redacted).
    pub content: String,
    /// Whether the tool invocation failed.
    #[serde(default)]
    pub is_error: bool,
}

/// A single message in a session's conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Text content; may be empty on assistant messages that only carry
    /// tool-use blocks.
    #[serde(default)]
    pub text: String,
    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUseBlock>,
    /// Tool results carried on a user turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultBlock>,
}

impl Message {
    /// Create a user text message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            tool_uses: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    /// Create an assistant text message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            tool_uses: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    /// Create an assistant message carrying tool-use blocks (and any text
    /// the model produced alongside them).
    pub fn assistant_with_tools(text: impl Into<String>, tool_uses: Vec<ToolUseBlock>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            tool_uses,
            tool_results: Vec::new(),
        }
    }

    /// Create the user turn carrying all tool results for the preceding
    /// assistant message.
    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self {
            role: Role::User,
            text: String::new(),
            tool_uses: Vec::new(),
            tool_results: results,
        }
    }

    /// Whether the message carries no content at all.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_uses.is_empty() && self.tool_results.is_empty()
    }
}

/// Ordered message log with the alternation invariant.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from raw history, repairing malformed sequences:
    /// empty messages are dropped, a message repeating the previous role is
    /// dropped, and a leading assistant message is dropped.  The result
    /// satisfies the alternation invariant or is empty.
    pub fn load_history(raw: Vec<Message>) -> Self {
        let mut messages: Vec<Message> = Vec::with_capacity(raw.len());
        for msg in raw {
            if msg.is_empty() {
                tracing::debug!("dropping empty message from history");
                continue;
            }
            match messages.last() {
                None => {
                    if msg.role == Role::Assistant {
                        tracing::debug!("dropping leading assistant message from history");
                        continue;
                    }
                }
                Some(prev) if prev.role == msg.role => {
                    tracing::debug!(role = ?msg.role, "dropping repeated-role message from history");
                    continue;
                }
                Some(_) => {}
            }
            messages.push(msg);
        }
        Self { messages }
    }

    /// Append a message.  The caller (the loop) is responsible for supplying
    /// messages in alternating order; appends beyond [`MAX_MESSAGES`] trim
    /// the oldest messages.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.trim(MAX_MESSAGES);
    }

    /// Drop the oldest messages down to `max`, then drop leading messages
    /// until the head is a plain user turn.  A leading assistant message
    /// cannot start a conversation, and a leading tool-result turn would
    /// reference a tool_use on an assistant message that was just trimmed
    /// away.
    pub fn trim(&mut self, max: usize) {
        if self.messages.len() > max {
            let excess = self.messages.len() - max;
            self.messages.drain(..excess);
            tracing::debug!(dropped = excess, "trimmed conversation history");
        }
        while matches!(
            self.messages.first(),
            Some(m) if m.role == Role::Assistant || !m.tool_results.is_empty()
        ) {
            self.messages.remove(0);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user turns that carry text (tool-result turns excluded),
    /// used by the rate limiter.
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User && m.tool_results.is_empty())
            .count()
    }

    /// Combined character count of all message content, used by the rate
    /// limiter's token estimate.
    pub fn total_chars(&self) -> usize {
        self.messages
            .iter()
            .map(|m| {
                m.text.len()
                    + m.tool_results.iter().map(|r| r.content.len()).sum::<usize>()
                    + m.tool_uses.iter().map(|u| u.input.to_string().len()).sum::<usize>()
            })
            .sum()
    }

    /// Verify strict alternation starting with `user`.
    pub fn alternation_holds(&self) -> bool {
        let mut expected = Role::User;
        for msg in &self.messages {
            if msg.role != expected {
                return false;
            }
            expected = match expected {
                Role::User => Role::Assistant,
                Role::Assistant => Role::User,
            };
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
