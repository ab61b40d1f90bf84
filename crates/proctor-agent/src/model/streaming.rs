//! SSE stream parser for the Messages API.
//!
//! The streaming format sends `event:` and `data:` lines in standard SSE
//! format.  This module parses those lines into typed [`ModelStreamEvent`]
//! values for the client and the streaming agent loop to consume.

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::model::types::{ModelStreamEvent, StreamDelta, Usage};

/// Parses raw SSE lines from the Messages API stream.
///
/// Accumulates partial state across calls because SSE events span multiple
/// lines (`event:` followed by `data:`).
#[derive(Debug, Default)]
pub struct SseParser {
    /// The most recently seen `event:` type.
    current_event_type: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line from the SSE stream.
    ///
    /// Returns `Some(event)` when a complete event has been parsed, `None`
    /// for comment lines, blank lines, or the `event:` prefix line (which
    /// just sets internal state for the next `data:` line).
    pub fn parse_line(&mut self, line: &str) -> Result<Option<ModelStreamEvent>> {
        let line = line.trim_end();

        // SSE comment lines start with `:`.
        if line.starts_with(':') || line.is_empty() {
            return Ok(None);
        }

        if let Some(event_type) = line.strip_prefix("event: ") {
            self.current_event_type = Some(event_type.to_owned());
            return Ok(None);
        }

        if let Some(data) = line.strip_prefix("data: ") {
            let event_type = self
                .current_event_type
                .take()
                .unwrap_or_else(|| "unknown".into());
            return self.parse_event(&event_type, data);
        }

        tracing::trace!(line, "ignoring unrecognised SSE line");
        Ok(None)
    }

    fn parse_event(&self, event_type: &str, data: &str) -> Result<Option<ModelStreamEvent>> {
        match event_type {
            "message_start" => {
                let v: Value = parse_json(data)?;
                let message = &v["message"];
                Ok(Some(ModelStreamEvent::MessageStart {
                    message_id: json_string(message, "id"),
                    model: json_string(message, "model"),
                    usage: parse_usage(&message["usage"]),
                }))
            }

            "content_block_start" => {
                let v: Value = parse_json(data)?;
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let block = &v["content_block"];
                Ok(Some(ModelStreamEvent::ContentBlockStart {
                    index,
                    content_type: json_string(block, "type"),
                    id: block["id"].as_str().map(String::from),
                    name: block["name"].as_str().map(String::from),
                }))
            }

            "content_block_delta" => {
                let v: Value = parse_json(data)?;
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let delta_obj = &v["delta"];
                let delta_type = json_string(delta_obj, "type");

                let delta = match delta_type.as_str() {
                    "text_delta" => StreamDelta::TextDelta(json_string(delta_obj, "text")),
                    "input_json_delta" => {
                        StreamDelta::InputJsonDelta(json_string(delta_obj, "partial_json"))
                    }
                    other => {
                        tracing::warn!(delta_type = other, "unknown delta type");
                        return Ok(None);
                    }
                };

                Ok(Some(ModelStreamEvent::ContentBlockDelta { index, delta }))
            }

            "content_block_stop" => {
                let v: Value = parse_json(data)?;
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                Ok(Some(ModelStreamEvent::ContentBlockStop { index }))
            }

            "message_delta" => {
                let v: Value = parse_json(data)?;
                let stop_reason = v["delta"]["stop_reason"].as_str().map(String::from);
                let output_tokens = v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
                Ok(Some(ModelStreamEvent::MessageDelta {
                    stop_reason,
                    output_tokens,
                }))
            }

            "message_stop" => Ok(Some(ModelStreamEvent::MessageStop)),

            "ping" => Ok(Some(ModelStreamEvent::Ping)),

            // `[DONE]` or any unrecognised event type.
            _ => {
                if data.trim() == "[DONE]" {
                    Ok(Some(ModelStreamEvent::MessageStop))
                } else {
                    tracing::trace!(event_type, "ignoring unknown SSE event type");
                    Ok(None)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_json(data: &str) -> Result<Value> {
    serde_json::from_str(data).map_err(|e| AgentError::ModelParseFailed {
        reason: format!("invalid JSON in SSE data: {e}"),
    })
}

fn json_string(v: &Value, field: &str) -> String {
    v[field].as_str().unwrap_or_default().to_owned()
}

/// Parse a usage object, tolerating missing fields.
pub(crate) fn parse_usage(v: &Value) -> Usage {
    Usage {
        input_tokens: v["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["output_tokens"].as_u64().unwrap_or(0) as u32,
        cache_creation_tokens: v["cache_creation_input_tokens"].as_u64().unwrap_or(0) as u32,
        cache_read_tokens: v["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_start_with_usage() {
        let mut parser = SseParser::new();
        assert!(parser.parse_line("event: message_start").unwrap().is_none());
        let event = parser
            .parse_line(r#"data: {"type":"message_start","message":{"id":"msg_01","model":"claude-sonnet-4-20250514","usage":{"input_tokens":12,"output_tokens":0,"cache_read_input_tokens":8}}}"#)
            .unwrap()
            .unwrap();

        match event {
            ModelStreamEvent::MessageStart {
                message_id,
                model,
                usage,
            } => {
                assert_eq!(message_id, "msg_01");
                assert_eq!(model, "claude-sonnet-4-20250514");
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.cache_read_tokens, 8);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_tool_use_block_start() {
        let mut parser = SseParser::new();
        parser.parse_line("event: content_block_start").unwrap();
        let event = parser
            .parse_line(r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_01","name":"read"}}"#)
            .unwrap()
            .unwrap();

        match event {
            ModelStreamEvent::ContentBlockStart {
                index,
                content_type,
                id,
                name,
            } => {
                assert_eq!(index, 1);
                assert_eq!(content_type, "tool_use");
                assert_eq!(id.as_deref(), Some("tu_01"));
                assert_eq!(name.as_deref(), Some("read"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_text_delta() {
        let mut parser = SseParser::new();
        parser.parse_line("event: content_block_delta").unwrap();
        let event = parser
            .parse_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#)
            .unwrap()
            .unwrap();

        match event {
            ModelStreamEvent::ContentBlockDelta {
                delta: StreamDelta::TextDelta(t),
                ..
            } => assert_eq!(t, "Hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_input_json_delta() {
        let mut parser = SseParser::new();
        parser.parse_line("event: content_block_delta").unwrap();
        let event = parser
            .parse_line(r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#)
            .unwrap()
            .unwrap();

        match event {
            ModelStreamEvent::ContentBlockDelta {
                delta: StreamDelta::InputJsonDelta(j),
                ..
            } => assert_eq!(j, r#"{"path":"#),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_message_delta_stop_reason() {
        let mut parser = SseParser::new();
        parser.parse_line("event: message_delta").unwrap();
        let event = parser
            .parse_line(r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":42}}"#)
            .unwrap()
            .unwrap();

        match event {
            ModelStreamEvent::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                assert_eq!(stop_reason.as_deref(), Some("tool_use"));
                assert_eq!(output_tokens, 42);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.parse_line("").unwrap().is_none());
        assert!(parser.parse_line(": keepalive").unwrap().is_none());
    }

    #[test]
    fn ping_event() {
        let mut parser = SseParser::new();
        parser.parse_line("event: ping").unwrap();
        let event = parser.parse_line("data: {}").unwrap().unwrap();
        assert!(matches!(event, ModelStreamEvent::Ping));
    }
}
