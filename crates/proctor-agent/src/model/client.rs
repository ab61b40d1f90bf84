//! Messages API client.
//!
//! Implements [`LanguageModel`] over the Anthropic Messages API with both
//! non-streaming and streaming SSE modes, tool use, and a system prompt
//! split into a cacheable static block and a non-cached dynamic block.

use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use async_trait::async_trait;

use crate::conversation::{Message, Role, ToolUseBlock};
use crate::error::{AgentError, Result};
use crate::model::streaming::{SseParser, parse_usage};
use crate::model::types::{
    ModelRequest, ModelStreamEvent, ModelTurn, StopReason, StreamDelta, ToolDefinition, Usage,
};

/// Default Messages API base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Statuses that indicate transient provider overload.
const OVERLOAD_STATUSES: &[u16] = &[429, 503, 529];

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One model call, blocking or streaming.  The streaming variant emits
/// SSE-level events as they arrive and still returns the authoritative
/// finalized turn -- consumers must take tool inputs from the returned
/// [`ModelTurn`], not from partial JSON deltas.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a request and return the full response.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn>;

    /// Send a request in streaming mode, invoking `on_event` for each
    /// stream event.  The default implementation performs a non-streaming
    /// call and synthesizes the equivalent events.
    async fn complete_streaming(
        &self,
        request: &ModelRequest,
        on_event: &mut (dyn FnMut(ModelStreamEvent) + Send),
    ) -> Result<ModelTurn> {
        let turn = self.complete(request).await?;
        let mut index = 0u32;

        if !turn.text.is_empty() {
            on_event(ModelStreamEvent::ContentBlockStart {
                index,
                content_type: "text".into(),
                id: None,
                name: None,
            });
            on_event(ModelStreamEvent::ContentBlockDelta {
                index,
                delta: StreamDelta::TextDelta(turn.text.clone()),
            });
            on_event(ModelStreamEvent::ContentBlockStop { index });
            index += 1;
        }

        for tool_use in &turn.tool_uses {
            on_event(ModelStreamEvent::ContentBlockStart {
                index,
                content_type: "tool_use".into(),
                id: Some(tool_use.id.clone()),
                name: Some(tool_use.name.clone()),
            });
            on_event(ModelStreamEvent::ContentBlockStop { index });
            index += 1;
        }

        on_event(ModelStreamEvent::MessageStop);
        Ok(turn)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to the Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    config: AnthropicConfig,
    http: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new client.  An empty API key is a configuration error.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| AgentError::ModelRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, http })
    }

    // -- Request building ----------------------------------------------------

    /// Build the JSON body for the Messages API.
    fn build_request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages_to_wire(&request.messages),
        });

        if !request.system.is_empty() {
            let blocks: Vec<Value> = request
                .system
                .iter()
                .map(|block| {
                    let mut v = json!({"type": "text", "text": block.text});
                    if block.cacheable {
                        v["cache_control"] = json!({"type": "ephemeral"});
                    }
                    v
                })
                .collect();
            body["system"] = json!(blocks);
        }

        if !request.tools.is_empty() {
            body["tools"] = tools_to_wire(&request.tools);
        }

        if let Some(name) = &request.tool_choice {
            body["tool_choice"] = json!({"type": "tool", "name": name});
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    /// Send the HTTP request, mapping overload statuses to a retryable
    /// error with the server's retry-after delay when present.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                AgentError::ModelRequestFailed {
                    reason: format!("invalid API key header: {e}"),
                }
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], "sending model request");

        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::ModelRequestFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        if OVERLOAD_STATUSES.contains(&status) {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(AgentError::ModelOverloaded {
                status,
                retry_after,
            });
        }

        Ok(resp)
    }

    /// Consume an SSE stream, forwarding events and aggregating the final
    /// turn.
    async fn consume_stream(
        &self,
        resp: reqwest::Response,
        on_event: &mut (dyn FnMut(ModelStreamEvent) + Send),
    ) -> Result<ModelTurn> {
        let mut parser = SseParser::new();
        let mut accumulator = TurnAccumulator::default();

        let mut byte_stream = resp.bytes_stream();
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| AgentError::ModelStreamError {
                reason: format!("stream read error: {e}"),
            })?;

            let text = std::str::from_utf8(&chunk).map_err(|e| AgentError::ModelStreamError {
                reason: format!("invalid UTF-8 in stream: {e}"),
            })?;

            line_buffer.push_str(text);

            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].to_owned();
                line_buffer = line_buffer[newline_pos + 1..].to_owned();

                if let Some(event) = parser.parse_line(&line)? {
                    accumulator.apply(&event);
                    let done = matches!(event, ModelStreamEvent::MessageStop);
                    on_event(event);
                    if done {
                        return accumulator.into_turn();
                    }
                }
            }
        }

        accumulator.into_turn()
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn> {
        let body = self.build_request_body(request, false);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::ModelRequestFailed {
                reason: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(AgentError::ModelRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| AgentError::ModelParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        parse_turn(&v)
    }

    async fn complete_streaming(
        &self,
        request: &ModelRequest,
        on_event: &mut (dyn FnMut(ModelStreamEvent) + Send),
    ) -> Result<ModelTurn> {
        let body = self.build_request_body(request, true);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::ModelRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        self.consume_stream(resp, on_event).await
    }
}

// ---------------------------------------------------------------------------
// Wire format conversion (free functions)
// ---------------------------------------------------------------------------

/// Convert conversation messages to the Messages API wire format.  Tool
/// results ride on user turns as `tool_result` content blocks.
fn messages_to_wire(messages: &[Message]) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::User => {
                if msg.tool_results.is_empty() {
                    wire.push(json!({"role": "user", "content": msg.text}));
                } else {
                    let blocks: Vec<Value> = msg
                        .tool_results
                        .iter()
                        .map(|r| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": r.tool_use_id,
                                "content": r.content,
                                "is_error": r.is_error,
                            })
                        })
                        .collect();
                    wire.push(json!({"role": "user", "content": blocks}));
                }
            }
            Role::Assistant => {
                if msg.tool_uses.is_empty() {
                    wire.push(json!({"role": "assistant", "content": msg.text}));
                } else {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !msg.text.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.text}));
                    }
                    for tu in &msg.tool_uses {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tu.id,
                            "name": tu.name,
                            "input": tu.input,
                        }));
                    }
                    wire.push(json!({"role": "assistant", "content": blocks}));
                }
            }
        }
    }

    wire
}

/// Convert tool definitions into the Messages API format.
fn tools_to_wire(tools: &[ToolDefinition]) -> Value {
    let values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();
    json!(values)
}

/// Parse a non-streaming Messages API response.
fn parse_turn(v: &Value) -> Result<ModelTurn> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| AgentError::ModelParseFailed {
            reason: "missing `content` array in response".into(),
        })?;

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_uses: Vec<ToolUseBlock> = Vec::new();

    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    text_parts.push(t.to_owned());
                }
            }
            Some("tool_use") => {
                tool_uses.push(ToolUseBlock {
                    id: block["id"].as_str().unwrap_or_default().to_owned(),
                    name: block["name"].as_str().unwrap_or_default().to_owned(),
                    input: block["input"].clone(),
                });
            }
            _ => {}
        }
    }

    let stop_reason = v["stop_reason"]
        .as_str()
        .and_then(StopReason::parse)
        .unwrap_or(if tool_uses.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        });

    Ok(ModelTurn {
        text: text_parts.join(""),
        tool_uses,
        stop_reason,
        usage: parse_usage(&v["usage"]),
    })
}

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Accumulates streaming events into the finalized turn.
#[derive(Debug, Default)]
struct TurnAccumulator {
    text: String,
    tool_uses: Vec<ToolUseBuilder>,
    stop_reason: Option<StopReason>,
    usage: Usage,
}

/// In-progress tool-use block being assembled from streaming deltas.
#[derive(Debug)]
struct ToolUseBuilder {
    id: String,
    name: String,
    input_json: String,
}

impl TurnAccumulator {
    fn apply(&mut self, event: &ModelStreamEvent) {
        match event {
            ModelStreamEvent::MessageStart { usage, .. } => {
                self.usage.input_tokens = usage.input_tokens;
                self.usage.cache_creation_tokens = usage.cache_creation_tokens;
                self.usage.cache_read_tokens = usage.cache_read_tokens;
            }

            ModelStreamEvent::ContentBlockStart {
                content_type,
                id,
                name,
                ..
            } => {
                if content_type == "tool_use" {
                    self.tool_uses.push(ToolUseBuilder {
                        id: id.clone().unwrap_or_default(),
                        name: name.clone().unwrap_or_default(),
                        input_json: String::new(),
                    });
                }
            }

            ModelStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                StreamDelta::TextDelta(t) => self.text.push_str(t),
                StreamDelta::InputJsonDelta(j) => {
                    if let Some(builder) = self.tool_uses.last_mut() {
                        builder.input_json.push_str(j);
                    }
                }
            },

            ModelStreamEvent::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                self.stop_reason = stop_reason.as_deref().and_then(StopReason::parse);
                self.usage.output_tokens = *output_tokens;
            }

            _ => {}
        }
    }

    fn into_turn(self) -> Result<ModelTurn> {
        let tool_uses: Result<Vec<ToolUseBlock>> = self
            .tool_uses
            .into_iter()
            .map(|b| {
                let input: Value = if b.input_json.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&b.input_json).map_err(|e| {
                        AgentError::ModelParseFailed {
                            reason: format!("invalid JSON in tool use `{}` input: {e}", b.name),
                        }
                    })?
                };
                Ok(ToolUseBlock {
                    id: b.id,
                    name: b.name,
                    input,
                })
            })
            .collect();
        let tool_uses = tool_uses?;

        let stop_reason = self.stop_reason.unwrap_or(if tool_uses.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        });

        Ok(ModelTurn {
            text: self.text,
            tool_uses,
            stop_reason,
            usage: self.usage,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ToolResultBlock;
    use crate::model::types::SystemBlock;

    fn client() -> AnthropicClient {
        AnthropicClient::new(AnthropicConfig::new("test-key")).unwrap()
    }

    fn basic_request() -> ModelRequest {
        ModelRequest {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 1024,
            system: vec![
                SystemBlock::cached("You are an interview assistant."),
                SystemBlock::dynamic("Problem: reverse a linked list."),
            ],
            messages: vec![Message::user("Where do I start?")],
            tools: vec![],
            tool_choice: None,
        }
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result = AnthropicClient::new(AnthropicConfig::new(""));
        assert!(matches!(result, Err(AgentError::MissingApiKey)));
    }

    #[test]
    fn request_body_splits_cached_and_dynamic_system_blocks() {
        let body = client().build_request_body(&basic_request(), false);

        let system = body["system"].as_array().unwrap();
        assert_eq!(system.len(), 2);
        assert_eq!(system[0]["cache_control"]["type"], "ephemeral");
        assert!(system[1].get("cache_control").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn request_body_includes_tools_and_stream_flag() {
        let mut request = basic_request();
        request.tools = vec![ToolDefinition {
            name: "read".into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        }];

        let body = client().build_request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["name"], "read");
    }

    #[test]
    fn request_body_pins_tool_choice() {
        let mut request = basic_request();
        request.tool_choice = Some("submit_evaluation".into());

        let body = client().build_request_body(&request, false);
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], "submit_evaluation");
    }

    #[test]
    fn tool_results_become_user_content_blocks() {
        let messages = vec![
            Message::user("Read a.py"),
            Message::assistant_with_tools(
                "",
                vec![ToolUseBlock {
                    id: "tu_01".into(),
                    name: "read".into(),
                    input: json!({"path": "/workspace/a.py"}),
                }],
            ),
            Message::tool_results(vec![ToolResultBlock {
                tool_use_id: "tu_01".into(),
                content: "print(1)".into(),
                is_error: false,
            }]),
        ];

        let wire = messages_to_wire(&messages);
        assert_eq!(wire[1]["content"][0]["type"], "tool_use");
        assert_eq!(wire[1]["content"][0]["id"], "tu_01");
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"][0]["type"], "tool_result");
        assert_eq!(wire[2]["content"][0]["tool_use_id"], "tu_01");
    }

    #[test]
    fn parse_text_turn() {
        let v = json!({
            "content": [{"type": "text", "text": "Try a two-pointer approach."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });

        let turn = parse_turn(&v).unwrap();
        assert_eq!(turn.text, "Try a two-pointer approach.");
        assert!(!turn.has_tool_uses());
        assert_eq!(turn.stop_reason, StopReason::EndTurn);
        assert_eq!(turn.usage.input_tokens, 10);
    }

    #[test]
    fn parse_tool_use_turn() {
        let v = json!({
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "tu_01", "name": "read",
                 "input": {"path": "/workspace/a.py"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 15}
        });

        let turn = parse_turn(&v).unwrap();
        assert_eq!(turn.tool_uses.len(), 1);
        assert_eq!(turn.tool_uses[0].name, "read");
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn accumulator_assembles_tool_input_from_deltas() {
        let mut acc = TurnAccumulator::default();
        acc.apply(&ModelStreamEvent::ContentBlockStart {
            index: 0,
            content_type: "tool_use".into(),
            id: Some("tu_01".into()),
            name: Some("read".into()),
        });
        acc.apply(&ModelStreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta::InputJsonDelta(r#"{"path":"#.into()),
        });
        acc.apply(&ModelStreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta::InputJsonDelta(r#""/workspace/a.py"}"#.into()),
        });
        acc.apply(&ModelStreamEvent::MessageDelta {
            stop_reason: Some("tool_use".into()),
            output_tokens: 7,
        });

        let turn = acc.into_turn().unwrap();
        assert_eq!(turn.tool_uses[0].input["path"], "/workspace/a.py");
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        assert_eq!(turn.usage.output_tokens, 7);
    }
}
