//! Streaming agent loop.
//!
//! Mirrors [`crate::runtime::AgentLoop`] but surfaces progress as a stream
//! of events: text deltas as the model produces them, tool lifecycle
//! markers, and a final `done` event carrying the full response.  An abort
//! handle silences the event stream without interrupting the work in
//! flight, so the conversation stays consistent when a client disconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use proctor_security::inbound::{RateLimits, sanitize_text};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::SessionConfig;
use crate::conversation::{ConversationStore, Message};
use crate::error::{AgentError, Result};
use crate::model::client::LanguageModel;
use crate::model::types::{ModelRequest, ModelStreamEvent, StopReason, StreamDelta, Usage};
use crate::prompt::build_system_prompt;
use crate::runtime::{AgentResponse, ResponseMetadata, aborted_results};
use crate::tools::ToolExecutor;

/// Maximum model/tool iterations per streamed user turn.  Lower than the
/// blocking loop's cap: a streaming client is interactive and long tool
/// chains belong in the blocking path.
pub const MAX_STREAM_ITERATIONS: u32 = 10;

const MAX_TOKENS: u32 = 4_096;

const ITERATION_LIMIT_NOTICE: &str =
    "\n\n[Stopped after reaching the tool-use limit for this message. The work so far is \
     saved; send another message to continue.]";

/// Events surfaced to the streaming client, tagged for JSON transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A new model call is starting.
    IterationStart { iteration: u32 },
    /// A chunk of assistant text.
    TextDelta { text: String },
    /// The model has requested a tool call.
    ToolUseStart { id: String, name: String },
    /// A tool call has finished executing.
    ToolUseComplete {
        id: String,
        name: String,
        is_error: bool,
    },
    /// The turn is complete.
    Done { response: AgentResponse },
    /// The turn failed; no further events follow.
    Error { message: String },
}

/// Cancels event emission for a running streamed turn.  The underlying
/// model call and tool executions continue so the conversation log is not
/// left with a dangling tool_use.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One session's streaming agent.
pub struct StreamingAgentLoop<M> {
    model: M,
    executor: Arc<ToolExecutor>,
    config: SessionConfig,
    store: ConversationStore,
    rate_limits: RateLimits,
}

impl<M: LanguageModel> StreamingAgentLoop<M> {
    pub fn new(model: M, executor: Arc<ToolExecutor>, config: SessionConfig) -> Self {
        Self {
            model,
            executor,
            config,
            store: ConversationStore::new(),
            rate_limits: RateLimits::default(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.store = ConversationStore::load_history(history);
        self
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.store
    }

    /// Handle one user message, emitting events on `tx` as work progresses.
    /// Errors are emitted as an `error` event and also returned.
    pub async fn handle_message(
        &mut self,
        user_text: &str,
        tx: &UnboundedSender<AgentEvent>,
        abort: &AbortHandle,
    ) -> Result<AgentResponse> {
        match self.drive(user_text, tx, abort).await {
            Ok(response) => {
                emit(tx, abort, AgentEvent::Done {
                    response: response.clone(),
                });
                Ok(response)
            }
            Err(err) => {
                emit(tx, abort, AgentEvent::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        user_text: &str,
        tx: &UnboundedSender<AgentEvent>,
        abort: &AbortHandle,
    ) -> Result<AgentResponse> {
        let sanitized = sanitize_text(user_text);
        if sanitized.trim().is_empty() {
            return Err(AgentError::Config {
                reason: "user message is empty after sanitization".into(),
            });
        }

        if let Some(reason) = self
            .rate_limits
            .check(self.store.user_turns() + 1, self.store.total_chars())
            .reason()
        {
            return Err(AgentError::RateLimited {
                reason: reason.to_owned(),
            });
        }

        self.store.append(Message::user(sanitized));

        let mut response_text = String::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut usage = Usage::default();
        let mut iterations = 0u32;
        let mut hit_limit = false;

        loop {
            if iterations >= MAX_STREAM_ITERATIONS {
                hit_limit = true;
                break;
            }
            iterations += 1;
            emit(tx, abort, AgentEvent::IterationStart {
                iteration: iterations,
            });

            let request = self.request();
            let mut on_event = |event: ModelStreamEvent| match event {
                ModelStreamEvent::ContentBlockDelta {
                    delta: StreamDelta::TextDelta(text),
                    ..
                } => {
                    emit(tx, abort, AgentEvent::TextDelta { text });
                }
                ModelStreamEvent::ContentBlockStart {
                    content_type,
                    id: Some(id),
                    name: Some(name),
                    ..
                } if content_type == "tool_use" => {
                    emit(tx, abort, AgentEvent::ToolUseStart { id, name });
                }
                _ => {}
            };
            let turn = self.model.complete_streaming(&request, &mut on_event).await?;
            usage.add(&turn.usage);

            if !turn.text.is_empty() {
                if !response_text.is_empty() {
                    response_text.push('\n');
                }
                response_text.push_str(&turn.text);
            }

            if turn.stop_reason == StopReason::EndTurn {
                // end_turn is final; any tool_use blocks riding on it are
                // discarded, not executed.
                self.store.append(Message::assistant(turn.text.clone()));
                break;
            }

            if turn.has_tool_uses() {
                self.store.append(Message::assistant_with_tools(
                    turn.text.clone(),
                    turn.tool_uses.clone(),
                ));
                tools_used.extend(turn.tool_uses.iter().map(|t| t.name.clone()));

                let results = match self.executor.run_parallel(&turn.tool_uses).await {
                    Ok(results) => results,
                    Err(err) => {
                        // Give every pending tool_use an error result so the
                        // log stays valid for the next turn.
                        self.store
                            .append(Message::tool_results(aborted_results(&turn.tool_uses, &err)));
                        return Err(err);
                    }
                };
                for (tool_use, result) in turn.tool_uses.iter().zip(&results) {
                    emit(tx, abort, AgentEvent::ToolUseComplete {
                        id: tool_use.id.clone(),
                        name: tool_use.name.clone(),
                        is_error: result.is_error,
                    });
                }
                self.store.append(Message::tool_results(results));
                continue;
            }

            self.store.append(Message::assistant(turn.text.clone()));

            if turn.stop_reason == StopReason::MaxTokens {
                self.store
                    .append(Message::user("Continue from where you stopped."));
                continue;
            }

            break;
        }

        if hit_limit {
            tracing::warn!(
                session = %self.config.session_id,
                "streamed turn stopped at the iteration cap"
            );
            response_text.push_str(ITERATION_LIMIT_NOTICE);
            self.store.append(Message::assistant(ITERATION_LIMIT_NOTICE));
            emit(tx, abort, AgentEvent::TextDelta {
                text: ITERATION_LIMIT_NOTICE.into(),
            });
        }

        Ok(AgentResponse {
            text: response_text,
            tools_used,
            files_modified: self.executor.files_modified(),
            metadata: ResponseMetadata {
                model: self.config.model.clone(),
                usage,
                tool_call_count: self.executor.call_count(),
                iterations,
            },
        })
    }

    fn request(&self) -> ModelRequest {
        ModelRequest {
            model: self.config.model.clone(),
            max_tokens: MAX_TOKENS,
            system: build_system_prompt(&self.config),
            messages: self.store.messages().to_vec(),
            tools: self.executor.definitions(),
            tool_choice: None,
        }
    }
}

/// Send an event unless the turn has been aborted or the receiver is gone.
/// Either way the loop itself keeps running.
fn emit(tx: &UnboundedSender<AgentEvent>, abort: &AbortHandle, event: AgentEvent) {
    if abort.is_aborted() {
        return;
    }
    if tx.send(event).is_err() {
        tracing::debug!("event receiver dropped; continuing without emission");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
