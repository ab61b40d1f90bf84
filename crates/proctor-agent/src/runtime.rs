//! Blocking agent loop.
//!
//! Drives one user turn to completion: sanitize the inbound message, call
//! the model, execute any requested tools, feed results back, and repeat
//! until the model stops asking for tools or the iteration cap is reached.

use std::sync::Arc;

use proctor_security::inbound::{RateLimits, sanitize_text};
use serde::Serialize;

use crate::config::SessionConfig;
use crate::conversation::{ConversationStore, Message, ToolResultBlock, ToolUseBlock};
use crate::error::{AgentError, Result};
use crate::model::client::LanguageModel;
use crate::model::types::{ModelRequest, StopReason, Usage};
use crate::prompt::build_system_prompt;
use crate::tools::ToolExecutor;

/// Maximum model/tool iterations per user turn.
pub const MAX_ITERATIONS: u32 = 25;

/// Maximum tokens the model may generate per call.
const MAX_TOKENS: u32 = 4_096;

/// Appended to the response when the loop hits the iteration cap with the
/// model still asking for tools.
const ITERATION_LIMIT_NOTICE: &str =
    "\n\n[Stopped after reaching the tool-use limit for this message. The work so far is \
     saved; send another message to continue.]";

/// The finished result of one user turn.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    /// Assistant text accumulated across all iterations of the turn.
    pub text: String,
    /// Names of tools invoked during the turn, in dispatch order.
    pub tools_used: Vec<String>,
    /// Workspace paths written or edited during the session so far.
    pub files_modified: Vec<String>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub model: String,
    pub usage: Usage,
    pub tool_call_count: u64,
    pub iterations: u32,
}

/// One session's blocking agent.  Owns the conversation store; the model
/// and executor are shared with the streaming loop via `Arc`.
pub struct AgentLoop<M> {
    model: M,
    executor: Arc<ToolExecutor>,
    config: SessionConfig,
    store: ConversationStore,
    rate_limits: RateLimits,
}

impl<M: LanguageModel> AgentLoop<M> {
    pub fn new(model: M, executor: Arc<ToolExecutor>, config: SessionConfig) -> Self {
        Self {
            model,
            executor,
            config,
            store: ConversationStore::new(),
            rate_limits: RateLimits::default(),
        }
    }

    /// Seed the conversation from prior history (repairing malformed
    /// sequences on the way in).
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.store = ConversationStore::load_history(history);
        self
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.store
    }

    /// Handle one user message, driving tool use to completion.
    pub async fn handle_message(&mut self, user_text: &str) -> Result<AgentResponse> {
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
            if iterations >= MAX_ITERATIONS {
                hit_limit = true;
                break;
            }
            iterations += 1;

            let turn = self.model.complete(&self.request()).await?;
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
                        // The assistant message above already carries the
                        // tool_use blocks; give each one an error result so
                        // the log stays valid for the next turn.
                        self.store
                            .append(Message::tool_results(aborted_results(&turn.tool_uses, &err)));
                        return Err(err);
                    }
                };
                self.store.append(Message::tool_results(results));
                continue;
            }

            self.store.append(Message::assistant(turn.text.clone()));

            if turn.stop_reason == StopReason::MaxTokens {
                // Truncated mid-thought; nudge the model to finish.
                tracing::debug!(iteration = iterations, "continuing after max_tokens stop");
                self.store
                    .append(Message::user("Continue from where you stopped."));
                continue;
            }

            break;
        }

        if hit_limit {
            tracing::warn!(
                session = %self.config.session_id,
                "turn stopped at the iteration cap with tools still pending"
            );
            response_text.push_str(ITERATION_LIMIT_NOTICE);
            self.store.append(Message::assistant(ITERATION_LIMIT_NOTICE));
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

/// Error results for every call of a turn whose dispatch failed as a whole,
/// so no tool_use is left without a matching tool_result.
pub(crate) fn aborted_results(
    tool_uses: &[ToolUseBlock],
    err: &AgentError,
) -> Vec<ToolResultBlock> {
    tool_uses
        .iter()
        .map(|tool_use| ToolResultBlock {
            tool_use_id: tool_use.id.clone(),
            content: format!("tool execution aborted: {err}"),
            is_error: true,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HelpfulnessLevel;
    use crate::testutil::{ScriptedModel, scripted_executor};
    use crate::tools::TOOL_WRITE;
    use serde_json::json;

    use crate::conversation::ToolUseBlock;

    fn config(level: HelpfulnessLevel) -> SessionConfig {
        SessionConfig::new("sess-1", "cand-1").with_helpfulness(level)
    }

    #[tokio::test]
    async fn plain_text_turn_completes_in_one_iteration() {
        let model = ScriptedModel::new(vec![ScriptedModel::text_turn("Use a hash map.")]);
        let (_dir, executor) = scripted_executor(HelpfulnessLevel::Consultant);
        let mut agent = AgentLoop::new(model, executor, config(HelpfulnessLevel::Consultant));

        let response = agent.handle_message("How should I dedupe?").await.unwrap();
        assert_eq!(response.text, "Use a hash map.");
        assert_eq!(response.metadata.iterations, 1);
        assert!(agent.conversation().alternation_holds());
    }

    #[tokio::test]
    async fn tool_turn_feeds_results_back() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_turn(
                "Writing the file.",
                vec![ToolUseBlock {
                    id: "tu_01".into(),
                    name: TOOL_WRITE.into(),
                    input: json!({"path": "/workspace/a.py", "content": "print(1)"}),
                }],
            ),
            ScriptedModel::text_turn("Done."),
        ]);
        let (_dir, executor) =
            scripted_executor(HelpfulnessLevel::PairProgramming);
        let mut agent = AgentLoop::new(
            model,
            executor,
            config(HelpfulnessLevel::PairProgramming),
        );

        let response = agent.handle_message("Create a.py").await.unwrap();
        assert!(response.text.contains("Done."));
        assert_eq!(response.tools_used, vec!["write"]);
        assert_eq!(response.files_modified, vec!["/workspace/a.py"]);
        assert_eq!(response.metadata.iterations, 2);
        assert!(agent.conversation().alternation_holds());
    }

    #[tokio::test]
    async fn iteration_cap_appends_notice() {
        // Every turn asks for another tool call; the loop must give up at
        // the cap instead of spinning.
        let turns: Vec<_> = (0..30)
            .map(|i| {
                ScriptedModel::tool_turn(
                    "",
                    vec![ToolUseBlock {
                        id: format!("tu_{i}"),
                        name: crate::tools::TOOL_LIST_FILES.into(),
                        input: json!({}),
                    }],
                )
            })
            .collect();
        let model = ScriptedModel::new(turns);
        let (_dir, executor) = scripted_executor(HelpfulnessLevel::PairProgramming);
        let mut agent = AgentLoop::new(
            model,
            executor,
            config(HelpfulnessLevel::PairProgramming),
        );

        let response = agent.handle_message("Go").await.unwrap();
        assert_eq!(response.metadata.iterations, MAX_ITERATIONS);
        assert!(response.text.contains("tool-use limit"));
    }

    #[tokio::test]
    async fn max_tokens_stop_triggers_continuation() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::truncated_turn("Here is the first part"),
            ScriptedModel::text_turn(" and the rest."),
        ]);
        let (_dir, executor) = scripted_executor(HelpfulnessLevel::Consultant);
        let mut agent = AgentLoop::new(model, executor, config(HelpfulnessLevel::Consultant));

        let response = agent.handle_message("Explain the algorithm").await.unwrap();
        assert!(response.text.contains("first part"));
        assert!(response.text.contains("the rest"));
        assert_eq!(response.metadata.iterations, 2);
    }

    #[tokio::test]
    async fn end_turn_stop_skips_tool_execution() {
        // A turn that claims to be final must not execute tools even when
        // tool_use blocks are present.
        let model = ScriptedModel::new(vec![crate::model::types::ModelTurn {
            text: "All done.".into(),
            tool_uses: vec![ToolUseBlock {
                id: "tu_01".into(),
                name: TOOL_WRITE.into(),
                input: json!({"path": "/workspace/a.py", "content": "x"}),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }]);
        let (_dir, executor) = scripted_executor(HelpfulnessLevel::PairProgramming);
        let mut agent = AgentLoop::new(
            model,
            Arc::clone(&executor),
            config(HelpfulnessLevel::PairProgramming),
        );

        let response = agent.handle_message("Create a.py").await.unwrap();
        assert_eq!(response.text, "All done.");
        assert!(response.tools_used.is_empty());
        assert_eq!(executor.call_count(), 0);
        assert_eq!(response.metadata.iterations, 1);
    }

    #[tokio::test]
    async fn failed_tool_dispatch_leaves_no_dangling_tool_use() {
        // A run_tests call with no test command configured fails the whole
        // dispatch; every tool_use must still get a result so the next turn
        // sends valid history.
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_turn(
                "",
                vec![ToolUseBlock {
                    id: "tu_01".into(),
                    name: crate::tools::TOOL_RUN_TESTS.into(),
                    input: json!({}),
                }],
            ),
            ScriptedModel::text_turn("Recovered."),
        ]);
        let (_dir, executor) = scripted_executor(HelpfulnessLevel::PairProgramming);
        let mut agent = AgentLoop::new(
            model,
            executor,
            config(HelpfulnessLevel::PairProgramming),
        );

        let err = agent.handle_message("Run the tests").await.unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));

        let last = agent.conversation().messages().last().unwrap();
        assert_eq!(last.tool_results.len(), 1);
        assert_eq!(last.tool_results[0].tool_use_id, "tu_01");
        assert!(last.tool_results[0].is_error);
        assert!(agent.conversation().alternation_holds());

        // The session stays usable after the failed dispatch.
        let response = agent.handle_message("Never mind").await.unwrap();
        assert_eq!(response.text, "Recovered.");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let model = ScriptedModel::new(vec![]);
        let (_dir, executor) = scripted_executor(HelpfulnessLevel::Consultant);
        let mut agent = AgentLoop::new(model, executor, config(HelpfulnessLevel::Consultant));

        let err = agent.handle_message("   ").await.unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
    }
}
