//! Shared test fixtures: a scripted model and a sandboxed executor.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::{HelpfulnessLevel, SessionConfig};
use crate::conversation::ToolUseBlock;
use crate::error::{AgentError, Result};
use crate::model::client::LanguageModel;
use crate::model::types::{ModelRequest, ModelTurn, StopReason, Usage};
use crate::tools::{ToolExecutor, ToolRegistry};
use proctor_sandbox::LocalSandbox;

/// A model that replays a fixed script of turns.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    /// Requests seen, for assertions on what the loop sent.
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn text_turn(text: &str) -> ModelTurn {
        ModelTurn {
            text: text.into(),
            tool_uses: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
        }
    }

    pub fn tool_turn(text: &str, tool_uses: Vec<ToolUseBlock>) -> ModelTurn {
        ModelTurn {
            text: text.into(),
            tool_uses,
            stop_reason: StopReason::ToolUse,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
        }
    }

    pub fn truncated_turn(text: &str) -> ModelTurn {
        ModelTurn {
            text: text.into(),
            tool_uses: vec![],
            stop_reason: StopReason::MaxTokens,
            usage: Usage::default(),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(request.clone());
        self.turns
            .lock()
            .expect("turns lock poisoned")
            .pop_front()
            .ok_or_else(|| AgentError::Internal("scripted model ran out of turns".into()))
    }
}

/// A fresh executor backed by a throwaway sandbox directory.
pub fn scripted_executor(level: HelpfulnessLevel) -> (TempDir, Arc<ToolExecutor>) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let sandbox = LocalSandbox::new(dir.path(), "/workspace");
    let config = SessionConfig::new("sess-1", "cand-1").with_helpfulness(level);
    let executor = Arc::new(ToolExecutor::new(
        Arc::new(sandbox),
        ToolRegistry::for_level(level),
        config,
    ));
    (dir, executor)
}
