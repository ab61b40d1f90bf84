//! End-to-end scenarios through the public API: scripted model turns driven
//! through the agent loops against a real local sandbox.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;

use proctor_agent::model::types::{ModelRequest, ModelTurn, StopReason, Usage};
use proctor_agent::{
    AbortHandle, AgentError, AgentEvent, AgentLoop, HelpfulnessLevel, LanguageModel,
    RetryingClient, SessionConfig, StreamingAgentLoop, ToolExecutor, ToolRegistry, ToolUseBlock,
};
use proctor_sandbox::LocalSandbox;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Replays a fixed sequence of turns, optionally failing first.
struct MockModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    overloads_before_success: Mutex<u32>,
}

impl MockModel {
    fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            overloads_before_success: Mutex::new(0),
        }
    }

    fn with_overloads(self, count: u32) -> Self {
        *self.overloads_before_success.lock().unwrap() = count;
        self
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn complete(
        &self,
        _request: &ModelRequest,
    ) -> proctor_agent::Result<ModelTurn> {
        {
            let mut overloads = self.overloads_before_success.lock().unwrap();
            if *overloads > 0 {
                *overloads -= 1;
                return Err(AgentError::ModelOverloaded {
                    status: 529,
                    retry_after: Some(Duration::ZERO),
                });
            }
        }
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Internal("mock ran out of turns".into()))
    }
}

fn text_turn(text: &str) -> ModelTurn {
    ModelTurn {
        text: text.into(),
        tool_uses: vec![],
        stop_reason: StopReason::EndTurn,
        usage: Usage::default(),
    }
}

fn tool_turn(tool_uses: Vec<ToolUseBlock>) -> ModelTurn {
    ModelTurn {
        text: String::new(),
        tool_uses,
        stop_reason: StopReason::ToolUse,
        usage: Usage::default(),
    }
}

fn tool_use(id: &str, name: &str, input: Value) -> ToolUseBlock {
    ToolUseBlock {
        id: id.into(),
        name: name.into(),
        input,
    }
}

fn session(level: HelpfulnessLevel) -> (TempDir, SessionConfig, Arc<ToolExecutor>) {
    let dir = TempDir::new().unwrap();
    let sandbox = Arc::new(LocalSandbox::new(dir.path(), "/workspace"));
    let config = SessionConfig::new("sess-int", "cand-int").with_helpfulness(level);
    let executor = Arc::new(ToolExecutor::new(
        sandbox,
        ToolRegistry::for_level(level),
        config.clone(),
    ));
    (dir, config, executor)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consultant_turn_rejects_shell_but_recovers() {
    let model = MockModel::new(vec![
        tool_turn(vec![tool_use("tu_01", "bash", json!({"command": "ls"}))]),
        text_turn("I can't run commands at this level, but here's my advice."),
    ]);
    let (_dir, config, executor) = session(HelpfulnessLevel::Consultant);
    let mut agent = AgentLoop::new(model, executor, config);

    let response = agent.handle_message("List my files").await.unwrap();
    assert!(response.text.contains("advice"));

    // The rejection went back to the model as an error result on a user turn.
    let messages = agent.conversation().messages();
    let result_turn = messages
        .iter()
        .find(|m| !m.tool_results.is_empty())
        .unwrap();
    assert!(result_turn.tool_results[0].is_error);
    assert!(result_turn.tool_results[0].content.contains("not available"));
    assert!(agent.conversation().alternation_holds());
}

#[tokio::test]
async fn parallel_tool_calls_get_one_result_each_in_order() {
    let (_dir, config, executor) = session(HelpfulnessLevel::PairProgramming);

    let writes = tool_turn(vec![
        tool_use("tu_a", "write", json!({"path": "/workspace/a.py", "content": "a"})),
        tool_use("tu_b", "write", json!({"path": "/workspace/b.py", "content": "b"})),
        tool_use("tu_c", "write", json!({"path": "/workspace/c.py", "content": "c"})),
    ]);
    let model = MockModel::new(vec![writes, text_turn("All three written.")]);
    let mut agent = AgentLoop::new(model, executor, config);

    agent.handle_message("Create three files").await.unwrap();

    let messages = agent.conversation().messages();
    let result_turn = messages
        .iter()
        .find(|m| !m.tool_results.is_empty())
        .unwrap();
    let ids: Vec<&str> = result_turn
        .tool_results
        .iter()
        .map(|r| r.tool_use_id.as_str())
        .collect();
    assert_eq!(ids, vec!["tu_a", "tu_b", "tu_c"]);
    assert!(result_turn.tool_results.iter().all(|r| !r.is_error));
}

#[tokio::test]
async fn edits_persist_across_user_turns() {
    let (_dir, config, executor) = session(HelpfulnessLevel::PairProgramming);

    let model = MockModel::new(vec![
        tool_turn(vec![tool_use(
            "tu_w",
            "write",
            json!({"path": "/workspace/sol.py", "content": "def f():\n    return 1\n"}),
        )]),
        text_turn("Created sol.py."),
        tool_turn(vec![tool_use(
            "tu_r",
            "read",
            json!({"path": "/workspace/sol.py"}),
        )]),
        text_turn("It returns 1."),
    ]);
    let mut agent = AgentLoop::new(model, executor, config);

    agent.handle_message("Write sol.py").await.unwrap();
    let response = agent.handle_message("What does it return?").await.unwrap();

    assert!(response.text.contains("returns 1"));
    assert_eq!(response.files_modified, vec!["/workspace/sol.py"]);

    let messages = agent.conversation().messages();
    let read_result = messages
        .iter()
        .filter(|m| !m.tool_results.is_empty())
        .last()
        .unwrap();
    assert!(read_result.tool_results[0].content.contains("return 1"));
}

#[tokio::test]
async fn destructive_command_never_reaches_the_sandbox() {
    let (dir, config, executor) = session(HelpfulnessLevel::FullCopilot);

    let model = MockModel::new(vec![
        tool_turn(vec![tool_use("tu_rm", "bash", json!({"command": "rm -rf /"}))]),
        text_turn("That command is blocked."),
    ]);
    let mut agent = AgentLoop::new(model, executor, config);

    agent.handle_message("Clean up everything").await.unwrap();

    let messages = agent.conversation().messages();
    let result_turn = messages
        .iter()
        .find(|m| !m.tool_results.is_empty())
        .unwrap();
    assert!(result_turn.tool_results[0].is_error);
    // The sandbox directory survives.
    assert!(dir.path().exists());
}

#[tokio::test]
async fn streaming_turn_emits_lifecycle_and_done() {
    let (_dir, config, executor) = session(HelpfulnessLevel::PairProgramming);

    let model = MockModel::new(vec![
        tool_turn(vec![tool_use(
            "tu_w",
            "write",
            json!({"path": "/workspace/a.py", "content": "print(1)"}),
        )]),
        text_turn("Done."),
    ]);
    let mut agent = StreamingAgentLoop::new(model, executor, config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let abort = AbortHandle::new();
    let response = agent
        .handle_message("Create a.py", &tx, &abort)
        .await
        .unwrap();
    assert_eq!(response.files_modified, vec!["/workspace/a.py"]);

    let mut saw_start = false;
    let mut saw_complete = false;
    let mut saw_done = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            AgentEvent::ToolUseStart { ref id, .. } if id == "tu_w" => saw_start = true,
            AgentEvent::ToolUseComplete {
                ref id,
                is_error: false,
                ..
            } if id == "tu_w" => saw_complete = true,
            AgentEvent::Done { .. } => saw_done = true,
            _ => {}
        }
    }
    assert!(saw_start && saw_complete && saw_done);
}

#[tokio::test]
async fn overloaded_model_is_retried_transparently() {
    let (_dir, config, executor) = session(HelpfulnessLevel::Consultant);

    let model =
        RetryingClient::new(MockModel::new(vec![text_turn("Recovered.")]).with_overloads(2));
    let mut agent = AgentLoop::new(model, executor, config);

    let response = agent.handle_message("Still there?").await.unwrap();
    assert_eq!(response.text, "Recovered.");
}
