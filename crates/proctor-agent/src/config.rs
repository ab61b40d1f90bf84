//! Session configuration.
//!
//! A [`SessionConfig`] is immutable for the lifetime of one agent instance.
//! The helpfulness level controls which tools the model may invoke; the
//! mapping to concrete tool sets lives in [`crate::tools`].

use serde::{Deserialize, Serialize};

/// Default logical workspace root that tool paths are expressed against.
pub const DEFAULT_WORKSPACE_ROOT: &str = "/workspace";

/// How much the assistant is allowed to do on the candidate's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HelpfulnessLevel {
    /// Advice only: the assistant may inspect the workspace but not change
    /// it or run anything.
    Consultant,
    /// The assistant may edit files and run the test suite, but not
    /// arbitrary shell commands.
    PairProgramming,
    /// Full tool access, including the shell.
    FullCopilot,
}

impl std::fmt::Display for HelpfulnessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Consultant => "consultant",
            Self::PairProgramming => "pair-programming",
            Self::FullCopilot => "full-copilot",
        };
        f.write_str(s)
    }
}

/// Immutable configuration for one interview session's agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interview session identifier.
    pub session_id: String,
    /// The candidate being interviewed.
    pub candidate_id: String,
    /// Logical workspace root for all tool paths.
    pub workspace_root: String,
    /// Model identifier for this session.
    pub model: String,
    /// Tool access policy for the assistant.
    pub helpfulness: HelpfulnessLevel,
    /// The interview problem, injected into the (non-cached) dynamic system
    /// prompt block.
    pub problem_statement: Option<String>,
    /// Command the `run_tests` tool executes.  Absent means the session has
    /// no evaluation target and `run_tests` is a configuration error.
    pub test_command: Option<String>,
}

impl SessionConfig {
    /// Create a config with defaults for everything but the identifiers.
    pub fn new(session_id: impl Into<String>, candidate_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            candidate_id: candidate_id.into(),
            workspace_root: DEFAULT_WORKSPACE_ROOT.to_owned(),
            model: "claude-sonnet-4-20250514".to_owned(),
            helpfulness: HelpfulnessLevel::PairProgramming,
            problem_statement: None,
            test_command: None,
        }
    }

    /// Create a config with a freshly generated session id.
    pub fn generate(candidate_id: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::now_v7().to_string(), candidate_id)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_helpfulness(mut self, level: HelpfulnessLevel) -> Self {
        self.helpfulness = level;
        self
    }

    pub fn with_problem_statement(mut self, statement: impl Into<String>) -> Self {
        self.problem_statement = Some(statement.into());
        self
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = Some(command.into());
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<String>) -> Self {
        self.workspace_root = root.into();
        self
    }
}
