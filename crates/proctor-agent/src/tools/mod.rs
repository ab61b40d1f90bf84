//! Tool registry: names, schemas, and the per-level allow list.
//!
//! The set of tools advertised to the model depends on the session's
//! helpfulness level, and the same allow list is enforced again at dispatch
//! time so a model that hallucinates a tool call outside its level gets an
//! error result instead of an execution.

pub mod exec;
pub mod inputs;

use std::collections::BTreeSet;

use serde_json::json;

use crate::config::HelpfulnessLevel;
use crate::model::types::ToolDefinition;

pub use exec::{ToolExecutor, ToolOutcome, parse_test_counts};

// ---------------------------------------------------------------------------
// Tool names
// ---------------------------------------------------------------------------

pub const TOOL_READ: &str = "read";
pub const TOOL_WRITE: &str = "write";
/// Legacy alias accepted for `write`; advertised schemas only mention
/// `write`, but older prompt variants produce this name.
pub const TOOL_WRITE_FILE: &str = "write_file";
pub const TOOL_EDIT: &str = "edit";
pub const TOOL_BASH: &str = "bash";
pub const TOOL_GREP: &str = "grep";
pub const TOOL_GLOB: &str = "glob";
pub const TOOL_LIST_FILES: &str = "list_files";
pub const TOOL_RUN_TESTS: &str = "run_tests";
pub const TOOL_SUBMIT_EVALUATION: &str = "submit_evaluation";

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The tools one session may see and invoke.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    allowed: BTreeSet<&'static str>,
}

impl ToolRegistry {
    /// The allow list for a helpfulness level.
    ///
    /// Consultant sessions are read-only.  Pair-programming adds file
    /// mutation and test runs.  Full-copilot adds arbitrary (gated) shell.
    pub fn for_level(level: HelpfulnessLevel) -> Self {
        let mut allowed: BTreeSet<&'static str> =
            [TOOL_READ, TOOL_GREP, TOOL_GLOB, TOOL_LIST_FILES].into();

        if matches!(
            level,
            HelpfulnessLevel::PairProgramming | HelpfulnessLevel::FullCopilot
        ) {
            allowed.extend([TOOL_WRITE, TOOL_WRITE_FILE, TOOL_EDIT, TOOL_RUN_TESTS]);
        }

        if level == HelpfulnessLevel::FullCopilot {
            allowed.insert(TOOL_BASH);
        }

        Self { allowed }
    }

    /// The read-only registry used by the evaluation loop, plus the
    /// submission tool.
    pub fn for_evaluation() -> Self {
        Self {
            allowed: [
                TOOL_READ,
                TOOL_GREP,
                TOOL_GLOB,
                TOOL_LIST_FILES,
                TOOL_SUBMIT_EVALUATION,
            ]
            .into(),
        }
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }

    /// Tool definitions to advertise to the model, restricted to this
    /// registry's allow list.  The `write_file` alias is accepted at
    /// dispatch but never advertised.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        all_definitions()
            .into_iter()
            .filter(|d| d.name != TOOL_WRITE_FILE && self.is_allowed(&d.name))
            .collect()
    }
}

fn all_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: TOOL_READ.into(),
            description: "Read a file from the candidate workspace. Supports reading a \
                          slice via offset and limit (characters)."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute path inside the workspace"},
                    "offset": {"type": "integer", "description": "Character offset to start from"},
                    "limit": {"type": "integer", "description": "Maximum characters to return"}
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: TOOL_WRITE.into(),
            description: "Create or overwrite a file in the candidate workspace.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute path inside the workspace"},
                    "content": {"type": "string", "description": "Full file content"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: TOOL_EDIT.into(),
            description: "Replace an exact string in a file. The old string must appear \
                          exactly once."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute path inside the workspace"},
                    "old_string": {"type": "string", "description": "Exact text to replace"},
                    "new_string": {"type": "string", "description": "Replacement text"}
                },
                "required": ["path", "old_string", "new_string"]
            }),
        },
        ToolDefinition {
            name: TOOL_BASH.into(),
            description: "Run a shell command in the candidate workspace. Only an allow \
                          list of development commands is permitted; output redirection \
                          is blocked."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command to execute"}
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: TOOL_GREP.into(),
            description: "Search file contents in the workspace with a regular expression."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression"},
                    "path": {"type": "string", "description": "Directory to search (defaults to the workspace root)"}
                },
                "required": ["pattern"]
            }),
        },
        ToolDefinition {
            name: TOOL_GLOB.into(),
            description: "Find files matching a glob pattern such as **/*.py.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Glob pattern"},
                    "path": {"type": "string", "description": "Directory to search (defaults to the workspace root)"}
                },
                "required": ["pattern"]
            }),
        },
        ToolDefinition {
            name: TOOL_LIST_FILES.into(),
            description: "List files and directories under a path in the workspace. \
                          Lists direct children unless recursive is set."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory to list (defaults to the workspace root)"},
                    "recursive": {"type": "boolean", "description": "Include the full tree instead of direct children (default false)"}
                }
            }),
        },
        ToolDefinition {
            name: TOOL_RUN_TESTS.into(),
            description: "Run the session's configured test command and report pass/fail \
                          counts."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: TOOL_SUBMIT_EVALUATION.into(),
            description: "Submit the final evaluation of the candidate's solution.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "score": {"type": "number", "description": "Overall score from 0 to 100"},
                    "passed": {"type": "boolean", "description": "Whether the solution passes"},
                    "feedback": {"type": "string", "description": "Short feedback for the candidate"}
                },
                "required": ["score", "passed", "feedback"]
            }),
        },
        // The alias shares `write`'s schema; kept for dispatch-time lookup.
        ToolDefinition {
            name: TOOL_WRITE_FILE.into(),
            description: "Alias of `write`.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
