//! Typed tool inputs.
//!
//! Model-supplied tool arguments arrive as loose JSON; each tool deserializes
//! into one of these structs before execution so a malformed call becomes a
//! structured error result rather than a panic deep in the executor.

use serde::Deserialize;
use serde_json::Value;

/// Default slice size for `read` when the caller gives no limit.
pub const DEFAULT_READ_LIMIT: usize = 5_000;

#[derive(Debug, Deserialize)]
pub struct ReadInput {
    pub path: String,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct WriteInput {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct EditInput {
    pub path: String,
    pub old_string: String,
    pub new_string: String,
}

#[derive(Debug, Deserialize)]
pub struct BashInput {
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct GrepInput {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GlobInput {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesInput {
    #[serde(default)]
    pub path: Option<String>,
    /// Recurse into subdirectories; off by default so a listing of a large
    /// workspace stays small.
    #[serde(default)]
    pub recursive: bool,
}

/// The evaluation submitted through `submit_evaluation`.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct EvaluationInput {
    pub score: f64,
    pub passed: bool,
    pub feedback: String,
}

/// Deserialize a tool input, mapping failures to a human-readable message
/// suitable for returning to the model as an error result.
pub fn parse_input<T: for<'de> Deserialize<'de>>(tool: &str, input: &Value) -> Result<T, String> {
    serde_json::from_value(input.clone())
        .map_err(|e| format!("invalid input for tool `{tool}`: {e}"))
}
