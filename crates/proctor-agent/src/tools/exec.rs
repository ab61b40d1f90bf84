//! Tool executor.
//!
//! Dispatches tool-use blocks from the model against the sandboxed
//! workspace.  Every call is checked against the session's allow list and
//! the security gate, runs under a timeout, and has its output truncated
//! and redacted before it re-enters the conversation.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};

use proctor_sandbox::{FileKind, Sandbox, SandboxError};
use proctor_security::command::CommandPolicy;
use proctor_security::path::PathPolicy;
use proctor_security::redact::redact_secrets;

use crate::config::SessionConfig;
use crate::conversation::{ToolResultBlock, ToolUseBlock};
use crate::error::{AgentError, Result};
use crate::tools::inputs::{
    BashInput, DEFAULT_READ_LIMIT, EditInput, GlobInput, GrepInput, ListFilesInput, ReadInput,
    WriteInput, parse_input,
};
use crate::tools::{
    TOOL_BASH, TOOL_EDIT, TOOL_GLOB, TOOL_GREP, TOOL_LIST_FILES, TOOL_READ, TOOL_RUN_TESTS,
    TOOL_WRITE, TOOL_WRITE_FILE, ToolRegistry,
};

/// Timeout for ordinary tool calls.
const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for shell and test-run calls, which legitimately take longer.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum serialized characters a tool result may occupy in the
/// conversation before it is truncated.
const MAX_RESULT_CHARS: usize = 5_000;

/// Bounds on workspace search so a pathological pattern cannot stall the
/// loop.
const GREP_MAX_FILES: usize = 200;
const GREP_MAX_MATCHES: usize = 100;

/// The outcome of one tool call before it is serialized into a
/// [`ToolResultBlock`].
#[derive(Debug)]
pub struct ToolOutcome {
    pub value: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(value: Value) -> Self {
        Self {
            value,
            is_error: false,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            value: json!({"error": message.into()}),
            is_error: true,
        }
    }
}

/// Executes tool calls for one session.
pub struct ToolExecutor {
    sandbox: Arc<dyn Sandbox>,
    registry: ToolRegistry,
    config: SessionConfig,
    command_policy: CommandPolicy,
    path_policy: PathPolicy,
    call_count: AtomicU64,
    files_modified: Mutex<BTreeSet<String>>,
}

impl ToolExecutor {
    pub fn new(sandbox: Arc<dyn Sandbox>, registry: ToolRegistry, config: SessionConfig) -> Self {
        Self {
            sandbox,
            registry,
            config,
            command_policy: CommandPolicy::new(),
            path_policy: PathPolicy::new(),
            call_count: AtomicU64::new(0),
            files_modified: Mutex::new(BTreeSet::new()),
        }
    }

    /// Tool definitions this session's model may see.  `run_tests` is only
    /// advertised when the session actually has a test command, so the model
    /// never calls a tool that cannot succeed.
    pub fn definitions(&self) -> Vec<crate::model::types::ToolDefinition> {
        self.registry
            .definitions()
            .into_iter()
            .filter(|d| d.name != TOOL_RUN_TESTS || self.config.test_command.is_some())
            .collect()
    }

    /// Total tool calls dispatched so far this session.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Workspace paths written or edited so far this session.
    pub fn files_modified(&self) -> Vec<String> {
        self.files_modified
            .lock()
            .expect("files_modified lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Execute every tool use from one assistant turn in parallel and return
    /// results in the same order, one result per call.
    pub async fn run_parallel(
        self: &Arc<Self>,
        tool_uses: &[ToolUseBlock],
    ) -> Result<Vec<ToolResultBlock>> {
        let mut handles = Vec::with_capacity(tool_uses.len());
        for tool_use in tool_uses {
            let executor = Arc::clone(self);
            let tool_use = tool_use.clone();
            handles.push(tokio::spawn(async move {
                let result = executor.run_one(&tool_use).await;
                (tool_use.id, result)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let (id, result) = handle.await.map_err(|e| {
                AgentError::Internal(format!("tool task panicked or was cancelled: {e}"))
            })?;
            let outcome = result?;
            results.push(self.finalize(id, outcome));
        }
        Ok(results)
    }

    /// Execute a single tool call under its timeout.
    pub async fn run_one(&self, tool_use: &ToolUseBlock) -> Result<ToolOutcome> {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        if !self.registry.is_allowed(&tool_use.name) {
            tracing::warn!(
                tool = %tool_use.name,
                level = %self.config.helpfulness,
                "rejected tool call outside the session's allow list"
            );
            return Ok(ToolOutcome::err(format!(
                "tool `{}` is not available at the `{}` helpfulness level",
                tool_use.name, self.config.helpfulness
            )));
        }

        let timeout = match tool_use.name.as_str() {
            TOOL_BASH | TOOL_RUN_TESTS => COMMAND_TIMEOUT,
            _ => TOOL_TIMEOUT,
        };

        tracing::debug!(tool = %tool_use.name, id = %tool_use.id, "executing tool call");

        match tokio::time::timeout(timeout, self.dispatch(tool_use)).await {
            Ok(result) => result,
            Err(_) => Ok(ToolOutcome::err(format!(
                "tool `{}` timed out after {}s",
                tool_use.name,
                timeout.as_secs()
            ))),
        }
    }

    async fn dispatch(&self, tool_use: &ToolUseBlock) -> Result<ToolOutcome> {
        let name = tool_use.name.as_str();
        let input = &tool_use.input;

        let outcome = match name {
            TOOL_READ => match parse_input::<ReadInput>(name, input) {
                Ok(args) => self.read(args).await?,
                Err(msg) => ToolOutcome::err(msg),
            },
            TOOL_WRITE | TOOL_WRITE_FILE => match parse_input::<WriteInput>(name, input) {
                Ok(args) => self.write(args).await?,
                Err(msg) => ToolOutcome::err(msg),
            },
            TOOL_EDIT => match parse_input::<EditInput>(name, input) {
                Ok(args) => self.edit(args).await?,
                Err(msg) => ToolOutcome::err(msg),
            },
            TOOL_BASH => match parse_input::<BashInput>(name, input) {
                Ok(args) => self.bash(args).await?,
                Err(msg) => ToolOutcome::err(msg),
            },
            TOOL_GREP => match parse_input::<GrepInput>(name, input) {
                Ok(args) => self.grep(args).await?,
                Err(msg) => ToolOutcome::err(msg),
            },
            TOOL_GLOB => match parse_input::<GlobInput>(name, input) {
                Ok(args) => self.glob(args).await?,
                Err(msg) => ToolOutcome::err(msg),
            },
            TOOL_LIST_FILES => match parse_input::<ListFilesInput>(name, input) {
                Ok(args) => self.list_files(args).await?,
                Err(msg) => ToolOutcome::err(msg),
            },
            TOOL_RUN_TESTS => self.run_tests().await?,
            other => ToolOutcome::err(format!("unknown tool `{other}`")),
        };

        Ok(outcome)
    }

    /// Serialize, truncate, and redact an outcome into the conversation's
    /// tool-result form.
    fn finalize(&self, tool_use_id: String, outcome: ToolOutcome) -> ToolResultBlock {
        let serialized = outcome.value.to_string();
        let content = if serialized.chars().count() > MAX_RESULT_CHARS {
            let data: String = serialized.chars().take(MAX_RESULT_CHARS).collect();
            json!({
                "_truncated": true,
                "data": data,
                "hint": "output truncated; use read with offset/limit to page through large content",
            })
            .to_string()
        } else {
            serialized
        };
        let content = redact_secrets(&content).into_owned();

        ToolResultBlock {
            tool_use_id,
            content,
            is_error: outcome.is_error,
        }
    }

    // -----------------------------------------------------------------------
    // File tools
    // -----------------------------------------------------------------------

    /// Apply the path gate, returning the denial message if the path is
    /// blocked.
    fn check_path(&self, path: &str) -> Option<String> {
        let verdict = self.path_policy.check(path, &self.config.workspace_root);
        verdict.reason().map(String::from)
    }

    async fn read(&self, args: ReadInput) -> Result<ToolOutcome> {
        if let Some(reason) = self.check_path(&args.path) {
            return Ok(ToolOutcome::err(reason));
        }

        let content = match self
            .sandbox
            .read_file(&self.config.session_id, &args.path)
            .await
        {
            Ok(content) => content,
            Err(e) => return Ok(sandbox_error(e)),
        };

        let limit = args.limit.unwrap_or(DEFAULT_READ_LIMIT);
        let total = content.chars().count();
        let slice: String = content.chars().skip(args.offset).take(limit).collect();
        let has_more = args.offset + limit < total;

        Ok(ToolOutcome::ok(json!({
            "path": args.path,
            "content": slice,
            "offset": args.offset,
            "total_chars": total,
            "has_more": has_more,
        })))
    }

    async fn write(&self, args: WriteInput) -> Result<ToolOutcome> {
        if let Some(reason) = self.check_path(&args.path) {
            return Ok(ToolOutcome::err(reason));
        }

        let bytes = match self
            .sandbox
            .write_file(&self.config.session_id, &args.path, &args.content)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => return Ok(sandbox_error(e)),
        };

        self.record_modified(&args.path);
        Ok(ToolOutcome::ok(json!({
            "path": args.path,
            "bytes_written": bytes,
        })))
    }

    async fn edit(&self, args: EditInput) -> Result<ToolOutcome> {
        if let Some(reason) = self.check_path(&args.path) {
            return Ok(ToolOutcome::err(reason));
        }

        let content = match self
            .sandbox
            .read_file(&self.config.session_id, &args.path)
            .await
        {
            Ok(content) => content,
            Err(e) => return Ok(sandbox_error(e)),
        };

        let occurrences = content.matches(&args.old_string).count();
        match occurrences {
            0 => {
                return Ok(ToolOutcome::err(format!(
                    "old_string not found in {}",
                    args.path
                )));
            }
            1 => {}
            n => {
                return Ok(ToolOutcome::err(format!(
                    "old_string matches {n} times in {}; provide more surrounding context to \
                     make it unique",
                    args.path
                )));
            }
        }

        let updated = content.replacen(&args.old_string, &args.new_string, 1);
        if let Err(e) = self
            .sandbox
            .write_file(&self.config.session_id, &args.path, &updated)
            .await
        {
            return Ok(sandbox_error(e));
        }

        self.record_modified(&args.path);
        Ok(ToolOutcome::ok(json!({
            "path": args.path,
            "replaced": true,
        })))
    }

    fn record_modified(&self, path: &str) {
        self.files_modified
            .lock()
            .expect("files_modified lock poisoned")
            .insert(path.to_owned());
    }

    // -----------------------------------------------------------------------
    // Shell tools
    // -----------------------------------------------------------------------

    async fn bash(&self, args: BashInput) -> Result<ToolOutcome> {
        let verdict = self.command_policy.check(&args.command);
        if let Some(reason) = verdict.reason() {
            tracing::warn!(command = %args.command, reason, "blocked shell command");
            return Ok(ToolOutcome::err(reason.to_owned()));
        }
        if self.command_policy.has_write_redirection(&args.command) {
            return Ok(ToolOutcome::err(
                "output redirection is not permitted; use the write tool to create files",
            ));
        }

        let output = match self
            .sandbox
            .run_command(&self.config.session_id, &args.command)
            .await
        {
            Ok(output) => output,
            Err(e) => return Ok(sandbox_error(e)),
        };

        Ok(ToolOutcome::ok(json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exit_code": output.exit_code,
        })))
    }

    async fn run_tests(&self) -> Result<ToolOutcome> {
        let command = self
            .config
            .test_command
            .as_deref()
            .ok_or_else(|| AgentError::Config {
                reason: "session has no test command configured".into(),
            })?;

        let output = match self
            .sandbox
            .run_command(&self.config.session_id, command)
            .await
        {
            Ok(output) => output,
            Err(e) => return Ok(sandbox_error(e)),
        };

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        let (passed, failed) = parse_test_counts(&combined);

        Ok(ToolOutcome::ok(json!({
            "exit_code": output.exit_code,
            "passed": passed,
            "failed": failed,
            "output": output.stdout,
            "stderr": output.stderr,
        })))
    }

    // -----------------------------------------------------------------------
    // Search tools
    // -----------------------------------------------------------------------

    async fn grep(&self, args: GrepInput) -> Result<ToolOutcome> {
        let root = args
            .path
            .unwrap_or_else(|| self.config.workspace_root.clone());
        if let Some(reason) = self.check_path(&root) {
            return Ok(ToolOutcome::err(reason));
        }

        let pattern = match Regex::new(&args.pattern) {
            Ok(re) => re,
            Err(e) => return Ok(ToolOutcome::err(format!("invalid pattern: {e}"))),
        };

        let entries = match self.sandbox.list_tree(&self.config.session_id, &root).await {
            Ok(entries) => entries,
            Err(e) => return Ok(sandbox_error(e)),
        };

        let mut matches: Vec<Value> = Vec::new();
        let mut files_scanned = 0usize;
        let mut limit_hit = false;

        'files: for entry in entries.iter().filter(|e| e.kind == FileKind::File) {
            if files_scanned >= GREP_MAX_FILES {
                limit_hit = true;
                break;
            }
            files_scanned += 1;

            let Ok(content) = self
                .sandbox
                .read_file(&self.config.session_id, &entry.path)
                .await
            else {
                continue;
            };

            for (line_no, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    matches.push(json!({
                        "path": entry.path,
                        "line": line_no + 1,
                        "text": line,
                    }));
                    if matches.len() >= GREP_MAX_MATCHES {
                        limit_hit = true;
                        break 'files;
                    }
                }
            }
        }

        Ok(ToolOutcome::ok(json!({
            "matches": matches,
            "files_scanned": files_scanned,
            "limit_hit": limit_hit,
        })))
    }

    async fn glob(&self, args: GlobInput) -> Result<ToolOutcome> {
        let root = args
            .path
            .unwrap_or_else(|| self.config.workspace_root.clone());
        if let Some(reason) = self.check_path(&root) {
            return Ok(ToolOutcome::err(reason));
        }

        let pattern = match glob_to_regex(&args.pattern) {
            Ok(re) => re,
            Err(e) => return Ok(ToolOutcome::err(format!("invalid glob pattern: {e}"))),
        };

        let entries = match self.sandbox.list_tree(&self.config.session_id, &root).await {
            Ok(entries) => entries,
            Err(e) => return Ok(sandbox_error(e)),
        };

        let root_prefix = format!("{}/", root.trim_end_matches('/'));
        let paths: Vec<&str> = entries
            .iter()
            .filter(|e| e.kind == FileKind::File)
            .map(|e| e.path.as_str())
            .filter(|p| {
                let relative = p.strip_prefix(&root_prefix).unwrap_or(p);
                pattern.is_match(relative)
            })
            .collect();

        Ok(ToolOutcome::ok(json!({"paths": paths})))
    }

    async fn list_files(&self, args: ListFilesInput) -> Result<ToolOutcome> {
        let root = args
            .path
            .unwrap_or_else(|| self.config.workspace_root.clone());
        if let Some(reason) = self.check_path(&root) {
            return Ok(ToolOutcome::err(reason));
        }

        let entries = match self.sandbox.list_tree(&self.config.session_id, &root).await {
            Ok(entries) => entries,
            Err(e) => return Ok(sandbox_error(e)),
        };

        let root_prefix = format!("{}/", root.trim_end_matches('/'));
        let listed: Vec<Value> = entries
            .iter()
            .filter(|e| {
                args.recursive
                    || e.path
                        .strip_prefix(&root_prefix)
                        .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|e| {
                json!({
                    "name": e.name,
                    "path": e.path,
                    "kind": match e.kind {
                        FileKind::File => "file",
                        FileKind::Directory => "directory",
                    },
                    "size": e.size,
                })
            })
            .collect();

        Ok(ToolOutcome::ok(json!({"entries": listed})))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a sandbox failure to an error result for the model.
fn sandbox_error(e: SandboxError) -> ToolOutcome {
    ToolOutcome::err(e.to_string())
}

/// Translate a glob pattern into an anchored regex.  Supports `**` (any
/// path segments), `*` (within one segment), and `?` (one character).
fn glob_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following slash so `**/*.py` also matches
                    // files at the root.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c if "\\.+()[]{}^$|".contains(c) => {
                re.push('\\');
                re.push(c);
            }
            c => re.push(c),
        }
    }

    re.push('$');
    Regex::new(&re)
}

/// Extract pass/fail counts from test-runner output.  Understands the
/// common `N passed` / `N failed` summary lines produced by pytest, jest,
/// and cargo-style runners.
pub fn parse_test_counts(output: &str) -> (u32, u32) {
    static PASSED: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static FAILED: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();

    let passed_re =
        PASSED.get_or_init(|| Regex::new(r"(\d+)\s+pass(?:ed|ing)?").expect("pattern is valid"));
    let failed_re =
        FAILED.get_or_init(|| Regex::new(r"(\d+)\s+fail(?:ed|ing)?").expect("pattern is valid"));

    let passed = passed_re
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let failed = failed_re
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    (passed, failed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
