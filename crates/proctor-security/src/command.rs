//! Shell command policy -- denylist of dangerous patterns plus an allowlist
//! of known-safe base commands.
//!
//! A command must clear both checks: first the denylist (dangerous patterns
//! anywhere in the command line), then the allowlist (the base token must be
//! a command the interview sandbox is expected to run).  Unknown base
//! commands are rejected with a reason rather than silently dropped.

use std::sync::OnceLock;

use regex::RegexSet;

use crate::Verdict;

/// Dangerous shell patterns.  Matching any of these rejects the command
/// outright, regardless of the base command.
const DENY_PATTERNS: &[&str] = &[
    // Recursive deletion of root-ish paths.
    r"rm\s+(-[a-zA-Z]*\s+)*(-rf?|-fr?)\s+(/|/\*|~|\$HOME)(\s|$)",
    r"rm\s+-rf?\s+/\S*",
    // Fork bombs.
    r":\(\)\s*\{\s*:\|:\s*&\s*\}\s*;",
    r"\bfork\s*bomb\b",
    // Disk format / raw device writes.
    r"\bmkfs(\.\w+)?\b",
    r"\bdd\b.*\bof=/dev/",
    r">\s*/dev/sd[a-z]",
    // Privilege escalation.
    r"\bsudo\b",
    r"\bsu\s+(-|root)\b",
    r"\bchmod\s+(-R\s+)?777\s+/",
    // Remote script piped to a shell.
    r"\b(curl|wget)\b[^|;]*\|\s*(ba|z|da)?sh\b",
    // Reverse shells.
    r"\bnc\b.*\s-e\s",
    r"\bncat\b.*\s-e\s",
    r"/dev/tcp/",
    r"\bbash\s+-i\s+>&",
    // Crypto miners.
    r"\b(xmrig|minerd|cpuminer|cgminer)\b",
];

/// Base commands the sandbox is expected to run: file inspection, test
/// runners, interpreters, package managers, and read-only git.
const ALLOWED_COMMANDS: &[&str] = &[
    // File inspection.
    "ls", "cat", "head", "tail", "wc", "find", "grep", "file", "stat", "pwd", "tree", "diff",
    "echo", "which", "sort", "uniq", "cut", "awk", "sed",
    // Directory / file management inside the workspace.
    "mkdir", "touch", "cp", "mv",
    // Python.
    "python", "python3", "pip", "pip3", "pytest", "unittest",
    // JavaScript / TypeScript.
    "node", "npm", "npx", "yarn", "pnpm", "tsc", "jest", "mocha", "vitest",
    // Rust.
    "cargo", "rustc",
    // Go.
    "go", "gofmt",
    // JVM.
    "java", "javac", "mvn", "gradle",
    // Misc runtimes.
    "ruby", "make",
    // Version control (subcommand-checked below).
    "git",
];

/// Git subcommands that do not mutate history or configuration.
const ALLOWED_GIT_SUBCOMMANDS: &[&str] = &[
    "status", "log", "diff", "show", "branch", "blame", "ls-files", "grep", "rev-parse",
];

fn deny_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(DENY_PATTERNS).expect("denylist patterns are valid"))
}

/// Validates shell commands before they reach the sandbox.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy;

impl CommandPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Check a full command line against the denylist and allowlist.
    pub fn check(&self, command: &str) -> Verdict {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Verdict::deny("empty command");
        }

        if deny_set().is_match(trimmed) {
            tracing::warn!(command = trimmed, "command matched denylist");
            return Verdict::deny(format!(
                "command `{trimmed}` matches a blocked pattern (destructive or unsafe operation)"
            ));
        }

        // Every segment of a pipeline / command list must have an allowed
        // base command.
        for segment in split_segments(trimmed) {
            let Some(base) = segment.split_whitespace().next() else {
                continue;
            };
            // Strip a leading path: `/usr/bin/python3` -> `python3`.
            let base = base.rsplit('/').next().unwrap_or(base);

            if !ALLOWED_COMMANDS.contains(&base) {
                return Verdict::deny(format!(
                    "command `{base}` is not in the allowed command list"
                ));
            }

            if base == "git" && !git_subcommand_allowed(segment) {
                return Verdict::deny(format!(
                    "git subcommand in `{segment}` is not read-only; only {} are allowed",
                    ALLOWED_GIT_SUBCOMMANDS.join(", ")
                ));
            }
        }

        Verdict::Allow
    }

    /// Whether the command contains a shell-level write: output redirection
    /// or `tee`.  Checked separately from [`check`] so the Bash tool can
    /// block writes even when the base command itself is allowed.
    pub fn has_write_redirection(&self, command: &str) -> bool {
        static REDIRECT: OnceLock<regex::Regex> = OnceLock::new();
        let re = REDIRECT.get_or_init(|| {
            regex::Regex::new(r"(^|[^>])>{1,2}\s*\S|\btee\b").expect("redirection pattern is valid")
        });
        re.is_match(command)
    }
}

/// Split a command line on pipeline and list operators so each segment's
/// base command can be checked independently.
fn split_segments(command: &str) -> impl Iterator<Item = &str> {
    command
        .split(['|', ';'])
        .flat_map(|s| s.split("&&"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn git_subcommand_allowed(segment: &str) -> bool {
    let mut parts = segment.split_whitespace();
    let _git = parts.next();
    // Skip leading flags like `-C dir`.
    for part in parts {
        if part.starts_with('-') {
            continue;
        }
        return ALLOWED_GIT_SUBCOMMANDS.contains(&part);
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
