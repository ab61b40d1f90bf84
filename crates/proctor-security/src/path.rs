//! Path policy -- workspace containment, blocked segments, and blocked
//! binary extensions.
//!
//! The containment check is a string-prefix check against the workspace
//! root.  It deliberately does not canonicalize `..` segments; lexical
//! normalization is the sandbox's job and the two layers are kept separate
//! so neither silently changes the other's semantics.

use crate::Verdict;

/// Path segments that must never appear in a tool-supplied path, regardless
/// of where the path points.
const BLOCKED_SEGMENTS: &[&str] = &[
    ".ssh",
    ".aws",
    ".gnupg",
    ".env",
    ".netrc",
    ".npmrc",
    ".pypirc",
    "id_rsa",
    "id_ed25519",
    "credentials",
    "authorized_keys",
    // Git internals -- the object store and config, not the worktree.
    ".git/config",
    ".git/hooks",
    ".git/objects",
];

/// Extensions the interview tools have no business reading or writing.
const BLOCKED_EXTENSIONS: &[&str] = &["exe", "dll", "so", "dylib", "bin", "o", "a", "class"];

/// Validates file paths before they reach the sandbox.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy;

impl PathPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Check that `path` is an absolute path inside `root` and touches
    /// nothing sensitive.
    pub fn check(&self, path: &str, root: &str) -> Verdict {
        if path.is_empty() {
            return Verdict::deny("empty path");
        }

        if !path.starts_with('/') {
            return Verdict::deny(format!("path `{path}` must be absolute"));
        }

        let root = root.trim_end_matches('/');
        if !(path == root || path.starts_with(&format!("{root}/"))) {
            return Verdict::deny(format!(
                "path `{path}` is outside the workspace root `{root}`"
            ));
        }

        for segment in path.split('/') {
            if BLOCKED_SEGMENTS.contains(&segment) {
                return Verdict::deny(format!(
                    "path `{path}` contains blocked segment `{segment}`"
                ));
            }
        }
        // Multi-segment entries like `.git/config`.
        for blocked in BLOCKED_SEGMENTS.iter().filter(|b| b.contains('/')) {
            if path.contains(blocked) {
                return Verdict::deny(format!(
                    "path `{path}` contains blocked segment `{blocked}`"
                ));
            }
        }

        if let Some(ext) = path.rsplit('.').next()
            && !path.ends_with('.')
            && path.contains('.')
            && BLOCKED_EXTENSIONS.contains(&ext)
        {
            return Verdict::deny(format!("path `{path}` has blocked extension `.{ext}`"));
        }

        Verdict::Allow
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
