//! Session registry.
//!
//! Tracks per-session counters for observability across concurrent
//! interviews.  Entries live in a bounded cache so abandoned sessions age
//! out instead of accumulating forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use serde::Serialize;

use crate::model::types::Usage;

/// Maximum concurrently tracked sessions.
const MAX_TRACKED_SESSIONS: u64 = 1_024;

/// Live counters for one session.  All counters are monotonic.
#[derive(Debug)]
pub struct SessionMetrics {
    started_at: chrono::DateTime<chrono::Utc>,
    messages: AtomicU64,
    tool_calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    model_errors: AtomicU64,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            started_at: chrono::Utc::now(),
            messages: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            model_errors: AtomicU64::new(0),
        }
    }
}

impl SessionMetrics {
    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_calls(&self, count: u64) {
        self.tool_calls.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_usage(&self, usage: &Usage) {
        self.input_tokens
            .fetch_add(u64::from(usage.input_tokens), Ordering::Relaxed);
        self.output_tokens
            .fetch_add(u64::from(usage.output_tokens), Ordering::Relaxed);
    }

    pub fn record_model_error(&self) {
        self.model_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started_at: self.started_at,
            messages: self.messages.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            model_errors: self.model_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of one session's counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub messages: u64,
    pub tool_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model_errors: u64,
}

/// Registry of active sessions.  Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Cache<String, Arc<SessionMetrics>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Cache::new(MAX_TRACKED_SESSIONS),
        }
    }

    /// Get or create the metrics handle for a session.
    pub fn metrics(&self, session_id: &str) -> Arc<SessionMetrics> {
        self.sessions
            .get_with(session_id.to_owned(), || Arc::new(SessionMetrics::default()))
    }

    /// Snapshot a session's counters, if it is tracked.
    pub fn snapshot(&self, session_id: &str) -> Option<MetricsSnapshot> {
        self.sessions.get(session_id).map(|m| m.snapshot())
    }

    pub fn active_sessions(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let registry = SessionRegistry::new();
        let metrics = registry.metrics("sess-1");
        metrics.record_message();
        metrics.record_tool_calls(3);
        metrics.record_usage(&Usage {
            input_tokens: 100,
            output_tokens: 40,
            ..Default::default()
        });

        let snap = registry.snapshot("sess-1").unwrap();
        assert_eq!(snap.messages, 1);
        assert_eq!(snap.tool_calls, 3);
        assert_eq!(snap.input_tokens, 100);
        assert_eq!(snap.output_tokens, 40);
    }

    #[test]
    fn handles_are_shared_per_session() {
        let registry = SessionRegistry::new();
        registry.metrics("sess-1").record_message();
        registry.metrics("sess-1").record_message();
        registry.metrics("sess-2").record_message();

        assert_eq!(registry.snapshot("sess-1").unwrap().messages, 2);
        assert_eq!(registry.snapshot("sess-2").unwrap().messages, 1);
        assert!(registry.snapshot("sess-3").is_none());
    }
}
