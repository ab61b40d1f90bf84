//! Retry wrapper for transient provider overload.
//!
//! Wraps any [`LanguageModel`] and retries calls that fail with an overload
//! status (429, 503, 529).  The server's `retry-after` delay wins when
//! present; otherwise delays back off exponentially with a little jitter to
//! decorrelate concurrent sessions.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{AgentError, Result};
use crate::model::client::LanguageModel;
use crate::model::types::{ModelRequest, ModelStreamEvent, ModelTurn};

/// Total attempts per call (1 initial + 2 retries).
pub const MAX_ATTEMPTS: u32 = 3;

/// Upper bound on the random jitter added to computed backoff delays.
const MAX_JITTER_MS: u64 = 1_000;

/// Zero-based attempt counter for one logical model call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attempt(pub u32);

impl Attempt {
    /// Whether another retry is allowed after this attempt fails.
    pub fn has_next(self) -> bool {
        self.0 + 1 < MAX_ATTEMPTS
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Compute the delay before the next attempt.  A server-supplied
/// `retry-after` overrides the backoff schedule; otherwise the delay is
/// `2^(attempt+1)` seconds (2s, 4s) plus up to one second of jitter.
pub fn next_delay(attempt: Attempt, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d;
    }
    let base = Duration::from_secs(1 << (attempt.0 + 1));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS));
    base + jitter
}

/// A [`LanguageModel`] that retries overloaded calls on behalf of its inner
/// client.  Only [`AgentError::ModelOverloaded`] is retried; every other
/// error propagates immediately.
#[derive(Debug, Clone)]
pub struct RetryingClient<M> {
    inner: M,
}

impl<M: LanguageModel> RetryingClient<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }

    async fn wait_before_retry(&self, attempt: Attempt, err: &AgentError) {
        let retry_after = match err {
            AgentError::ModelOverloaded { retry_after, .. } => *retry_after,
            _ => None,
        };
        let delay = next_delay(attempt, retry_after);
        tracing::warn!(
            attempt = attempt.0 + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "model overloaded, backing off before retry"
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for RetryingClient<M> {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn> {
        let mut attempt = Attempt::default();
        loop {
            match self.inner.complete(request).await {
                Ok(turn) => return Ok(turn),
                Err(err) if err.is_retryable() && attempt.has_next() => {
                    self.wait_before_retry(attempt, &err).await;
                    attempt = attempt.next();
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn complete_streaming(
        &self,
        request: &ModelRequest,
        on_event: &mut (dyn FnMut(ModelStreamEvent) + Send),
    ) -> Result<ModelTurn> {
        // Only the initial connection failure is retried; once events have
        // started flowing a mid-stream error propagates so the caller does
        // not see a restarted stream.
        let mut attempt = Attempt::default();
        loop {
            let mut events_seen = false;
            let mut forward = |event: ModelStreamEvent| {
                events_seen = true;
                on_event(event);
            };
            match self.inner.complete_streaming(request, &mut forward).await {
                Ok(turn) => return Ok(turn),
                Err(err) if err.is_retryable() && !events_seen && attempt.has_next() => {
                    self.wait_before_retry(attempt, &err).await;
                    attempt = attempt.next();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
