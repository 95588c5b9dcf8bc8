//! Token-bucket rate limiting, keyed by task name.
//!
//! Applied at submission time: a submission that finds the bucket empty is
//! rejected with a `RateLimited` error carrying the time until the next
//! token, rather than queued. Retries of already-admitted tasks are not
//! re-charged.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use liber_core::{Error, RateLimit, Result};

/// A single token bucket: capacity `max_calls`, refilled continuously at
/// `max_calls / per`.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(limit: RateLimit, now: Instant) -> Self {
        let capacity = f64::from(limit.max_calls);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / limit.per.as_secs_f64().max(f64::EPSILON),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    pub fn try_acquire(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
    }

    /// Tokens currently available (after refill at `now`).
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

/// Bucket set shared by all submitters; one bucket per rate-limited task
/// name, created lazily on first submission.
#[derive(Default)]
pub struct RateLimiters {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Charge one invocation of `task` against its limit. A task with no
    /// configured limit always passes.
    pub fn check(&self, task: &str, limit: Option<&RateLimit>) -> Result<()> {
        self.check_at(task, limit, Instant::now())
    }

    /// Like [`RateLimiters::check`] with an explicit clock, for tests.
    pub fn check_at(&self, task: &str, limit: Option<&RateLimit>, now: Instant) -> Result<()> {
        let Some(limit) = limit else {
            return Ok(());
        };
        let mut buckets = self.lock();
        let bucket = buckets
            .entry(task.to_string())
            .or_insert_with(|| TokenBucket::new(*limit, now));
        bucket.try_acquire(now).map_err(|retry_after| Error::RateLimited {
            task: task.to_string(),
            retry_after,
        })
    }
}
