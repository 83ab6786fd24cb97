//! Fixed-window rate limiting.
//!
//! Counters live in a pluggable [`CounterStore`]; the in-process store is
//! the default, an external shared store is the seam for cluster-wide
//! limits. Back-end calls are bounded to 500 ms and fail open: a broken
//! counter store must never take traffic down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

/// Deadline for counter-store calls; exceeded calls fail open.
pub const STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Increment-and-read for one (key, window) bucket.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the bucket and return its new count.
    async fn incr(&self, key: &str, window_start: i64) -> anyhow::Result<u64>;
}

/// In-process counter store.
#[derive(Default)]
pub struct MemoryCounterStore {
    buckets: DashMap<(String, i64), AtomicU64>,
}

impl MemoryCounterStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop buckets from windows older than `before`; called opportunistically.
    pub fn sweep(&self, before: i64) {
        self.buckets.retain(|(_, window), _| *window >= before);
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True when no buckets are live.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, window_start: i64) -> anyhow::Result<u64> {
        let bucket = self
            .buckets
            .entry((key.to_string(), window_start))
            .or_insert_with(|| AtomicU64::new(0));
        Ok(bucket.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// False when the request must be rejected with 429
    pub allowed: bool,
    /// Configured window limit
    pub limit: u32,
    /// Requests left in the window
    pub remaining: u32,
    /// Epoch second at which the window resets
    pub reset_epoch: i64,
}

impl RateDecision {
    /// Seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self) -> i64 {
        (self.reset_epoch - chrono::Utc::now().timestamp()).max(1)
    }
}

/// Fixed-window limiter over a counter store.
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    limit: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    /// Limiter allowing `limit` requests per `window`.
    pub fn new(store: Arc<dyn CounterStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    /// The configured limit.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Check one request attributed to `key`.
    pub async fn check(&self, key: &str) -> RateDecision {
        let window_secs = self.window.as_secs().max(1) as i64;
        let now = chrono::Utc::now().timestamp();
        let window_start = now - now.rem_euclid(window_secs);
        let reset_epoch = window_start + window_secs;

        let count = match tokio::time::timeout(STORE_TIMEOUT, self.store.incr(key, window_start))
            .await
        {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!(error = %e, "rate-limit store failed, allowing request");
                return RateDecision {
                    allowed: true,
                    limit: self.limit,
                    remaining: self.limit,
                    reset_epoch,
                };
            }
            Err(_) => {
                warn!("rate-limit store timed out, allowing request");
                return RateDecision {
                    allowed: true,
                    limit: self.limit,
                    remaining: self.limit,
                    reset_epoch,
                };
            }
        };

        RateDecision {
            allowed: count <= u64::from(self.limit),
            limit: self.limit,
            remaining: u64::from(self.limit).saturating_sub(count) as u32,
            reset_epoch,
        }
    }
}
