//! # Rate Limiter (C4)
//!
//! A local token bucket per provider. Deliberately not built on an external
//! rate-limiting crate: spec.md §9 calls out the source's use of an external
//! library as something to simplify away, since the semantics needed here
//! (non-blocking `try_acquire`, bucket reset on reconfigure) are small enough
//! that a dependency buys nothing.

use crate::config::RateLimitSetting;
use std::time::{Duration, Instant};

/// `{capacity, refill_per_window, tokens, window_started_at}` from spec.md
/// §3's `ProviderRuntime.rate_bucket`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_window: u32,
    window: Duration,
    tokens: u32,
    window_started_at: Instant,
}

impl TokenBucket {
    pub fn new(setting: &RateLimitSetting) -> Self {
        Self {
            capacity: setting.limit,
            refill_per_window: setting.limit,
            window: setting.window.as_duration(),
            tokens: setting.limit,
            window_started_at: Instant::now(),
        }
    }

    fn maybe_refill(&mut self) {
        if self.window_started_at.elapsed() >= self.window {
            self.tokens = self.capacity;
            self.window_started_at = Instant::now();
        }
    }

    /// Non-blocking acquire of one permit. No wait happens inside the
    /// limiter — a denied request is the dispatch engine's cue to enqueue it
    /// (spec.md §4.4, §4.9.1 step 3).
    pub fn try_acquire(&mut self) -> bool {
        self.maybe_refill();
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Whether a future `try_acquire` would currently succeed, without
    /// consuming a token. Used by the queue processor (spec.md §4.9.2) to
    /// peek before popping the head of the queue.
    pub fn has_capacity(&mut self) -> bool {
        self.maybe_refill();
        self.tokens > 0
    }

    /// Reset to full capacity, new window start (spec.md §4.4: "on
    /// reconfiguration, the bucket is reset").
    pub fn reset(&mut self, setting: &RateLimitSetting) {
        self.capacity = setting.limit;
        self.refill_per_window = setting.limit;
        self.window = setting.window.as_duration();
        self.tokens = setting.limit;
        self.window_started_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitWindow;

    fn setting(limit: u32) -> RateLimitSetting {
        RateLimitSetting {
            limit,
            window: RateLimitWindow::Minute,
        }
    }

    #[test]
    fn grants_up_to_capacity_then_denies() {
        let mut bucket = TokenBucket::new(&setting(2));
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn refills_after_window_elapses() {
        let mut bucket = TokenBucket::new(&RateLimitSetting {
            limit: 1,
            window: RateLimitWindow::Second,
        });
        // Force the window into the past without sleeping the test.
        bucket.window_started_at = Instant::now() - Duration::from_secs(2);
        assert!(bucket.try_acquire());
    }

    #[test]
    fn reset_restores_full_capacity() {
        let mut bucket = TokenBucket::new(&setting(1));
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        bucket.reset(&setting(1));
        assert!(bucket.try_acquire());
    }
}
