//! Shared rate budget for upstream catalog calls.
//!
//! Interactive lookups consume tokens; background enrichment only peeks at
//! the remaining count and backs off when it is low.

use std::sync::Mutex;
use std::time::Instant;

/// Current budget state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBudgetStatus {
    pub remaining: f64,
    pub capacity: f64,
    pub refill_per_sec: f64,
}

pub trait RateBudget: Send + Sync {
    /// Peek at the budget without consuming anything.
    fn status(&self) -> RateBudgetStatus;

    /// Consume one token. Returns false when the bucket is empty.
    fn try_acquire(&self) -> bool;
}

/// Configuration for [`TokenBucket`].
#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_per_sec: 3.0,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled lazily on every access.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    config: TokenBucketConfig,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TokenBucketConfig::default())
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        state.last_refill = now;
    }
}

impl RateBudget for TokenBucket {
    fn status(&self) -> RateBudgetStatus {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state, Instant::now());
        RateBudgetStatus {
            remaining: state.tokens,
            capacity: self.config.capacity,
            refill_per_sec: self.config.refill_per_sec,
        }
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Budget that never runs out.
pub struct NoOpRateBudget;

impl RateBudget for NoOpRateBudget {
    fn status(&self) -> RateBudgetStatus {
        RateBudgetStatus {
            remaining: f64::INFINITY,
            capacity: f64::INFINITY,
            refill_per_sec: f64::INFINITY,
        }
    }

    fn try_acquire(&self) -> bool {
        true
    }
}
