//! Token bucket rate limiting for provider calls
//!
//! One bucket is shared by every ingestion worker so the combined request rate
//! stays under the provider's quota. Tokens refill continuously at
//! `capacity / interval` and never exceed `capacity`; there is no background
//! timer, the refill is applied whenever the bucket is inspected.
//!
//! ```no_run
//! # async fn run() -> Result<(), eden_ingest::rate_limit::RateLimitError> {
//! use eden_ingest::rate_limit::{RateLimitConfig, TokenBucket};
//!
//! let bucket = TokenBucket::from_config(&RateLimitConfig::per_minute(300))?;
//! let waited = bucket.acquire(1).await?;
//! # let _ = waited;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest single sleep before the bucket is checked again
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Shortest sleep, so float rounding can never spin the loop
const MIN_SLEEP_SLICE: Duration = Duration::from_millis(1);

/// Tolerance for accumulated float error in the token count
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    #[error("Requested {requested} tokens but the bucket only holds {capacity}")]
    ExceedsCapacity { requested: u32, capacity: u32 },

    #[error("Cancelled while waiting for rate limit tokens")]
    Cancelled,
}

/// Bucket size and the time it takes to refill from empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub interval: Duration,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self { capacity, interval }
    }

    /// `n` requests per minute, the way provider quotas are usually stated
    pub fn per_minute(n: u32) -> Self {
        Self::new(n, Duration::from_secs(60))
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Continuously refilling token bucket
///
/// The state lock is only taken for arithmetic and is never held across an
/// `.await`.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: u32, interval: Duration) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::InvalidConfig(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            capacity,
            refill_per_sec: capacity as f64 / interval.as_secs_f64(),
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        Self::new(config.capacity, config.interval)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Wait until `n` tokens are available and take them
    ///
    /// Returns the time spent waiting.
    pub async fn acquire(&self, n: u32) -> Result<Duration, RateLimitError> {
        self.check_request(n)?;
        let start = Instant::now();

        loop {
            match self.try_take(n) {
                Ok(()) => return Ok(self.finish(n, start)),
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires
    pub async fn acquire_cancellable(
        &self,
        n: u32,
        cancel: &CancellationToken,
    ) -> Result<Duration, RateLimitError> {
        self.check_request(n)?;
        let start = Instant::now();

        loop {
            match self.try_take(n) {
                Ok(()) => return Ok(self.finish(n, start)),
                Err(wait) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                        _ = tokio::time::sleep(wait) => {},
                    }
                },
            }
        }
    }

    /// Tokens available right now, with refill applied
    pub fn available(&self) -> f64 {
        let mut state = self.lock_state();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn check_request(&self, n: u32) -> Result<(), RateLimitError> {
        if n > self.capacity {
            return Err(RateLimitError::ExceedsCapacity {
                requested: n,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Take `n` tokens, or report how long to sleep before trying again
    fn try_take(&self, n: u32) -> Result<(), Duration> {
        let mut state = self.lock_state();
        self.refill(&mut state, Instant::now());

        let needed = n as f64;
        if state.tokens + TOKEN_EPSILON >= needed {
            state.tokens = (state.tokens - needed).max(0.0);
            return Ok(());
        }

        let deficit = needed - state.tokens;
        let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
        Err(wait.clamp(MIN_SLEEP_SLICE, MAX_SLEEP_SLICE))
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity as f64);
        state.last_refill = now;
    }

    fn finish(&self, n: u32, start: Instant) -> Duration {
        let waited = start.elapsed();
        if !waited.is_zero() {
            debug!(tokens = n, waited_ms = waited.as_millis() as u64, "Rate limiter delayed request");
        }
        waited
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

static SHARED: Mutex<Option<Arc<TokenBucket>>> = Mutex::new(None);

/// Process-wide bucket, created from `config` on first use
///
/// Later calls return the existing bucket and ignore `config`.
pub fn shared(config: &RateLimitConfig) -> Result<Arc<TokenBucket>, RateLimitError> {
    let mut slot = SHARED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(bucket) = slot.as_ref() {
        return Ok(Arc::clone(bucket));
    }
    let bucket = Arc::new(TokenBucket::from_config(config)?);
    *slot = Some(Arc::clone(&bucket));
    Ok(bucket)
}

/// Drop the process-wide bucket so the next [`shared`] call builds a new one
pub fn reset_shared() {
    let mut slot = SHARED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = None;
}
