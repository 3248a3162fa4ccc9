//! Shared token-bucket limiter for the extraction provider.
//!
//! One bucket per provider instance, shared by every dispatcher worker and
//! the post-processing stage: capacity `burst`, refill `rate` tokens per
//! second, starting full. [`RateLimiter::acquire`] parks the caller until
//! exactly one token is available, so oversubscription is impossible by
//! construction.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use docket_core::{Error, Result};

/// Tracing target for limiter operations.
const TRACING_TARGET: &str = "docket_pipeline::limiter";

#[derive(Debug)]
struct TokenBucket {
    /// Number of tokens available.
    tokens: f64,
    /// Maximum number of tokens.
    capacity: u32,
    /// Token refill rate per second.
    refill_rate: f64,
    /// Last refill time.
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Refills tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let new_tokens = elapsed * self.refill_rate;

        self.tokens = (self.tokens + new_tokens).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Attempts to consume one token.
    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns time until the next token is available.
    fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Duration::from_secs_f64(tokens_needed / self.refill_rate)
        }
    }
}

/// Process-wide token-bucket limiter with an awaitable acquire.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Creates a limiter with the given burst capacity and refill rate.
    pub fn new(burst: u32, rate: f64) -> Self {
        tracing::debug!(
            target: TRACING_TARGET,
            burst,
            rate,
            "rate limiter initialized"
        );

        Self {
            bucket: Mutex::new(TokenBucket::new(burst, rate)),
        }
    }

    /// Consumes one token immediately if available.
    pub fn try_acquire(&self) -> bool {
        self.bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_consume()
    }

    /// Waits until exactly one token is available, or until cancelled.
    ///
    /// The wait is cooperative: cancellation is observed at every
    /// suspension point and returns `ErrorKind::Cancelled`.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::cancelled());
            }

            let wait = {
                let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
                if bucket.try_consume() {
                    return Ok(());
                }
                bucket.time_until_available()
            };

            tokio::select! {
                () = cancel.cancelled() => return Err(Error::cancelled()),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}
