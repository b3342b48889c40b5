//! Per-model token bucket.
//!
//! Each routable model owns one bucket, shared by every role that lists the model.
//! The bucket is guarded by its own mutex so contention stays scoped to that model.

use super::RateLimit;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Returned when capacity does not free up within the allowed wait.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit capacity not available within {waited:?}")]
pub struct RateLimitTimeout {
    pub waited: Duration,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(limit: &RateLimit) -> Self {
        let capacity = f64::from(limit.capacity.max(1));
        Self {
            capacity,
            refill_per_second: limit.refill_per_second.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available. Otherwise return how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::try_from_secs_f64(missing / self.refill_per_second).unwrap_or(Duration::MAX))
        }
    }

    /// Wait for a token, giving up once `timeout` would be exceeded.
    pub async fn acquire(&self, timeout: Duration) -> Result<(), RateLimitTimeout> {
        // None means the wait is unbounded
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    let ready_at = Instant::now().checked_add(wait);
                    let too_late = match (ready_at, deadline) {
                        (None, _) => true,
                        (Some(_), None) => false,
                        (Some(ready_at), Some(deadline)) => ready_at > deadline,
                    };
                    if too_late {
                        return Err(RateLimitTimeout { waited: timeout });
                    }
                    debug!("Rate limited, waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = Instant::now().duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.refill_per_second).min(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_empty() {
        let bucket = TokenBucket::new(&RateLimit {
            capacity: 2,
            refill_per_second: 0.001,
        });
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait > Duration::from_secs(100));
    }

    #[tokio::test]
    async fn test_acquire_times_out() {
        let bucket = TokenBucket::new(&RateLimit {
            capacity: 1,
            refill_per_second: 0.01,
        });
        bucket.acquire(Duration::from_millis(10)).await.unwrap();

        let started = std::time::Instant::now();
        let err = bucket.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.waited, Duration::from_millis(50));
        // Gives up without sleeping through a wait it cannot satisfy
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_extreme_limits_do_not_panic() {
        let bucket = TokenBucket::new(&RateLimit {
            capacity: 1,
            refill_per_second: 1e-300,
        });
        bucket.acquire(Duration::MAX).await.unwrap();
        assert_eq!(bucket.try_acquire().unwrap_err(), Duration::MAX);

        let err = bucket.acquire(Duration::MAX).await.unwrap_err();
        assert_eq!(err.waited, Duration::MAX);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(&RateLimit {
            capacity: 1,
            refill_per_second: 50.0,
        });
        bucket.acquire(Duration::ZERO).await.unwrap();

        let started = std::time::Instant::now();
        bucket.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(bucket.available() < 1.0);
    }
}
