//! Token bucket.

use std::time::Duration;
use tokio::time::Instant;

/// A token bucket refilled continuously at `refill_rate` tokens/sec, holding
/// at most `capacity` tokens. Starts full, so brief bursts up to the capacity
/// pass without waiting.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token if available.
    pub fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Return a token taken optimistically (the domain bucket refused after
    /// the global bucket granted).
    pub fn put_back(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }

    /// How long until one full token has accumulated.
    pub fn time_to_next_token(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let missing = 1.0 - self.tokens;
        Duration::from_secs_f64(missing / self.refill_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause};

    #[tokio::test]
    async fn test_starts_full() {
        let mut bucket = TokenBucket::new(2.0, 1.0);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[tokio::test]
    async fn test_refill_over_time() {
        pause();
        let mut bucket = TokenBucket::new(2.0, 1.0);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());

        advance(Duration::from_millis(1500)).await;
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[tokio::test]
    async fn test_refill_caps_at_capacity() {
        pause();
        let mut bucket = TokenBucket::new(2.0, 1.0);
        advance(Duration::from_secs(60)).await;
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[tokio::test]
    async fn test_time_to_next_token() {
        pause();
        let mut bucket = TokenBucket::new(1.0, 0.5);
        assert!(bucket.try_take());
        let wait = bucket.time_to_next_token();
        assert!(wait > Duration::from_millis(1900) && wait <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_put_back() {
        let mut bucket = TokenBucket::new(1.0, 0.1);
        assert!(bucket.try_take());
        bucket.put_back();
        assert!(bucket.try_take());
    }
}
