//! Token bucket rate limiter.

use tokio::time::{Duration, Instant};

/// Token bucket for a single service.
///
/// Tokens are added at a constant rate and consumed per request. A rate of
/// zero disables limiting.
#[derive(Debug)]
pub struct TokenBucket {
    /// Max tokens (= requests per minute).
    capacity: f32,
    tokens: f32,
    /// Tokens added per second.
    refill_rate: f32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket for the given rate. The bucket starts full.
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f32;
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.capacity == 0.0
    }

    /// Try to take a token.
    ///
    /// Returns `Err(wait)` with the time until one becomes available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f32(tokens_needed / self.refill_rate))
        }
    }

    /// Tokens currently available, `None` when unlimited.
    pub fn available(&mut self) -> Option<f32> {
        if self.is_unlimited() {
            return None;
        }
        self.refill();
        Some(self.tokens)
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full() {
        let mut bucket = TokenBucket::new(3);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());

        let wait = bucket.try_acquire().unwrap_err();
        // 3 rpm refills one token every 20s
        assert!(wait > Duration::from_secs(19) && wait <= Duration::from_secs(20));
    }

    #[test]
    fn test_zero_rate_is_unlimited() {
        let mut bucket = TokenBucket::new(0);
        for _ in 0..1000 {
            assert!(bucket.try_acquire().is_ok());
        }
        assert_eq!(bucket.available(), None);
    }

    #[tokio::test]
    async fn test_bucket_refills() {
        let mut bucket = TokenBucket::new(600); // 10 per second
        for _ in 0..600 {
            bucket.try_acquire().unwrap();
        }
        assert!(bucket.try_acquire().is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bucket.try_acquire().is_ok());
    }
}
