//! Token bucket state and refill arithmetic.

use super::class::ClassConfig;

/// Mutable token state for one (identifier, class) pair.
///
/// Refill is computed lazily from the elapsed time since `last_refill`; no
/// timer runs per bucket. Timestamps are milliseconds from the limiter's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    /// Tokens currently available, never above the class capacity
    tokens: u64,
    /// When whole refill intervals were last credited
    last_refill: u64,
}

impl TokenBucket {
    /// Create a fully charged bucket.
    pub fn full(config: &ClassConfig, now: u64) -> Self {
        Self {
            tokens: config.max_tokens,
            last_refill: now,
        }
    }

    /// Create a bucket with an explicit token count, clamped to capacity.
    pub fn with_tokens(config: &ClassConfig, tokens: u64, now: u64) -> Self {
        Self {
            tokens: tokens.min(config.max_tokens),
            last_refill: now,
        }
    }

    /// Credit every whole refill interval that has elapsed since the last refill.
    ///
    /// Partial intervals are not credited and do not move `last_refill`, so
    /// the remainder keeps accumulating toward the next interval. A clock that
    /// reads earlier than `last_refill` credits nothing.
    pub fn refill(&mut self, config: &ClassConfig, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill);
        let intervals = elapsed / config.refill_interval_ms;

        if intervals > 0 {
            let credit = intervals.saturating_mul(config.refill_rate);
            self.tokens = self.tokens.saturating_add(credit).min(config.max_tokens);
            self.last_refill = now;
        }
    }

    /// Debit `cost` tokens if available.
    ///
    /// Returns `false` and leaves the bucket untouched when there are too few
    /// tokens.
    pub fn consume(&mut self, cost: u64) -> bool {
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Get the tokens currently available.
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Get the timestamp of the last credited refill.
    pub fn last_refill(&self) -> u64 {
        self.last_refill
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 3_600_000;

    fn hourly(max_tokens: u64, refill_rate: u64) -> ClassConfig {
        ClassConfig::new(max_tokens, refill_rate, HOUR_MS)
    }

    #[test]
    fn test_new_bucket_is_full() {
        let config = hourly(10, 10);
        let bucket = TokenBucket::full(&config, 42);

        assert_eq!(bucket.tokens(), 10);
        assert_eq!(bucket.last_refill(), 42);
    }

    #[test]
    fn test_consume_until_empty() {
        let config = hourly(3, 3);
        let mut bucket = TokenBucket::full(&config, 0);

        assert!(bucket.consume(1));
        assert!(bucket.consume(1));
        assert!(bucket.consume(1));
        assert!(!bucket.consume(1));
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn test_denied_consume_leaves_tokens_unchanged() {
        let config = hourly(20, 20);
        let mut bucket = TokenBucket::with_tokens(&config, 3, 0);

        assert!(bucket.consume(2));
        assert_eq!(bucket.tokens(), 1);

        assert!(!bucket.consume(2));
        assert!(!bucket.consume(2));
        assert_eq!(bucket.tokens(), 1);
    }

    #[test]
    fn test_refill_whole_intervals() {
        let config = hourly(10, 4);
        let mut bucket = TokenBucket::with_tokens(&config, 0, 0);

        bucket.refill(&config, 2 * HOUR_MS);
        assert_eq!(bucket.tokens(), 8);
        assert_eq!(bucket.last_refill(), 2 * HOUR_MS);
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let config = hourly(10, 4);
        let mut bucket = TokenBucket::with_tokens(&config, 5, 0);

        bucket.refill(&config, 100 * HOUR_MS);
        assert_eq!(bucket.tokens(), 10);
    }

    #[test]
    fn test_partial_interval_does_not_refill() {
        let config = hourly(10, 10);
        let mut bucket = TokenBucket::with_tokens(&config, 0, 0);

        bucket.refill(&config, HOUR_MS / 2);
        assert_eq!(bucket.tokens(), 0);
        assert_eq!(bucket.last_refill(), 0);

        // The half interval still counts toward the next credit.
        bucket.refill(&config, HOUR_MS);
        assert_eq!(bucket.tokens(), 10);
    }

    #[test]
    fn test_clock_going_backwards_is_ignored() {
        let config = hourly(10, 10);
        let mut bucket = TokenBucket::with_tokens(&config, 2, 5 * HOUR_MS);

        bucket.refill(&config, HOUR_MS);
        assert_eq!(bucket.tokens(), 2);
        assert_eq!(bucket.last_refill(), 5 * HOUR_MS);
    }

    #[test]
    fn test_with_tokens_clamps() {
        let config = hourly(10, 10);
        let bucket = TokenBucket::with_tokens(&config, 99, 0);
        assert_eq!(bucket.tokens(), 10);
    }

    #[test]
    fn test_zero_cost_always_admitted() {
        let config = hourly(1, 1);
        let mut bucket = TokenBucket::with_tokens(&config, 0, 0);
        assert!(bucket.consume(0));
        assert_eq!(bucket.tokens(), 0);
    }
}
