//! Core rate limiter facade.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::class::{ClassConfig, LimitTable};
use super::clock::{Clock, SystemClock};
use super::store::{BucketKey, BucketOutcome, BucketStore, InMemoryBucketStore};
use crate::error::Result;

/// How the retry delay of a denied request is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAfter {
    /// Always report the class's full refill interval.
    #[default]
    FullInterval,
    /// Report the time left until the next refill is credited.
    NextRefill,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Tokens left in the bucket after this check
    pub tokens_remaining: u64,
    /// Milliseconds to wait before retrying; set only when denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Read-only view of a bucket for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub tokens_remaining: u64,
    pub max_tokens: u64,
}

/// The admission-control facade.
///
/// Constructed explicitly and shared by `Arc`; there is no process-global
/// instance. All bucket state lives in the injected [`BucketStore`].
pub struct RateLimiter {
    /// Static class configuration
    table: LimitTable,
    /// Bucket storage
    store: Arc<dyn BucketStore>,
    /// Time source for refill
    clock: Arc<dyn Clock>,
    /// Retry delay reporting policy
    retry_after: RetryAfter,
}

impl RateLimiter {
    /// Create a rate limiter over the given table, store and clock.
    pub fn new(table: LimitTable, store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            table,
            store,
            clock,
            retry_after: RetryAfter::default(),
        }
    }

    /// Create a rate limiter backed by an in-memory store and the system clock.
    pub fn in_memory(table: LimitTable) -> Self {
        Self::new(
            table,
            Arc::new(InMemoryBucketStore::new()),
            Arc::new(SystemClock),
        )
    }

    /// Set the retry delay reporting policy.
    pub fn with_retry_after(mut self, retry_after: RetryAfter) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Check the rate limit for `identifier` in `class`, debiting `cost`
    /// tokens when admitted.
    ///
    /// An unknown class is a configuration error. A denial is returned as
    /// data and leaves the bucket's tokens unchanged.
    pub fn check_rate_limit(
        &self,
        identifier: &str,
        class: impl AsRef<str>,
        cost: u64,
    ) -> Result<AdmissionResult> {
        let class = class.as_ref();
        let config = self.table.require(class)?;
        Ok(self.check_resolved(identifier, class, config, cost))
    }

    /// Admission check for a class whose configuration is already resolved.
    pub(crate) fn check_resolved(
        &self,
        identifier: &str,
        class: &str,
        config: &ClassConfig,
        cost: u64,
    ) -> AdmissionResult {
        let key = BucketKey::new(identifier, class);
        let now = self.clock.now_millis();

        trace!(key = %key, cost = cost, "Checking rate limit");

        if cost > config.max_tokens {
            warn!(
                key = %key,
                cost = cost,
                max_tokens = config.max_tokens,
                "Cost exceeds bucket capacity; request can never be admitted"
            );
        }

        let outcome = self.store.check(&key, config, cost, now);

        if outcome.admitted {
            return AdmissionResult {
                allowed: true,
                tokens_remaining: outcome.tokens,
                retry_after_ms: None,
            };
        }

        let retry_after_ms = self.retry_after_ms(&outcome, config.refill_interval_ms, now);
        debug!(
            key = %key,
            tokens = outcome.tokens,
            retry_after_ms = retry_after_ms,
            "Rate limit exceeded"
        );

        AdmissionResult {
            allowed: false,
            tokens_remaining: outcome.tokens,
            retry_after_ms: Some(retry_after_ms),
        }
    }

    /// Get the current token count for `identifier` in `class` without
    /// debiting. For display only, never for enforcement.
    pub fn get_status(&self, identifier: &str, class: impl AsRef<str>) -> Result<RateLimitStatus> {
        let class = class.as_ref();
        let config = self.table.require(class)?;
        let key = BucketKey::new(identifier, class);
        let outcome = self.store.peek(&key, config, self.clock.now_millis());

        Ok(RateLimitStatus {
            tokens_remaining: outcome.tokens,
            max_tokens: config.max_tokens,
        })
    }

    /// Drop every bucket belonging to `identifier`.
    ///
    /// This is primarily useful for testing.
    pub fn reset(&self, identifier: &str) {
        self.store.reset(identifier);
    }

    /// Drop all buckets.
    pub fn reset_all(&self) {
        self.store.reset_all();
    }

    /// Get the number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }

    /// The limit table this limiter enforces.
    pub fn table(&self) -> &LimitTable {
        &self.table
    }

    /// The retry delay policy in effect.
    pub fn retry_after(&self) -> RetryAfter {
        self.retry_after
    }

    fn retry_after_ms(&self, outcome: &BucketOutcome, interval_ms: u64, now: u64) -> u64 {
        match self.retry_after {
            RetryAfter::FullInterval => interval_ms,
            RetryAfter::NextRefill => outcome
                .last_refill
                .saturating_add(interval_ms)
                .saturating_sub(now)
                .clamp(1, interval_ms),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("table", &self.table)
            .field("buckets", &self.store.len())
            .field("retry_after", &self.retry_after)
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::in_memory(LimitTable::default())
    }
}
