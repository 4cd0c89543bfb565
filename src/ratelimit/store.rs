//! Bucket storage.
//!
//! A [`BucketStore`] exclusively owns every [`TokenBucket`]. Callers never touch
//! bucket state directly; they hand the store a key, the class parameters and
//! the current time, and the store performs get-or-create, refill and debit as
//! one atomic step for that key.

use std::collections::HashMap;
use std::fmt;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::bucket::TokenBucket;
use super::class::ClassConfig;

/// Key identifying one bucket: a client identifier within a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Opaque client identifier
    pub identifier: String,
    /// Rate limit class name
    pub class: String,
}

impl BucketKey {
    /// Create a new bucket key.
    pub fn new(identifier: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.identifier)
    }
}

/// Bucket state observed by a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketOutcome {
    /// Whether the requested cost was debited
    pub admitted: bool,
    /// Tokens left after the operation
    pub tokens: u64,
    /// Last credited refill after the operation
    pub last_refill: u64,
}

impl BucketOutcome {
    fn observe(bucket: &TokenBucket, admitted: bool) -> Self {
        Self {
            admitted,
            tokens: bucket.tokens(),
            last_refill: bucket.last_refill(),
        }
    }
}

/// Storage backend for token buckets.
///
/// Implementations must make `check` atomic per key: two concurrent checks
/// against a bucket holding one token admit exactly one of them. A networked
/// backend would implement this with a transactional or compare-and-swap
/// update on the bucket record.
pub trait BucketStore: Send + Sync {
    /// Get or create the bucket, refill it, then try to debit `cost`.
    fn check(&self, key: &BucketKey, config: &ClassConfig, cost: u64, now: u64) -> BucketOutcome;

    /// Get or create the bucket and refill it without debiting.
    fn peek(&self, key: &BucketKey, config: &ClassConfig, now: u64) -> BucketOutcome;

    /// Remove every bucket belonging to `identifier`, across all classes.
    fn reset(&self, identifier: &str);

    /// Remove all buckets.
    fn reset_all(&self);

    /// Number of live buckets.
    fn len(&self) -> usize;

    /// Whether the store holds no buckets.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn create_bucket(key: &BucketKey, config: &ClassConfig, now: u64) -> TokenBucket {
    debug!(
        key = %key,
        max_tokens = config.max_tokens,
        refill_rate = config.refill_rate,
        refill_interval_ms = config.refill_interval_ms,
        "Creating new token bucket"
    );
    TokenBucket::full(config, now)
}

fn refill_and_consume(
    bucket: &mut TokenBucket,
    config: &ClassConfig,
    cost: u64,
    now: u64,
) -> BucketOutcome {
    bucket.refill(config, now);
    let admitted = bucket.consume(cost);
    BucketOutcome::observe(bucket, admitted)
}

fn refill_only(bucket: &mut TokenBucket, config: &ClassConfig, now: u64) -> BucketOutcome {
    bucket.refill(config, now);
    BucketOutcome::observe(bucket, false)
}

/// Sharded in-memory store.
///
/// Each key lives in a `DashMap` shard; holding the shard's write guard for the
/// whole refill-and-debit sequence makes the check atomic for that key while
/// unrelated keys proceed in parallel.
#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: DashMap<BucketKey, TokenBucket>,
}

impl InMemoryBucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bucket<R>(
        &self,
        key: &BucketKey,
        config: &ClassConfig,
        now: u64,
        f: impl FnOnce(&mut TokenBucket) -> R,
    ) -> R {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return f(bucket.value_mut());
        }

        let mut bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| create_bucket(key, config, now));
        f(bucket.value_mut())
    }
}

impl BucketStore for InMemoryBucketStore {
    fn check(&self, key: &BucketKey, config: &ClassConfig, cost: u64, now: u64) -> BucketOutcome {
        self.with_bucket(key, config, now, |bucket| {
            refill_and_consume(bucket, config, cost, now)
        })
    }

    fn peek(&self, key: &BucketKey, config: &ClassConfig, now: u64) -> BucketOutcome {
        self.with_bucket(key, config, now, |bucket| refill_only(bucket, config, now))
    }

    fn reset(&self, identifier: &str) {
        self.buckets.retain(|key, _| key.identifier != identifier);
    }

    fn reset_all(&self) {
        self.buckets.clear();
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}

/// In-memory store guarded by a single lock.
///
/// Checks are O(1) and the critical section is a few arithmetic operations, so
/// one mutex over the whole map is adequate for modest traffic.
#[derive(Debug, Default)]
pub struct SingleLockBucketStore {
    buckets: Mutex<HashMap<BucketKey, TokenBucket>>,
}

impl SingleLockBucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bucket<R>(
        &self,
        key: &BucketKey,
        config: &ClassConfig,
        now: u64,
        f: impl FnOnce(&mut TokenBucket) -> R,
    ) -> R {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(key) {
            return f(bucket);
        }

        let bucket = buckets
            .entry(key.clone())
            .or_insert_with(|| create_bucket(key, config, now));
        f(bucket)
    }
}

impl BucketStore for SingleLockBucketStore {
    fn check(&self, key: &BucketKey, config: &ClassConfig, cost: u64, now: u64) -> BucketOutcome {
        self.with_bucket(key, config, now, |bucket| {
            refill_and_consume(bucket, config, cost, now)
        })
    }

    fn peek(&self, key: &BucketKey, config: &ClassConfig, now: u64) -> BucketOutcome {
        self.with_bucket(key, config, now, |bucket| refill_only(bucket, config, now))
    }

    fn reset(&self, identifier: &str) {
        self.buckets.lock().retain(|key, _| key.identifier != identifier);
    }

    fn reset_all(&self) {
        self.buckets.lock().clear();
    }

    fn len(&self) -> usize {
        self.buckets.lock().len()
    }
}
