//! Rate limiting logic and state management.

mod bucket;
mod class;
mod clock;
mod identity;
mod limiter;
mod middleware;
mod store;

pub use bucket::TokenBucket;
pub use class::{ClassConfig, LimitTable, RateLimitClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{IdentifierSource, RequestMetadata, MAX_IDENTIFIER_LEN};
pub use limiter::{AdmissionResult, RateLimitStatus, RateLimiter, RetryAfter};
pub use middleware::{with_rate_limit, Gated, RateLimitExceeded, RateLimitGate, RateLimited};
pub use store::{BucketKey, BucketOutcome, BucketStore, InMemoryBucketStore, SingleLockBucketStore};
