//! Admission-control middleware for async handlers.
//!
//! [`with_rate_limit`] resolves a class once, at wrap time, and produces a
//! [`RateLimitGate`]. The gate either runs a handler and hands back its output
//! untouched, or returns [`Gated::RateLimited`] without running it.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::class::ClassConfig;
use super::identity::IdentifierSource;
use super::limiter::{AdmissionResult, RateLimiter};
use crate::error::Result;

/// The value returned in place of a handler's output when a call is denied.
///
/// Serializes as `{"error": ..., "rateLimited": true, "retryAfter": N}` so
/// callers can tell it apart from an operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceeded {
    error: String,
    rate_limited: bool,
    retry_after: u64,
}

impl RateLimitExceeded {
    /// Build the denial for a retry delay in milliseconds. The delay shown to
    /// users is rounded up to whole seconds.
    pub fn from_retry_after_ms(retry_after_ms: u64) -> Self {
        let seconds = retry_after_ms.div_ceil(1000);
        Self {
            error: format!(
                "Rate limit exceeded. Please try again in {} seconds.",
                seconds
            ),
            rate_limited: true,
            retry_after: seconds,
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.error
    }

    /// Seconds the caller should wait before retrying.
    pub fn retry_after_seconds(&self) -> u64 {
        self.retry_after
    }

    /// Always `true`; present so serialized denials carry the tag.
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }
}

impl fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error)
    }
}

impl std::error::Error for RateLimitExceeded {}

/// Result of a gated call: the handler's own output, or a denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Gated<T> {
    /// The call was admitted and the handler ran exactly once.
    Admitted(T),
    /// The call was denied and the handler never ran.
    RateLimited(RateLimitExceeded),
}

impl<T> Gated<T> {
    /// Whether the call was denied.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Gated::RateLimited(_))
    }

    /// The handler output, if the call was admitted.
    pub fn admitted(self) -> Option<T> {
        match self {
            Gated::Admitted(value) => Some(value),
            Gated::RateLimited(_) => None,
        }
    }

    /// Convert into a `Result` with the denial as the error.
    pub fn into_result(self) -> std::result::Result<T, RateLimitExceeded> {
        match self {
            Gated::Admitted(value) => Ok(value),
            Gated::RateLimited(denied) => Err(denied),
        }
    }

    /// Map the handler output, leaving a denial untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Gated<U> {
        match self {
            Gated::Admitted(value) => Gated::Admitted(f(value)),
            Gated::RateLimited(denied) => Gated::RateLimited(denied),
        }
    }
}

/// Admission gate for one class and cost.
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<RateLimiter>,
    class: String,
    config: ClassConfig,
    cost: u64,
}

/// Build a gate for `class` charging `cost` tokens per call.
///
/// An unknown class fails here, before any traffic flows, with
/// [`crate::LimiterError::UnknownClass`].
pub fn with_rate_limit(
    limiter: &Arc<RateLimiter>,
    class: impl AsRef<str>,
    cost: u64,
) -> Result<RateLimitGate> {
    let class = class.as_ref();
    let config = *limiter.table().require(class)?;

    Ok(RateLimitGate {
        limiter: Arc::clone(limiter),
        class: class.to_string(),
        config,
        cost,
    })
}

impl RateLimitGate {
    /// The class this gate charges.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Tokens charged per call.
    pub fn cost(&self) -> u64 {
        self.cost
    }

    /// Run the admission check for the caller named by `source`.
    pub fn admit<S>(&self, source: &S) -> std::result::Result<AdmissionResult, RateLimitExceeded>
    where
        S: IdentifierSource + ?Sized,
    {
        let identifier = source.client_identifier();
        let result = self
            .limiter
            .check_resolved(&identifier, &self.class, &self.config, self.cost);

        if result.allowed {
            Ok(result)
        } else {
            let retry_after_ms = result.retry_after_ms.unwrap_or(self.config.refill_interval_ms);
            Err(RateLimitExceeded::from_retry_after_ms(retry_after_ms))
        }
    }

    /// Run `operation` if the caller is admitted.
    ///
    /// The future is only constructed after admission, so a denied call never
    /// starts the downstream work.
    pub async fn run<S, F, Fut, T>(&self, source: &S, operation: F) -> Gated<T>
    where
        S: IdentifierSource + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.admit(source) {
            Ok(_) => Gated::Admitted(operation().await),
            Err(denied) => Gated::RateLimited(denied),
        }
    }

    /// Wrap a reusable handler taking one argument.
    pub fn wrap<H>(&self, handler: H) -> RateLimited<H> {
        RateLimited {
            gate: self.clone(),
            handler,
        }
    }
}

impl fmt::Debug for RateLimitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitGate")
            .field("class", &self.class)
            .field("cost", &self.cost)
            .finish()
    }
}

/// A handler bound to a [`RateLimitGate`].
///
/// Handlers taking several inputs take them as a tuple.
#[derive(Clone)]
pub struct RateLimited<H> {
    gate: RateLimitGate,
    handler: H,
}

impl<H> RateLimited<H> {
    /// Invoke the handler with `args` if the caller named by `source` is
    /// admitted. The handler's output, success or failure, is returned as is.
    pub async fn call<S, A, Fut, T>(&self, source: &S, args: A) -> Gated<T>
    where
        S: IdentifierSource + ?Sized,
        H: Fn(A) -> Fut,
        Fut: Future<Output = T>,
    {
        self.gate.run(source, || (self.handler)(args)).await
    }

    /// The gate in front of this handler.
    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }
}
