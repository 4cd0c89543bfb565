//! Studio Limiter - token-bucket admission control
//!
//! This crate gates the content studio's expensive server actions (ideation,
//! research, writing, image generation) behind per-client token buckets.
//! Buckets live in memory for the lifetime of the process and refill lazily
//! when they are next touched; a denied request never reaches the wrapped
//! handler.

pub mod actions;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use actions::StudioOperation;
pub use error::{LimiterError, Result};
pub use ratelimit::{
    with_rate_limit, AdmissionResult, Gated, RateLimitExceeded, RateLimiter, RateLimitStatus,
};
