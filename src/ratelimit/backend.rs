//! Rate limiter trait consumed by the decision gate.

use async_trait::async_trait;

use super::limiter::Verdict;
use super::limits::LimitConfig;
use super::store::StoreError;

/// Trait for rate limiter implementations.
///
/// The decision gate only needs a verdict for a caller key under a limit, so
/// it is written against this trait rather than a concrete limiter.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Evaluate one request from `key` against `limit`, recording it if allowed.
    async fn check_rate_limit(&self, key: &str, limit: &LimitConfig)
        -> Result<Verdict, StoreError>;
}
