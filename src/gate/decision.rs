//! The decision gate wrapped around protected operations.
//!
//! A request moves through identity resolution, then either skips evaluation
//! (exempt callers), is rejected outright (no identity), or is evaluated by the
//! limiter and ends up allowed or denied. Only allowed and exempt requests ever
//! reach the protected operation.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::identity::{Identity, IdentityResolver};
use crate::ratelimit::{LimitTable, RateLimiterBackend, StoreError, Verdict};

/// Why the gate refused to run a protected operation.
#[derive(Debug, Error)]
pub enum GateError {
    /// No caller key could be derived for a non-exempt request
    #[error("caller identity could not be determined")]
    IdentityUnresolvable,

    /// The caller used up its quota for the current window
    #[error("rate limit of {limit} requests exceeded")]
    RateExceeded { limit: u32 },

    /// The window store failed; the request is refused rather than let through
    #[error("rate limiter store failure: {0}")]
    Store(#[from] StoreError),
}

impl GateError {
    /// Headers describing the quota state, present only for rate-limit rejections.
    pub fn rate_limit_headers(&self) -> Option<RateLimitHeaders> {
        match self {
            GateError::RateExceeded { limit } => Some(RateLimitHeaders {
                limit: *limit,
                remaining: 0,
            }),
            _ => None,
        }
    }
}

/// Quota values reported to a rate-limited caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
}

impl From<Verdict> for RateLimitHeaders {
    fn from(verdict: Verdict) -> Self {
        Self {
            limit: verdict.limit,
            remaining: verdict.remaining,
        }
    }
}

/// A request the gate let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Not subject to rate limiting; nothing is reported back
    Exempt,
    /// Within quota
    Allowed(Verdict),
}

impl Admission {
    pub fn headers(&self) -> Option<RateLimitHeaders> {
        match self {
            Admission::Exempt => None,
            Admission::Allowed(verdict) => Some((*verdict).into()),
        }
    }
}

/// Output of a protected operation that the gate allowed to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guarded<T> {
    /// Whatever the operation returned
    pub output: T,
    /// Quota headers to attach; `None` for exempt callers
    pub headers: Option<RateLimitHeaders>,
}

/// Admission control in front of protected operations.
pub struct DecisionGate<B: RateLimiterBackend> {
    limiter: Arc<B>,
    limits: RwLock<LimitTable>,
}

impl<B: RateLimiterBackend> DecisionGate<B> {
    /// Create a gate that consults `limiter` using limits from `limits`.
    pub fn new(limiter: Arc<B>, limits: LimitTable) -> Self {
        Self {
            limiter,
            limits: RwLock::new(limits),
        }
    }

    /// Decide whether a caller may run `operation`.
    pub async fn admit(&self, identity: &Identity, operation: &str) -> Result<Admission, GateError> {
        let key = match identity {
            Identity::Exempt => {
                debug!(operation = %operation, "Caller exempt from rate limiting");
                return Ok(Admission::Exempt);
            }
            Identity::Unresolvable => {
                warn!(operation = %operation, "Rejecting request with unresolvable caller identity");
                return Err(GateError::IdentityUnresolvable);
            }
            Identity::Key(key) => key,
        };

        let limit = *self.limits.read().resolve(operation);
        let verdict = self
            .limiter
            .check_rate_limit(key, &limit)
            .await
            .map_err(|e| {
                error!(key = %key, operation = %operation, error = %e, "Rate limiter store failed");
                GateError::Store(e)
            })?;

        if verdict.allowed {
            Ok(Admission::Allowed(verdict))
        } else {
            debug!(key = %key, operation = %operation, limit = verdict.limit, "Request denied");
            Err(GateError::RateExceeded {
                limit: verdict.limit,
            })
        }
    }

    /// Run `protected` for an already-resolved caller if the gate admits it.
    pub async fn guard<F, Fut, T>(
        &self,
        identity: &Identity,
        operation: &str,
        protected: F,
    ) -> Result<Guarded<T>, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let admission = self.admit(identity, operation).await?;
        let output = protected().await;
        Ok(Guarded {
            output,
            headers: admission.headers(),
        })
    }

    /// Resolve the caller of `request`, then run `protected` on it if admitted.
    pub async fn process<R, I, F, Fut, T>(
        &self,
        resolver: &I,
        request: R,
        operation: &str,
        protected: F,
    ) -> Result<Guarded<T>, GateError>
    where
        I: IdentityResolver<R> + ?Sized,
        F: FnOnce(R) -> Fut,
        Fut: Future<Output = T>,
    {
        let identity = resolver.resolve(&request);
        self.guard(&identity, operation, move || protected(request))
            .await
    }

    /// A snapshot of the current limits.
    pub fn limits(&self) -> LimitTable {
        self.limits.read().clone()
    }

    /// Swap in new limits; evaluations already in flight keep the old ones.
    pub fn set_limits(&self, limits: LimitTable) {
        *self.limits.write() = limits;
    }

    pub fn limiter(&self) -> &Arc<B> {
        &self.limiter
    }
}

/// A handler bound to a gate under an operation name.
///
/// Calling it has the same input as the handler, with the output wrapped in
/// [`Guarded`] or refused with a [`GateError`].
pub struct Protected<B: RateLimiterBackend, I, H> {
    gate: Arc<DecisionGate<B>>,
    resolver: Arc<I>,
    operation: String,
    handler: H,
}

impl<B: RateLimiterBackend, I, H> Protected<B, I, H> {
    pub fn new(
        gate: Arc<DecisionGate<B>>,
        resolver: Arc<I>,
        operation: impl Into<String>,
        handler: H,
    ) -> Self {
        Self {
            gate,
            resolver,
            operation: operation.into(),
            handler,
        }
    }

    /// Invoke the handler through the gate.
    pub async fn call<R, Fut, T>(&self, request: R) -> Result<Guarded<T>, GateError>
    where
        I: IdentityResolver<R>,
        H: Fn(R) -> Fut,
        Fut: Future<Output = T>,
    {
        self.gate
            .process(self.resolver.as_ref(), request, &self.operation, &self.handler)
            .await
    }
}
