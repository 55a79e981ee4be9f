//! Route middleware enforcing the decision gate.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::gate::{DecisionGate, GateError, IdentityResolver, RateLimitHeaders};
use crate::ratelimit::RateLimiterBackend;

/// Header carrying the configured request limit.
pub const CURRENT_RATE_LIMIT: HeaderName = HeaderName::from_static("x-current-rate-limit");
/// Header carrying the requests left in the current window.
pub const REMAINING_CALLS: HeaderName = HeaderName::from_static("x-remaining-calls");

/// Per-route middleware state: the gate, how to identify callers, and which
/// operation's limit applies.
pub struct RateLimitState<B: RateLimiterBackend, I> {
    gate: Arc<DecisionGate<B>>,
    resolver: Arc<I>,
    operation: Arc<str>,
}

impl<B: RateLimiterBackend, I> RateLimitState<B, I> {
    pub fn new(gate: Arc<DecisionGate<B>>, resolver: Arc<I>, operation: &str) -> Self {
        Self {
            gate,
            resolver,
            operation: Arc::from(operation),
        }
    }
}

impl<B: RateLimiterBackend, I> Clone for RateLimitState<B, I> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            resolver: self.resolver.clone(),
            operation: self.operation.clone(),
        }
    }
}

/// Run the wrapped route only if the gate admits the caller.
///
/// The resolved [`Identity`](crate::gate::Identity) is stored in the request
/// extensions for the handler.
#[instrument(skip_all, fields(operation = %state.operation, path = %request.uri().path()))]
pub async fn enforce<B, I>(
    State(state): State<RateLimitState<B, I>>,
    mut request: Request,
    next: Next,
) -> Response
where
    B: RateLimiterBackend + 'static,
    I: IdentityResolver<Request> + 'static,
{
    let identity = state.resolver.resolve(&request);
    request.extensions_mut().insert(identity.clone());

    match state
        .gate
        .guard(&identity, &state.operation, move || next.run(request))
        .await
    {
        Ok(guarded) => {
            let mut response = guarded.output;
            if let Some(headers) = guarded.headers {
                apply_headers(response.headers_mut(), headers);
            }
            response
        }
        Err(err) => err.into_response(),
    }
}

fn apply_headers(headers: &mut HeaderMap, values: RateLimitHeaders) {
    headers.insert(CURRENT_RATE_LIMIT, HeaderValue::from(values.limit));
    headers.insert(REMAINING_CALLS, HeaderValue::from(values.remaining));
}

/// Error payload returned for refused requests.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            GateError::IdentityUnresolvable => (StatusCode::UNAUTHORIZED, "identity_required"),
            GateError::RateExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded")
            }
            // Store details stay in the logs.
            GateError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = match &self {
            GateError::Store(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let mut response = (status, Json(ErrorBody { error, message })).into_response();
        if let Some(values) = self.rate_limit_headers() {
            apply_headers(response.headers_mut(), values);
        }
        response
    }
}
