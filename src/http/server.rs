//! HTTP server implementation.

use axum::extract::Request;
use axum::routing::get;
use axum::{middleware, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::handlers;
use super::middleware::{enforce, RateLimitState};
use crate::error::{Result, TollgateError};
use crate::gate::{DecisionGate, IdentityResolver};
use crate::ratelimit::RateLimiterBackend;

/// Operation name whose limit guards `/weather/limited`.
pub const LIMITED_OPERATION: &str = "limited";

/// Build the service routes. Only `/weather/limited` passes through the gate.
pub fn router<B, I>(gate: Arc<DecisionGate<B>>, resolver: Arc<I>) -> Router
where
    B: RateLimiterBackend + 'static,
    I: IdentityResolver<Request> + 'static,
{
    let limited = Router::new()
        .route("/weather/limited", get(handlers::limited))
        .route_layer(middleware::from_fn_with_state(
            RateLimitState::new(gate, resolver, LIMITED_OPERATION),
            enforce::<B, I>,
        ));

    Router::new()
        .route("/weather/unlimited", get(handlers::unlimited))
        .route("/health", get(handlers::health))
        .merge(limited)
}

/// HTTP server for the rate-limited API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes to serve
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. Connection
    /// addresses are exposed to handlers so callers can be keyed by IP.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TollgateError::Bind {
                addr: self.addr,
                source: e,
            }
        })?;

        info!(addr = %listener.local_addr()?, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}
