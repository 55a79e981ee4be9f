//! HTTP surface: identity extraction, gate middleware and the service routes.

mod handlers;
mod identity;
mod middleware;
mod server;

pub use identity::HttpIdentityResolver;
pub use middleware::{enforce, RateLimitState, CURRENT_RATE_LIMIT, REMAINING_CALLS};
pub use server::{router, HttpServer, LIMITED_OPERATION};
