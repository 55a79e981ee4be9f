//! Caller identity for HTTP requests.

use axum::extract::{ConnectInfo, Request};
use axum::http::{header, HeaderMap};
use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::IdentityConfig;
use crate::gate::{Identity, IdentityResolver};

/// Resolves HTTP callers by bearer token and client address.
///
/// A bearer token from the configured exempt set marks the caller as
/// authenticated. Everyone else is keyed by IP address: the connection address
/// by default, or the proxy headers when `trust_proxy` is enabled. Proxy
/// headers are spoofable unless the proxy overwrites them.
#[derive(Debug, Clone, Default)]
pub struct HttpIdentityResolver {
    trust_proxy: bool,
    exempt_tokens: HashSet<String>,
}

impl HttpIdentityResolver {
    pub fn new(trust_proxy: bool, exempt_tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            trust_proxy,
            exempt_tokens: exempt_tokens.into_iter().collect(),
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(config.trust_proxy, config.exempt_tokens.iter().cloned())
    }

    fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| self.exempt_tokens.contains(token.trim()))
            .unwrap_or(false)
    }

    fn client_ip(&self, request: &Request) -> Option<String> {
        let connected = || {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };

        if !self.trust_proxy {
            return connected();
        }

        let headers = request.headers();
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            // "client, proxy1, proxy2": the leftmost entry is the original client
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
            })
            .or_else(connected)
    }
}

impl IdentityResolver<Request> for HttpIdentityResolver {
    fn resolve(&self, request: &Request) -> Identity {
        if self.is_authenticated(request.headers()) {
            return Identity::Exempt;
        }
        match self.client_ip(request) {
            Some(ip) => Identity::Key(ip),
            None => Identity::Unresolvable,
        }
    }
}
