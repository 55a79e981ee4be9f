//! Caller identity resolution.

use std::fmt;

/// Who is making a request, as far as rate limiting is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Authenticated or otherwise trusted; never rate limited
    Exempt,
    /// Anonymous caller scoped by an opaque key, usually its network address
    Key(String),
    /// Anonymous caller for which no key could be derived
    Unresolvable,
}

impl Identity {
    /// Build a keyed identity.
    pub fn key(key: impl Into<String>) -> Self {
        Identity::Key(key.into())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Exempt => write!(f, "exempt"),
            Identity::Key(key) => write!(f, "key:{}", key),
            Identity::Unresolvable => write!(f, "unresolvable"),
        }
    }
}

/// Derives an [`Identity`] from a request of type `R`.
pub trait IdentityResolver<R: ?Sized>: Send + Sync {
    fn resolve(&self, request: &R) -> Identity;
}

impl<R, F> IdentityResolver<R> for F
where
    R: ?Sized,
    F: Fn(&R) -> Identity + Send + Sync,
{
    fn resolve(&self, request: &R) -> Identity {
        self(request)
    }
}
