//! Admission control around protected operations.
//!
//! The gate ties identity resolution to the sliding-window limiter and turns
//! the outcome into a typed result: the operation's output plus quota headers,
//! or a [`GateError`] describing why it was refused.

mod decision;
mod identity;

pub use decision::{Admission, DecisionGate, GateError, Guarded, Protected, RateLimitHeaders};
pub use identity::{Identity, IdentityResolver};
