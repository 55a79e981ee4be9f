//! Tollgate - Sliding-Window Request Admission Control
//!
//! This crate decides, per caller, whether an API request may proceed or must
//! be rejected because the caller exceeded its request rate. Request timestamps
//! are tracked per caller in an expiring window store; a decision gate wraps
//! protected operations and reports the remaining quota back to callers.

pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod ratelimit;
