//! Limit definitions and per-operation resolution.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Default number of requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 60;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

// Slack for decimal fractions like 0.1 that f64 cannot represent exactly.
const SUBMILLI_TOLERANCE: f64 = 1e-6;
// Upper bound keeping millisecond arithmetic inside u64.
const MAX_WINDOW_MILLIS: f64 = u64::MAX as f64;

/// A validated limit: at most `max_requests` within any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    max_requests: u32,
    window: Duration,
}

impl LimitConfig {
    /// Create a limit.
    ///
    /// Windows are tracked at millisecond resolution, so the window must be at
    /// least one millisecond and a whole number of milliseconds.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        if window < Duration::from_millis(1) {
            return Err(TollgateError::Config(format!(
                "window must be positive, got {:?}",
                window
            )));
        }
        if window.subsec_nanos() % 1_000_000 != 0 {
            return Err(TollgateError::Config(format!(
                "window must be a whole number of milliseconds, got {:?}",
                window
            )));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    /// Create a limit from a window length in (possibly fractional) seconds.
    pub fn from_secs_f64(max_requests: u32, window_seconds: f64) -> Result<Self> {
        if !window_seconds.is_finite() || window_seconds <= 0.0 {
            return Err(TollgateError::Config(format!(
                "window_seconds must be a positive number, got {}",
                window_seconds
            )));
        }
        let millis = window_seconds * 1000.0;
        let whole = millis.round();
        if (millis - whole).abs() > SUBMILLI_TOLERANCE {
            return Err(TollgateError::Config(format!(
                "window_seconds must be a whole number of milliseconds, got {}",
                window_seconds
            )));
        }
        if whole >= MAX_WINDOW_MILLIS {
            return Err(TollgateError::Config(format!(
                "window_seconds is too large, got {}",
                window_seconds
            )));
        }
        Self::new(max_requests, Duration::from_millis(whole as u64))
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

/// The process-wide default limit plus named per-operation overrides.
#[derive(Debug, Clone, Default)]
pub struct LimitTable {
    default: LimitConfig,
    overrides: HashMap<String, LimitConfig>,
}

impl LimitTable {
    /// Create a table where every operation uses `default`.
    pub fn new(default: LimitConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Add or replace the limit for one operation.
    pub fn with_override(mut self, operation: impl Into<String>, limit: LimitConfig) -> Self {
        self.overrides.insert(operation.into(), limit);
        self
    }

    /// The limit applying to `operation`; an override wins over the default.
    pub fn resolve(&self, operation: &str) -> &LimitConfig {
        self.overrides.get(operation).unwrap_or(&self.default)
    }

    pub fn default_limit(&self) -> &LimitConfig {
        &self.default
    }

    /// Names of operations with their own limit.
    pub fn overridden_operations(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }
}
