//! Per-caller request history.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::clock::Timestamp;

/// The request timestamps recorded for one caller key, newest first.
///
/// Duplicates are valid: two requests landing in the same millisecond are
/// both counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    entries: Vec<Timestamp>,
}

impl Window {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a window from timestamps already ordered newest first.
    pub fn from_entries(entries: Vec<Timestamp>) -> Self {
        Self { entries }
    }

    /// Number of recorded requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The recorded timestamps, newest first.
    pub fn entries(&self) -> &[Timestamp] {
        &self.entries
    }

    /// The oldest timestamp still held, if any.
    pub fn oldest(&self) -> Option<Timestamp> {
        self.entries.iter().copied().min()
    }

    /// Drop every entry whose age at `now` is at least `span`.
    ///
    /// An entry exactly `span` old is outside the window. Entries stamped after
    /// `now` (clock skew between writers) have age zero and are kept.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, now: Timestamp, span: Duration) -> usize {
        let span_ms = u64::try_from(span.as_millis()).unwrap_or(u64::MAX);
        let before = self.entries.len();
        self.entries.retain(|&t| now.saturating_sub(t) < span_ms);
        before - self.entries.len()
    }

    /// Record a request at `now` as the newest entry.
    pub fn record(&mut self, now: Timestamp) {
        self.entries.insert(0, now);
    }
}
