//! Replication statistics.
//!
//! Counters are kept per engine and survive fallback switches, but not a
//! process restart.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = engine.stats().snapshot();
//! println!("applied: {}", stats.applied);
//! println!("deferred: {}", stats.deferred);
//! ```

use crate::applier::ApplyOutcome;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Replication counters.
#[derive(Debug, Default)]
pub struct ReplicationStats {
    applied: AtomicU64,
    reconciled: AtomicU64,
    skipped: AtomicU64,
    deferred: AtomicU64,
    schema_updates: AtomicU64,
    replayed: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ReplicationStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_outcome(&self, outcome: ApplyOutcome) {
        let counter = match outcome {
            ApplyOutcome::Applied => &self.applied,
            ApplyOutcome::Reconciled => &self.reconciled,
            ApplyOutcome::SkippedFatal => &self.skipped,
            ApplyOutcome::Deferred => &self.deferred,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_schema_update(&self) {
        self.schema_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self, records: u64) {
        self.replayed.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, error: &dyn std::fmt::Display) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.to_string());
    }

    /// Notifications applied live.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Notifications converged after a conflict.
    pub fn reconciled(&self) -> u64 {
        self.reconciled.load(Ordering::Relaxed)
    }

    /// Notifications dropped after a schema violation.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Notifications captured or waiting for a rename's second half.
    pub fn deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    /// Schema files written.
    pub fn schema_updates(&self) -> u64 {
        self.schema_updates.load(Ordering::Relaxed)
    }

    /// Capture records replayed.
    pub fn replayed(&self) -> u64 {
        self.replayed.load(Ordering::Relaxed)
    }

    /// Hard errors returned to the caller.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Message of the most recent hard error.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            applied: self.applied(),
            reconciled: self.reconciled(),
            skipped: self.skipped(),
            deferred: self.deferred(),
            schema_updates: self.schema_updates(),
            replayed: self.replayed(),
            errors: self.errors(),
            last_error: self.last_error(),
        }
    }
}

/// Point-in-time copy of [`ReplicationStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Notifications applied live.
    pub applied: u64,
    /// Notifications converged after a conflict.
    pub reconciled: u64,
    /// Notifications dropped after a schema violation.
    pub skipped: u64,
    /// Notifications captured or deferred.
    pub deferred: u64,
    /// Schema files written.
    pub schema_updates: u64,
    /// Capture records replayed.
    pub replayed: u64,
    /// Hard errors.
    pub errors: u64,
    /// Most recent hard error.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(ReplicationStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn outcomes_land_in_their_counter() {
        let stats = ReplicationStats::new();
        stats.record_outcome(ApplyOutcome::Applied);
        stats.record_outcome(ApplyOutcome::Applied);
        stats.record_outcome(ApplyOutcome::Reconciled);
        stats.record_outcome(ApplyOutcome::SkippedFatal);
        stats.record_outcome(ApplyOutcome::Deferred);
        stats.record_schema_update();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.applied, 2);
        assert_eq!(snapshot.reconciled, 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.deferred, 1);
        assert_eq!(snapshot.schema_updates, 1);
    }

    #[test]
    fn last_error_is_kept() {
        let stats = ReplicationStats::new();
        stats.record_error(&"first");
        stats.record_error(&"second");
        assert_eq!(stats.errors(), 2);
        assert_eq!(stats.last_error().as_deref(), Some("second"));
    }
}
