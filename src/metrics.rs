//! Operational counters for the core runtime.
//!
//! Not part of the component contracts in spec §4, but required by spec §7's
//! "logged with structured context" and §4.8's "operators detect via the
//! skipped metric" — the signals every component's failure policy promises.
//! Shape follows the teacher's metrics surface (one atomic counter per
//! event, a `snapshot()` that reads them into a serializable struct).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared, cheaply-cloneable counter set. One `Metrics` is typically owned
/// by the runtime composition root and handed (by reference) to every
/// component.
#[derive(Default)]
pub struct Metrics {
    leaves_dropped_published: AtomicU64,
    leaves_dropped_failed: AtomicU64,
    leaves_dropped_undeserializable: AtomicU64,
    leaves_handler_errors: AtomicU64,
    river_flows: AtomicU64,
    river_redeliveries: AtomicU64,
    humus_composts: AtomicU64,
    soil_cas_conflicts: AtomicU64,
    decomposer_applied: AtomicU64,
    decomposer_skipped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_leaf_published(&self) {
        self.leaves_dropped_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_leaf_publish_failed(&self) {
        self.leaves_dropped_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A Leaf received on Wind failed to deserialize and was dropped before
    /// reaching any handler (spec §4.2: "counted and dropped").
    pub fn record_leaf_undeserializable(&self) {
        self.leaves_dropped_undeserializable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.leaves_handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_river_flow(&self) {
        self.river_flows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_river_redelivery(&self) {
        self.river_redeliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_humus_compost(&self) {
        self.humus_composts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soil_cas_conflict(&self) {
        self.soil_cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decomposer_applied(&self) {
        self.decomposer_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decomposer_skipped(&self) {
        self.decomposer_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            leaves_published: self.leaves_dropped_published.load(Ordering::Relaxed),
            leaves_publish_failed: self.leaves_dropped_failed.load(Ordering::Relaxed),
            leaves_undeserializable: self.leaves_dropped_undeserializable.load(Ordering::Relaxed),
            leaves_handler_errors: self.leaves_handler_errors.load(Ordering::Relaxed),
            river_flows: self.river_flows.load(Ordering::Relaxed),
            river_redeliveries: self.river_redeliveries.load(Ordering::Relaxed),
            humus_composts: self.humus_composts.load(Ordering::Relaxed),
            soil_cas_conflicts: self.soil_cas_conflicts.load(Ordering::Relaxed),
            decomposer_applied: self.decomposer_applied.load(Ordering::Relaxed),
            decomposer_skipped: self.decomposer_skipped.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.leaves_dropped_published.store(0, Ordering::Relaxed);
        self.leaves_dropped_failed.store(0, Ordering::Relaxed);
        self.leaves_dropped_undeserializable.store(0, Ordering::Relaxed);
        self.leaves_handler_errors.store(0, Ordering::Relaxed);
        self.river_flows.store(0, Ordering::Relaxed);
        self.river_redeliveries.store(0, Ordering::Relaxed);
        self.humus_composts.store(0, Ordering::Relaxed);
        self.soil_cas_conflicts.store(0, Ordering::Relaxed);
        self.decomposer_applied.store(0, Ordering::Relaxed);
        self.decomposer_skipped.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of `Metrics`, serialized camelCase for wire
/// compatibility with the rest of the crate's types.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub leaves_published: u64,
    pub leaves_publish_failed: u64,
    pub leaves_undeserializable: u64,
    pub leaves_handler_errors: u64,
    pub river_flows: u64,
    pub river_redeliveries: u64,
    pub humus_composts: u64,
    pub soil_cas_conflicts: u64,
    pub decomposer_applied: u64,
    pub decomposer_skipped: u64,
}
