//! Metrics for the query permit gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for monitoring query admission
#[derive(Debug, Default)]
pub struct AdmissionMetrics {
    /// Attempts that found a live conflict since the last report (reset on read)
    collisions: AtomicU64,

    /// Total attempts that found a live conflict
    pub collisions_total: AtomicU64,

    /// Total queries admitted
    pub admitted: AtomicU64,

    /// Total releases
    pub released: AtomicU64,

    /// Total interrupts delivered to running queries
    pub killed: AtomicU64,

    /// Total time spent waiting for admission in milliseconds (for averaging)
    pub total_wait_ms: AtomicU64,
}

impl AdmissionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquire call that observed a fingerprint conflict
    pub fn record_collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
        self.collisions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful admission and how long it waited
    pub fn record_admitted(&self, wait_time: Duration) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms
            .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_killed(&self) {
        self.killed.fetch_add(1, Ordering::Relaxed);
    }

    /// Collisions since the last call; resets the counter to zero
    pub fn take_collisions(&self) -> u64 {
        self.collisions.swap(0, Ordering::Relaxed)
    }

    /// Collisions since the last report, without resetting
    pub fn pending_collisions(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }

    /// Average admission wait in milliseconds
    pub fn avg_wait_ms(&self) -> f64 {
        let admitted = self.admitted.load(Ordering::Relaxed);
        if admitted == 0 {
            return 0.0;
        }
        self.total_wait_ms.load(Ordering::Relaxed) as f64 / admitted as f64
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            collisions_total: self.collisions_total.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
            avg_wait_ms: self.avg_wait_ms(),
        }
    }
}

/// Snapshot of admission metrics at a point in time
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdmissionSnapshot {
    pub collisions_total: u64,
    pub admitted: u64,
    pub released: u64,
    pub killed: u64,
    pub avg_wait_ms: f64,
}
