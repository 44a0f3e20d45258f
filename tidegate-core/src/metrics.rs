//! Metric samples exchanged with the reporting layer.
//!
//! Components implement [`MetricReporter`] and are polled once per reporting
//! tick. Components that produce samples on their own schedule push them into
//! a [`MetricSink`].

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

/// A single timestamped value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DataPoint {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub value: f64,
}

/// A named, tagged series of data points
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPointSet {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub points: Vec<DataPoint>,
}

impl DataPointSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            points: Vec::new(),
        }
    }

    /// Add a tag, replacing any previous value for `key`
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Append a data point
    pub fn with_point(mut self, timestamp_ms: i64, value: f64) -> Self {
        self.points.push(DataPoint {
            timestamp_ms,
            value,
        });
        self
    }

    /// Most recent value in the set
    pub fn latest(&self) -> Option<f64> {
        self.points.last().map(|p| p.value)
    }
}

/// A component polled for metrics on every reporting tick
pub trait MetricReporter: Send + Sync {
    /// Collect this tick's samples. Counters that reset on read are reset here.
    fn metrics(&self, now_ms: i64) -> Vec<DataPointSet>;
}

/// Destination for pushed metric samples
pub trait MetricSink: Send + Sync {
    fn publish(&self, set: DataPointSet);
}

/// Sink that keeps samples in memory until drained
#[derive(Debug, Default)]
pub struct MemorySink {
    sets: Mutex<Vec<DataPointSet>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every sample published so far
    pub fn drain(&self) -> Vec<DataPointSet> {
        std::mem::take(&mut *self.sets.lock())
    }

    /// Samples published under `name`, oldest first
    pub fn named(&self, name: &str) -> Vec<DataPointSet> {
        self.sets
            .lock()
            .iter()
            .filter(|set| set.name == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.lock().is_empty()
    }
}

impl MetricSink for MemorySink {
    fn publish(&self, set: DataPointSet) {
        self.sets.lock().push(set);
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
