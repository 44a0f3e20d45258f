//! Prometheus rendering of gate metrics
//!
//! Every metric sample becomes a gauge in an instance-owned registry, labelled
//! by the sample's tags.

use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus::{GaugeVec, Opts, Registry, TextEncoder};
use tidegate_core::{DataPointSet, MetricSink};
use tracing::warn;

/// Metric sink exposing the latest value of every sample as a gauge
pub struct PrometheusSink {
    registry: Registry,
    gauges: Mutex<HashMap<String, GaugeVec>>,
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Set the gauge for `set` to its latest value, registering it on first use
    pub fn record(&self, set: &DataPointSet) -> prometheus::Result<()> {
        let Some(value) = set.latest() else {
            return Ok(());
        };

        let name = sanitize_name(&set.name);
        let mut gauges = self.gauges.lock();
        let gauge = match gauges.get(&name) {
            Some(gauge) => gauge.clone(),
            None => {
                let labels: Vec<String> = set.tags.keys().map(|k| sanitize_name(k)).collect();
                let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
                let gauge = GaugeVec::new(
                    Opts::new(name.clone(), format!("Gate metric {}", set.name)),
                    &label_refs,
                )?;
                self.registry.register(Box::new(gauge.clone()))?;
                gauges.insert(name, gauge.clone());
                gauge
            }
        };
        drop(gauges);

        let values: Vec<&str> = set.tags.values().map(String::as_str).collect();
        gauge.get_metric_with_label_values(&values)?.set(value);
        Ok(())
    }

    /// Encode all gauges to Prometheus text format
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink for PrometheusSink {
    fn publish(&self, set: DataPointSet) {
        if let Err(e) = self.record(&set) {
            warn!(metric = %set.name, error = %e, "Failed to record metric");
        }
    }
}

/// Map a dotted metric name onto the Prometheus name alphabet
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
