//! Metric reporting for the gates
//!
//! A reporting task polls every [`MetricReporter`] once per tick and forwards
//! the samples to a [`MetricSink`].

pub mod prometheus;

use std::sync::Arc;
use std::time::Duration;

use tidegate_core::metrics::now_millis;
use tidegate_core::{MetricReporter, MetricSink};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use self::prometheus::PrometheusSink;

/// Poll `reporters` into `sink` every `interval` until `cancel` fires.
///
/// # Panics
/// Panics if `interval` is zero.
pub fn spawn_reporting(
    reporters: Vec<Arc<dyn MetricReporter>>,
    sink: Arc<dyn MetricSink>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Metric reporting stopped");
                    break;
                }
                _ = ticker.tick() => {
                    report_tick(&reporters, sink.as_ref(), now_millis());
                }
            }
        }
    })
}

/// Forward one tick of samples; returns how many sets were published
pub fn report_tick(
    reporters: &[Arc<dyn MetricReporter>],
    sink: &dyn MetricSink,
    now_ms: i64,
) -> usize {
    let mut published = 0;
    for reporter in reporters {
        for set in reporter.metrics(now_ms) {
            sink.publish(set);
            published += 1;
        }
    }
    debug!(published, "Reported metrics");
    published
}
