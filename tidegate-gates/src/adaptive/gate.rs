//! Adaptive gate dispatching write work through the congestion window.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tidegate_core::metrics::now_millis;
use tidegate_core::{ConfigError, DataPointSet, MetricReporter, MetricSink, SampleStats};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::config::AdaptiveConfig;
use super::retry::{retry_transient, FibonacciBackoff, Retryable};
use super::window::{CongestionWindow, WindowReport};
use crate::error::SubmitError;

pub const CONGESTION_MIN_METRIC: &str = "tidegate.congestion.stats.min";
pub const CONGESTION_MAX_METRIC: &str = "tidegate.congestion.stats.max";
pub const CONGESTION_AVG_METRIC: &str = "tidegate.congestion.stats.avg";
pub const PERMIT_COUNT_METRIC: &str = "tidegate.congestion.stats.permit_count";

/// Self-tuning executor for write batches.
///
/// Each submitted unit of work holds one window permit from dispatch until it
/// reaches a terminal state. Transient faults are retried inside that span.
pub struct AdaptiveGate {
    config: AdaptiveConfig,
    window: Arc<CongestionWindow>,
    tracker: TaskTracker,
    sink: Option<Arc<dyn MetricSink>>,
}

impl AdaptiveGate {
    pub fn new(config: AdaptiveConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            window: Arc::new(CongestionWindow::new(&config)),
            tracker: TaskTracker::new(),
            sink: None,
            config,
        })
    }

    /// Publish tuning-step statistics to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Wait for a permit, then run `work` in the background.
    ///
    /// `work` is called again after each transient failure. The returned
    /// handle resolves to the terminal result.
    #[instrument(skip_all)]
    pub async fn submit<F, Fut, T, E>(
        &self,
        work: F,
    ) -> Result<JoinHandle<Result<T, E>>, SubmitError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Retryable + Display + Send + 'static,
    {
        // Keeps `shutdown` waiting between permit grant and spawn
        let _pending = self.tracker.token();
        let permit = self.window.acquire().await?;
        debug!(in_flight = self.window.in_flight(), "Write dispatched");

        let window = Arc::clone(&self.window);
        let sink = self.sink.clone();
        let hostname = self.config.hostname.clone();
        let backoff = FibonacciBackoff::new(self.config.retry_base, self.config.retry_max_wait);

        Ok(self.tracker.spawn(async move {
            let started = Instant::now();
            let outcome = retry_transient(work, backoff).await;
            let report = window.record_completion(started.elapsed());
            drop(permit);

            if let Err(err) = &outcome.result {
                warn!(error = %err, retries = outcome.retries, "Write failed");
            }
            if let (Some(report), Some(sink)) = (report, sink) {
                publish_report(sink.as_ref(), &hostname, &report, now_millis());
            }
            outcome.result
        }))
    }

    /// Stop accepting work and wait for everything in flight to finish
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.window.close();
        info!(in_flight = self.tracker.len(), "Adaptive gate shutting down");
        self.tracker.wait().await;
    }

    /// Current congestion window size
    pub fn permits(&self) -> usize {
        self.window.permits()
    }

    pub fn available_permits(&self) -> usize {
        self.window.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.window.in_flight()
    }

    /// Latency summary in milliseconds, `None` before the first completion
    pub fn latency_stats(&self) -> Option<SampleStats> {
        self.window.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.window.is_closed()
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }
}

impl MetricReporter for AdaptiveGate {
    fn metrics(&self, now_ms: i64) -> Vec<DataPointSet> {
        congestion_sets(&self.config.hostname, self.latency_stats(), self.permits(), now_ms)
    }
}

fn publish_report(sink: &dyn MetricSink, hostname: &str, report: &WindowReport, now_ms: i64) {
    for set in congestion_sets(hostname, Some(report.stats), report.permits, now_ms) {
        sink.publish(set);
    }
}

fn congestion_sets(
    hostname: &str,
    stats: Option<SampleStats>,
    permits: usize,
    now_ms: i64,
) -> Vec<DataPointSet> {
    let sample = |name: &str, value: f64| {
        DataPointSet::new(name)
            .with_tag("host", hostname)
            .with_point(now_ms, value)
    };

    let mut sets = Vec::with_capacity(4);
    if let Some(stats) = stats {
        sets.push(sample(CONGESTION_MIN_METRIC, stats.min));
        sets.push(sample(CONGESTION_MAX_METRIC, stats.max));
        sets.push(sample(CONGESTION_AVG_METRIC, stats.mean));
    }
    sets.push(sample(PERMIT_COUNT_METRIC, permits as f64));
    sets
}
