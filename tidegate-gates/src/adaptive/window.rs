//! Self-tuning permit pool for the write path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tidegate_core::{Reservoir, SampleStats};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, info};

use super::config::AdaptiveConfig;
use crate::error::SubmitError;

/// Latency statistics produced by a tuning step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowReport {
    /// Latency sample summary, in milliseconds
    pub stats: SampleStats,
    /// Permit count after the step
    pub permits: usize,
    /// Whether this step added a permit
    pub grew: bool,
}

#[derive(Debug)]
struct TuningState {
    last_adjusted_at: Instant,
    previous_mean: Option<f64>,
    completions: usize,
}

/// Permit count plus the latency sample that drives it.
///
/// The permit count only changes inside [`CongestionWindow::record_completion`],
/// which serializes tuning steps on the `tuning` lock.
#[derive(Debug)]
pub struct CongestionWindow {
    semaphore: Arc<Semaphore>,
    reservoir: Reservoir,
    permits: AtomicUsize,
    max_permits: usize,
    growth_enabled: bool,
    adjust_interval: Duration,
    latency_headroom: f64,
    /// Set when a submit had to wait, cleared by the next evaluation
    saturated: AtomicBool,
    tuning: Mutex<TuningState>,
}

impl CongestionWindow {
    pub fn new(config: &AdaptiveConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.initial_permits)),
            reservoir: Reservoir::new(config.reservoir_capacity),
            permits: AtomicUsize::new(config.initial_permits),
            max_permits: config.max_permits,
            growth_enabled: config.growth_enabled,
            adjust_interval: config.adjust_interval,
            latency_headroom: config.latency_headroom,
            saturated: AtomicBool::new(false),
            tuning: Mutex::new(TuningState {
                last_adjusted_at: Instant::now(),
                previous_mean: None,
                completions: 0,
            }),
        }
    }

    /// Take one permit, waiting if the window is full
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, SubmitError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(SubmitError::ShutDown),
            Err(TryAcquireError::NoPermits) => {}
        }

        self.saturated.store(true, Ordering::Relaxed);
        debug!("Congestion window full, waiting for a permit");
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SubmitError::ShutDown)
    }

    /// Record the latency of a finished unit of work.
    ///
    /// Every `permits` completions this runs a tuning step and returns its
    /// report.
    pub fn record_completion(&self, elapsed: Duration) -> Option<WindowReport> {
        self.reservoir.update(elapsed.as_secs_f64() * 1000.0);

        let mut tuning = self.tuning.lock();
        tuning.completions += 1;
        if tuning.completions < self.permits() {
            return None;
        }
        tuning.completions = 0;

        let stats = self.reservoir.stats()?;
        let grew = self.evaluate_growth(&mut tuning, stats.mean);
        Some(WindowReport {
            stats,
            permits: self.permits(),
            grew,
        })
    }

    /// Additive increase: one permit when the window was saturated and
    /// latency stayed within `latency_headroom` of the previous evaluation.
    fn evaluate_growth(&self, tuning: &mut TuningState, mean: f64) -> bool {
        if tuning.last_adjusted_at.elapsed() < self.adjust_interval {
            return false;
        }
        tuning.last_adjusted_at = Instant::now();

        let saturated = self.saturated.swap(false, Ordering::Relaxed);
        let previous_mean = tuning.previous_mean.replace(mean);
        let latency_ok = previous_mean.map_or(true, |prev| mean <= prev * self.latency_headroom);
        let permits = self.permits();

        if !self.growth_enabled || !saturated || !latency_ok || permits >= self.max_permits {
            debug!(permits, saturated, latency_ok, mean_ms = mean, "Congestion window unchanged");
            return false;
        }

        self.permits.store(permits + 1, Ordering::Release);
        self.semaphore.add_permits(1);
        info!(permits = permits + 1, mean_ms = mean, "Congestion window grew");
        true
    }

    /// Current permit count
    pub fn permits(&self) -> usize {
        self.permits.load(Ordering::Acquire)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held by running work
    pub fn in_flight(&self) -> usize {
        self.permits().saturating_sub(self.available_permits())
    }

    /// Latency summary over the current sample, in milliseconds
    pub fn stats(&self) -> Option<SampleStats> {
        self.reservoir.stats()
    }

    /// Reject further acquires; waiting acquires fail with `ShutDown`
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
