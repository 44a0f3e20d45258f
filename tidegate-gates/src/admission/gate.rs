//! Fair permit gate with duplicate-query suppression.
//!
//! Admission takes a permit from a FIFO semaphore and then, under the registry
//! lock, claims the query's fingerprint. A caller that finds its fingerprint
//! already running hands the permit back before releasing the lock and polls
//! again after `collision_retry_delay`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tidegate_core::{Cancellable, ConfigError, DataPointSet, MetricReporter};
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tracing::{debug, info, instrument};

use super::config::AdmissionConfig;
use super::metrics::AdmissionMetrics;
use crate::error::AdmissionError;

/// Collision count emitted once per reporting tick
pub const QUERY_COLLISIONS_METRIC: &str = "tidegate.datastore.query_collisions";

/// A query holding a permit
struct RunningEntry<M> {
    descriptor: M,
    handle: Arc<dyn Cancellable>,
    admitted_at: Instant,
}

/// Snapshot of one running query
#[derive(Debug, Clone)]
pub struct RunningQuery<M> {
    pub fingerprint: String,
    pub descriptor: M,
    pub running_for: Duration,
}

enum Attempt<M> {
    Admitted,
    Conflict(M),
}

/// Counting gate bounding concurrent queries, at most one per fingerprint
pub struct PermitGate<M> {
    config: AdmissionConfig,
    /// FIFO-fair permits; admitted queries hold theirs until `release`
    semaphore: Semaphore,
    /// Registry of running queries, keyed by fingerprint
    running: Mutex<HashMap<String, RunningEntry<M>>>,
    /// Callers parked on the semaphore
    waiting: AtomicUsize,
    metrics: AdmissionMetrics,
}

impl<M> PermitGate<M> {
    /// Create a gate with `config.max_concurrent_queries` permits
    pub fn new(config: AdmissionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            semaphore: Semaphore::new(config.max_concurrent_queries),
            running: Mutex::new(HashMap::new()),
            waiting: AtomicUsize::new(0),
            metrics: AdmissionMetrics::new(),
            config,
        })
    }

    /// Wait until the query may run.
    ///
    /// Returns once a permit is held and `fingerprint` is registered to this
    /// caller. The caller must call [`PermitGate::release`] exactly once
    /// afterwards, whatever the outcome of the query.
    #[instrument(skip(self, descriptor, handle))]
    pub async fn acquire(
        &self,
        fingerprint: &str,
        descriptor: M,
        handle: Arc<dyn Cancellable>,
    ) -> Result<(), AdmissionError> {
        let started = Instant::now();
        let mut descriptor = descriptor;
        let mut collided = false;

        loop {
            match self.try_admit(fingerprint, descriptor, &handle).await? {
                Attempt::Admitted => {
                    let wait_time = started.elapsed();
                    self.metrics.record_admitted(wait_time);
                    debug!(wait_ms = wait_time.as_millis() as u64, "Query admitted");
                    return Ok(());
                }
                Attempt::Conflict(returned) => {
                    descriptor = returned;
                    if !collided {
                        collided = true;
                        self.metrics.record_collision();
                        debug!("Identical query already running, waiting for it to finish");
                    }
                    tokio::time::sleep(self.config.collision_retry_delay).await;
                }
            }
        }
    }

    /// [`PermitGate::acquire`] returning a guard that releases on drop
    pub async fn admit(
        self: &Arc<Self>,
        fingerprint: impl Into<String>,
        descriptor: M,
        handle: Arc<dyn Cancellable>,
    ) -> Result<Admission<M>, AdmissionError> {
        let fingerprint = fingerprint.into();
        self.acquire(&fingerprint, descriptor, handle).await?;
        Ok(Admission {
            gate: Arc::clone(self),
            fingerprint,
            released: false,
        })
    }

    async fn try_admit(
        &self,
        fingerprint: &str,
        descriptor: M,
        handle: &Arc<dyn Cancellable>,
    ) -> Result<Attempt<M>, AdmissionError> {
        let permit = self.wait_for_permit().await?;

        let mut running = self.running.lock();
        if running.contains_key(fingerprint) {
            // Handed back under the lock so nobody observes it taken
            drop(permit);
            return Ok(Attempt::Conflict(descriptor));
        }

        running.insert(
            fingerprint.to_string(),
            RunningEntry {
                descriptor,
                handle: Arc::clone(handle),
                admitted_at: Instant::now(),
            },
        );
        permit.forget();
        Ok(Attempt::Admitted)
    }

    async fn wait_for_permit(&self) -> Result<SemaphorePermit<'_>, AdmissionError> {
        match self.semaphore.try_acquire() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(AdmissionError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = WaitingGuard::enter(&self.waiting);
        self.semaphore
            .acquire()
            .await
            .map_err(|_| AdmissionError::Closed)
    }

    /// Unregister `fingerprint` and return one permit.
    ///
    /// The permit is returned even when no entry is registered: permit
    /// accounting belongs to the caller's successful acquire.
    pub fn release(&self, fingerprint: &str) {
        let removed = {
            let mut running = self.running.lock();
            let removed = running.remove(fingerprint);
            self.semaphore.add_permits(1);
            removed
        };
        self.metrics.record_released();

        match removed {
            Some(entry) => debug!(
                fingerprint,
                held_ms = entry.admitted_at.elapsed().as_millis() as u64,
                "Query released"
            ),
            None => debug!(fingerprint, "Released a query that was not registered"),
        }
    }

    /// Snapshot of every running query
    pub fn list(&self) -> Vec<RunningQuery<M>>
    where
        M: Clone,
    {
        let running = self.running.lock();
        running
            .iter()
            .map(|(fingerprint, entry)| RunningQuery {
                fingerprint: fingerprint.clone(),
                descriptor: entry.descriptor.clone(),
                running_for: entry.admitted_at.elapsed(),
            })
            .collect()
    }

    /// Interrupt the execution holding `fingerprint`.
    ///
    /// The entry and its permit stay in place until the interrupted execution
    /// calls `release`. Returns whether a running query was signalled.
    pub fn kill(&self, fingerprint: &str) -> bool {
        // Interrupt outside the lock; the handle may release synchronously
        let handle = match self.running.lock().get(fingerprint) {
            Some(entry) => Arc::clone(&entry.handle),
            None => return false,
        };

        handle.interrupt();
        self.metrics.record_killed();
        info!(fingerprint, "Interrupted running query");
        true
    }

    /// Stop admitting. Waiting and future callers get [`AdmissionError::Closed`].
    pub fn close(&self) {
        self.semaphore.close();
        info!("Admission gate closed");
    }

    /// Number of callers waiting for a permit
    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Permits currently free
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured permit capacity
    pub fn capacity(&self) -> usize {
        self.config.max_concurrent_queries
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_running(&self, fingerprint: &str) -> bool {
        self.running.lock().contains_key(fingerprint)
    }

    /// Admission counters
    pub fn counters(&self) -> &AdmissionMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}

impl<M: Send> MetricReporter for PermitGate<M> {
    fn metrics(&self, now_ms: i64) -> Vec<DataPointSet> {
        let collisions = self.metrics.take_collisions();
        vec![DataPointSet::new(QUERY_COLLISIONS_METRIC)
            .with_tag("host", &self.config.hostname)
            .with_point(now_ms, collisions as f64)]
    }
}

/// Counts a caller as waiting until dropped, including when its acquire
/// future is cancelled
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An admitted query. Releases its fingerprint and permit when dropped.
#[must_use = "dropping an admission releases it immediately"]
pub struct Admission<M> {
    gate: Arc<PermitGate<M>>,
    fingerprint: String,
    released: bool,
}

impl<M> Admission<M> {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Release now instead of at drop
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.gate.release(&self.fingerprint);
        }
    }
}

impl<M> Drop for Admission<M> {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl<M> std::fmt::Debug for Admission<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("fingerprint", &self.fingerprint)
            .field("released", &self.released)
            .finish()
    }
}
