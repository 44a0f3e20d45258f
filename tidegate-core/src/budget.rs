//! Per-query resource budget
//!
//! A [`QueryBudget`] governs one query execution. The executor calls
//! [`QueryBudget::keep_running`] once per unit of work scanned and stops as soon
//! as it returns `false`; shard fetch callbacks report processed points,
//! attempts and failures concurrently.
//!
//! # Stop conditions
//!
//! ```text
//! keep_running() == false once any of:
//!   - elapsed > time_limit_secs          (when time_limit_secs != 0)
//!   - processed > point_limit            (when point_limit != 0)
//!   - failures / attempts > tolerance    (shard failure ratio)
//!   - the bound execution handle was interrupted
//! ```
//!
//! The first condition observed latches its [`BudgetError`]; the cause never
//! changes afterwards.
//!
//! # Example
//!
//! ```rust
//! use tidegate_core::budget::QueryBudget;
//!
//! let budget = QueryBudget::new(100, 0, 0.5);
//! budget.record_processed(100);
//! assert!(budget.keep_running());
//!
//! budget.record_processed(1);
//! assert!(!budget.keep_running());
//! assert!(budget.cause().is_some());
//! ```

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::Cancellable;
use crate::error::{BudgetError, ConfigError};

/// Limits applied to every query execution
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetConfig {
    /// Maximum data points a query may process (0 = unlimited)
    pub point_limit: u64,

    /// Maximum wall-clock seconds a query may run (0 = unlimited)
    pub time_limit_secs: u64,

    /// Fraction of shard fetches allowed to fail before the query is failed (0.0 to 1.0)
    pub failure_tolerance: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            point_limit: 0,
            time_limit_secs: 0,
            failure_tolerance: 0.0,
        }
    }
}

impl BudgetConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TIDEGATE_QUERY_POINT_LIMIT") {
            if let Ok(n) = val.parse() {
                config.point_limit = n;
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_QUERY_TIME_LIMIT_SECS") {
            if let Ok(n) = val.parse() {
                config.time_limit_secs = n;
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_FAILURE_TOLERANCE") {
            if let Ok(n) = val.parse() {
                config.failure_tolerance = n;
            }
        }

        config
    }

    /// Check that the tolerance is a ratio
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.failure_tolerance) {
            return Err(ConfigError::out_of_range(
                "failure_tolerance",
                self.failure_tolerance,
                0.0,
                1.0,
            ));
        }
        Ok(())
    }

    /// Start a budget for a new query execution
    pub fn start(&self) -> QueryBudget {
        QueryBudget::new(self.point_limit, self.time_limit_secs, self.failure_tolerance)
    }
}

/// Resource governor for a single query execution
pub struct QueryBudget {
    point_limit: u64,
    time_limit_secs: u64,
    tolerance: f64,
    started_at: Instant,

    processed: AtomicU64,
    attempts: AtomicU64,
    failures: AtomicU64,

    running: AtomicBool,
    cause: OnceLock<BudgetError>,
    interrupt: Option<Arc<dyn Cancellable>>,
}

impl QueryBudget {
    /// Start a budget. Limits of 0 are unlimited; `tolerance` is the failure
    /// ratio above which the query stops.
    pub fn new(point_limit: u64, time_limit_secs: u64, tolerance: f64) -> Self {
        Self {
            point_limit,
            time_limit_secs,
            tolerance,
            started_at: Instant::now(),
            processed: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            running: AtomicBool::new(true),
            cause: OnceLock::new(),
            interrupt: None,
        }
    }

    /// Stop the budget when `handle` is interrupted
    pub fn with_interrupt(mut self, handle: Arc<dyn Cancellable>) -> Self {
        self.interrupt = Some(handle);
        self
    }

    /// Add `n` processed data points
    #[inline]
    pub fn record_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    /// Whether the query may keep scanning.
    ///
    /// Once this returns `false` it returns `false` forever.
    pub fn keep_running(&self) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }

        if let Some(handle) = &self.interrupt {
            if handle.is_interrupted() {
                self.latch(BudgetError::Interrupted);
                return false;
            }
        }

        if self.time_limit_secs != 0
            && self.started_at.elapsed() > Duration::from_secs(self.time_limit_secs)
        {
            self.latch(BudgetError::TimeLimit {
                limit_secs: self.time_limit_secs,
            });
            return false;
        }

        if self.point_limit != 0 && self.processed.load(Ordering::Relaxed) > self.point_limit {
            self.latch(BudgetError::PointLimit {
                limit: self.point_limit,
            });
            return false;
        }

        true
    }

    /// Record the start of a fetch against one shard
    #[inline]
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a failed shard fetch.
    ///
    /// Callers record the attempt first. A failure reported before any
    /// attempt counts with a ratio of zero so the query continues.
    pub fn record_failure(&self, cause: impl Display) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        let attempts = self.attempts.load(Ordering::Acquire);

        if attempts == 0 {
            warn!(
                failures,
                error = %cause,
                "Shard failure recorded before any attempt, treating failure ratio as zero"
            );
            return;
        }

        let ratio = failures as f64 / attempts as f64;
        if ratio > self.tolerance {
            self.latch(BudgetError::shard_failures(failures, attempts, cause.to_string()));
        } else {
            warn!(
                failures,
                attempts,
                tolerance = self.tolerance,
                error = %cause,
                "Shard fetch failed, failure tolerance not reached, continuing"
            );
        }
    }

    /// The latched terminal cause, if any
    pub fn cause(&self) -> Option<BudgetError> {
        self.cause.get().cloned()
    }

    /// The latched cause as a `Result`, for `?` in executors
    pub fn check(&self) -> Result<(), BudgetError> {
        match self.cause.get() {
            Some(cause) => Err(cause.clone()),
            None => Ok(()),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn latch(&self, cause: BudgetError) {
        if self.cause.set(cause).is_ok() {
            debug!(
                processed = self.processed(),
                elapsed_ms = self.elapsed().as_millis() as u64,
                cause = ?self.cause.get(),
                "Query budget exhausted"
            );
        }
        self.running.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for QueryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBudget")
            .field("point_limit", &self.point_limit)
            .field("time_limit_secs", &self.time_limit_secs)
            .field("tolerance", &self.tolerance)
            .field("processed", &self.processed())
            .field("attempts", &self.attempts())
            .field("failures", &self.failures())
            .field("cause", &self.cause.get())
            .finish()
    }
}
