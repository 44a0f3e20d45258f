//! Gate wiring shared by the query and write paths.

use std::sync::Arc;
use std::time::Duration;

use tidegate_core::metrics::now_millis;
use tidegate_core::{BudgetConfig, Cancellable, ConfigError, MetricReporter, QueryBudget};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::adaptive::{AdaptiveConfig, AdaptiveGate};
use crate::admin::AdminSurface;
use crate::admission::{Admission, AdmissionConfig, PermitGate};
use crate::error::GateError;
use crate::fingerprint::Fingerprint;
use crate::metrics::{report_tick, spawn_reporting, PrometheusSink};

/// Configuration for every gate
#[derive(Debug, Clone, PartialEq)]
pub struct TidegateConfig {
    pub admission: AdmissionConfig,
    pub budget: BudgetConfig,
    pub adaptive: AdaptiveConfig,

    /// How often reporters are polled
    pub reporting_interval: Duration,
}

impl Default for TidegateConfig {
    fn default() -> Self {
        Self {
            admission: AdmissionConfig::default(),
            budget: BudgetConfig::default(),
            adaptive: AdaptiveConfig::default(),
            reporting_interval: Duration::from_secs(60),
        }
    }
}

impl TidegateConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            admission: AdmissionConfig::from_env(),
            budget: BudgetConfig::from_env(),
            adaptive: AdaptiveConfig::from_env(),
            reporting_interval: std::env::var("TIDEGATE_REPORTING_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(60)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.admission.validate()?;
        self.budget.validate()?;
        self.adaptive.validate()?;
        if self.reporting_interval.is_zero() {
            return Err(ConfigError::zero("reporting_interval"));
        }
        Ok(())
    }
}

/// A query admitted to run, with the budget that governs it
pub struct QueryTicket<M> {
    pub admission: Admission<M>,
    pub budget: QueryBudget,
    /// Handle delivered to `kill`; also bound to `budget`
    pub cancel: CancellationToken,
}

/// Every gate of one process, built in dependency order and shared by handle
pub struct Gates<M> {
    config: TidegateConfig,
    queries: Arc<PermitGate<M>>,
    writes: Arc<AdaptiveGate>,
    sink: Arc<PrometheusSink>,
}

impl<M: Send + 'static> Gates<M> {
    pub fn new(config: TidegateConfig) -> Result<Self, GateError> {
        config.validate()?;

        let sink = Arc::new(PrometheusSink::new());
        let queries = Arc::new(PermitGate::new(config.admission.clone())?);
        let writes =
            Arc::new(AdaptiveGate::new(config.adaptive.clone())?.with_sink(sink.clone()));

        info!(
            max_concurrent_queries = config.admission.max_concurrent_queries,
            write_permits = config.adaptive.initial_permits,
            "Gates initialized"
        );

        Ok(Self {
            config,
            queries,
            writes,
            sink,
        })
    }

    /// Admit a query and start its budget.
    ///
    /// Killing the query interrupts the returned budget.
    pub async fn begin_query(
        &self,
        fingerprint: &Fingerprint,
        descriptor: M,
    ) -> Result<QueryTicket<M>, GateError> {
        let cancel = CancellationToken::new();
        let handle: Arc<dyn Cancellable> = Arc::new(cancel.clone());

        let admission = self
            .queries
            .admit(fingerprint.as_str(), descriptor, Arc::clone(&handle))
            .await?;
        let budget = self.config.budget.start().with_interrupt(handle);

        Ok(QueryTicket {
            admission,
            budget,
            cancel,
        })
    }

    pub fn queries(&self) -> &Arc<PermitGate<M>> {
        &self.queries
    }

    pub fn writes(&self) -> &Arc<AdaptiveGate> {
        &self.writes
    }

    pub fn admin(&self) -> AdminSurface<M> {
        AdminSurface::new(Arc::clone(&self.queries))
    }

    pub fn prometheus(&self) -> &PrometheusSink {
        &self.sink
    }

    pub fn config(&self) -> &TidegateConfig {
        &self.config
    }

    /// Every component polled on a reporting tick
    pub fn reporters(&self) -> Vec<Arc<dyn MetricReporter>> {
        vec![
            Arc::clone(&self.queries) as Arc<dyn MetricReporter>,
            Arc::clone(&self.writes) as Arc<dyn MetricReporter>,
        ]
    }

    /// Run one reporting tick into the Prometheus sink now
    pub fn collect_metrics(&self) -> usize {
        report_tick(&self.reporters(), self.sink.as_ref(), now_millis())
    }

    /// Report on `reporting_interval` until `cancel` fires
    pub fn spawn_reporting(&self, cancel: CancellationToken) -> JoinHandle<()> {
        spawn_reporting(
            self.reporters(),
            self.sink.clone(),
            self.config.reporting_interval,
            cancel,
        )
    }

    /// Close query admission and drain in-flight writes
    pub async fn shutdown(&self) {
        self.queries.close();
        self.writes.shutdown().await;
    }
}
