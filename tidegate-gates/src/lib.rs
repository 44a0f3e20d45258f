//! Tidegate Gates Library
//!
//! Admission control and backpressure between a time-series database and its
//! shared storage cluster.
//!
//! - [`admission`]: bounded, duplicate-free query admission
//! - [`adaptive`]: self-tuning write dispatch with transient-fault retry
//! - [`admin`]: operator listing and interruption of running queries
//! - [`metrics`]: periodic reporting and Prometheus rendering
//!
//! Per-query budgets and latency sampling live in `tidegate-core` and are
//! re-exported here.

pub mod adaptive;
pub mod admin;
pub mod admission;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod state;

pub use adaptive::{AdaptiveConfig, AdaptiveGate, Retryable};
pub use admin::{AdminSurface, RunningQueriesReport, RunningQueryInfo};
pub use admission::{Admission, AdmissionConfig, PermitGate, RunningQuery};
pub use error::{AdmissionError, GateError, StoreError, SubmitError};
pub use fingerprint::{Fingerprint, QueryDescriptor, QueryMetric};
pub use metrics::PrometheusSink;
pub use state::{Gates, QueryTicket, TidegateConfig};
pub use tidegate_core::{BudgetConfig, BudgetError, Cancellable, QueryBudget, Reservoir};
