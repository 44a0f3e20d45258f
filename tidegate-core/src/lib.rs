// Tidegate Core Library
//
// Leaf primitives shared by the query and write gates: latency sampling,
// per-query budgets, cancellation handles and metric samples

pub mod budget;
pub mod cancel;
pub mod error;
pub mod metrics;
pub mod reservoir;

pub use budget::{BudgetConfig, QueryBudget};
pub use cancel::Cancellable;
pub use error::{BudgetError, ConfigError};
pub use metrics::{DataPoint, DataPointSet, MemorySink, MetricReporter, MetricSink};
pub use reservoir::{Reservoir, SampleStats};
