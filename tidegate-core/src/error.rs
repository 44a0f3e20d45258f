//! Error types for the tidegate core library
//!
//! This module provides structured error types using `thiserror` for
//! type-safe error handling across the gates.
//!
//! # Error Hierarchy
//!
//! ```text
//! tidegate-core
//! ├── BudgetError  - terminal causes latched by a QueryBudget
//! └── ConfigError  - rejected configuration values
//! ```
//!
//! Budget errors are never retried: once a budget latches one, the query
//! executor stops scanning and reports it upward.

use thiserror::Error;

/// Terminal causes that stop a query execution.
///
/// A [`crate::budget::QueryBudget`] latches the first of these it observes and
/// never replaces it afterwards.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    /// The query processed more data points than allowed
    #[error("Query exceeded limit of {limit} data points")]
    PointLimit { limit: u64 },

    /// The query ran longer than allowed
    #[error("Query exceeded time limit of {limit_secs} seconds")]
    TimeLimit { limit_secs: u64 },

    /// Too many shard fetches failed for the configured tolerance
    #[error("Query failure tolerance exceeded ({failures} of {attempts} shard fetches failed): {cause}")]
    ShardFailures {
        failures: u64,
        attempts: u64,
        cause: String,
    },

    /// The execution was killed through its handle
    #[error("Query was interrupted")]
    Interrupted,
}

impl BudgetError {
    /// Create a shard failure error from the cause of the last failed fetch
    pub fn shard_failures(failures: u64, attempts: u64, cause: impl Into<String>) -> Self {
        Self::ShardFailures {
            failures,
            attempts,
            cause: cause.into(),
        }
    }

    /// Whether the cause was produced by a resource limit rather than a fault
    pub fn is_limit(&self) -> bool {
        matches!(self, Self::PointLimit { .. } | Self::TimeLimit { .. })
    }
}

/// Configuration values rejected by `validate()`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value that must be positive was zero
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    /// A numeric value fell outside its allowed range
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A required string was empty
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

impl ConfigError {
    /// Create a zero-value error
    pub fn zero(field: &'static str) -> Self {
        Self::Zero { field }
    }

    /// Create an out-of-range error
    pub fn out_of_range(field: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self::OutOfRange {
            field,
            value,
            min,
            max,
        }
    }

    /// Create an empty-string error
    pub fn empty(field: &'static str) -> Self {
        Self::Empty { field }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_error_display() {
        let err = BudgetError::PointLimit { limit: 100 };
        assert_eq!(err.to_string(), "Query exceeded limit of 100 data points");

        let err = BudgetError::TimeLimit { limit_secs: 30 };
        assert_eq!(err.to_string(), "Query exceeded time limit of 30 seconds");

        let err = BudgetError::shard_failures(6, 10, "node 3 unreachable");
        assert_eq!(
            err.to_string(),
            "Query failure tolerance exceeded (6 of 10 shard fetches failed): node 3 unreachable"
        );
    }

    #[test]
    fn test_budget_error_is_limit() {
        assert!(BudgetError::PointLimit { limit: 1 }.is_limit());
        assert!(BudgetError::TimeLimit { limit_secs: 1 }.is_limit());
        assert!(!BudgetError::Interrupted.is_limit());
        assert!(!BudgetError::shard_failures(1, 1, "x").is_limit());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::zero("max_concurrent_queries");
        assert_eq!(err.to_string(), "max_concurrent_queries must be greater than zero");

        let err = ConfigError::out_of_range("failure_tolerance", 1.5, 0.0, 1.0);
        assert_eq!(err.to_string(), "failure_tolerance must be within [0, 1], got 1.5");

        let err = ConfigError::empty("hostname");
        assert_eq!(err.to_string(), "hostname must not be empty");
    }
}
