//! Error types for the tidegate gates.

use tidegate_core::{BudgetError, ConfigError};

use crate::adaptive::Retryable;

/// Errors from query admission.
///
/// Saturation and fingerprint conflicts are waited out inside
/// [`crate::admission::PermitGate::acquire`] and never surface here.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    /// The gate was closed while the caller waited
    #[error("Admission gate is closed")]
    Closed,
}

/// Errors from submitting write work
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmitError {
    /// The adaptive gate no longer accepts work
    #[error("Adaptive gate is shut down")]
    ShutDown,
}

/// Faults reported by storage cluster writes
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No storage node could be reached; retried with backoff
    #[error("No host available: {0}")]
    NoHostAvailable(String),

    /// The cluster refused the batch
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// The batch could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::NoHostAvailable(_))
    }
}

/// Top-level error for callers composing several gates
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
