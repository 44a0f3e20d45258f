//! Cooperative cancellation of running executions.

use tokio_util::sync::CancellationToken;

/// Handle to an execution that can be asked to stop.
///
/// Delivering an interrupt only raises a signal; the execution observes it at
/// its own suspension points or budget checks and then cleans up normally.
pub trait Cancellable: Send + Sync {
    /// Ask the execution to stop
    fn interrupt(&self);

    /// Whether an interrupt has been delivered
    fn is_interrupted(&self) -> bool;
}

impl Cancellable for CancellationToken {
    fn interrupt(&self) {
        self.cancel();
    }

    fn is_interrupted(&self) -> bool {
        self.is_cancelled()
    }
}
