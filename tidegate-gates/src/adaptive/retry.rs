//! Retry of transient write faults with Fibonacci backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Classifies a failure as worth retrying
pub trait Retryable {
    /// Connectivity-class faults that may succeed on a later attempt
    fn is_transient(&self) -> bool;
}

/// Backoff waits of `base × fib(n)`, each capped at `max`.
///
/// Yields `base, base, 2·base, 3·base, 5·base, …` forever.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    base: Duration,
    max: Duration,
    prev: u64,
    curr: u64,
}

impl FibonacciBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            prev: 0,
            curr: 1,
        }
    }

    /// Next wait in the schedule
    pub fn next_wait(&mut self) -> Duration {
        let factor = u32::try_from(self.curr).unwrap_or(u32::MAX);
        let wait = self.base.saturating_mul(factor).min(self.max);

        let next = self.prev.saturating_add(self.curr);
        self.prev = self.curr;
        self.curr = next;
        wait
    }
}

impl Iterator for FibonacciBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_wait())
    }
}

/// Result of a retried unit of work
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Terminal result: success or the first non-transient failure
    pub result: Result<T, E>,
    /// Transient failures that were retried
    pub retries: u32,
}

/// Run `work` until it succeeds or fails with a non-transient error,
/// sleeping along `backoff` between attempts.
pub async fn retry_transient<F, Fut, T, E>(
    mut work: F,
    mut backoff: FibonacciBackoff,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut retries = 0u32;
    loop {
        match work().await {
            Err(err) if err.is_transient() => {
                let wait = backoff.next_wait();
                retries = retries.saturating_add(1);
                warn!(
                    retries,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Transient write failure, retrying"
                );
                tokio::time::sleep(wait).await;
            }
            result => return RetryOutcome { result, retries },
        }
    }
}
