//! Adaptive admission for the write path.
//!
//! Write batches are dispatched through a congestion window: a permit pool
//! whose size is tuned from sampled write latency.
//!
//! # Architecture
//!
//! ```text
//! submit(work) ──► CongestionWindow ──► spawned task
//!                  (permits)             │
//!                      ▲                 ├─ retry on transient fault
//!                      │                 │  (Fibonacci backoff)
//!                      │                 ├─ latency → Reservoir
//!                      └── +1 permit ◄───┴─ tuning step every `permits`
//!                          (additive        completions
//!                           increase)
//! ```
//!
//! The window grows by one permit at a tuning step when at least
//! `adjust_interval` has passed since the last evaluation, some submit had to
//! wait for a permit since then, and mean latency stayed within
//! `latency_headroom` of the previous evaluation. It never shrinks.

mod config;
mod gate;
mod retry;
mod window;

pub use config::AdaptiveConfig;
pub use gate::{
    AdaptiveGate, CONGESTION_AVG_METRIC, CONGESTION_MAX_METRIC, CONGESTION_MIN_METRIC,
    PERMIT_COUNT_METRIC,
};
pub use retry::{retry_transient, FibonacciBackoff, Retryable, RetryOutcome};
pub use window::{CongestionWindow, WindowReport};
