//! Query admission for the read path.
//!
//! Bounds how many queries execute at once and keeps identical queries from
//! running concurrently. Every running query is registered under its
//! fingerprint so operators can list and interrupt it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Incoming Queries                      │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │   Semaphore     │ ← FIFO-fair permits
//!                    │ (max_concurrent)│
//!                    └────────┬────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │    Registry     │ ← fingerprint → running query
//!                    │  ┌───────────┐  │   conflict: return permit,
//!                    │  │ 9f3a…     │  │   sleep, try again
//!                    │  │ 71c0…     │  │
//!                    │  └───────────┘  │
//!                    └────────┬────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │   Execution     │ ← release() returns the permit
//!                    └─────────────────┘
//! ```
//!
//! # Features
//!
//! - **Concurrency Control**: At most `max_concurrent_queries` run at once
//! - **Duplicate Suppression**: One execution per fingerprint
//! - **Operator Control**: List running queries, interrupt one by fingerprint
//! - **Metrics**: Collision counter reported and reset once per tick

mod config;
mod gate;
mod metrics;

pub use config::{default_hostname, AdmissionConfig};
pub use gate::{Admission, PermitGate, RunningQuery, QUERY_COLLISIONS_METRIC};
pub use metrics::{AdmissionMetrics, AdmissionSnapshot};
