//! Operator view of the query gate: list running queries and kill one.
//!
//! Reports serialize to the JSON shape served by the admin endpoints.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::admission::PermitGate;
use crate::fingerprint::QueryDescriptor;

/// One running query as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningQueryInfo {
    #[serde(rename = "query hash")]
    pub fingerprint: String,
    #[serde(rename = "metric name")]
    pub metric_name: String,
    #[serde(rename = "query JSON")]
    pub query: Value,
}

/// Running queries plus the number of callers waiting for admission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningQueriesReport {
    pub queries: Vec<RunningQueryInfo>,
    #[serde(rename = "queries waiting")]
    pub queries_waiting: usize,
}

/// Admin operations over a shared [`PermitGate`]
pub struct AdminSurface<M> {
    gate: Arc<PermitGate<M>>,
}

impl<M> AdminSurface<M> {
    pub fn new(gate: Arc<PermitGate<M>>) -> Self {
        Self { gate }
    }
}

impl<M> AdminSurface<M>
where
    M: QueryDescriptor + Clone,
{
    /// Snapshot of running queries, ordered by fingerprint
    pub fn running_queries(&self) -> RunningQueriesReport {
        let queries_waiting = self.gate.waiting_count();
        let mut queries: Vec<RunningQueryInfo> = self
            .gate
            .list()
            .into_iter()
            .map(|running| RunningQueryInfo {
                metric_name: running.descriptor.metric_name().to_string(),
                query: running.descriptor.query_json(),
                fingerprint: running.fingerprint,
            })
            .collect();
        queries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        debug!(running = queries.len(), queries_waiting, "Listing running queries");
        RunningQueriesReport {
            queries,
            queries_waiting,
        }
    }

    /// Interrupt the query running under `fingerprint`.
    ///
    /// Succeeds whether or not such a query is running.
    pub fn kill_query(&self, fingerprint: &str) {
        let signalled = self.gate.kill(fingerprint);
        info!(fingerprint, signalled, "Killed query by hash");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionConfig;
    use crate::fingerprint::QueryMetric;
    use serde_json::json;
    use tidegate_core::Cancellable;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_report_json_shape() {
        let gate = Arc::new(PermitGate::new(AdmissionConfig::with_capacity(2)).unwrap());
        let metric = QueryMetric::new("cpu.load", json!({"metric": "cpu.load", "start": 0}));
        gate.acquire("abc", metric, Arc::new(CancellationToken::new()))
            .await
            .unwrap();

        let admin = AdminSurface::new(Arc::clone(&gate));
        let report = serde_json::to_value(admin.running_queries()).unwrap();

        assert_eq!(
            report,
            json!({
                "queries": [{
                    "query hash": "abc",
                    "metric name": "cpu.load",
                    "query JSON": {"metric": "cpu.load", "start": 0}
                }],
                "queries waiting": 0
            })
        );
    }

    #[tokio::test]
    async fn test_kill_query_is_idempotent() {
        let gate = Arc::new(PermitGate::new(AdmissionConfig::with_capacity(1)).unwrap());
        let token = CancellationToken::new();
        gate.acquire(
            "abc",
            QueryMetric::new("cpu.load", json!({})),
            Arc::new(token.clone()),
        )
        .await
        .unwrap();

        let admin = AdminSurface::new(Arc::clone(&gate));
        admin.kill_query("missing");
        assert!(!token.is_interrupted());

        admin.kill_query("abc");
        admin.kill_query("abc");
        assert!(token.is_interrupted());
    }
}
