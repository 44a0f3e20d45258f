//! End-to-end scenarios for the query and write gates
//!
//! These tests drive the gates the way the query executor and the write
//! path do:
//! - Concurrency bounds and FIFO admission in arrival order
//! - Duplicate fingerprints and the collision counter
//! - Killing a running query through the admin surface
//! - Permit accounting for retried writes

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tidegate_core::{MemorySink, MetricReporter};
use tidegate_gates::adaptive::PERMIT_COUNT_METRIC;
use tidegate_gates::admission::QUERY_COLLISIONS_METRIC;
use tidegate_gates::{
    AdaptiveConfig, AdaptiveGate, AdmissionConfig, BudgetConfig, BudgetError, Cancellable,
    Fingerprint, Gates, PermitGate, QueryMetric, StoreError, TidegateConfig,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

fn query_gate(capacity: usize) -> Arc<PermitGate<QueryMetric>> {
    let config = AdmissionConfig {
        collision_retry_delay: Duration::from_millis(10),
        ..AdmissionConfig::with_capacity(capacity)
    };
    Arc::new(PermitGate::new(config).unwrap())
}

fn metric(name: &str) -> QueryMetric {
    QueryMetric::new(name, json!({ "metric": name }))
}

fn handle() -> Arc<dyn Cancellable> {
    Arc::new(CancellationToken::new())
}

/// Capacity 2 with three distinct queries: two run, the third waits for a release
#[tokio::test(start_paused = true)]
async fn test_third_query_waits_for_release() {
    let gate = query_gate(2);
    let (admitted_tx, mut admitted_rx) = mpsc::unbounded_channel();

    for fingerprint in ["q1", "q2", "q3"] {
        let gate = Arc::clone(&gate);
        let admitted_tx = admitted_tx.clone();
        tokio::spawn(async move {
            gate.acquire(fingerprint, metric(fingerprint), handle())
                .await
                .unwrap();
            admitted_tx.send(fingerprint).unwrap();
        });
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut running = HashSet::new();
    while let Ok(fingerprint) = admitted_rx.try_recv() {
        running.insert(fingerprint);
    }
    assert_eq!(running.len(), 2);
    assert_eq!(gate.waiting_count(), 1);
    assert_eq!(gate.available_permits(), 0);

    let first = *running.iter().next().unwrap();
    gate.release(first);

    let third = admitted_rx.recv().await.unwrap();
    assert!(!running.contains(third));
    assert_eq!(gate.running_count(), 2);
    assert_eq!(gate.waiting_count(), 0);
}

/// Queued callers are admitted in arrival order as permits come back
#[tokio::test(start_paused = true)]
async fn test_waiters_admitted_in_arrival_order() {
    let gate = query_gate(1);
    gate.acquire("holder", metric("cpu.load"), handle())
        .await
        .unwrap();

    let (admitted_tx, mut admitted_rx) = mpsc::unbounded_channel();
    for i in 0..5usize {
        let gate = Arc::clone(&gate);
        let admitted_tx = admitted_tx.clone();
        tokio::spawn(async move {
            let fingerprint = format!("q{i}");
            gate.acquire(&fingerprint, metric("cpu.load"), handle())
                .await
                .unwrap();
            admitted_tx.send(i).unwrap();
            gate.release(&fingerprint);
        });
        // Let this caller join the queue before the next one arrives
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    drop(admitted_tx);
    assert_eq!(gate.waiting_count(), 5);

    gate.release("holder");

    let mut order = Vec::new();
    while let Some(i) = admitted_rx.recv().await {
        order.push(i);
    }
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    assert_eq!(gate.available_permits(), 1);
}

/// Many distinct queries never exceed the configured capacity
#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_capacity() {
    let gate = query_gate(3);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..30)
        .map(|i| {
            let gate = Arc::clone(&gate);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let fingerprint = format!("q{i}");
                gate.acquire(&fingerprint, metric("cpu.load"), handle())
                    .await
                    .unwrap();

                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);

                gate.release(&fingerprint);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(gate.available_permits(), 3);
    assert_eq!(gate.counters().snapshot().admitted, 30);
}

/// Two requests for "F": one runs, the other is admitted after the release
#[tokio::test(start_paused = true)]
async fn test_shared_fingerprint_runs_once() {
    let gate = query_gate(4);
    gate.acquire("F", metric("cpu.load"), handle()).await.unwrap();

    let second = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.acquire("F", metric("cpu.load"), handle()).await })
    };

    // Several retry rounds pass while the first execution holds "F"
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!second.is_finished());
    assert_eq!(gate.running_count(), 1);

    gate.release("F");
    second.await.unwrap().unwrap();
    assert_eq!(gate.running_count(), 1);

    let sets = gate.metrics(0);
    assert_eq!(sets[0].name, QUERY_COLLISIONS_METRIC);
    assert_eq!(sets[0].latest(), Some(1.0));

    // Reset by the emission
    assert_eq!(gate.metrics(1)[0].latest(), Some(0.0));
}

/// Identical fingerprints never execute concurrently; each waiting attempt
/// counts one collision
#[tokio::test(start_paused = true)]
async fn test_identical_fingerprints_are_serialized() {
    let gate = query_gate(16);
    let active = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let active = Arc::clone(&active);
            let overlap = Arc::clone(&overlap);
            tokio::spawn(async move {
                gate.acquire("F", metric("cpu.load"), handle()).await.unwrap();
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                gate.release("F");
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(overlap.load(Ordering::SeqCst), 0);
    assert_eq!(gate.counters().take_collisions(), 9);
    assert_eq!(gate.available_permits(), 16);
}

/// Killing "F" interrupts its execution; cleanup frees the entry and permit
#[tokio::test(start_paused = true)]
async fn test_kill_running_query() {
    let config = TidegateConfig {
        admission: AdmissionConfig::with_capacity(1),
        adaptive: AdaptiveConfig::fixed(1),
        ..Default::default()
    };
    let gates = Arc::new(Gates::new(config).unwrap());
    let fingerprint = Fingerprint::new("F");
    let (started_tx, started_rx) = oneshot::channel();

    let execution = {
        let gates = Arc::clone(&gates);
        let fingerprint = fingerprint.clone();
        tokio::spawn(async move {
            let ticket = gates
                .begin_query(&fingerprint, metric("cpu.load"))
                .await
                .unwrap();
            started_tx.send(()).unwrap();

            while ticket.budget.keep_running() {
                ticket.budget.record_processed(1);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            ticket.budget.check()
        })
    };

    started_rx.await.unwrap();
    let listed = gates.admin().running_queries();
    assert_eq!(listed.queries.len(), 1);
    assert_eq!(listed.queries[0].fingerprint, "F");
    assert_eq!(listed.queries[0].metric_name, "cpu.load");

    gates.admin().kill_query("F");

    let result = execution.await.unwrap();
    assert_eq!(result, Err(BudgetError::Interrupted));
    assert!(gates.queries().list().is_empty());
    assert_eq!(gates.queries().available_permits(), 1);
}

/// A point limit stops a scan with a latched cause
#[tokio::test]
async fn test_point_limit_stops_scan() {
    let config = TidegateConfig {
        budget: BudgetConfig {
            point_limit: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let gates: Gates<QueryMetric> = Gates::new(config).unwrap();

    let ticket = gates
        .begin_query(&Fingerprint::new("scan"), metric("cpu.load"))
        .await
        .unwrap();

    let mut scanned = 0u64;
    while ticket.budget.keep_running() {
        ticket.budget.record_processed(7);
        scanned += 7;
    }

    assert_eq!(scanned, 105);
    assert_eq!(
        ticket.budget.cause(),
        Some(BudgetError::PointLimit { limit: 100 })
    );
}

/// Every submitted write takes one permit and gives back one, however many
/// times it was retried
#[tokio::test(start_paused = true)]
async fn test_retried_writes_release_exactly_once() {
    let sink = Arc::new(MemorySink::new());
    let gate = AdaptiveGate::new(AdaptiveConfig {
        retry_base: Duration::from_millis(5),
        ..AdaptiveConfig::fixed(4)
    })
    .unwrap()
    .with_sink(sink.clone());

    let peak = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for batch in 0..20usize {
        let attempts = Arc::new(AtomicUsize::new(0));
        let handle = gate
            .submit(move || {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < batch % 3 {
                        Err(StoreError::NoHostAvailable(format!("batch {batch}")))
                    } else {
                        Ok(batch)
                    }
                }
            })
            .await
            .unwrap();
        peak.fetch_max(gate.in_flight(), Ordering::SeqCst);
        handles.push(handle);
    }

    let mut done = Vec::new();
    for handle in handles {
        done.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(done, (0..20).collect::<Vec<_>>());
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert_eq!(gate.available_permits(), 4);
    assert_eq!(gate.in_flight(), 0);

    // One tuning step per `permits` completions
    assert_eq!(sink.named(PERMIT_COUNT_METRIC).len(), 5);
}

/// Shutdown drains in-flight work, then rejects new submissions
#[tokio::test]
async fn test_shutdown_rejects_new_writes() {
    let gate = AdaptiveGate::new(AdaptiveConfig::fixed(2)).unwrap();
    let flushed = Arc::new(AtomicBool::new(false));
    let handle = {
        let flushed = Arc::clone(&flushed);
        gate.submit(move || {
            let flushed = Arc::clone(&flushed);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flushed.store(true, Ordering::SeqCst);
                Ok::<_, StoreError>(())
            }
        })
        .await
        .unwrap()
    };

    gate.shutdown().await;
    assert!(flushed.load(Ordering::SeqCst));
    handle.await.unwrap().unwrap();
    assert!(gate.is_shut_down());

    let rejected = gate.submit(|| async { Ok::<_, StoreError>(()) }).await;
    assert!(rejected.is_err());
}
