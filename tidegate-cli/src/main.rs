use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::Rng;
use serde_json::json;
use tidegate_core::BudgetError;
use tidegate_gates::{GateError, Gates, QueryMetric, StoreError, TidegateConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tidegate")]
#[command(version = "0.1.0")]
#[command(about = "Tidegate - drive synthetic load through the admission gates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent queries through the permit gate and query budgets
    Queries {
        /// Number of queries to run
        #[arg(short, long, default_value_t = 20)]
        queries: usize,

        /// Maximum concurrent queries
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Number of distinct query payloads (fewer means more collisions)
        #[arg(short, long, default_value_t = 5)]
        distinct: usize,

        /// Shard fetches per query
        #[arg(long, default_value_t = 16)]
        shards: u32,

        /// Probability that a shard fetch fails
        #[arg(long, default_value_t = 0.05, value_parser = parse_probability)]
        failure_rate: f64,

        /// Per-query data point limit (0 = unlimited)
        #[arg(long)]
        point_limit: Option<u64>,

        /// Fraction of shard fetches allowed to fail per query
        #[arg(long)]
        failure_tolerance: Option<f64>,

        /// Interrupt the first running query once the report is printed
        #[arg(long)]
        kill: bool,
    },

    /// Submit write batches through the adaptive gate
    Writes {
        /// Number of batches to submit
        #[arg(short, long, default_value_t = 200)]
        batches: usize,

        /// Initial write permits
        #[arg(short, long)]
        permits: Option<usize>,

        /// Mean simulated write latency in milliseconds
        #[arg(long, default_value_t = 20)]
        latency_ms: u64,

        /// Probability that a write attempt hits an unavailable host
        #[arg(long, default_value_t = 0.1, value_parser = parse_probability)]
        failure_rate: f64,
    },
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is not a probability in [0, 1]"));
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tidegate_gates=info,tidegate_cli=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let mut config = TidegateConfig::from_env();

    match cli.command {
        Commands::Queries {
            queries,
            concurrency,
            distinct,
            shards,
            failure_rate,
            point_limit,
            failure_tolerance,
            kill,
        } => {
            if let Some(concurrency) = concurrency {
                config.admission.max_concurrent_queries = concurrency;
            }
            if let Some(point_limit) = point_limit {
                config.budget.point_limit = point_limit;
            }
            if let Some(failure_tolerance) = failure_tolerance {
                config.budget.failure_tolerance = failure_tolerance;
            }
            let load = QueryLoad {
                queries,
                distinct: distinct.max(1),
                shards,
                failure_rate,
                kill,
            };
            run_queries(config, load).await?;
        }

        Commands::Writes {
            batches,
            permits,
            latency_ms,
            failure_rate,
        } => {
            if let Some(permits) = permits {
                config.adaptive.initial_permits = permits;
                config.adaptive.max_permits = config.adaptive.max_permits.max(permits);
            }
            // Short backoff keeps the simulation quick
            config.adaptive.retry_base = Duration::from_millis(10);
            config.adaptive.adjust_interval = Duration::from_millis(500);
            let load = WriteLoad {
                batches,
                latency_ms: latency_ms.max(1),
                failure_rate: failure_rate.clamp(0.0, 0.9),
            };
            run_writes(config, load).await?;
        }
    }

    Ok(())
}

struct QueryLoad {
    queries: usize,
    distinct: usize,
    shards: u32,
    failure_rate: f64,
    kill: bool,
}

async fn run_queries(config: TidegateConfig, load: QueryLoad) -> anyhow::Result<()> {
    let gates: Arc<Gates<QueryMetric>> =
        Arc::new(Gates::new(config).context("Invalid gate configuration")?);
    let reporting = CancellationToken::new();
    let reporter = gates.spawn_reporting(reporting.clone());

    info!(
        queries = load.queries,
        distinct = load.distinct,
        capacity = gates.queries().capacity(),
        "Starting query load"
    );

    let tasks: Vec<_> = (0..load.queries)
        .map(|i| {
            let gates = Arc::clone(&gates);
            let name = format!("sys.cpu.load.{}", i % load.distinct);
            let metric = QueryMetric::new(
                name.clone(),
                json!({ "metric": name, "start_relative": { "value": 1, "unit": "hours" } }),
            );
            let shards = load.shards;
            let failure_rate = load.failure_rate;
            tokio::spawn(async move { scan(&gates, metric, shards, failure_rate).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = gates.admin().running_queries();
    println!("=== Running Queries ===");
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!();

    if load.kill {
        if let Some(first) = report.queries.first() {
            gates.admin().kill_query(&first.fingerprint);
        }
    }

    let mut completed = 0;
    let mut stopped = Vec::new();
    for task in tasks {
        match task.await? {
            Ok(_) => completed += 1,
            Err(GateError::Budget(cause)) => stopped.push(cause.to_string()),
            Err(err) => return Err(err.into()),
        }
    }

    gates.collect_metrics();
    reporting.cancel();
    reporter.await?;

    println!("=== Summary ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "completed": completed,
            "stopped": stopped,
            "admission": gates.queries().counters().snapshot(),
        }))?
    );
    println!();
    println!("=== Prometheus ===");
    print!("{}", gates.prometheus().encode());

    gates.shutdown().await;
    Ok(())
}

/// Scan `shards` simulated shard fetches under a query budget
async fn scan(
    gates: &Gates<QueryMetric>,
    metric: QueryMetric,
    shards: u32,
    failure_rate: f64,
) -> Result<u64, GateError> {
    let fingerprint = metric.fingerprint();
    let ticket = gates.begin_query(&fingerprint, metric).await?;

    for shard in 0..shards {
        if !ticket.budget.keep_running() {
            break;
        }

        let (failed, points, delay) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(failure_rate),
                rng.gen_range(10..200u64),
                Duration::from_millis(rng.gen_range(1..10)),
            )
        };
        tokio::time::sleep(delay).await;

        ticket.budget.record_attempt();
        if failed {
            ticket.budget.record_failure(format!("shard {shard} unreachable"));
        } else {
            ticket.budget.record_processed(points);
        }
    }

    // Latch a limit crossed by the final shard
    ticket.budget.keep_running();
    if let Err(cause) = ticket.budget.check() {
        if !matches!(cause, BudgetError::Interrupted) {
            warn!(fingerprint = %fingerprint, cause = %cause, "Query stopped");
        }
        return Err(cause.into());
    }
    Ok(ticket.budget.processed())
}

struct WriteLoad {
    batches: usize,
    latency_ms: u64,
    failure_rate: f64,
}

async fn run_writes(config: TidegateConfig, load: WriteLoad) -> anyhow::Result<()> {
    let gates: Gates<QueryMetric> = Gates::new(config).context("Invalid gate configuration")?;
    let writes = Arc::clone(gates.writes());

    info!(
        batches = load.batches,
        permits = writes.permits(),
        "Starting write load"
    );

    let mut handles = Vec::with_capacity(load.batches);
    for batch in 0..load.batches {
        let latency_ms = load.latency_ms;
        let failure_rate = load.failure_rate;
        let handle = writes
            .submit(move || async move {
                let (unavailable, latency) = {
                    let mut rng = rand::thread_rng();
                    (
                        rng.gen_bool(failure_rate),
                        Duration::from_millis(rng.gen_range(latency_ms / 2..=latency_ms * 3 / 2)),
                    )
                };
                tokio::time::sleep(latency).await;
                if unavailable {
                    Err(StoreError::NoHostAvailable(format!("batch {batch}")))
                } else {
                    Ok(batch)
                }
            })
            .await?;
        handles.push(handle);
    }

    let mut written = 0;
    for handle in handles {
        handle.await??;
        written += 1;
    }

    gates.collect_metrics();

    println!("=== Congestion Window ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "written": written,
            "permits": writes.permits(),
            "latency_ms": writes.latency_stats(),
        }))?
    );
    println!();
    println!("=== Prometheus ===");
    print!("{}", gates.prometheus().encode());

    gates.shutdown().await;
    Ok(())
}
