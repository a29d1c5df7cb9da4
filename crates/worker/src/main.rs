//! Operational entry points for the delivery pipeline.
//!
//! - `vitalerp-worker drain-outbox`: one outbox drain run, meant to be
//!   invoked by an external scheduler (cron or similar). Non-overlapping runs
//!   are not required for correctness: claimed rows are leased.
//! - `vitalerp-worker consume <queue>`: process-lifetime consumer loop for
//!   one logical queue, stopped with ctrl-c.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use vitalerp_contracts::{
    AssignPlanHandler, InMemoryContractRepository, InMemoryServiceDirectory,
};
use vitalerp_infra::{
    BrokerHandle, OutboxPublisher, PlanAssignmentBinding, PostgresOutboxStore, PublisherConfig,
    QueueConsumer, PLAN_ASSIGNMENT_QUEUE,
};

fn main() -> Result<()> {
    vitalerp_observability::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("drain-outbox") => drain_outbox(),
        Some("consume") => {
            let queue = args
                .next()
                .context("usage: vitalerp-worker consume <queue>")?;
            consume(&queue)
        }
        _ => bail!("usage: vitalerp-worker <drain-outbox | consume <queue>>"),
    }
}

struct Config {
    database_url: String,
    redis_url: String,
    topic: String,
    batch_size: usize,
}

fn load_config() -> Config {
    Config {
        database_url: env_or("DATABASE_URL", "postgres://vitalerp@localhost:5432/vitalerp"),
        redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
        topic: env_or("VITALERP_EVENTS_STREAM", "vitalerp.events"),
        batch_size: env_or("VITALERP_BATCH_SIZE", "50").parse().unwrap_or(50),
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        warn!(key, default, "environment variable not set; using default");
        default.to_string()
    })
}

/// One scheduler-invoked drain run.
fn drain_outbox() -> Result<()> {
    let config = load_config();

    // The runtime is owned here and handed to the store; the drain itself
    // runs synchronously on this thread.
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let pool = runtime
        .block_on(
            PgPoolOptions::new()
                .max_connections(4)
                .connect(&config.database_url),
        )
        .context("failed to connect to database")?;

    let store = PostgresOutboxStore::new(pool, runtime.handle().clone());
    runtime
        .block_on(store.ensure_schema())
        .context("failed to ensure outbox schema")?;

    let broker = BrokerHandle::connect_or_fallback(&config.redis_url);
    let publisher = OutboxPublisher::new(
        store,
        broker,
        PublisherConfig {
            topic: config.topic,
            batch_size: config.batch_size,
            ..PublisherConfig::default()
        },
    );

    let report = publisher.drain_once().context("outbox drain failed")?;
    info!(
        published = report.published,
        retried = report.retried,
        failed = report.failed,
        "drain run finished"
    );
    Ok(())
}

/// Process-lifetime consumer for one logical queue.
fn consume(queue: &str) -> Result<()> {
    if queue != PLAN_ASSIGNMENT_QUEUE {
        bail!("unknown queue: {queue} (known: {PLAN_ASSIGNMENT_QUEUE})");
    }

    let config = load_config();

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let pool = runtime
        .block_on(
            PgPoolOptions::new()
                .max_connections(4)
                .connect(&config.database_url),
        )
        .context("failed to connect to database")?;

    let store = PostgresOutboxStore::new(pool, runtime.handle().clone());
    runtime
        .block_on(store.ensure_schema())
        .context("failed to ensure outbox schema")?;

    let broker = Arc::new(BrokerHandle::connect_or_fallback(&config.redis_url));
    if broker.is_fallback() {
        warn!("consuming against the in-memory sink; no deliveries will arrive");
    }

    // TODO: swap the in-memory repository/directory for the SQL-backed
    // adapters once the persistence module exposes them.
    let handler = AssignPlanHandler::new(
        InMemoryContractRepository::arc(),
        InMemoryServiceDirectory::arc(),
        store,
    );
    let binding = PlanAssignmentBinding::new(handler);

    let handle = QueueConsumer::spawn(broker, config.topic, binding)
        .context("failed to start consumer")?;

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to wait for shutdown signal")?;
    info!(queue, "shutdown requested");
    handle.shutdown();
    Ok(())
}
