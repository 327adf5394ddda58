//! Main scheduler loops

use super::pipeline::Pipeline;
use crate::config::Config;
use crate::discovery::TorFetcher;
use crate::models::{AuditLog, AuditStatus};
use crate::storage::open_store;
use crate::tor::{create_tor_manager, CircuitControl, TorManager};
use crate::util::time::format_duration;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How often due crawl jobs are picked up
const JOB_INTERVAL_SECS: u64 = 30;
/// Jobs run per tick
const JOB_BATCH: usize = 10;
/// Sites re-checked per tick
const RECHECK_BATCH: usize = 5;
const METRICS_INTERVAL_SECS: u64 = 60;

/// Run the daemon until ctrl-c or a loop exits
pub async fn run(config: Config) -> Result<()> {
    info!("Arachne v{} starting", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config.database).await?;
    let manager = Arc::new(Mutex::new(create_tor_manager(&config).await?));
    let fetcher = Arc::new(TorFetcher::new(Arc::clone(&manager)));
    let pipeline = Arc::new(Pipeline::new(&config, Arc::clone(&store), fetcher)?);

    store
        .record_audit(&AuditLog::new("scheduler", "start", AuditStatus::Success))
        .await?;

    let pipeline_clone = Arc::clone(&pipeline);
    let job_handle = tokio::spawn(async move { job_loop(pipeline_clone).await });

    let manager_clone = Arc::clone(&manager);
    let rotation = Duration::from_secs(config.tor.circuit_lifetime_secs());
    let rotation_handle = tokio::spawn(async move { rotation_loop(manager_clone, rotation).await });

    let pipeline_clone = Arc::clone(&pipeline);
    let manager_clone = Arc::clone(&manager);
    let metrics_handle =
        tokio::spawn(async move { metrics_loop(pipeline_clone, manager_clone).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
        r = job_handle => {
            error!("Job loop exited: {:?}", r);
        }
        r = rotation_handle => {
            error!("Rotation loop exited: {:?}", r);
        }
        r = metrics_handle => {
            error!("Metrics loop exited: {:?}", r);
        }
    }

    let stats = manager.lock().await.stats();
    if let Err(e) = pipeline.record_metrics(Some(stats)).await {
        warn!("Final metrics snapshot failed: {:#}", e);
    }
    manager.lock().await.stop().await?;
    store
        .record_audit(&AuditLog::new("scheduler", "stop", AuditStatus::Success))
        .await?;
    info!(
        "Arachne stopped after {}",
        format_duration(pipeline.state().uptime().as_secs())
    );
    Ok(())
}

/// Runs due crawl jobs, then re-checks stale sites
async fn job_loop(pipeline: Arc<Pipeline>) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(JOB_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if let Err(e) = pipeline.run_jobs(JOB_BATCH).await {
            error!("Job run failed: {:#}", e);
        }
        if let Err(e) = pipeline.classify_batch(RECHECK_BATCH).await {
            error!("Re-check batch failed: {:#}", e);
        }
    }
}

/// Replaces every circuit once per circuit lifetime
async fn rotation_loop<C: CircuitControl>(
    manager: Arc<Mutex<TorManager<C>>>,
    every: Duration,
) -> Result<()> {
    let mut ticker = interval(every);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let built = manager.lock().await.rotate_all().await;
        if built == 0 {
            warn!("Circuit rotation built no circuits");
        } else {
            debug!("Rotated circuits, {} rebuilt", built);
        }
    }
}

async fn metrics_loop<C: CircuitControl>(
    pipeline: Arc<Pipeline>,
    manager: Arc<Mutex<TorManager<C>>>,
) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(METRICS_INTERVAL_SECS));
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let stats = manager.lock().await.stats();
        match pipeline.record_metrics(Some(stats)).await {
            Ok(metrics) => info!(
                "Metrics: {} sites, {} classified, {:.1} req/min, {:.1}% errors, {} circuits",
                metrics.sites_discovered,
                metrics.sites_classified,
                metrics.requests_per_minute,
                metrics.error_rate * 100.0,
                metrics.circuits_active
            ),
            Err(e) => error!("Failed to record metrics: {:#}", e),
        }
    }
}
