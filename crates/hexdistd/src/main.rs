//! hexdistd: distributes move calculations to connected worker peers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;

use hexdist_core::config::HexdistConfig;
use hexdist_services::{
    AdmissionSettings, AdmissionTable, DistributorSettings, JobDistributor, MemoryQueue,
    MemoryQueueSettings, PeerListener, PeerPool, QueueBackend,
};

mod monitor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = HexdistConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = HexdistConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HexdistConfig::default()
    });
    tracing::info!(
        peer_port = config.network.peer_port,
        api_port = config.network.api_port,
        "hexdistd starting"
    );

    // ── Shared state ─────────────────────────────────────────────────────────

    let pool = Arc::new(PeerPool::new());
    let memory_queue = Arc::new(MemoryQueue::new(MemoryQueueSettings::from(&config.queue)));
    let queue: Arc<dyn QueueBackend> = memory_queue.clone();
    let admitting: AdmissionTable = Arc::new(DashMap::new());

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let peer_bind = format!("{}:{}", config.network.peer_bind, config.network.peer_port);
    let listener = PeerListener::bind(
        &peer_bind,
        pool.clone(),
        AdmissionSettings::from(&config.peers),
        admitting.clone(),
        shutdown_tx.subscribe(),
    )
    .await
    .with_context(|| format!("failed to bind peer listener on {peer_bind}"))?;
    let listener_task = tokio::spawn(listener.run());

    let sweeper_task = tokio::spawn(memory_queue.clone().run_stall_sweeper(shutdown_tx.subscribe()));

    let distributor = JobDistributor::new(
        queue.clone(),
        pool.clone(),
        DistributorSettings::from_config(&config.scheduler, &config.queue),
    );
    let mut distributor_task = tokio::spawn(distributor.run(shutdown_tx.subscribe()));

    let monitor_task = tokio::spawn(monitor::run(pool.clone(), shutdown_tx.subscribe()));

    let api_task = {
        let state = hexdist_api::ApiState::new(pool.clone(), queue.clone(), admitting.clone());
        let bind = config.network.api_bind.clone();
        let port = config.network.api_port;
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = hexdist_api::serve(state, &bind, port, shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()      => tracing::info!("shutting down"),
        r = listener_task           => tracing::error!("peer listener exited: {:?}", r),
        r = sweeper_task            => tracing::error!("stall sweeper exited: {:?}", r),
        r = &mut distributor_task   => tracing::error!("distributor exited: {:?}", r),
        r = monitor_task            => tracing::error!("monitor exited: {:?}", r),
        r = api_task                => tracing::error!("API server exited: {:?}", r),
    }
    let _ = shutdown_tx.send(());

    // In-flight dispatches get the grace period, plus a little slack.
    let grace = config.scheduler.shutdown_grace() + Duration::from_secs(1);
    if !distributor_task.is_finished()
        && tokio::time::timeout(grace, &mut distributor_task).await.is_err()
    {
        tracing::warn!("distributor did not stop in time");
        distributor_task.abort();
    }

    tracing::info!("hexdistd stopped");
    Ok(())
}
