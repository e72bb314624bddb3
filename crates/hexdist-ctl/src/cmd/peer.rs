//! Run this machine as a worker peer.

use std::sync::Arc;

use anyhow::Result;

use hexdist_services::{CommandExecutor, PeerClient};

/// Connect to `scheduler` and execute jobs with `program`, reconnecting
/// until Ctrl-C.
pub async fn cmd_peer(scheduler: &str, secondary: bool, program: &str, args: &[&str]) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let executor = CommandExecutor::new(program, args.iter().map(|a| a.to_string()).collect());
    let client = PeerClient::new(Arc::new(executor)).secondary(secondary);

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    tracing::info!(scheduler, program, secondary, "peer starting");
    client.run_forever(scheduler, shutdown_rx).await;
    Ok(())
}
