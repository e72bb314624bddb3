//! Peer lifecycle monitor: logs pool composition on every change.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use hexdist_services::{PeerEvent, PeerPool};

pub async fn run(pool: Arc<PeerPool>, mut shutdown: broadcast::Receiver<()>) {
    let mut events = pool.subscribe();

    loop {
        let event = tokio::select! {
            _ = shutdown.recv() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                let counts = pool.counts();
                let (what, peer) = match event {
                    PeerEvent::Connected(id) => ("peer connected", id),
                    PeerEvent::Disconnected(id) => ("peer disconnected", id),
                };
                tracing::info!(
                    %peer,
                    primary = counts.primary,
                    secondary = counts.secondary,
                    "{what}"
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "monitor lagged behind peer events");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
