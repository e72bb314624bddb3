//! Peer listener: accepts worker sockets and runs the admission benchmark.
//!
//! Every new connection gets the canonical benchmark job. A successful
//! answer sets the peer's power from the elapsed time and registers it; a
//! failure, error or timeout closes the socket and the peer never joins the
//! pool. Admitted peers are supervised until their socket closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use hexdist_core::config::PeerConfig;
use hexdist_core::task::{JobResult, WorkerTask};

use crate::error::SchedulerError;
use crate::peer::{PeerConnection, PeerId};
use crate::pool::PeerPool;

/// Connections currently running the benchmark.
pub type AdmissionTable = Arc<DashMap<PeerId, Option<SocketAddr>>>;

#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub benchmark_timeout: Duration,
    pub keepalive: Duration,
    pub max_frame_bytes: u32,
    pub power_constant: f64,
}

impl From<&PeerConfig> for AdmissionSettings {
    fn from(config: &PeerConfig) -> Self {
        Self {
            benchmark_timeout: config.benchmark_timeout(),
            keepalive: config.keepalive(),
            max_frame_bytes: config.max_frame_bytes,
            power_constant: config.power_constant,
        }
    }
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self::from(&PeerConfig::default())
    }
}

pub struct PeerListener {
    listener: TcpListener,
    pool: Arc<PeerPool>,
    settings: Arc<AdmissionSettings>,
    admitting: AdmissionTable,
    shutdown: broadcast::Receiver<()>,
}

impl PeerListener {
    pub async fn bind(
        addr: &str,
        pool: Arc<PeerPool>,
        settings: AdmissionSettings,
        admitting: AdmissionTable,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self, SchedulerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            pool,
            settings: Arc::new(settings),
            admitting,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SchedulerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown.
    pub async fn run(mut self) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "peer listener started");
        }

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("peer listener shutting down");
                    return;
                }

                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    if let Err(e) = set_keepalive(&stream, self.settings.keepalive) {
                        tracing::warn!(%addr, error = %e, "failed to enable keep-alive");
                    }

                    let peer = PeerConnection::from_tcp(stream, self.settings.max_frame_bytes);
                    tracing::debug!(peer = %peer.id(), %addr, "peer connected, benchmarking");

                    let pool = self.pool.clone();
                    let settings = self.settings.clone();
                    let admitting = self.admitting.clone();
                    tokio::spawn(async move {
                        admitting.insert(peer.id(), Some(addr));
                        let outcome = admit(peer.clone(), pool, &settings).await;
                        admitting.remove(&peer.id());
                        if let Err(e) = outcome {
                            tracing::warn!(peer = %peer.id(), %addr, error = %e, "peer rejected");
                        }
                    });
                }
            }
        }
    }
}

fn set_keepalive(stream: &TcpStream, every: Duration) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(every).with_interval(every);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Benchmark `peer` and register it on success. On failure the connection
/// is closed and the error returned.
pub async fn admit(
    peer: Arc<PeerConnection>,
    pool: Arc<PeerPool>,
    settings: &AdmissionSettings,
) -> Result<(), SchedulerError> {
    let power = match benchmark(&peer, settings).await {
        Ok(power) => power,
        Err(e) => {
            peer.close().await;
            return Err(e);
        }
    };

    peer.set_power(power);
    pool.register(peer.clone());
    tracing::info!(
        peer = %peer.id(),
        addr = ?peer.addr(),
        power,
        secondary = peer.is_secondary(),
        "peer admitted"
    );

    tokio::spawn(supervise(peer, pool));
    Ok(())
}

/// Send the benchmark job and turn the elapsed time into a power rating.
pub async fn benchmark(
    peer: &PeerConnection,
    settings: &AdmissionSettings,
) -> Result<f64, SchedulerError> {
    let started = Instant::now();
    let sent = tokio::time::timeout(settings.benchmark_timeout, peer.send(&WorkerTask::benchmark()))
        .await
        .map_err(|_| {
            SchedulerError::AdmissionRejected(format!(
                "benchmark timed out after {:?}",
                settings.benchmark_timeout
            ))
        })?;

    match sent {
        Ok(JobResult::Success(_)) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            tracing::debug!(peer = %peer.id(), elapsed_ms, "benchmark finished");
            Ok(settings.power_constant / elapsed_ms.max(1.0))
        }
        Ok(JobResult::Failure(error)) => Err(SchedulerError::AdmissionRejected(error)),
        Err(e) => Err(SchedulerError::AdmissionRejected(e.to_string())),
    }
}

/// Keep the pool in step with the peer until its socket closes.
async fn supervise(peer: Arc<PeerConnection>, pool: Arc<PeerPool>) {
    let mut tiers = peer.tier_changes();
    loop {
        tokio::select! {
            _ = peer.closed() => break,
            changed = tiers.changed() => {
                if changed.is_err() {
                    break;
                }
                // Tier membership feeds selection; waiters must re-check.
                pool.notify_available();
            }
        }
    }

    pool.unregister(peer.id());
    peer.close().await;
    tracing::info!(peer = %peer.id(), addr = ?peer.addr(), "peer disconnected");
}
