//! Job distributor: the scheduling loop.
//!
//! Pull a job, lock the best peer, then hand both to a dispatch task and go
//! straight back to the queue. In-flight work is therefore bounded by the
//! number of peers that can be locked at once. Dispatch tasks live in a
//! `JoinSet` so panics are logged and shutdown can wait for them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

use hexdist_core::config::{QueueConfig, SchedulerConfig};
use hexdist_core::task::JobResult;

use crate::pool::{PeerLease, PeerPool};
use crate::queue::{JobHandle, QueueBackend};

#[derive(Debug, Clone)]
pub struct DistributorSettings {
    pub consumer_token: String,
    /// How often a held job's queue lock is renewed.
    pub lock_renew_interval: Duration,
    pub shutdown_grace: Duration,
    /// Pause after a queue error before dequeuing again.
    pub error_backoff: Duration,
}

impl DistributorSettings {
    pub fn from_config(scheduler: &SchedulerConfig, queue: &QueueConfig) -> Self {
        Self {
            consumer_token: scheduler.consumer_token.clone(),
            lock_renew_interval: (queue.lock_duration() / 2).max(Duration::from_millis(100)),
            shutdown_grace: scheduler.shutdown_grace(),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl Default for DistributorSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default(), &QueueConfig::default())
    }
}

enum PeerWait {
    Leased(PeerLease),
    LockLost,
    Shutdown,
}

pub struct JobDistributor {
    queue: Arc<dyn QueueBackend>,
    pool: Arc<PeerPool>,
    settings: DistributorSettings,
}

impl JobDistributor {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        pool: Arc<PeerPool>,
        settings: DistributorSettings,
    ) -> Self {
        Self {
            queue,
            pool,
            settings,
        }
    }

    /// Run until `shutdown` fires, then wait up to the grace period for
    /// in-flight dispatches.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(consumer = %self.settings.consumer_token, "job distributor started");
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            while let Some(Some(done)) = in_flight.join_next().now_or_never() {
                log_join(done);
            }

            let handle = tokio::select! {
                _ = shutdown.recv() => break,
                handle = self.next_job() => handle,
            };

            let lease = match self.acquire_peer(&handle, &mut shutdown).await {
                PeerWait::Leased(lease) => lease,
                PeerWait::LockLost => continue,
                PeerWait::Shutdown => {
                    // Still locked in the queue; stalled recovery hands it out again.
                    tracing::info!(job = %handle.id, "shutdown while waiting for a peer");
                    break;
                }
            };

            in_flight.spawn(dispatch(
                self.queue.clone(),
                handle,
                lease,
                self.settings.lock_renew_interval,
            ));
        }

        tracing::info!(in_flight = in_flight.len(), "job distributor draining");
        let drained = tokio::time::timeout(self.settings.shutdown_grace, async {
            while let Some(done) = in_flight.join_next().await {
                log_join(done);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = in_flight.len(),
                "grace period elapsed, aborting dispatches"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
        tracing::info!("job distributor stopped");
    }

    /// Dequeue, blocking on the queue's availability signal when empty.
    async fn next_job(&self) -> JobHandle {
        loop {
            match self.queue.dequeue(&self.settings.consumer_token).await {
                Ok(Some(handle)) => return handle,
                Ok(None) => self.queue.wait_for_job().await,
                Err(e) => {
                    tracing::warn!(error = %e, "dequeue failed");
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
            }
        }
    }

    /// Wait for a peer while keeping the job's lock alive.
    ///
    /// If the lock cannot be renewed the queue may already have handed the
    /// job to someone else, so the handle is dropped without dispatching.
    async fn acquire_peer(
        &self,
        handle: &JobHandle,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> PeerWait {
        let every = self.settings.lock_renew_interval;
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

        loop {
            tokio::select! {
                _ = shutdown.recv() => return PeerWait::Shutdown,
                lease = self.pool.acquire() => return PeerWait::Leased(lease),
                _ = renew.tick() => {
                    tracing::debug!(job = %handle.id, "no peer available yet");
                    if let Err(e) = self.queue.extend_lock(handle).await {
                        tracing::warn!(job = %handle.id, error = %e, "job lock lost while waiting for a peer");
                        return PeerWait::LockLost;
                    }
                }
            }
        }
    }
}

/// Send one job to its peer and record the outcome. The lease is released
/// when this returns, whatever happened.
async fn dispatch(
    queue: Arc<dyn QueueBackend>,
    handle: JobHandle,
    lease: PeerLease,
    renew_every: Duration,
) {
    let peer = lease.id();
    tracing::info!(
        job = %handle.id,
        %peer,
        attempt = handle.attempt,
        kind = handle.task.kind(),
        "job dispatched"
    );

    let started = Instant::now();
    let outcome = {
        let send = lease.send(&handle.task);
        tokio::pin!(send);
        let mut renew =
            tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);
        loop {
            tokio::select! {
                outcome = &mut send => break outcome,
                _ = renew.tick() => {
                    if let Err(e) = queue.extend_lock(&handle).await {
                        tracing::warn!(job = %handle.id, error = %e, "failed to extend job lock");
                    }
                }
            }
        }
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let recorded = match outcome {
        Ok(JobResult::Success(data)) => {
            tracing::info!(job = %handle.id, %peer, elapsed_ms, "job succeeded");
            queue.ack(&handle, data).await
        }
        Ok(JobResult::Failure(error)) => {
            tracing::warn!(job = %handle.id, %peer, elapsed_ms, %error, "job failed on peer");
            queue.fail(&handle, &error).await
        }
        Err(e) => {
            tracing::warn!(job = %handle.id, %peer, elapsed_ms, error = %e, "dispatch failed");
            queue.fail(&handle, &e.to_string()).await
        }
    };

    if let Err(e) = recorded {
        tracing::error!(job = %handle.id, error = %e, "failed to record job outcome");
    }
    drop(lease);
}

fn log_join(done: Result<(), JoinError>) {
    if let Err(e) = done {
        if e.is_panic() {
            tracing::error!(error = %e, "dispatch task panicked");
        }
    }
}
