//! hexdist integration test harness.
//!
//! Each test starts a scheduler on loopback (listener, pool, in-memory
//! queue, distributor) and connects in-process worker peers over real TCP.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use hexdist_core::task::{AnalyzeMoveOutput, JobResult, MoveAndValue, WorkerTask};
use hexdist_services::{
    AdmissionSettings, AdmissionTable, DistributorSettings, JobDistributor, JobId, MemoryQueue,
    MemoryQueueSettings, PeerClient, PeerListener, PeerPool, QueueBackend, TaskExecutor,
};

mod composite;
mod failures;
mod scheduling;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Scheduler {
    pub pool: Arc<PeerPool>,
    pub queue: Arc<MemoryQueue>,
    pub admitting: AdmissionTable,
    pub peer_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    distributor: JoinHandle<()>,
}

/// Start a scheduler whose queue allows `max_attempts` per job.
pub async fn start_scheduler(max_attempts: u32) -> Result<Scheduler> {
    let pool = Arc::new(PeerPool::new());
    let queue = Arc::new(MemoryQueue::new(MemoryQueueSettings {
        max_attempts,
        ..MemoryQueueSettings::default()
    }));
    let admitting: AdmissionTable = Arc::new(DashMap::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    let listener = PeerListener::bind(
        "127.0.0.1:0",
        pool.clone(),
        AdmissionSettings {
            benchmark_timeout: Duration::from_secs(5),
            ..AdmissionSettings::default()
        },
        admitting.clone(),
        shutdown_tx.subscribe(),
    )
    .await
    .context("failed to bind peer listener")?;
    let peer_addr = listener.local_addr()?;
    tokio::spawn(listener.run());

    let distributor = JobDistributor::new(
        queue.clone(),
        pool.clone(),
        DistributorSettings {
            shutdown_grace: Duration::from_secs(2),
            ..DistributorSettings::default()
        },
    );
    let distributor = tokio::spawn(distributor.run(shutdown_tx.subscribe()));

    Ok(Scheduler {
        pool,
        queue,
        admitting,
        peer_addr,
        shutdown_tx,
        distributor,
    })
}

impl Scheduler {
    /// Connect an in-process worker. Aborting the handle drops its socket.
    pub fn spawn_peer(&self, executor: impl TaskExecutor + 'static, secondary: bool) -> JoinHandle<()> {
        let client = PeerClient::new(Arc::new(executor)).secondary(secondary);
        let addr = self.peer_addr.to_string();
        tokio::spawn(async move {
            let _ = client.connect(&addr).await;
        })
    }

    pub async fn wait_for_peers(&self, count: usize) -> Result<()> {
        wait_until(Duration::from_secs(5), || self.pool.len() == count)
            .await
            .with_context(|| format!("expected {count} peers, have {}", self.pool.len()))
    }

    pub async fn submit(&self, task: WorkerTask) -> Result<JobResult> {
        let id = self.queue.enqueue(task).await?;
        self.finished(id).await
    }

    pub async fn finished(&self, id: JobId) -> Result<JobResult> {
        tokio::time::timeout(Duration::from_secs(10), self.queue.wait_until_finished(id))
            .await
            .context("job did not finish in time")?
            .map_err(Into::into)
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), self.distributor)
            .await
            .context("distributor did not stop")??;
        Ok(())
    }
}

pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not reached within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// A calculate-move task that is not the benchmark.
pub fn move_request(moves_history: &str) -> WorkerTask {
    let WorkerTask::CalculateMove(mut input) = WorkerTask::benchmark() else {
        unreachable!("benchmark is a calculate-move task");
    };
    input.game.moves_history = moves_history.to_string();
    input.game.size = 11;
    WorkerTask::CalculateMove(input)
}

// ── Test executors ────────────────────────────────────────────────────────────

/// Answers every task like an engine would, recording who ran what.
#[derive(Clone)]
pub struct FakeEngine {
    pub name: &'static str,
    pub delay: Duration,
    pub log: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeEngine {
    pub fn new(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            name,
            delay: Duration::ZERO,
            log,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TaskExecutor for FakeEngine {
    async fn execute(&self, task: WorkerTask) -> Result<serde_json::Value, String> {
        if task == WorkerTask::benchmark() {
            return Ok(json!("e5"));
        }
        self.log.lock().unwrap().push(self.name);
        tokio::time::sleep(self.delay).await;

        match task {
            WorkerTask::CalculateMove(_) => Ok(json!({ "move": "d4", "by": self.name })),
            WorkerTask::AnalyzeMove(input) => {
                // Black's positions are good for white, white's are bad.
                let white_win = 0.1 * (input.move_index as f64 + 1.0);
                let output = AnalyzeMoveOutput {
                    move_index: input.move_index,
                    white_win,
                    color: input.color,
                    played: MoveAndValue {
                        coord: input.played_move.clone(),
                        value: 0.4,
                        white_win: None,
                    },
                    best_moves: vec![
                        MoveAndValue {
                            coord: input.played_move.clone(),
                            value: 0.4,
                            white_win: None,
                        },
                        MoveAndValue {
                            coord: "k11".into(),
                            value: 0.1,
                            white_win: Some(0.99),
                        },
                    ],
                };
                serde_json::to_value(output).map_err(|e| e.to_string())
            }
        }
    }
}
