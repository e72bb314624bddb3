use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::*;

// ══ Admission ═════════════════════════════════════════════════════════════════

/// Cannot even run the benchmark.
struct NoEngine;

#[async_trait]
impl TaskExecutor for NoEngine {
    async fn execute(&self, _task: WorkerTask) -> Result<serde_json::Value, String> {
        Err("engine binary not found".into())
    }
}

#[tokio::test]
async fn failed_benchmark_is_never_admitted() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let peer = scheduler.spawn_peer(NoEngine, false);

    // The scheduler hangs up, which ends the client.
    wait_until(Duration::from_secs(5), || peer.is_finished()).await?;
    wait_until(Duration::from_secs(5), || scheduler.admitting.is_empty()).await?;
    assert!(scheduler.pool.is_empty());

    scheduler.shutdown().await
}

// ══ Dispatch failures ═════════════════════════════════════════════════════════

/// Passes the benchmark, then never answers.
#[derive(Clone, Default)]
struct Hangs {
    started: Arc<AtomicBool>,
}

#[async_trait]
impl TaskExecutor for Hangs {
    async fn execute(&self, task: WorkerTask) -> Result<serde_json::Value, String> {
        if task == WorkerTask::benchmark() {
            return Ok(json!("e5"));
        }
        self.started.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test]
async fn disconnect_during_job_fails_it() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let hangs = Hangs::default();
    let peer = scheduler.spawn_peer(hangs.clone(), false);
    scheduler.wait_for_peers(1).await?;

    let id = scheduler.queue.enqueue(move_request("a1")).await?;
    wait_until(Duration::from_secs(5), || hangs.started.load(Ordering::SeqCst)).await?;
    peer.abort();

    assert_eq!(
        scheduler.finished(id).await?,
        JobResult::Failure("connection closed".into())
    );
    scheduler.wait_for_peers(0).await?;

    scheduler.shutdown().await
}

/// Fails the first real job it gets.
#[derive(Clone, Default)]
struct FailsOnce {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskExecutor for FailsOnce {
    async fn execute(&self, task: WorkerTask) -> Result<serde_json::Value, String> {
        if task == WorkerTask::benchmark() {
            return Ok(json!("e5"));
        }
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => Err("engine crashed".into()),
            _ => Ok(json!("d4")),
        }
    }
}

#[tokio::test]
async fn failed_job_is_retried_until_it_succeeds() -> Result<()> {
    let scheduler = start_scheduler(2).await?;
    let executor = FailsOnce::default();
    scheduler.spawn_peer(executor.clone(), false);
    scheduler.wait_for_peers(1).await?;

    let result = scheduler.submit(move_request("a1")).await?;
    assert_eq!(result, JobResult::Success(json!("d4")));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    scheduler.shutdown().await
}

#[tokio::test]
async fn failure_is_final_after_max_attempts() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let executor = FailsOnce::default();
    scheduler.spawn_peer(executor.clone(), false);
    scheduler.wait_for_peers(1).await?;

    let result = scheduler.submit(move_request("a1")).await?;
    assert_eq!(result, JobResult::Failure("engine crashed".into()));
    assert_eq!(scheduler.queue.counts().await.failed, 1);

    scheduler.shutdown().await
}
