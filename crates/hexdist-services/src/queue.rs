//! Work-queue contract consumed by the distributor.
//!
//! The backend owns persistence, attempt counting and stalled-job recovery.
//! The scheduler only enqueues, dequeues with its consumer token, and
//! reports the outcome.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use hexdist_core::task::{JobResult, WorkerTask};

use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A dequeued job. Ack or fail it with the same handle.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: JobId,
    pub task: WorkerTask,
    /// 1 on first delivery.
    pub attempt: u32,
    /// Identifies this delivery. A handle whose lock was lost is stale.
    pub lock_token: u64,
}

/// Completion of a job enqueued with its waiter already attached.
#[derive(Debug)]
pub struct JobWatch {
    pub id: JobId,
    rx: oneshot::Receiver<JobResult>,
}

impl JobWatch {
    pub fn new(id: JobId, rx: oneshot::Receiver<JobResult>) -> Self {
        Self { id, rx }
    }

    pub async fn finished(self) -> Result<JobResult, SchedulerError> {
        let id = self.id;
        self.rx
            .await
            .map_err(|_| SchedulerError::QueueBackend(format!("{id}: job dropped before finishing")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, task: WorkerTask) -> Result<JobId, SchedulerError>;

    /// Enqueue with a completion waiter attached in the same step, so the
    /// result cannot be pruned by retention before it is observed.
    async fn enqueue_watched(&self, task: WorkerTask) -> Result<JobWatch, SchedulerError>;

    /// Take the next waiting job, if any, and lock it for `consumer`.
    async fn dequeue(&self, consumer: &str) -> Result<Option<JobHandle>, SchedulerError>;

    /// Resolves when a job may have become available.
    async fn wait_for_job(&self);

    async fn ack(&self, handle: &JobHandle, data: serde_json::Value) -> Result<(), SchedulerError>;

    /// Record a failed attempt. The backend decides whether to retry.
    async fn fail(&self, handle: &JobHandle, error: &str) -> Result<(), SchedulerError>;

    /// Keep the lock of a long-running job alive.
    async fn extend_lock(&self, handle: &JobHandle) -> Result<(), SchedulerError>;

    /// Resolves with the terminal result of a job.
    async fn wait_until_finished(&self, id: JobId) -> Result<JobResult, SchedulerError>;

    async fn counts(&self) -> QueueCounts;
}
