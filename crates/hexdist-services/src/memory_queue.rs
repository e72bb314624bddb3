//! In-process queue backend.
//!
//! FIFO waiting list, attempt counting, per-delivery locks with expiry and a
//! stalled-job sweep. Nothing survives a restart; a durable backend
//! implements the same [`QueueBackend`] trait.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Notify};

use hexdist_core::config::QueueConfig;
use hexdist_core::task::{JobResult, WorkerTask};

use crate::error::SchedulerError;
use crate::queue::{JobHandle, JobId, JobWatch, QueueBackend, QueueCounts};

#[derive(Debug, Clone)]
pub struct MemoryQueueSettings {
    pub max_attempts: u32,
    pub lock_duration: Duration,
    pub stalled_interval: Duration,
    pub max_stalled_count: u32,
    pub retain_finished: usize,
}

impl From<&QueueConfig> for MemoryQueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            lock_duration: config.lock_duration(),
            stalled_interval: config.stalled_interval(),
            max_stalled_count: config.max_stalled_count,
            retain_finished: config.retain_finished,
        }
    }
}

impl Default for MemoryQueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

enum JobState {
    Waiting,
    Active { lock_token: u64, expires: Instant },
    Completed(serde_json::Value),
    Failed(String),
}

struct JobRecord {
    task: WorkerTask,
    attempts: u32,
    stalled: u32,
    state: JobState,
    waiters: Vec<oneshot::Sender<JobResult>>,
}

impl JobRecord {
    fn terminal_result(&self) -> Option<JobResult> {
        match &self.state {
            JobState::Completed(data) => Some(JobResult::Success(data.clone())),
            JobState::Failed(error) => Some(JobResult::Failure(error.clone())),
            _ => None,
        }
    }

    fn finish(&mut self, state: JobState) {
        self.state = state;
        if let Some(result) = self.terminal_result() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(result.clone());
            }
        }
    }
}

#[derive(Default)]
struct State {
    next_job_id: u64,
    next_lock_token: u64,
    jobs: HashMap<JobId, JobRecord>,
    waiting: VecDeque<JobId>,
    finished: VecDeque<JobId>,
}

impl State {
    fn record_finished(&mut self, id: JobId, retain: usize) {
        self.finished.push_back(id);
        while self.finished.len() > retain {
            if let Some(old) = self.finished.pop_front() {
                self.jobs.remove(&old);
            }
        }
    }

    /// The job behind `handle`, if the handle still owns its lock.
    fn locked_job(&mut self, handle: &JobHandle) -> Result<&mut JobRecord, SchedulerError> {
        let record = self
            .jobs
            .get_mut(&handle.id)
            .ok_or_else(|| SchedulerError::QueueBackend(format!("{}: unknown job", handle.id)))?;
        match record.state {
            JobState::Active { lock_token, .. } if lock_token == handle.lock_token => Ok(record),
            _ => Err(SchedulerError::QueueBackend(format!(
                "{}: lock lost (attempt {})",
                handle.id, handle.attempt
            ))),
        }
    }
}

pub struct MemoryQueue {
    state: Mutex<State>,
    job_available: Notify,
    settings: MemoryQueueSettings,
}

impl MemoryQueue {
    pub fn new(settings: MemoryQueueSettings) -> Self {
        Self {
            state: Mutex::new(State::default()),
            job_available: Notify::new(),
            settings,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, task: WorkerTask, waiters: Vec<oneshot::Sender<JobResult>>) -> JobId {
        let id = {
            let mut state = self.state();
            state.next_job_id += 1;
            let id = JobId(state.next_job_id);
            tracing::debug!(job = %id, kind = task.kind(), "job enqueued");
            state.jobs.insert(
                id,
                JobRecord {
                    task,
                    attempts: 0,
                    stalled: 0,
                    state: JobState::Waiting,
                    waiters,
                },
            );
            state.waiting.push_back(id);
            id
        };
        self.job_available.notify_one();
        id
    }

    /// True if `handle` finished in a terminal state or its delivery is gone.
    fn already_finished(state: &State, handle: &JobHandle, completed: bool) -> bool {
        match state.jobs.get(&handle.id).map(|r| &r.state) {
            Some(JobState::Completed(_)) => completed,
            Some(JobState::Failed(_)) => !completed,
            _ => false,
        }
    }

    /// Return expired active jobs to the waiting list. A job that stalls
    /// more than `max_stalled_count` times is failed instead.
    pub fn recover_stalled(&self) -> usize {
        let now = Instant::now();
        let mut recovered = 0;
        let mut state = self.state();
        let expired: Vec<JobId> = state
            .jobs
            .iter()
            .filter_map(|(id, r)| match r.state {
                JobState::Active { expires, .. } if expires <= now => Some(*id),
                _ => None,
            })
            .collect();

        for id in expired {
            let Some(record) = state.jobs.get_mut(&id) else {
                continue;
            };
            record.stalled += 1;
            if record.stalled > self.settings.max_stalled_count {
                let error = format!("job stalled more than {} times", self.settings.max_stalled_count);
                tracing::warn!(job = %id, stalled = record.stalled, "stalled job failed");
                record.finish(JobState::Failed(error));
                state.record_finished(id, self.settings.retain_finished);
            } else {
                tracing::info!(job = %id, stalled = record.stalled, "stalled job moved back to waiting");
                record.state = JobState::Waiting;
                state.waiting.push_back(id);
                recovered += 1;
                self.job_available.notify_one();
            }
        }
        recovered
    }

    /// Periodically sweep for stalled jobs until shutdown.
    pub async fn run_stall_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.settings.stalled_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("stall sweeper shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let recovered = self.recover_stalled();
                    if recovered > 0 {
                        tracing::info!(recovered, "recovered stalled jobs");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn enqueue(&self, task: WorkerTask) -> Result<JobId, SchedulerError> {
        Ok(self.insert(task, Vec::new()))
    }

    async fn enqueue_watched(&self, task: WorkerTask) -> Result<JobWatch, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        let id = self.insert(task, vec![tx]);
        Ok(JobWatch::new(id, rx))
    }

    async fn dequeue(&self, consumer: &str) -> Result<Option<JobHandle>, SchedulerError> {
        let mut state = self.state();
        while let Some(id) = state.waiting.pop_front() {
            state.next_lock_token += 1;
            let lock_token = state.next_lock_token;
            let Some(record) = state.jobs.get_mut(&id) else {
                continue;
            };
            if !matches!(record.state, JobState::Waiting) {
                continue;
            }
            record.attempts += 1;
            record.state = JobState::Active {
                lock_token,
                expires: Instant::now() + self.settings.lock_duration,
            };
            tracing::debug!(job = %id, attempt = record.attempts, consumer, "job dequeued");
            return Ok(Some(JobHandle {
                id,
                task: record.task.clone(),
                attempt: record.attempts,
                lock_token,
            }));
        }
        Ok(None)
    }

    async fn wait_for_job(&self) {
        self.job_available.notified().await;
    }

    async fn ack(&self, handle: &JobHandle, data: serde_json::Value) -> Result<(), SchedulerError> {
        let mut state = self.state();
        if Self::already_finished(&state, handle, true) {
            return Ok(());
        }
        state.locked_job(handle)?.finish(JobState::Completed(data));
        state.record_finished(handle.id, self.settings.retain_finished);
        tracing::info!(job = %handle.id, attempt = handle.attempt, "job completed");
        Ok(())
    }

    async fn fail(&self, handle: &JobHandle, error: &str) -> Result<(), SchedulerError> {
        let mut state = self.state();
        if Self::already_finished(&state, handle, false) {
            return Ok(());
        }
        let max_attempts = self.settings.max_attempts;
        let record = state.locked_job(handle)?;

        if record.attempts >= max_attempts {
            record.finish(JobState::Failed(error.to_string()));
            state.record_finished(handle.id, self.settings.retain_finished);
            tracing::warn!(job = %handle.id, attempts = max_attempts, %error, "job failed permanently");
        } else {
            record.state = JobState::Waiting;
            state.waiting.push_back(handle.id);
            drop(state);
            tracing::info!(job = %handle.id, attempt = handle.attempt, %error, "job failed, will retry");
            self.job_available.notify_one();
        }
        Ok(())
    }

    async fn extend_lock(&self, handle: &JobHandle) -> Result<(), SchedulerError> {
        let lock_duration = self.settings.lock_duration;
        let mut state = self.state();
        let record = state.locked_job(handle)?;
        record.state = JobState::Active {
            lock_token: handle.lock_token,
            expires: Instant::now() + lock_duration,
        };
        Ok(())
    }

    async fn wait_until_finished(&self, id: JobId) -> Result<JobResult, SchedulerError> {
        let rx = {
            let mut state = self.state();
            let record = state
                .jobs
                .get_mut(&id)
                .ok_or_else(|| SchedulerError::QueueBackend(format!("{id}: unknown job")))?;
            if let Some(result) = record.terminal_result() {
                return Ok(result);
            }
            let (tx, rx) = oneshot::channel();
            record.waiters.push(tx);
            rx
        };
        rx.await
            .map_err(|_| SchedulerError::QueueBackend(format!("{id}: job dropped before finishing")))
    }

    async fn counts(&self) -> QueueCounts {
        let state = self.state();
        let mut counts = QueueCounts::default();
        for record in state.jobs.values() {
            match record.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active { .. } => counts.active += 1,
                JobState::Completed(_) => counts.completed += 1,
                JobState::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> MemoryQueueSettings {
        MemoryQueueSettings {
            max_attempts: 3,
            lock_duration: Duration::from_secs(60),
            stalled_interval: Duration::from_secs(30),
            max_stalled_count: 1,
            retain_finished: 100,
        }
    }

    #[tokio::test]
    async fn dequeue_is_fifo_and_counts_attempts() {
        let queue = MemoryQueue::new(settings());
        let a = queue.enqueue(WorkerTask::benchmark()).await.unwrap();
        let b = queue.enqueue(WorkerTask::benchmark()).await.unwrap();

        let first = queue.dequeue("t").await.unwrap().unwrap();
        let second = queue.dequeue("t").await.unwrap().unwrap();
        assert_eq!((first.id, second.id), (a, b));
        assert_eq!(first.attempt, 1);
        assert!(queue.dequeue("t").await.unwrap().is_none());

        let counts = queue.counts().await;
        assert_eq!(counts.active, 2);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn ack_resolves_waiters() {
        let queue = Arc::new(MemoryQueue::new(settings()));
        let id = queue.enqueue(WorkerTask::benchmark()).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_until_finished(id).await })
        };

        let handle = queue.dequeue("t").await.unwrap().unwrap();
        queue.ack(&handle, json!({"move": "e5"})).await.unwrap();
        // Idempotent.
        queue.ack(&handle, json!(null)).await.unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result, JobResult::Success(json!({"move": "e5"})));
        assert_eq!(queue.counts().await.completed, 1);
    }

    #[tokio::test]
    async fn fail_retries_until_max_attempts() {
        let queue = MemoryQueue::new(settings());
        let id = queue.enqueue(WorkerTask::benchmark()).await.unwrap();

        for attempt in 1..=3 {
            let handle = queue.dequeue("t").await.unwrap().expect("job should be waiting");
            assert_eq!(handle.attempt, attempt);
            queue.fail(&handle, &format!("boom {attempt}")).await.unwrap();
        }

        assert!(queue.dequeue("t").await.unwrap().is_none());
        assert_eq!(
            queue.wait_until_finished(id).await.unwrap(),
            JobResult::Failure("boom 3".into())
        );
        assert_eq!(queue.counts().await.failed, 1);
    }

    #[tokio::test]
    async fn stalled_job_is_redelivered_and_old_handle_goes_stale() {
        let queue = MemoryQueue::new(MemoryQueueSettings {
            lock_duration: Duration::ZERO,
            ..settings()
        });
        queue.enqueue(WorkerTask::benchmark()).await.unwrap();

        let stale = queue.dequeue("t").await.unwrap().unwrap();
        assert_eq!(queue.recover_stalled(), 1);

        let fresh = queue.dequeue("t").await.unwrap().unwrap();
        assert_eq!(fresh.id, stale.id);
        assert_eq!(fresh.attempt, 2);

        let err = queue.ack(&stale, json!(1)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::QueueBackend(_)));
        queue.ack(&fresh, json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn repeatedly_stalled_job_fails() {
        let queue = MemoryQueue::new(MemoryQueueSettings {
            lock_duration: Duration::ZERO,
            ..settings()
        });
        let id = queue.enqueue(WorkerTask::benchmark()).await.unwrap();

        queue.dequeue("t").await.unwrap().unwrap();
        assert_eq!(queue.recover_stalled(), 1);
        queue.dequeue("t").await.unwrap().unwrap();
        assert_eq!(queue.recover_stalled(), 0);

        match queue.wait_until_finished(id).await.unwrap() {
            JobResult::Failure(msg) => assert!(msg.contains("stalled"), "{msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn extend_lock_prevents_stall() {
        let queue = MemoryQueue::new(MemoryQueueSettings {
            lock_duration: Duration::from_millis(50),
            ..settings()
        });
        queue.enqueue(WorkerTask::benchmark()).await.unwrap();
        let handle = queue.dequeue("t").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.extend_lock(&handle).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.recover_stalled(), 0);
        queue.ack(&handle, json!(null)).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_job_wakes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::new(settings()));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.wait_for_job().await;
                queue.dequeue("t").await.unwrap().map(|h| h.id)
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = queue.enqueue(WorkerTask::benchmark()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(id));
    }

    #[tokio::test]
    async fn finished_jobs_are_trimmed_to_retention() {
        let queue = MemoryQueue::new(MemoryQueueSettings {
            retain_finished: 1,
            ..settings()
        });
        let first = queue.enqueue(WorkerTask::benchmark()).await.unwrap();
        let second = queue.enqueue(WorkerTask::benchmark()).await.unwrap();
        for _ in 0..2 {
            let handle = queue.dequeue("t").await.unwrap().unwrap();
            queue.ack(&handle, json!(null)).await.unwrap();
        }

        assert!(queue.wait_until_finished(first).await.is_err());
        assert!(queue.wait_until_finished(second).await.is_ok());
        assert_eq!(queue.counts().await.completed, 1);
    }

    #[tokio::test]
    async fn watched_job_survives_retention() {
        let queue = MemoryQueue::new(MemoryQueueSettings {
            retain_finished: 0,
            ..settings()
        });
        let watch = queue.enqueue_watched(WorkerTask::benchmark()).await.unwrap();
        let id = watch.id;

        let handle = queue.dequeue("t").await.unwrap().unwrap();
        queue.ack(&handle, json!("e5")).await.unwrap();

        // Pruned from the queue, but the attached waiter already has it.
        assert!(queue.wait_until_finished(id).await.is_err());
        assert_eq!(watch.finished().await.unwrap(), JobResult::Success(json!("e5")));
    }
}
