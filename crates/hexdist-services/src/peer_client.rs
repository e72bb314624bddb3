//! Worker side of the peer protocol.
//!
//! Connects to a scheduler, optionally declares itself secondary, then runs
//! every `job` frame through a [`TaskExecutor`] and answers with a
//! correlated `job_result`. Jobs are handled one at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use hexdist_core::task::{JobResult, WorkerTask};
use hexdist_core::wire::{Frame, FrameKind, PeerMessage, DEFAULT_MAX_FRAME_BYTES};

use crate::error::SchedulerError;

/// Runs tasks on behalf of a peer. Engine adapters implement this.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: WorkerTask) -> Result<serde_json::Value, String>;
}

#[derive(Clone)]
pub struct PeerClient {
    executor: Arc<dyn TaskExecutor>,
    secondary: bool,
    reconnect_delay: Duration,
}

impl PeerClient {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            executor,
            secondary: false,
            reconnect_delay: Duration::from_secs(2),
        }
    }

    /// Ask to be scheduled only when no primary peer is connected.
    pub fn secondary(mut self, secondary: bool) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub async fn connect(&self, addr: &str) -> Result<(), SchedulerError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::info!(%addr, secondary = self.secondary, "connected to scheduler");
        self.serve(stream).await
    }

    /// Connect, serve, and reconnect after a delay, until shutdown.
    pub async fn run_forever(&self, addr: &str, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                outcome = self.connect(addr) => match outcome {
                    Ok(()) => tracing::info!(%addr, "scheduler closed the connection"),
                    Err(e) => tracing::warn!(%addr, error = %e, "scheduler connection failed"),
                },
            }

            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    /// Serve jobs on an established stream until it closes.
    pub async fn serve<S>(&self, stream: S) -> Result<(), SchedulerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        if self.secondary {
            let frame = PeerMessage::SetSecondary(true).to_frame()?;
            writer.write_all(&frame.to_bytes()).await?;
        }

        let mut buf = BytesMut::with_capacity(8 * 1024);
        loop {
            let Some(frame) = Frame::decode(&mut buf, DEFAULT_MAX_FRAME_BYTES)? else {
                if reader.read_buf(&mut buf).await? == 0 {
                    return Ok(());
                }
                continue;
            };

            match frame.frame_kind() {
                Ok(FrameKind::Job) => {
                    let result = self.run_job(&frame).await;
                    let reply = PeerMessage::JobResult {
                        token: frame.token,
                        result,
                    }
                    .to_frame()?;
                    writer.write_all(&reply.to_bytes()).await?;
                    writer.flush().await?;
                }
                Ok(kind) => tracing::warn!(?kind, "ignoring frame not meant for a peer"),
                Err(e) => tracing::warn!(error = %e, "skipping unrecognised frame"),
            }
        }
    }

    async fn run_job(&self, frame: &Frame) -> JobResult {
        let task: WorkerTask = match frame.decode_json() {
            Ok(task) => task,
            Err(e) => return JobResult::Failure(format!("unsupported task: {e}")),
        };

        let kind = task.kind();
        tracing::debug!(token = frame.token, kind, "running job");
        match self.executor.execute(task).await {
            Ok(data) => JobResult::Success(data),
            Err(error) => {
                tracing::warn!(kind, %error, "job failed");
                JobResult::Failure(error)
            }
        }
    }
}
