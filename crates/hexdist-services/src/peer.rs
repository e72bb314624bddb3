//! One worker socket: framed send/receive, correlated results, tier and rank.
//!
//! A background reader task owns the read half. It resolves the single
//! outstanding dispatch when the matching `job_result` frame arrives and
//! applies `set_secondary` frames at any time. When the stream ends the
//! connection is marked closed and a pending dispatch fails with
//! [`SchedulerError::PeerDisconnected`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use rand::Rng;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use hexdist_core::task::JobResult;
use hexdist_core::wire::{Frame, FrameKind};

use crate::error::SchedulerError;

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    fn next() -> Self {
        PeerId(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct PendingDispatch {
    token: u64,
    tx: oneshot::Sender<JobResult>,
}

/// State shared between the connection handle and its reader task.
struct Shared {
    id: PeerId,
    pending: Mutex<Option<PendingDispatch>>,
    secondary: watch::Sender<bool>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn take_pending(&self) -> Option<PendingDispatch> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Mark closed first, then drop the waiter. `send` inserts before it
    /// checks `closed`, so one of the two always sees the other.
    fn mark_closed(&self) {
        self.closed.send_replace(true);
        drop(self.take_pending());
    }

    fn handle_frame(&self, frame: Frame) {
        match frame.frame_kind() {
            Ok(FrameKind::JobResult) => self.handle_result(frame),
            Ok(FrameKind::SetSecondary) => match frame.decode_json::<bool>() {
                Ok(secondary) => {
                    let changed = self.secondary.send_if_modified(|current| {
                        let changed = *current != secondary;
                        *current = secondary;
                        changed
                    });
                    if changed {
                        tracing::info!(peer = %self.id, secondary, "peer tier changed");
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %self.id, error = %e, "ignoring malformed set_secondary");
                }
            },
            Ok(FrameKind::Job) => {
                tracing::warn!(peer = %self.id, "ignoring job frame sent by peer");
            }
            Err(e) => {
                tracing::warn!(peer = %self.id, error = %e, "skipping unrecognised frame");
            }
        }
    }

    fn handle_result(&self, frame: Frame) {
        let waiter = {
            let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(p) if p.token == frame.token => slot.take(),
                _ => None,
            }
        };

        let Some(waiter) = waiter else {
            tracing::warn!(peer = %self.id, token = frame.token, "job_result for unknown token ignored");
            return;
        };

        let result = frame
            .decode_json::<JobResult>()
            .unwrap_or_else(|e| JobResult::Failure(format!("malformed result from peer: {e}")));
        tracing::debug!(peer = %self.id, token = frame.token, success = result.is_success(), "job_result received");
        let _ = waiter.tx.send(result);
    }
}

/// A connected worker.
///
/// At most one [`send`](Self::send) may be outstanding; the pool lock
/// guarantees that for scheduled work.
pub struct PeerConnection {
    shared: Arc<Shared>,
    addr: Option<SocketAddr>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    reader: Mutex<Option<JoinHandle<()>>>,
    power: AtomicU64,
}

impl PeerConnection {
    /// Wrap a split stream and start the reader task.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        addr: Option<SocketAddr>,
        max_frame_bytes: u32,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            id: PeerId::next(),
            pending: Mutex::new(None),
            secondary: watch::channel(false).0,
            closed: watch::channel(false).0,
        });

        let handle = tokio::spawn(read_loop(reader, shared.clone(), max_frame_bytes));

        Arc::new(Self {
            shared,
            addr,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            reader: Mutex::new(Some(handle)),
            power: AtomicU64::new(1.0f64.to_bits()),
        })
    }

    pub fn from_tcp(stream: TcpStream, max_frame_bytes: u32) -> Arc<Self> {
        let addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Self::spawn(reader, writer, addr, max_frame_bytes)
    }

    pub fn id(&self) -> PeerId {
        self.shared.id
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn power(&self) -> f64 {
        f64::from_bits(self.power.load(Ordering::Relaxed))
    }

    pub fn set_power(&self, power: f64) {
        self.power.store(power.to_bits(), Ordering::Relaxed);
    }

    pub fn is_secondary(&self) -> bool {
        *self.shared.secondary.borrow()
    }

    /// Fires whenever the peer changes its tier.
    pub fn tier_changes(&self) -> watch::Receiver<bool> {
        self.shared.secondary.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Resolves once the stream has ended or [`close`](Self::close) was called.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Dispatch one task and wait for its correlated result.
    pub async fn send<T: Serialize + ?Sized>(&self, task: &T) -> Result<JobResult, SchedulerError> {
        let token = rand::thread_rng().gen_range(1..u64::MAX);
        let frame = Frame::job(token, task)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut slot = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                tracing::warn!(peer = %self.id(), "replacing an outstanding dispatch");
            }
            *slot = Some(PendingDispatch { token, tx });
        }

        if self.is_closed() {
            self.shared.take_pending();
            return Err(SchedulerError::PeerDisconnected);
        }

        let bytes = frame.to_bytes();
        let written = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            tracing::debug!(peer = %self.id(), error = %e, "write failed");
            self.shared.take_pending();
            return Err(SchedulerError::PeerDisconnected);
        }

        tracing::debug!(peer = %self.id(), token, bytes = bytes.len(), "job sent");
        rx.await.map_err(|_| SchedulerError::PeerDisconnected)
    }

    /// Stop reading, shut the write side down and fail any pending dispatch.
    pub async fn close(&self) {
        if let Some(handle) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.shared.mark_closed();
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id())
            .field("addr", &self.addr)
            .field("power", &self.power())
            .field("secondary", &self.is_secondary())
            .finish()
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>, max_frame_bytes: u32) {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    let reason: String = loop {
        match Frame::decode(&mut buf, max_frame_bytes) {
            Ok(Some(frame)) => {
                shared.handle_frame(frame);
                continue;
            }
            Ok(None) => {}
            // A bad header cannot be resynchronised.
            Err(e) => break format!("protocol error: {e}"),
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => break "end of stream".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };

    tracing::info!(peer = %shared.id, %reason, "peer connection closed");
    shared.mark_closed();
}
