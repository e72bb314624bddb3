//! Scheduler error taxonomy.
//!
//! Transport errors become [`SchedulerError::PeerDisconnected`] at the
//! connection boundary. The distributor turns every error into a failed job
//! against the queue; retries belong to the queue backend.

use hexdist_core::WireError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Benchmark failed, timed out or errored. The peer never joins the pool.
    #[error("admission rejected: {0}")]
    AdmissionRejected(String),

    /// Socket closed or errored while a result was pending.
    #[error("connection closed")]
    PeerDisconnected,

    /// The peer ran the task and reported an error.
    #[error("{0}")]
    Task(String),

    #[error("queue backend: {0}")]
    QueueBackend(String),

    #[error("wire: {0}")]
    Wire(#[from] WireError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
