//! hexdist-services: the scheduler core.
//!
//! Peers connect to a [`listener::PeerListener`], prove themselves with a
//! benchmark job and join the [`pool::PeerPool`]. The
//! [`distributor::JobDistributor`] pulls jobs from a [`queue::QueueBackend`],
//! locks the best available peer and dispatches over a
//! [`peer::PeerConnection`].

pub mod composite;
pub mod distributor;
pub mod error;
pub mod executor;
pub mod listener;
pub mod memory_queue;
pub mod peer;
pub mod peer_client;
pub mod pool;
pub mod queue;

pub use composite::{CompositeCoordinator, FailedMove, MoveAnalysis};
pub use distributor::{DistributorSettings, JobDistributor};
pub use error::SchedulerError;
pub use executor::CommandExecutor;
pub use listener::{AdmissionSettings, AdmissionTable, PeerListener};
pub use memory_queue::{MemoryQueue, MemoryQueueSettings};
pub use peer::{PeerConnection, PeerId};
pub use peer_client::{PeerClient, TaskExecutor};
pub use pool::{PeerEvent, PeerLease, PeerPool, PeerSnapshot, PoolCounts};
pub use queue::{JobHandle, JobId, JobWatch, QueueBackend, QueueCounts};
