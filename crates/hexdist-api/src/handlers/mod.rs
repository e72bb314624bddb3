//! HTTP API handlers: status and task submission.

pub mod status;
pub mod tasks;

use std::sync::Arc;

use hexdist_services::{AdmissionTable, CompositeCoordinator, PeerPool, QueueBackend};

#[derive(Clone)]
pub struct ApiState {
    pub pool: Arc<PeerPool>,
    pub queue: Arc<dyn QueueBackend>,
    pub composite: CompositeCoordinator,
    /// Connections still running the admission benchmark.
    pub admitting: AdmissionTable,
}

impl ApiState {
    pub fn new(pool: Arc<PeerPool>, queue: Arc<dyn QueueBackend>, admitting: AdmissionTable) -> Self {
        Self {
            composite: CompositeCoordinator::new(queue.clone()),
            pool,
            queue,
            admitting,
        }
    }
}

pub use status::{handle_ping, handle_status};
pub use tasks::{handle_analyze_game, handle_calculate_move};

#[cfg(test)]
pub(crate) fn test_state(queue: Arc<dyn QueueBackend>) -> ApiState {
    ApiState::new(Arc::new(PeerPool::new()), queue, AdmissionTable::default())
}
