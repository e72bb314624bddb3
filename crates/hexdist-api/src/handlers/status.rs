//! /ping and /status handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use hexdist_services::{PeerSnapshot, QueueCounts};

use super::ApiState;

// ── /ping ────────────────────────────────────────────────────────────────────

pub async fn handle_ping() -> &'static str {
    "pong"
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub total_peers: usize,
    pub total_peers_primary: usize,
    pub total_peers_secondary: usize,
    /// Connections still being benchmarked.
    pub admitting: usize,
    pub peers: Vec<PeerSnapshot>,
    pub queue: QueueCounts,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let counts = state.pool.counts();

    Json(StatusResponse {
        total_peers: counts.total,
        total_peers_primary: counts.primary,
        total_peers_secondary: counts.secondary,
        admitting: state.admitting.len(),
        peers: state.pool.snapshot(),
        queue: state.queue.counts().await,
    })
}
