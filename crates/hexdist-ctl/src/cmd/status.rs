//! Scheduler status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    total_peers: usize,
    total_peers_primary: usize,
    total_peers_secondary: usize,
    admitting: usize,
    peers: Vec<PeerInfo>,
    queue: QueueInfo,
}

#[derive(Deserialize)]
struct PeerInfo {
    id: u64,
    addr: Option<String>,
    power: f64,
    secondary: bool,
    locked: bool,
}

#[derive(Deserialize)]
struct QueueInfo {
    waiting: usize,
    active: usize,
    completed: usize,
    failed: usize,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  hexdist Scheduler Status");
    println!("═══════════════════════════════════════");
    println!("  Peers            : {}", resp.total_peers);
    println!("    primary        : {}", resp.total_peers_primary);
    println!("    secondary      : {}", resp.total_peers_secondary);
    println!("    benchmarking   : {}", resp.admitting);
    println!("  Jobs waiting     : {}", resp.queue.waiting);
    println!("  Jobs active      : {}", resp.queue.active);
    println!("  Jobs completed   : {}", resp.queue.completed);
    println!("  Jobs failed      : {}", resp.queue.failed);

    if resp.peers.is_empty() {
        println!("\n  No peers connected.");
        return Ok(());
    }

    println!("\n  Peers:");
    for p in &resp.peers {
        let state = if p.locked { "busy" } else { "idle" };
        let tier = if p.secondary { "secondary" } else { "primary" };
        println!("  ┌─ peer-{} ({})", p.id, state);
        println!("  │  addr  : {}", p.addr.as_deref().unwrap_or("-"));
        println!("  │  tier  : {}", tier);
        println!("  └─ power : {:.1}", p.power);
    }

    Ok(())
}
