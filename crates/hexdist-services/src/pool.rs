//! Peer pool: registry of admitted peers and the selection algorithm.
//!
//! Selection: if any primary peer is registered, only primaries are
//! candidates, locked or not. Among unlocked candidates the highest power
//! wins, ties going to the earliest registered. Callers that find no
//! candidate wait for the next availability notification and start over.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, Notify};

use crate::peer::{PeerConnection, PeerId};

/// Pool membership changes, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected(PeerId),
    Disconnected(PeerId),
}

/// Point-in-time view of one pool entry.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub addr: Option<SocketAddr>,
    pub power: f64,
    pub secondary: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub total: usize,
    pub primary: usize,
    pub secondary: usize,
}

struct PoolEntry {
    peer: Arc<PeerConnection>,
    locked: bool,
}

pub struct PeerPool {
    entries: Mutex<Vec<PoolEntry>>,
    available: Notify,
    events: broadcast::Sender<PeerEvent>,
}

impl Default for PeerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerPool {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(Vec::new()),
            available: Notify::new(),
            events,
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<PoolEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, peer: Arc<PeerConnection>) {
        let id = peer.id();
        {
            let mut entries = self.entries();
            if entries.iter().any(|e| e.peer.id() == id) {
                return;
            }
            entries.push(PoolEntry {
                peer,
                locked: false,
            });
        }
        tracing::debug!(peer = %id, "peer registered");
        let _ = self.events.send(PeerEvent::Connected(id));
        self.available.notify_waiters();
    }

    /// Drop a peer, locked or not. Returns false if it was not registered.
    pub fn unregister(&self, id: PeerId) -> bool {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|e| e.peer.id() != id);
            entries.len() != before
        };
        if removed {
            tracing::debug!(peer = %id, "peer unregistered");
            let _ = self.events.send(PeerEvent::Disconnected(id));
            // Losing the last primary makes secondaries eligible.
            self.available.notify_waiters();
        }
        removed
    }

    /// Lock and return the best eligible peer, if one is free right now.
    pub fn try_acquire(&self) -> Option<Arc<PeerConnection>> {
        let mut entries = self.entries();
        let any_primary = entries.iter().any(|e| !e.peer.is_secondary());

        let mut best: Option<(usize, f64)> = None;
        for (i, entry) in entries.iter().enumerate() {
            if entry.locked || (any_primary && entry.peer.is_secondary()) {
                continue;
            }
            let power = entry.peer.power();
            match best {
                Some((_, best_power)) if power <= best_power => {}
                _ => best = Some((i, power)),
            }
        }

        let (i, _) = best?;
        let entry = &mut entries[i];
        entry.locked = true;
        Some(entry.peer.clone())
    }

    /// Wait until an eligible peer is free and lock it.
    ///
    /// The returned lease releases the peer when dropped.
    pub async fn acquire(self: &Arc<Self>) -> PeerLease {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register interest before looking, so a release between the
            // check and the await is not missed.
            notified.as_mut().enable();

            if let Some(peer) = self.try_acquire() {
                return PeerLease {
                    pool: self.clone(),
                    peer,
                };
            }
            notified.await;
        }
    }

    /// Unlock a peer and wake every waiting `acquire`.
    pub fn release(&self, id: PeerId) {
        {
            let mut entries = self.entries();
            match entries.iter_mut().find(|e| e.peer.id() == id) {
                Some(entry) if entry.locked => entry.locked = false,
                Some(_) => tracing::warn!(peer = %id, "release of a peer that was not locked"),
                None => {}
            }
        }
        self.available.notify_waiters();
    }

    /// Wake waiters without a release, e.g. after a tier change.
    pub fn notify_available(&self) {
        self.available.notify_waiters();
    }

    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.entries()
            .iter()
            .map(|e| PeerSnapshot {
                id: e.peer.id(),
                addr: e.peer.addr(),
                power: e.peer.power(),
                secondary: e.peer.is_secondary(),
                locked: e.locked,
            })
            .collect()
    }

    pub fn counts(&self) -> PoolCounts {
        let entries = self.entries();
        let secondary = entries.iter().filter(|e| e.peer.is_secondary()).count();
        PoolCounts {
            total: entries.len(),
            primary: entries.len() - secondary,
            secondary,
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }
}

/// Exclusive claim on one peer. Dropping it releases the peer.
pub struct PeerLease {
    pool: Arc<PeerPool>,
    peer: Arc<PeerConnection>,
}

impl std::ops::Deref for PeerLease {
    type Target = PeerConnection;

    fn deref(&self) -> &PeerConnection {
        &self.peer
    }
}

impl Drop for PeerLease {
    fn drop(&mut self) {
        self.pool.release(self.peer.id());
    }
}
