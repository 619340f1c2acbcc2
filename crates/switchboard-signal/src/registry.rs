//! Peer registry for the signal server
//!
//! Maps peer id to the peer's public info and connection. All access goes
//! through short critical sections on a single readers-writer lock; callers
//! get clones (connections are `Arc`s) and do their I/O after the lock is
//! released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::messages::PeerInfo;

/// A registered peer
pub struct Peer<C> {
    pub info: PeerInfo,
    pub connection: Arc<C>,
}

impl<C> Clone for Peer<C> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl<C> Peer<C> {
    pub fn new(info: PeerInfo, connection: Arc<C>) -> Self {
        Self { info, connection }
    }
}

/// Registered peers keyed by id
pub struct PeerRegistry<C> {
    peers: RwLock<HashMap<String, Peer<C>>>,
}

impl<C> PeerRegistry<C> {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a peer, returning the one it replaced under the same id
    pub fn insert(&self, peer: Peer<C>) -> Option<Peer<C>> {
        self.peers.write().insert(peer.info.id.clone(), peer)
    }

    /// Remove a peer by id
    pub fn remove(&self, id: &str) -> Option<Peer<C>> {
        self.peers.write().remove(id)
    }

    /// Remove a peer only if it is still bound to `connection`
    ///
    /// A newer registration under the same id from another connection is
    /// left in place.
    pub fn remove_if_bound(&self, id: &str, connection: &Arc<C>) -> Option<Peer<C>> {
        let mut peers = self.peers.write();
        match peers.get(id) {
            Some(peer) if Arc::ptr_eq(&peer.connection, connection) => peers.remove(id),
            _ => None,
        }
    }

    /// Look up a peer by id
    pub fn lookup(&self, id: &str) -> Option<Peer<C>> {
        self.peers.read().get(id).cloned()
    }

    /// Ids of every peer registered over `connection` (linear scan)
    pub fn ids_for_connection(&self, connection: &Arc<C>) -> Vec<String> {
        self.peers
            .read()
            .values()
            .filter(|p| Arc::ptr_eq(&p.connection, connection))
            .map(|p| p.info.id.clone())
            .collect()
    }

    /// Copy of every registered peer
    pub fn snapshot(&self) -> Vec<Peer<C>> {
        self.peers.read().values().cloned().collect()
    }

    /// Number of registered peers
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl<C> Default for PeerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
