//! Peer registry
//!
//! Tracks every open connection (registered or not) together with its
//! liveness flag, and maps self-declared peer ids onto connections. At most
//! one connection is registered per peer id; a later declaration wins.

use super::session::{ConnId, Transport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

struct Connection {
    transport: Arc<dyn Transport>,
    alive: bool,
    peer_id: Option<String>,
}

struct PeerEntry {
    conn_id: ConnId,
    transport: Arc<dyn Transport>,
    remote_addr: String,
    connected_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    message_count: u64,
}

/// Read-only view of a registered peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: String,
    pub remote_addr: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub message_count: u64,
    pub alive: bool,
}

#[derive(Default)]
pub struct PeerRegistry {
    connections: HashMap<ConnId, Connection>,
    peers: HashMap<String, PeerEntry>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a freshly accepted connection. It starts alive and unregistered.
    pub fn open_connection(&mut self, conn_id: ConnId, transport: Arc<dyn Transport>) {
        self.connections.insert(
            conn_id,
            Connection {
                transport,
                alive: true,
                peer_id: None,
            },
        );
    }

    pub fn transport(&self, conn_id: ConnId) -> Option<Arc<dyn Transport>> {
        self.connections.get(&conn_id).map(|c| c.transport.clone())
    }

    /// Records an inbound message on `conn_id` declared by `sender_id`.
    /// Registers the peer on its first message (replacing any other
    /// connection holding the same id) and otherwise refreshes its metadata.
    /// Returns `true` when a registration happened.
    pub fn record_message(&mut self, conn_id: ConnId, sender_id: &str) -> bool {
        if sender_id.is_empty() || !self.connections.contains_key(&conn_id) {
            return false;
        }
        let now = Utc::now();

        if let Some(entry) = self.peers.get_mut(sender_id) {
            if entry.conn_id == conn_id {
                entry.last_seen = now;
                entry.message_count += 1;
                return false;
            }
            // The id moves to this connection; the old one stays open but unregistered.
            let previous = entry.conn_id;
            if let Some(conn) = self.connections.get_mut(&previous) {
                conn.peer_id = None;
            }
            info!(peer_id = sender_id, old_conn = previous, new_conn = conn_id, "Peer id re-registered");
        }

        let Some(conn) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if let Some(old_id) = conn.peer_id.replace(sender_id.to_string()) {
            if self.peers.get(&old_id).map(|p| p.conn_id) == Some(conn_id) {
                self.peers.remove(&old_id);
            }
        }

        self.peers.insert(
            sender_id.to_string(),
            PeerEntry {
                conn_id,
                transport: conn.transport.clone(),
                remote_addr: conn.transport.remote_addr().to_string(),
                connected_at: now,
                last_seen: now,
                message_count: 1,
            },
        );
        info!(peer_id = sender_id, conn_id, "Peer registered");
        true
    }

    /// Answers a liveness ping: the connection survives the next sweep.
    pub fn mark_alive(&mut self, conn_id: ConnId) {
        let Some(conn) = self.connections.get_mut(&conn_id) else {
            return;
        };
        conn.alive = true;
        if let Some(entry) = conn.peer_id.as_ref().and_then(|id| self.peers.get_mut(id)) {
            entry.last_seen = Utc::now();
        }
    }

    /// Forgets a connection after its transport closed. Returns the peer id
    /// that was registered on it, if any.
    pub fn close_connection(&mut self, conn_id: ConnId) -> Option<String> {
        let conn = self.connections.remove(&conn_id)?;
        let peer_id = conn.peer_id?;
        if self.peers.get(&peer_id).map(|p| p.conn_id) == Some(conn_id) {
            self.peers.remove(&peer_id);
            debug!(peer_id = %peer_id, conn_id, "Peer unregistered");
            Some(peer_id)
        } else {
            None
        }
    }

    /// Removes the connection and forcibly closes its transport.
    pub fn evict(&mut self, conn_id: ConnId) -> Option<String> {
        let transport = self.transport(conn_id)?;
        let peer_id = self.close_connection(conn_id);
        transport.close();
        peer_id
    }

    /// Starts a liveness round. Connections that never answered the previous
    /// ping are returned as stale; every other open connection has its flag
    /// cleared and its transport returned for pinging.
    pub fn begin_liveness_round(&mut self) -> (Vec<ConnId>, Vec<Arc<dyn Transport>>) {
        let mut stale = Vec::new();
        let mut to_ping = Vec::new();
        for (conn_id, conn) in self.connections.iter_mut() {
            if !conn.alive {
                stale.push(*conn_id);
            } else if conn.transport.is_open() {
                conn.alive = false;
                to_ping.push(conn.transport.clone());
            }
        }
        (stale, to_ping)
    }

    /// Transports of every registered peer other than `sender_id`.
    pub fn peers_except(&self, sender_id: &str) -> Vec<Arc<dyn Transport>> {
        self.peers
            .iter()
            .filter(|(id, _)| id.as_str() != sender_id)
            .map(|(_, entry)| entry.transport.clone())
            .collect()
    }

    /// Closes every tracked connection.
    pub fn close_all(&mut self) {
        for (_, conn) in self.connections.drain() {
            conn.transport.close();
        }
        self.peers.clear();
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains_peer(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn peer_id_of(&self, conn_id: ConnId) -> Option<&str> {
        self.connections.get(&conn_id)?.peer_id.as_deref()
    }

    pub fn peer(&self, peer_id: &str) -> Option<PeerInfo> {
        self.peers.get(peer_id).map(|entry| self.info(peer_id, entry))
    }

    pub fn list(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .iter()
            .map(|(id, entry)| self.info(id, entry))
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    fn info(&self, peer_id: &str, entry: &PeerEntry) -> PeerInfo {
        PeerInfo {
            peer_id: peer_id.to_string(),
            remote_addr: entry.remote_addr.clone(),
            connected_at: entry.connected_at,
            last_seen: entry.last_seen,
            message_count: entry.message_count,
            alive: self
                .connections
                .get(&entry.conn_id)
                .map(|c| c.alive)
                .unwrap_or(false),
        }
    }
}
