//! Liveness sweep
//!
//! Each sweep evicts connections that left the previous ping unanswered and
//! pings the rest. A peer therefore survives one missed pong but not two in a
//! row.

use super::registry::PeerRegistry;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub evicted: Vec<String>,
    pub evicted_connections: usize,
}

#[derive(Clone)]
pub struct LivenessMonitor {
    registry: Arc<RwLock<PeerRegistry>>,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<RwLock<PeerRegistry>>) -> Self {
        Self { registry }
    }

    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let to_ping = {
            let mut registry = self.registry.write();
            let (stale, to_ping) = registry.begin_liveness_round();
            for conn_id in stale {
                report.evicted_connections += 1;
                if let Some(peer_id) = registry.evict(conn_id) {
                    info!(peer_id = %peer_id, conn_id, "Evicting unresponsive peer");
                    report.evicted.push(peer_id);
                } else {
                    debug!(conn_id, "Evicting unresponsive connection");
                }
            }
            to_ping
        };

        for transport in to_ping {
            if transport.ping() {
                report.pinged += 1;
            }
        }
        report
    }

    /// Records a pong on `conn_id`.
    pub fn pong(&self, conn_id: super::ConnId) {
        self.registry.write().mark_alive(conn_id);
    }
}
