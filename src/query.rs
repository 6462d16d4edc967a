//! Read-only query surface over the ledger and peer registry, consumed by the
//! HTTP layer. Only read locks are taken here.

use crate::ledger::{Block, LedgerStore, Transaction};
use crate::network::{PeerInfo, PeerRegistry};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub peer_count: usize,
    pub block_height: u64,
    pub total_blocks: usize,
    pub total_transactions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub address: String,
    pub balance: f64,
}

#[derive(Clone)]
pub struct NodeQuery {
    ledger: Arc<RwLock<LedgerStore>>,
    registry: Arc<RwLock<PeerRegistry>>,
}

impl NodeQuery {
    pub fn new(ledger: Arc<RwLock<LedgerStore>>, registry: Arc<RwLock<PeerRegistry>>) -> Self {
        Self { ledger, registry }
    }

    pub fn health(&self) -> Health {
        let peer_count = self.registry.read().peer_count();
        let ledger = self.ledger.read();
        Health {
            peer_count,
            block_height: ledger.height(),
            total_blocks: ledger.block_count(),
            total_transactions: ledger.transaction_count(),
        }
    }

    pub fn list_peers(&self) -> Vec<PeerInfo> {
        self.registry.read().list()
    }

    /// Newest blocks first.
    pub fn list_blocks(&self, limit: usize) -> Vec<Block> {
        self.ledger.read().recent_blocks(limit)
    }

    pub fn get_block(&self, hash: &str) -> Option<Block> {
        self.ledger.read().block(hash).cloned()
    }

    /// With an address: its history in index order. Without: newest
    /// transactions across the ledger.
    pub fn list_transactions(&self, address: Option<&str>, limit: usize) -> Vec<Transaction> {
        let ledger = self.ledger.read();
        match address {
            Some(address) => ledger.transactions_of(address, Some(limit)),
            None => ledger.recent_transactions(limit),
        }
    }

    pub fn get_balance(&self, address: &str) -> Balance {
        Balance {
            address: address.to_string(),
            balance: self.ledger.read().balance_of(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::registry::tests::RecordingTransport;

    fn query() -> NodeQuery {
        let mut store = LedgerStore::new();
        for height in 0..4u64 {
            let mut tx = Transaction::transfer(
                format!("t{}", height),
                Some("alice"),
                Some("bob"),
                1.0,
                0.5,
            );
            tx.timestamp = height as f64;
            store.store_block(Block {
                hash: format!("b{}", height),
                height,
                timestamp: height as f64,
                previous_hash: String::new(),
                merkle_root: String::new(),
                transactions: vec![tx],
            });
        }
        let mut registry = PeerRegistry::new();
        registry.open_connection(1, RecordingTransport::new("r"));
        registry.record_message(1, "peer-1");
        NodeQuery::new(
            Arc::new(RwLock::new(store)),
            Arc::new(RwLock::new(registry)),
        )
    }

    #[test]
    fn test_health_counts() {
        let health = query().health();
        assert_eq!(
            health,
            Health {
                peer_count: 1,
                block_height: 3,
                total_blocks: 4,
                total_transactions: 4,
            }
        );
    }

    #[test]
    fn test_listing_and_lookup() {
        let q = query();
        let heights: Vec<u64> = q.list_blocks(2).iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![3, 2]);
        assert_eq!(q.get_block("b1").unwrap().height, 1);
        assert!(q.get_block("missing").is_none());

        let recent: Vec<String> = q.list_transactions(None, 2).into_iter().map(|t| t.id).collect();
        assert_eq!(recent, vec!["t3", "t2"]);
        assert_eq!(q.list_transactions(Some("bob"), 10).len(), 4);
        assert_eq!(q.list_transactions(Some("bob"), 10)[0].id, "t0");

        assert_eq!(q.get_balance("alice").balance, -6.0);
        assert_eq!(q.list_peers()[0].peer_id, "peer-1");
    }
}
