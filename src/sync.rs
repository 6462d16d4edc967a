//! Incremental synchronization for lite clients
//!
//! A sync answer carries the blocks a client is missing above its last known
//! height plus the full history and balance of the single address it tracks.
//! Building one never mutates the ledger.

use crate::ledger::{Block, LedgerStore, Transaction};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub blocks: Vec<Block>,
    pub user_transactions: Vec<Transaction>,
    pub current_height: u64,
    pub current_balances: HashMap<String, f64>,
}

#[derive(Clone)]
pub struct SyncEngine {
    ledger: Arc<RwLock<LedgerStore>>,
}

impl SyncEngine {
    pub fn new(ledger: Arc<RwLock<LedgerStore>>) -> Self {
        Self { ledger }
    }

    pub fn build_sync_response(
        &self,
        last_known_height: i64,
        address: &str,
        requested_count: usize,
    ) -> SyncResponse {
        let ledger = self.ledger.read();

        let blocks = ledger.blocks_since(last_known_height, requested_count);
        // Address history is not bounded by the block window.
        let user_transactions = ledger.transactions_of(address, None);
        let balance = ledger.balance_of(address);

        SyncResponse {
            blocks,
            user_transactions,
            current_height: ledger.height(),
            current_balances: HashMap::from([(address.to_string(), balance)]),
        }
    }
}
