//! Genesis bootstrap for a node starting without a snapshot

use crate::config::GenesisConfig;
use crate::ledger::{now_seconds, Block, BlockHash, LedgerStore, Transaction};
use crate::persistence::PersistenceManager;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

pub const GENESIS_TX_TYPE: &str = "genesis";

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Builds the height-0 block funding every allocation bucket.
/// Seed transaction ids depend only on the seed and allocation table.
pub fn build_genesis_block(config: &GenesisConfig, timestamp: f64) -> Block {
    let transactions: Vec<Transaction> = config
        .allocations
        .iter()
        .map(|allocation| Transaction {
            id: sha256_hex(&[format!(
                "{}:{}:{}",
                config.seed, allocation.address, allocation.amount
            )
            .as_bytes()]),
            kind: GENESIS_TX_TYPE.to_string(),
            from_address: None,
            to_address: Some(allocation.address.clone()),
            amount: allocation.amount,
            fee: 0.0,
            timestamp,
            data: None,
        })
        .collect();

    let ids: Vec<&[u8]> = transactions.iter().map(|tx| tx.id.as_bytes()).collect();
    let merkle_root = sha256_hex(&ids);
    let hash = sha256_hex(&[config.seed.as_bytes(), timestamp.to_string().as_bytes()]);

    Block {
        hash,
        height: 0,
        timestamp,
        previous_hash: "0".repeat(64),
        merkle_root,
        transactions,
    }
}

/// Seeds an empty ledger with the genesis block and persists it right away.
pub fn bootstrap(
    ledger: &Arc<RwLock<LedgerStore>>,
    persistence: &PersistenceManager,
    config: &GenesisConfig,
) -> BlockHash {
    let block = build_genesis_block(config, now_seconds());
    let hash = block.hash.clone();
    let buckets = block.transactions.len();
    {
        let mut store = ledger.write();
        store.store_block(block);
        store.set_genesis_hash(hash.clone());
    }
    info!(hash = %hash, buckets, "Bootstrapped genesis block");
    persistence.save();
    hash
}
