//! Authoritative in-memory ledger: blocks by hash, transactions by id, and
//! the address index balances are derived from.

use super::types::{now_seconds, Block, BlockHash, Transaction, TxId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub const DEFAULT_BLOCK_LIMIT: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct LedgerStore {
    blocks: HashMap<BlockHash, Block>,
    transactions: HashMap<TxId, Transaction>,
    address_index: HashMap<String, Vec<TxId>>,
    height: u64,
    tips: BTreeSet<BlockHash>,
    genesis_hash: Option<BlockHash>,
}

/// Durable image of a [`LedgerStore`]. Every table is an explicit key/value
/// enumeration so the document stands on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub blocks: HashMap<BlockHash, Block>,
    pub transactions: HashMap<TxId, Transaction>,
    pub address_index: HashMap<String, Vec<TxId>>,
    pub height: u64,
    pub tips: Vec<BlockHash>,
    pub genesis_hash: Option<BlockHash>,
    pub saved_at: f64,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `tx` by id, replacing earlier content with the same id, and
    /// indexes it under its sender and recipient. Returns `false` when the
    /// transaction carries no id.
    pub fn store_transaction(&mut self, tx: Transaction) -> bool {
        if !tx.has_id() {
            debug!("Ignoring transaction without id");
            return false;
        }

        // A known id is already indexed; resent broadcasts must not be counted twice.
        if !self.transactions.contains_key(&tx.id) {
            for address in tx.indexed_addresses() {
                self.address_index
                    .entry(address.to_string())
                    .or_default()
                    .push(tx.id.clone());
            }
        }
        self.transactions.insert(tx.id.clone(), tx);
        true
    }

    /// Stores `block` and its transactions unless a block with the same hash
    /// is already present. Returns `true` only when the block is new.
    pub fn store_block(&mut self, block: Block) -> bool {
        if !block.has_hash() {
            debug!("Ignoring block without hash");
            return false;
        }
        if self.blocks.contains_key(&block.hash) {
            return false;
        }

        self.height = self.height.max(block.height);
        self.tips.remove(&block.previous_hash);
        self.tips.insert(block.hash.clone());

        for tx in &block.transactions {
            self.store_transaction(tx.clone());
        }
        self.blocks.insert(block.hash.clone(), block);
        true
    }

    /// Derives the balance of `address` from its indexed transactions.
    /// The result may be negative; sufficiency is not enforced here.
    pub fn balance_of(&self, address: &str) -> f64 {
        self.address_index
            .get(address)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.transactions.get(id))
                    .fold(0.0, |balance, tx| balance + tx.balance_delta(address))
            })
            .unwrap_or(0.0)
    }

    /// Blocks strictly above `height`, ascending, at most `limit` of them.
    /// A negative `height` selects from genesis.
    pub fn blocks_since(&self, height: i64, limit: usize) -> Vec<Block> {
        let mut blocks: Vec<&Block> = self
            .blocks
            .values()
            .filter(|b| i128::from(b.height) > i128::from(height))
            .collect();
        blocks.sort_by(|a, b| a.height.cmp(&b.height).then_with(|| a.hash.cmp(&b.hash)));
        blocks.into_iter().take(limit).cloned().collect()
    }

    /// Transactions indexed under `address` in index order.
    pub fn transactions_of(&self, address: &str, limit: Option<usize>) -> Vec<Transaction> {
        let Some(ids) = self.address_index.get(address) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.transactions.get(id))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn block(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn contains_block(&self, hash: &str) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Most recent blocks first.
    pub fn recent_blocks(&self, limit: usize) -> Vec<Block> {
        let mut blocks: Vec<&Block> = self.blocks.values().collect();
        blocks.sort_by(|a, b| b.height.cmp(&a.height).then_with(|| a.hash.cmp(&b.hash)));
        blocks.into_iter().take(limit).cloned().collect()
    }

    /// Most recent transactions first, by declared timestamp.
    pub fn recent_transactions(&self, limit: usize) -> Vec<Transaction> {
        let mut txs: Vec<&Transaction> = self.transactions.values().collect();
        txs.sort_by(|a, b| {
            b.timestamp
                .total_cmp(&a.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        txs.into_iter().take(limit).cloned().collect()
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn tips(&self) -> impl Iterator<Item = &BlockHash> {
        self.tips.iter()
    }

    pub fn genesis_hash(&self) -> Option<&str> {
        self.genesis_hash.as_deref()
    }

    pub fn set_genesis_hash(&mut self, hash: BlockHash) {
        self.genesis_hash = Some(hash);
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.transactions.is_empty()
    }

    /// Captures the full store, stamped with the current wall-clock time.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            blocks: self.blocks.clone(),
            transactions: self.transactions.clone(),
            address_index: self.address_index.clone(),
            height: self.height,
            tips: self.tips.iter().cloned().collect(),
            genesis_hash: self.genesis_hash.clone(),
            saved_at: now_seconds(),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            blocks: snapshot.blocks,
            transactions: snapshot.transactions,
            address_index: snapshot.address_index,
            height: snapshot.height,
            tips: snapshot.tips.into_iter().collect(),
            genesis_hash: snapshot.genesis_hash,
        }
    }

    /// Replaces the whole store with `snapshot`.
    pub fn restore(&mut self, snapshot: LedgerSnapshot) {
        *self = Self::from_snapshot(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(hash: &str, height: u64, prev: &str, txs: Vec<Transaction>) -> Block {
        Block {
            hash: hash.to_string(),
            height,
            timestamp: height as f64,
            previous_hash: prev.to_string(),
            merkle_root: String::new(),
            transactions: txs,
        }
    }

    #[test]
    fn test_store_block_is_idempotent() {
        let mut store = LedgerStore::new();
        let tx = Transaction::transfer("t1", None, Some("alice"), 10.0, 0.0);
        let b = block("b1", 3, "b0", vec![tx]);

        assert!(store.store_block(b.clone()));
        let height = store.height();
        let blocks = store.block_count();
        let txs = store.transaction_count();

        assert!(!store.store_block(b));
        assert_eq!(store.height(), height);
        assert_eq!(store.block_count(), blocks);
        assert_eq!(store.transaction_count(), txs);
        assert_eq!(store.transactions_of("alice", None).len(), 1);
    }

    #[test]
    fn test_height_never_decreases() {
        let mut store = LedgerStore::new();
        store.store_block(block("b5", 5, "b4", vec![]));
        store.store_block(block("b2", 2, "b1", vec![]));
        assert_eq!(store.height(), 5);
    }

    #[test]
    fn test_transaction_without_id_is_ignored() {
        let mut store = LedgerStore::new();
        let tx = Transaction::transfer("", Some("a"), Some("b"), 1.0, 0.0);
        assert!(!store.store_transaction(tx));
        assert_eq!(store.transaction_count(), 0);
        assert!(store.transactions_of("a", None).is_empty());
    }

    #[test]
    fn test_block_without_hash_is_ignored() {
        let mut store = LedgerStore::new();
        assert!(!store.store_block(block("", 1, "", vec![])));
        assert_eq!(store.block_count(), 0);
    }

    #[test]
    fn test_restore_transaction_replaces_content() {
        let mut store = LedgerStore::new();
        store.store_transaction(Transaction::transfer("t1", None, Some("bob"), 1.0, 0.0));
        store.store_transaction(Transaction::transfer("t1", None, Some("bob"), 7.0, 0.0));
        assert_eq!(store.transaction_count(), 1);
        assert_eq!(store.transaction("t1").unwrap().amount, 7.0);
        assert_eq!(store.balance_of("bob"), 7.0);
    }

    #[test]
    fn test_resent_transaction_indexed_once() {
        let mut store = LedgerStore::new();
        for _ in 0..3 {
            store.store_transaction(Transaction::transfer("t1", Some("alice"), Some("bob"), 2.0, 0.5));
        }
        assert_eq!(store.transactions_of("alice", None).len(), 1);
        assert_eq!(store.transactions_of("bob", None).len(), 1);
        assert_eq!(store.balance_of("alice"), -2.5);
        assert_eq!(store.balance_of("bob"), 2.0);
    }

    #[test]
    fn test_balance_matches_transaction_sums() {
        let mut store = LedgerStore::new();
        let txs = vec![
            Transaction::transfer("g", None, Some("alice"), 100.0, 0.0),
            Transaction::transfer("t1", Some("alice"), Some("bob"), 30.0, 1.5),
            Transaction::transfer("t2", Some("bob"), Some("alice"), 5.0, 0.5),
            Transaction::transfer("t3", Some("bob"), Some("bob"), 2.0, 0.25),
            Transaction::transfer("t4", Some("carol"), Some("bob"), 50.0, 1.0),
        ];
        for tx in &txs {
            store.store_transaction(tx.clone());
        }

        for address in ["alice", "bob", "carol", "nobody"] {
            let incoming: f64 = txs
                .iter()
                .filter(|t| t.to_address.as_deref() == Some(address))
                .map(|t| t.amount)
                .sum();
            let outgoing: f64 = txs
                .iter()
                .filter(|t| t.from_address.as_deref() == Some(address))
                .map(|t| t.amount + t.fee)
                .sum();
            assert_eq!(store.balance_of(address), incoming - outgoing, "{}", address);
        }
        assert_eq!(store.balance_of("carol"), -51.0);
    }

    #[test]
    fn test_self_transfer_appears_once_in_index() {
        let mut store = LedgerStore::new();
        store.store_transaction(Transaction::transfer("t1", Some("a"), Some("a"), 4.0, 1.0));
        let history = store.transactions_of("a", None);
        assert_eq!(history.len(), 1);
        assert_eq!(store.balance_of("a"), -1.0);
    }

    #[test]
    fn test_transactions_of_keeps_index_order() {
        let mut store = LedgerStore::new();
        let mut late = Transaction::transfer("late", None, Some("a"), 1.0, 0.0);
        late.timestamp = 50.0;
        let mut early = Transaction::transfer("early", None, Some("a"), 1.0, 0.0);
        early.timestamp = 10.0;
        store.store_transaction(late);
        store.store_transaction(early);

        let ids: Vec<_> = store
            .transactions_of("a", None)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["late", "early"]);
        assert_eq!(store.transactions_of("a", Some(1)).len(), 1);
    }

    #[test]
    fn test_blocks_since_orders_and_limits() {
        let mut store = LedgerStore::new();
        store.store_block(block("c", 2, "b", vec![]));
        store.store_block(block("a", 0, "", vec![]));
        store.store_block(block("b", 1, "a", vec![]));

        let since: Vec<u64> = store.blocks_since(0, 10).iter().map(|b| b.height).collect();
        assert_eq!(since, vec![1, 2]);
        assert_eq!(store.blocks_since(0, 1)[0].hash, "b");
        assert_eq!(store.blocks_since(-1, DEFAULT_BLOCK_LIMIT).len(), 3);
        assert!(store.blocks_since(2, 10).is_empty());
    }

    #[test]
    fn test_tips_follow_chain_head() {
        let mut store = LedgerStore::new();
        store.store_block(block("a", 0, "", vec![]));
        store.store_block(block("b", 1, "a", vec![]));
        let tips: Vec<_> = store.tips().cloned().collect();
        assert_eq!(tips, vec!["b".to_string()]);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = LedgerStore::new();
        store.store_block(block(
            "a",
            0,
            "",
            vec![Transaction::transfer("g", None, Some("alice"), 10.0, 0.0)],
        ));
        store.store_transaction(Transaction::transfer("t1", Some("alice"), Some("bob"), 3.0, 1.0));
        store.set_genesis_hash("a".into());

        let snapshot = store.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = LedgerStore::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.height(), store.height());
        assert_eq!(restored.blocks, store.blocks);
        assert_eq!(restored.transactions, store.transactions);
        assert_eq!(restored.address_index, store.address_index);
        assert_eq!(restored.genesis_hash(), Some("a"));
        assert_eq!(restored.balance_of("alice"), 6.0);
    }
}
