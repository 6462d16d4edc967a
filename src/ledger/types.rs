//! Block and transaction records as they travel on the wire and sit in the store.
//!
//! Field names follow the camelCase JSON clients send. Content is never
//! validated here; a record without its identifying key is simply not stored.

use serde::{Deserialize, Serialize};

/// Hex-encoded block hash.
pub type BlockHash = String;
/// Transaction identifier as declared by the sender.
pub type TxId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: TxId,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub fee: f64,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Transaction {
    /// Builds a plain transfer between two addresses.
    pub fn transfer(
        id: impl Into<String>,
        from: Option<&str>,
        to: Option<&str>,
        amount: f64,
        fee: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "transfer".to_string(),
            from_address: from.map(str::to_string),
            to_address: to.map(str::to_string),
            amount,
            fee,
            timestamp: now_seconds(),
            data: None,
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Addresses this transaction is indexed under, sender first.
    /// A self-transfer yields its address once.
    pub fn indexed_addresses(&self) -> Vec<&str> {
        let mut addresses = Vec::with_capacity(2);
        if let Some(from) = self.from_address.as_deref() {
            addresses.push(from);
        }
        if let Some(to) = self.to_address.as_deref() {
            if self.from_address.as_deref() != Some(to) {
                addresses.push(to);
            }
        }
        addresses
    }

    /// Signed effect of this transaction on `address`.
    pub fn balance_delta(&self, address: &str) -> f64 {
        let mut delta = 0.0;
        if self.to_address.as_deref() == Some(address) {
            delta += self.amount;
        }
        if self.from_address.as_deref() == Some(address) {
            delta -= self.amount + self.fee;
        }
        delta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(default)]
    pub hash: BlockHash,
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub previous_hash: BlockHash,
    #[serde(default)]
    pub merkle_root: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn has_hash(&self) -> bool {
        !self.hash.is_empty()
    }
}

/// Wall-clock time in fractional seconds since the Unix epoch.
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
