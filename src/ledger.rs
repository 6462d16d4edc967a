// Thin re-export module: the data model lives in `ledger/types.rs` and the
// authoritative in-memory state in `ledger/store.rs`.

pub mod store;
pub mod types;

pub use store::*;
pub use types::*;
