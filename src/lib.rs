//! Ledger Relay - a peer-relay and ledger-synchronization node
//!
//! # Architecture
//!
//! ## Ledger
//! - [`ledger`] - Blocks, transactions, the address index and snapshots
//! - [`sync`] - Incremental sync responses and derived balances
//! - [`genesis`] - Genesis bootstrap for a node without a snapshot
//!
//! ## Networking
//! - [`protocol`] - Wire envelope and message types
//! - [`network`] - Websocket sessions, peer registry, router, liveness sweep
//!
//! ## State Management
//! - [`persistence`] - Snapshot backends (SQLite, in-memory)
//! - [`query`] - Read-only query surface
//!
//! ## Integration
//! - [`api`] - HTTP adapter over [`query`]
//! - [`node`] - Process orchestration
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Ledger
// ============================================================================
pub mod genesis;
pub mod ledger;
pub mod sync;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod protocol;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;
pub mod query;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
