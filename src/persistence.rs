//! Snapshot persistence for the ledger

use crate::error::{RelayError, Result};
use crate::ledger::{LedgerSnapshot, LedgerStore};
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Abstraction for snapshot backends. A backend holds at most one snapshot;
/// saving replaces it atomically.
pub trait Persistence: Send + Sync {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<()>;
    /// Returns `Ok(None)` when nothing has been saved yet.
    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| RelayError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                saved_at REAL NOT NULL,
                height INTEGER NOT NULL,
                document TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            RelayError::DatabaseError(format!("Failed to create ledger_snapshot table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RelayError::DatabaseError("Mutex poisoned".to_string()))
    }
}

impl Persistence for Database {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let document = serde_json::to_string(snapshot).map_err(|e| {
            RelayError::DatabaseError(format!("Failed to serialize snapshot: {}", e))
        })?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO ledger_snapshot (id, saved_at, height, document)
             VALUES (1, ?1, ?2, ?3)",
            params![snapshot.saved_at, snapshot.height as i64, document],
        )
        .map_err(|e| RelayError::DatabaseError(format!("Failed to save snapshot: {}", e)))?;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>> {
        let conn = self.lock()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM ledger_snapshot WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RelayError::DatabaseError(format!("Failed to read snapshot: {}", e)))?;

        document
            .map(|doc| {
                serde_json::from_str(&doc).map_err(|e| {
                    RelayError::DatabaseError(format!("Failed to parse snapshot: {}", e))
                })
            })
            .transpose()
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    snapshot: Arc<Mutex<Option<LedgerSnapshot>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let mut slot = self
            .snapshot
            .lock()
            .map_err(|_| RelayError::DatabaseError("Mutex poisoned".to_string()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>> {
        let slot = self
            .snapshot
            .lock()
            .map_err(|_| RelayError::DatabaseError("Mutex poisoned".to_string()))?;
        Ok(slot.clone())
    }
}

/// Saves the ledger periodically and restores it at startup. Failures are
/// logged and never propagate; the in-memory ledger stays authoritative.
#[derive(Clone)]
pub struct PersistenceManager {
    backend: Arc<dyn Persistence>,
    ledger: Arc<RwLock<LedgerStore>>,
}

impl PersistenceManager {
    pub fn new(backend: Arc<dyn Persistence>, ledger: Arc<RwLock<LedgerStore>>) -> Self {
        Self { backend, ledger }
    }

    /// Writes a snapshot of the current ledger. Returns whether it succeeded.
    pub fn save(&self) -> bool {
        let snapshot = self.ledger.read().snapshot();
        match self.backend.save_snapshot(&snapshot) {
            Ok(()) => {
                debug!(
                    height = snapshot.height,
                    blocks = snapshot.blocks.len(),
                    transactions = snapshot.transactions.len(),
                    "Ledger snapshot saved"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to save ledger snapshot; will retry next cycle");
                false
            }
        }
    }

    /// Replaces the ledger with the stored snapshot. Returns `false` when no
    /// usable snapshot exists, leaving the ledger untouched.
    pub fn load(&self) -> bool {
        match self.backend.load_snapshot() {
            Ok(Some(snapshot)) => {
                info!(
                    height = snapshot.height,
                    blocks = snapshot.blocks.len(),
                    saved_at = snapshot.saved_at,
                    "Restored ledger from snapshot"
                );
                self.ledger.write().restore(snapshot);
                true
            }
            Ok(None) => {
                info!("No ledger snapshot found");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to load ledger snapshot");
                false
            }
        }
    }
}
