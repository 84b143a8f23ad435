use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use thiserror::Error;

use super::audit::AccessRecord;
use super::block::Block;
use super::registry::Registry;
use super::scheduler::ConsensusMode;
use super::stake::{StakeLedger, VoteLedger};

const SNAPSHOT_TREE: &str = "state";
const SNAPSHOT_KEY: &str = "snapshot";

/// Errors that can occur during persistence operations
///
/// Persistence failures are non-fatal to in-memory state: the ledger keeps
/// operating against memory and the caller decides whether to retry the
/// flush.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// The one persisted state object
///
/// Everything needed to resume the ledger: the chain, the user directory,
/// the audit trail, and the consensus configuration and ledgers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub chain: Vec<Block>,
    pub registry: Registry,
    pub access_log: Vec<AccessRecord>,
    pub consensus_mode: Option<ConsensusMode>,
    pub delegates: Vec<String>,
    pub stakes: StakeLedger,
    pub votes: VoteLedger,
    pub scheduler_pointer: usize,
    pub block_reward: f64,
    pub share_ratio: f64,
}

/// Snapshot store for ledger state
pub struct SnapshotStore {
    /// The database instance
    db: Db,

    /// Tree holding the state snapshot
    state: Tree,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish()
    }
}

impl SnapshotStore {
    /// Opens (or creates) a snapshot store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let db = sled::open(path)?;
        let state = db.open_tree(SNAPSHOT_TREE)?;

        Ok(Self { db, state })
    }

    /// Writes the snapshot and flushes it to disk
    ///
    /// The value is JSON: the snapshot carries tagged enums and omitted
    /// optional fields, which need a self-describing format to round-trip.
    pub fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        let value = serde_json::to_vec(snapshot)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        self.state.insert(SNAPSHOT_KEY, value)?;
        self.db.flush()?;

        Ok(())
    }

    /// Loads the persisted snapshot
    ///
    /// # Returns
    ///
    /// `NotFound` when no snapshot has ever been saved
    pub fn load(&self) -> Result<StateSnapshot, PersistenceError> {
        let value = self
            .state
            .get(SNAPSHOT_KEY)?
            .ok_or_else(|| PersistenceError::NotFound("No saved ledger state".to_string()))?;

        serde_json::from_slice(&value)
            .map_err(|e| PersistenceError::Deserialization(e.to_string()))
    }
}
