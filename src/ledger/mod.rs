// Ledger module
//
// This module contains the core healthcare ledger implementation including:
// - Canonical hashing and Merkle aggregation
// - Medical record transactions
// - Block structure
// - User directory and consent
// - Stake and vote ledgers
// - DPoS scheduling and rewards
// - Chain operations, audit trail and persistence

pub mod audit;
pub mod block;
pub mod chain;
pub mod hashing;
pub mod registry;
pub mod rewards;
pub mod scheduler;
pub mod stake;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use audit::{AccessAction, AccessRecord};
pub use block::{Block, ConsensusData, DposMetadata};
pub use chain::{IntegrityError, Ledger, LedgerError, RepairReport};
pub use registry::{Registry, Role};
pub use scheduler::{ConsensusError, ConsensusMode};
pub use transaction::{RecordTransaction, ValidationError};
