use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::hashing::{merkle_root, sha256_hex};
use super::transaction::{RecordTransaction, ValidationError};

/// Previous-hash sentinel carried by the genesis block
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Scheduler metadata stamped into a DPoS-produced block for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DposMetadata {
    /// Delegate that produced the block
    pub producer: String,

    /// Winner set at production time, ascending id order
    pub winners: Vec<String>,

    /// Round-robin pointer before the producing advance
    pub pointer_before: usize,

    /// Round-robin pointer after the producing advance
    pub pointer_after: usize,

    /// Producer's stake at production time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_stake: Option<f64>,

    /// Digest of off-chain consensus state (stakes, votes, delegates)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_root: Option<String>,

    /// Forward-compatible extension fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schema(value_type = Object)]
    pub extra: BTreeMap<String, String>,
}

/// Consensus metadata attached to every block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "mode")]
pub enum ConsensusData {
    /// The one-off genesis block carries no producer
    #[serde(rename = "genesis")]
    Genesis,

    /// Block produced under delegated proof of stake
    #[serde(rename = "DPoS")]
    Dpos(DposMetadata),
}

/// A block in the healthcare ledger
///
/// Immutable after construction except for the repair operation, which may
/// rewrite the derived `prev_hash`/`merkle_root` fields but never content.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Position in the chain, strictly sequential from 0
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2024-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Transactions included in this block
    pub transactions: Vec<RecordTransaction>,

    /// Hash of the previous block, or 64 zeros for genesis
    pub prev_hash: String,

    /// Merkle root over the transaction fingerprints (derived, never set directly)
    pub merkle_root: String,

    /// Cardinality of the doctor registry at construction time
    pub doctor_count: u64,

    /// Random anti-collision value; no proof-of-work role
    pub nonce: u64,

    /// Producer and scheduler metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_data: Option<ConsensusData>,
}

impl Block {
    /// Creates a new block
    ///
    /// Fingerprints the transactions and computes the Merkle root
    /// immediately. The nonce defaults to 0; the chain stamps a random one at
    /// append time.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the block in the chain
    /// * `transactions` - Transactions to include
    /// * `prev_hash` - Hash of the predecessor block
    /// * `doctor_count` - Doctor-registry cardinality snapshot
    pub fn new(
        index: u64,
        transactions: Vec<RecordTransaction>,
        prev_hash: String,
        doctor_count: u64,
    ) -> Result<Self, ValidationError> {
        let fingerprints = Self::fingerprints_of(&transactions)?;

        Ok(Block {
            index,
            timestamp: Utc::now(),
            transactions,
            prev_hash,
            merkle_root: merkle_root(&fingerprints),
            doctor_count,
            nonce: 0,
            consensus_data: None,
        })
    }

    /// Fingerprints a transaction list in order
    pub fn fingerprints_of(
        transactions: &[RecordTransaction],
    ) -> Result<Vec<String>, ValidationError> {
        transactions.iter().map(|tx| tx.fingerprint()).collect()
    }

    /// Recomputes the Merkle root from the block's current transactions
    pub fn recompute_merkle_root(&self) -> Result<String, ValidationError> {
        Ok(merkle_root(&Self::fingerprints_of(&self.transactions)?))
    }

    /// Serializes the header subset that feeds the block hash
    ///
    /// Transactions enter only through the Merkle root, never directly.
    fn header_string(&self) -> String {
        let header = serde_json::json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "merkle_root": self.merkle_root,
            "prev_hash": self.prev_hash,
            "nonce": self.nonce,
            "doctor_count": self.doctor_count,
            "consensus_data": self.consensus_data,
        });

        // Value's Display is compact and map keys are already sorted
        header.to_string()
    }

    /// Computes the block hash
    ///
    /// Pure and referentially transparent given the header fields; recomputed
    /// on demand, never cached.
    pub fn hash(&self) -> String {
        sha256_hex(self.header_string().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transactions() -> Vec<RecordTransaction> {
        vec![
            RecordTransaction {
                hospital_id: "hosp-01".to_string(),
                doctor_id: "doc-01".to_string(),
                patient_id: "pat-01".to_string(),
                record_id: "rec-001".to_string(),
                record_type: "Diagnosis".to_string(),
                operation: "Add".to_string(),
                insurance_id: None,
                prescription: None,
                amount: None,
                timestamp: None,
                emergency: None,
            },
            RecordTransaction {
                hospital_id: "hosp-01".to_string(),
                doctor_id: "doc-02".to_string(),
                patient_id: "pat-02".to_string(),
                record_id: "rec-002".to_string(),
                record_type: "Prescription".to_string(),
                operation: "Add".to_string(),
                insurance_id: None,
                prescription: Some("Ibuprofen 400mg".to_string()),
                amount: None,
                timestamp: None,
                emergency: None,
            },
        ]
    }

    #[test]
    fn test_new_block_computes_merkle_root() {
        let block = Block::new(1, sample_transactions(), "prev".to_string(), 2).unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.doctor_count, 2);
        assert_eq!(
            block.merkle_root,
            block.recompute_merkle_root().unwrap()
        );
    }

    #[test]
    fn test_empty_block_has_sentinel_merkle_root() {
        let block = Block::new(0, Vec::new(), GENESIS_PREV_HASH.to_string(), 0).unwrap();
        assert_eq!(block.merkle_root, merkle_root(&[]));
    }

    #[test]
    fn test_hash_is_64_hex_chars_and_stable() {
        let block = Block::new(1, sample_transactions(), "prev".to_string(), 2).unwrap();
        let hash = block.hash();

        assert_eq!(hash.len(), 64);
        assert_eq!(hash, block.hash());
    }

    #[test]
    fn test_hash_changes_with_header_fields() {
        let block = Block::new(1, sample_transactions(), "prev".to_string(), 2).unwrap();
        let original = block.hash();

        let mut renonced = block.clone();
        renonced.nonce = 42;
        assert_ne!(original, renonced.hash());

        let mut relinked = block.clone();
        relinked.prev_hash = "other".to_string();
        assert_ne!(original, relinked.hash());
    }

    #[test]
    fn test_transactions_only_hash_through_merkle_root() {
        let block = Block::new(1, sample_transactions(), "prev".to_string(), 2).unwrap();
        let original = block.hash();

        // Tampering with a transaction without refreshing the Merkle root
        // leaves the block hash unchanged; validation catches it instead.
        let mut tampered = block.clone();
        tampered.transactions[0].prescription = Some("forged".to_string());
        assert_eq!(original, tampered.hash());
        assert_ne!(
            tampered.merkle_root,
            tampered.recompute_merkle_root().unwrap()
        );
    }
}
