use std::path::Path;

use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::audit::{AccessAction, AccessRecord};
use super::block::{Block, ConsensusData, DposMetadata, GENESIS_PREV_HASH};
use super::hashing::sha256_hex;
use super::registry::{Registry, Role};
use super::rewards::{self, RewardOutcome, DEFAULT_BLOCK_REWARD, DEFAULT_SHARE_RATIO};
use super::scheduler::{self, ConsensusError, ConsensusMode, DposScheduler};
use super::stake::{self, StakeLedger, VoteLedger};
use super::storage::{PersistenceError, SnapshotStore, StateSnapshot};
use super::transaction::{RecordTransaction, ValidationError};

/// Errors raised when a block or the chain fails an integrity check
///
/// Integrity failures trigger a full rollback of the attempted mutation:
/// chain and scheduler pointer are restored to their pre-attempt values.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Block {index}: index mismatch, expected {expected}")]
    IndexMismatch { index: u64, expected: u64 },

    #[error("Block {index}: previous hash does not match chain tip")]
    LinkageMismatch { index: u64 },

    #[error("Block {index}: Merkle root mismatch")]
    MerkleMismatch { index: u64 },

    #[error("Block {index}: missing consensus metadata")]
    MissingConsensus { index: u64 },

    #[error("Block {index}: consensus mode mismatch")]
    ModeMismatch { index: u64 },

    #[error("Block {index}: producer {producer} is not a current winner")]
    IneligibleProducer { index: u64, producer: String },

    #[error("Block {index}: patients cannot be delegates or block producers")]
    PatientProducer { index: u64 },

    #[error("Genesis block must have index 0 and a null previous hash")]
    MalformedGenesis,

    #[error("Canonicalization failed: {0}")]
    Canonicalization(String),
}

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// One derived field rewritten by the repair operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RepairFix {
    /// Index of the repaired block
    pub index: u64,

    /// Which derived field was rewritten
    pub field: String,
}

/// Outcome of a repair pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RepairReport {
    /// Fields rewritten, in chain order; empty when the chain was already valid
    pub fixes: Vec<RepairFix>,
}

impl RepairReport {
    pub fn is_noop(&self) -> bool {
        self.fixes.is_empty()
    }
}

/// The healthcare ledger: chain, directory, consensus ledgers, audit trail
///
/// All mutable consensus state lives in this one context struct; operations
/// take it by reference so the state machine stays testable in isolation.
/// The engine assumes exactly one logical writer at a time.
#[derive(Debug)]
pub struct Ledger {
    /// The chain of blocks
    chain: Vec<Block>,

    /// Role-tagged user directory
    registry: Registry,

    /// Audit trail of mutating operations
    access_log: Vec<AccessRecord>,

    /// Configured consensus mechanism
    consensus_mode: Option<ConsensusMode>,

    /// Explicitly selected delegate pool; empty means derive from the tally
    delegates: Vec<String>,

    /// Stake balances
    stakes: StakeLedger,

    /// Active votes
    votes: VoteLedger,

    /// Round-robin producer scheduler
    scheduler: DposScheduler,

    /// Per-block reward
    block_reward: f64,

    /// Fraction of the reward shared with supporters
    share_ratio: f64,

    /// Snapshot store, when persistence is configured
    store: Option<SnapshotStore>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates an empty in-memory ledger
    pub fn new() -> Self {
        Ledger {
            chain: Vec::new(),
            registry: Registry::new(),
            access_log: Vec::new(),
            consensus_mode: None,
            delegates: Vec::new(),
            stakes: StakeLedger::new(),
            votes: VoteLedger::new(),
            scheduler: DposScheduler::new(),
            block_reward: DEFAULT_BLOCK_REWARD,
            share_ratio: DEFAULT_SHARE_RATIO,
            store: None,
        }
    }

    /// Creates a ledger backed by a snapshot store
    ///
    /// Loads the persisted snapshot when one exists, otherwise starts fresh;
    /// the genesis block stays an explicit caller action either way.
    pub fn with_storage<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let store = SnapshotStore::open(path)?;

        match store.load() {
            Ok(snapshot) => {
                info!("Loaded ledger state from storage");
                Ok(Self::from_snapshot(snapshot, Some(store)))
            }
            Err(PersistenceError::NotFound(_)) => {
                info!("No saved ledger state found. Starting fresh");
                let mut ledger = Self::new();
                ledger.store = Some(store);
                Ok(ledger)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Rebuilds a ledger from a persisted snapshot
    ///
    /// Defensive re-validation on load: patient ids are filtered out of the
    /// delegate list, and every registered user receives a default-zero
    /// stake entry if absent.
    pub(crate) fn from_snapshot(snapshot: StateSnapshot, store: Option<SnapshotStore>) -> Self {
        let StateSnapshot {
            chain,
            registry,
            access_log,
            consensus_mode,
            delegates,
            mut stakes,
            votes,
            scheduler_pointer,
            block_reward,
            share_ratio,
        } = snapshot;

        let (delegates, removed): (Vec<String>, Vec<String>) = delegates
            .into_iter()
            .partition(|id| !registry.is_patient(id));
        if !removed.is_empty() {
            warn!("Removed invalid patient delegates from state: {removed:?}");
        }

        stakes.backfill_defaults(&registry);

        let mut scheduler = DposScheduler::new();
        scheduler.set_pointer(scheduler_pointer);

        Ledger {
            chain,
            registry,
            access_log,
            consensus_mode,
            delegates,
            stakes,
            votes,
            scheduler,
            block_reward,
            share_ratio,
            store,
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            chain: self.chain.clone(),
            registry: self.registry.clone(),
            access_log: self.access_log.clone(),
            consensus_mode: self.consensus_mode,
            delegates: self.delegates.clone(),
            stakes: self.stakes.clone(),
            votes: self.votes.clone(),
            scheduler_pointer: self.scheduler.pointer(),
            block_reward: self.block_reward,
            share_ratio: self.share_ratio,
        }
    }

    /// Flushes the current state to the snapshot store, if one is configured
    pub fn save(&self) -> Result<(), PersistenceError> {
        match &self.store {
            Some(store) => store.save(&self.snapshot()),
            None => Ok(()),
        }
    }

    // Persistence failures are surfaced but never poison in-memory state;
    // the caller may retry via save().
    fn persist_non_fatal(&self) {
        if let Err(err) = self.save() {
            warn!("Failed to persist ledger state: {err}");
        }
    }

    fn log(&mut self, record: AccessRecord) {
        self.access_log.push(record);
    }

    // --- Read-only accessors ---

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stakes(&self) -> &StakeLedger {
        &self.stakes
    }

    pub fn votes(&self) -> &VoteLedger {
        &self.votes
    }

    pub fn access_log(&self) -> &[AccessRecord] {
        &self.access_log
    }

    pub fn delegates(&self) -> &[String] {
        &self.delegates
    }

    pub fn consensus_mode(&self) -> Option<ConsensusMode> {
        self.consensus_mode
    }

    pub fn block_reward(&self) -> f64 {
        self.block_reward
    }

    pub fn share_ratio(&self) -> f64 {
        self.share_ratio
    }

    // --- Administrative operations ---

    /// Registers a user and logs the registration
    pub fn register_user(&mut self, role: Role, id: &str, name: &str) -> Result<(), LedgerError> {
        self.registry.register(role, id, name)?;
        info!("Registered {role:?} {id}");
        self.log(AccessRecord::new("system", AccessAction::UserRegistered, id, true));
        self.persist_non_fatal();
        Ok(())
    }

    /// Grants a patient's consent to a doctor
    pub fn grant_consent(&mut self, patient_id: &str, doctor_id: &str) -> Result<(), LedgerError> {
        self.registry.grant_consent(patient_id, doctor_id)?;
        self.log(AccessRecord::new(
            patient_id,
            AccessAction::ConsentGranted,
            doctor_id,
            true,
        ));
        self.persist_non_fatal();
        Ok(())
    }

    /// Revokes a patient's consent to a doctor
    pub fn revoke_consent(&mut self, patient_id: &str, doctor_id: &str) -> Result<(), LedgerError> {
        self.registry.revoke_consent(patient_id, doctor_id)?;
        self.log(AccessRecord::new(
            patient_id,
            AccessAction::ConsentRevoked,
            doctor_id,
            true,
        ));
        self.persist_non_fatal();
        Ok(())
    }

    /// Casts or overwrites a vote for a doctor candidate
    pub fn set_vote(&mut self, voter: &str, candidate: &str) -> Result<(), LedgerError> {
        self.votes.cast(voter, candidate, &self.registry)?;
        self.log(AccessRecord::new(voter, AccessAction::VoteCast, candidate, true));
        self.persist_non_fatal();
        Ok(())
    }

    /// Overwrites a user's stake
    pub fn set_stake(&mut self, id: &str, amount: f64) -> Result<(), LedgerError> {
        self.stakes.set(id, amount, &self.registry)?;
        self.log(
            AccessRecord::new("system", AccessAction::StakeSet, id, true)
                .with_meta("amount", amount),
        );
        self.persist_non_fatal();
        Ok(())
    }

    /// Enables DPoS as the consensus mechanism
    pub fn enable_dpos(&mut self) {
        self.consensus_mode = Some(ConsensusMode::Dpos);
        self.persist_non_fatal();
    }

    /// Reconfigures the reward parameters
    pub fn set_reward_params(&mut self, block_reward: f64, share_ratio: f64) -> Result<(), LedgerError> {
        if !block_reward.is_finite() || block_reward < 0.0 {
            return Err(ValidationError::InvalidAmount(block_reward.to_string()).into());
        }
        if !share_ratio.is_finite() || !(0.0..=1.0).contains(&share_ratio) {
            return Err(ValidationError::InvalidAmount(share_ratio.to_string()).into());
        }

        self.block_reward = block_reward;
        self.share_ratio = share_ratio;
        self.persist_non_fatal();
        Ok(())
    }

    /// Selects the top-N doctors from the tally as the explicit delegate pool
    ///
    /// Ranking is weight descending, id ascending on ties. Enables DPoS as a
    /// side effect, mirroring consensus configuration as one step.
    pub fn select_delegates(&mut self, top_n: usize) -> Result<Vec<String>, LedgerError> {
        let tally = stake::tally(&self.votes, &self.stakes, &self.registry);

        let mut ranked: Vec<(String, f64)> = tally
            .into_iter()
            .map(|(id, entry)| (id, entry.weight))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let delegates: Vec<String> = ranked.into_iter().take(top_n).map(|(id, _)| id).collect();

        self.consensus_mode = Some(ConsensusMode::Dpos);
        self.delegates = delegates.clone();
        info!("Selected {} delegates", delegates.len());
        self.log(
            AccessRecord::new("system", AccessAction::DelegatesSelected, "delegates", true)
                .with_meta("delegates", delegates.join(",")),
        );
        self.persist_non_fatal();

        Ok(delegates)
    }

    // --- Consensus queries ---

    /// Computes the current winner set
    ///
    /// Tally over current votes and stakes, filtered to doctor candidates
    /// (patients are excluded at the tally, not post-hoc); when an explicit
    /// delegate pool is configured, only its members compete.
    fn current_winners(&self) -> Vec<String> {
        let mut tally = stake::tally(&self.votes, &self.stakes, &self.registry);
        if !self.delegates.is_empty() {
            tally.retain(|id, _| self.delegates.iter().any(|d| d == id));
        }

        scheduler::winners(&tally)
    }

    /// Read-only peek at the expected producer and the winner set
    pub fn expected_producer(&self) -> (Option<String>, Vec<String>) {
        let winners = self.current_winners();
        let expected = self.scheduler.expected(&winners).map(|(id, _)| id);
        (expected, winners)
    }

    /// Digest over off-chain-mutable consensus state
    ///
    /// Stored into block consensus metadata for audit; not part of the
    /// hash-chain verification.
    pub fn state_root(&self) -> String {
        let mut delegates = self.delegates.clone();
        delegates.sort();

        let state = serde_json::json!({
            "delegates": delegates,
            "stakes": self.stakes.balances(),
            "votes": self.votes.votes(),
        });

        sha256_hex(state.to_string().as_bytes())
    }

    // --- Record authorization ---

    /// Checks that a record's author may write for its patient
    ///
    /// Doctor and patient must be registered; consent is required unless the
    /// transaction carries the emergency flag. Denied attempts are logged
    /// with their reason.
    pub fn authorize_record(&mut self, tx: &RecordTransaction) -> Result<(), LedgerError> {
        if !self.registry.is_doctor(&tx.doctor_id) {
            self.log(
                AccessRecord::new(&tx.doctor_id, AccessAction::RecordWrite, &tx.record_id, false)
                    .with_reason("doctor_not_found"),
            );
            return Err(ValidationError::NotADoctor(tx.doctor_id.clone()).into());
        }
        if !self.registry.is_patient(&tx.patient_id) {
            self.log(
                AccessRecord::new(&tx.doctor_id, AccessAction::RecordWrite, &tx.record_id, false)
                    .with_reason("patient_not_found"),
            );
            return Err(ValidationError::NotAPatient(tx.patient_id.clone()).into());
        }
        if !tx.is_emergency() && !self.registry.has_consent(&tx.patient_id, &tx.doctor_id) {
            self.log(
                AccessRecord::new(&tx.doctor_id, AccessAction::RecordWrite, &tx.record_id, false)
                    .with_reason("no_consent"),
            );
            return Err(ValidationError::MissingConsent(tx.doctor_id.clone()).into());
        }

        let mut record =
            AccessRecord::new(&tx.doctor_id, AccessAction::RecordWrite, &tx.record_id, true);
        if tx.is_emergency() {
            record = record.with_reason("emergency_override");
        }
        self.log(record);

        Ok(())
    }

    // --- Chain operations ---

    /// Creates the genesis block
    ///
    /// A no-op failure when the chain is non-empty; genesis is created
    /// exactly once.
    pub fn create_genesis(&mut self) -> Result<Block, LedgerError> {
        if !self.chain.is_empty() {
            warn!("Genesis already exists. Create genesis only once");
            return Err(ConsensusError::GenesisAlreadyExists.into());
        }

        let mut block = Block::new(
            0,
            Vec::new(),
            GENESIS_PREV_HASH.to_string(),
            self.registry.doctor_count(),
        )?;
        block.consensus_data = Some(ConsensusData::Genesis);

        let hash = block.hash();
        self.chain.push(block.clone());
        info!("Genesis block created");
        self.log(
            AccessRecord::new("system", AccessAction::GenesisCreated, "genesis", true)
                .with_meta("hash", hash),
        );
        self.persist_non_fatal();

        Ok(block)
    }

    /// Verifies a candidate block against the chain tip and current state
    pub fn verify_block(&self, block: &Block, winners: &[String]) -> Result<(), IntegrityError> {
        let index = block.index;

        if index != self.chain.len() as u64 {
            return Err(IntegrityError::IndexMismatch {
                index,
                expected: self.chain.len() as u64,
            });
        }

        let expected_prev = match self.chain.last() {
            Some(tip) => tip.hash(),
            None => GENESIS_PREV_HASH.to_string(),
        };
        if block.prev_hash != expected_prev {
            return Err(IntegrityError::LinkageMismatch { index });
        }

        let recomputed = block
            .recompute_merkle_root()
            .map_err(|e| IntegrityError::Canonicalization(e.to_string()))?;
        if block.merkle_root != recomputed {
            return Err(IntegrityError::MerkleMismatch { index });
        }

        match &block.consensus_data {
            None => Err(IntegrityError::MissingConsensus { index }),
            Some(ConsensusData::Genesis) => {
                if index == 0 {
                    Ok(())
                } else {
                    Err(IntegrityError::ModeMismatch { index })
                }
            }
            Some(ConsensusData::Dpos(meta)) => {
                if self.consensus_mode != Some(ConsensusMode::Dpos) {
                    return Err(IntegrityError::ModeMismatch { index });
                }
                if self.registry.is_patient(&meta.producer) {
                    return Err(IntegrityError::PatientProducer { index });
                }
                if !winners.iter().any(|w| w == &meta.producer) {
                    return Err(IntegrityError::IneligibleProducer {
                        index,
                        producer: meta.producer.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Walks the whole chain, recomputing derived fields per block
    ///
    /// Stops at the first violation; the returned error names the broken
    /// invariant and the offending block index. Read-only and idempotent.
    pub fn validate(&self) -> Result<(), IntegrityError> {
        if self.chain.is_empty() {
            return Ok(());
        }

        let genesis = &self.chain[0];
        if genesis.index != 0 || genesis.prev_hash != GENESIS_PREV_HASH {
            return Err(IntegrityError::MalformedGenesis);
        }

        for (i, block) in self.chain.iter().enumerate() {
            let recomputed = block
                .recompute_merkle_root()
                .map_err(|e| IntegrityError::Canonicalization(e.to_string()))?;
            if block.merkle_root != recomputed {
                return Err(IntegrityError::MerkleMismatch { index: block.index });
            }

            if i > 0 {
                let previous = &self.chain[i - 1];
                if block.index != previous.index + 1 {
                    return Err(IntegrityError::IndexMismatch {
                        index: block.index,
                        expected: previous.index + 1,
                    });
                }
                if block.prev_hash != previous.hash() {
                    return Err(IntegrityError::LinkageMismatch { index: block.index });
                }
            }

            if block.consensus_data.is_none() {
                return Err(IntegrityError::MissingConsensus { index: block.index });
            }
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Produces and appends the next block
    ///
    /// The append is all-or-nothing: on any verification failure the block
    /// is discarded and the scheduler pointer is restored, and a post-append
    /// re-validation failure pops the block again. On success the reward is
    /// distributed and the state is persisted.
    pub fn add_block(&mut self, transactions: Vec<RecordTransaction>) -> Result<Block, LedgerError> {
        if self.chain.is_empty() {
            return Err(ConsensusError::GenesisMissing.into());
        }
        if self.consensus_mode.is_none() {
            return Err(ConsensusError::ModeNotConfigured.into());
        }
        for tx in &transactions {
            tx.validate()?;
        }
        if transactions.is_empty() {
            info!("Creating empty block (no transactions)");
        }

        // Never build on top of a corrupt chain
        self.validate()?;

        let winners = self.current_winners();
        let pointer_before = self.scheduler.pointer();
        let producer = self.scheduler.advance(&winners)?;
        let pointer_after = self.scheduler.pointer();

        let prev_hash = match self.chain.last() {
            Some(tip) => tip.hash(),
            None => GENESIS_PREV_HASH.to_string(),
        };

        let block = Block::new(
            self.chain.len() as u64,
            transactions,
            prev_hash,
            self.registry.doctor_count(),
        );
        let mut block = match block {
            Ok(block) => block,
            Err(err) => {
                self.scheduler.set_pointer(pointer_before);
                return Err(err.into());
            }
        };

        block.nonce = rand::thread_rng().gen_range(0..(1u64 << 30));
        block.consensus_data = Some(ConsensusData::Dpos(DposMetadata {
            producer: producer.clone(),
            winners: winners.clone(),
            pointer_before,
            pointer_after,
            producer_stake: Some(self.stakes.get(&producer)),
            state_root: Some(self.state_root()),
            extra: Default::default(),
        }));

        if let Err(err) = self.verify_block(&block, &winners) {
            // The pointer must not advance on a failed append
            self.scheduler.set_pointer(pointer_before);
            warn!("Block verification failed: {err}");
            return Err(err.into());
        }

        self.chain.push(block.clone());

        // Guard against any state mutation introduced between build and append
        if let Err(err) = self.validate() {
            self.chain.pop();
            self.scheduler.set_pointer(pointer_before);
            warn!("Post-append chain validation failed. Block rejected: {err}");
            return Err(err.into());
        }

        info!("Block {} added by producer: {producer}", block.index);
        let outcome = self.distribute_rewards(&producer, block.index);

        self.log(
            AccessRecord::new(&producer, AccessAction::BlockAdded, &block.index.to_string(), true)
                .with_meta("hash", block.hash())
                .with_meta("merkle_root", &block.merkle_root)
                .with_meta("tx_count", block.transactions.len())
                .with_meta("reward_total", outcome.total()),
        );
        self.persist_non_fatal();

        Ok(block)
    }

    /// Splits the block reward between producer and supporters
    ///
    /// Every individual credit and the aggregate distribution become audit
    /// events.
    fn distribute_rewards(&mut self, producer: &str, block_index: u64) -> RewardOutcome {
        let supporters = self.votes.supporters_of(producer, &self.registry);
        let outcome =
            rewards::split_reward(self.block_reward, self.share_ratio, producer, &supporters);

        self.stakes.credit(producer, outcome.producer_credit);
        self.log(
            AccessRecord::new("system", AccessAction::RewardCredited, producer, true)
                .with_meta("amount", outcome.producer_credit)
                .with_meta("block", block_index),
        );

        for (supporter, amount) in &outcome.supporter_credits {
            self.stakes.credit(supporter, *amount);
            self.log(
                AccessRecord::new("system", AccessAction::RewardCredited, supporter, true)
                    .with_meta("amount", amount)
                    .with_meta("block", block_index),
            );
        }

        self.log(
            AccessRecord::new("system", AccessAction::RewardDistributed, producer, true)
                .with_meta("block", block_index)
                .with_meta("total", outcome.total())
                .with_meta("supporters", outcome.supporter_credits.len()),
        );

        outcome
    }

    /// Rewrites broken linkage and Merkle roots from index 1 upward
    ///
    /// Never alters transactions, indices, or timestamps. Idempotent: a
    /// second pass finds nothing to fix. This masks tampering rather than
    /// rejecting it, so callers must confirm it explicitly.
    pub fn repair(&mut self) -> Result<RepairReport, LedgerError> {
        let mut report = RepairReport::default();

        for i in 1..self.chain.len() {
            let expected_prev = self.chain[i - 1].hash();
            if self.chain[i].prev_hash != expected_prev {
                info!("Fixing block {} hash linkage", self.chain[i].index);
                self.chain[i].prev_hash = expected_prev;
                report.fixes.push(RepairFix {
                    index: self.chain[i].index,
                    field: "prev_hash".to_string(),
                });
            }

            let recomputed = self.chain[i]
                .recompute_merkle_root()
                .map_err(|e| IntegrityError::Canonicalization(e.to_string()))?;
            if self.chain[i].merkle_root != recomputed {
                info!("Fixing block {} merkle root", self.chain[i].index);
                self.chain[i].merkle_root = recomputed;
                report.fixes.push(RepairFix {
                    index: self.chain[i].index,
                    field: "merkle_root".to_string(),
                });
            }
        }

        if report.is_noop() {
            info!("Chain was already valid");
        } else {
            info!("Chain integrity fixed: {} fields rewritten", report.fixes.len());
            self.log(
                AccessRecord::new("system", AccessAction::ChainRepaired, "chain", true)
                    .with_meta("fixes", report.fixes.len()),
            );
            self.persist_non_fatal();
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three doctors, three patients, three admins, DPoS enabled
    fn base_ledger() -> Ledger {
        let mut ledger = Ledger::new();
        for (id, name) in [("doc-a", "Alice Grey"), ("doc-b", "Ben Ode"), ("doc-c", "Cal Roy")] {
            ledger.register_user(Role::Doctor, id, name).unwrap();
        }
        for (id, name) in [("pat-a", "Pam Low"), ("pat-b", "Pia Nor"), ("pat-c", "Per Um")] {
            ledger.register_user(Role::Patient, id, name).unwrap();
        }
        for (id, name) in [("adm-a", "Ada Vox"), ("adm-b", "Abe Wit"), ("adm-c", "Ann Yee")] {
            ledger.register_user(Role::Admin, id, name).unwrap();
        }
        ledger.enable_dpos();
        ledger
    }

    /// Admin voters keep tally weights stable across reward payouts
    fn admin_voted_ledger() -> Ledger {
        let mut ledger = base_ledger();
        for (admin, doctor) in [("adm-a", "doc-a"), ("adm-b", "doc-b"), ("adm-c", "doc-c")] {
            ledger.set_stake(admin, 10.0).unwrap();
            ledger.set_vote(admin, doctor).unwrap();
        }
        ledger.create_genesis().unwrap();
        ledger
    }

    fn sample_tx(record_id: &str) -> RecordTransaction {
        RecordTransaction {
            hospital_id: "hosp-01".to_string(),
            doctor_id: "doc-a".to_string(),
            patient_id: "pat-a".to_string(),
            record_id: record_id.to_string(),
            record_type: "Diagnosis".to_string(),
            operation: "Add".to_string(),
            insurance_id: None,
            prescription: None,
            amount: None,
            timestamp: None,
            emergency: None,
        }
    }

    #[test]
    fn test_genesis_created_exactly_once() {
        let mut ledger = base_ledger();

        let genesis = ledger.create_genesis().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.prev_hash, GENESIS_PREV_HASH);
        assert_eq!(genesis.doctor_count, 3);

        assert!(matches!(
            ledger.create_genesis(),
            Err(LedgerError::Consensus(ConsensusError::GenesisAlreadyExists))
        ));
        assert_eq!(ledger.chain().len(), 1);
    }

    #[test]
    fn test_add_block_preconditions() {
        let mut ledger = base_ledger();

        // No genesis yet
        assert!(matches!(
            ledger.add_block(vec![]),
            Err(LedgerError::Consensus(ConsensusError::GenesisMissing))
        ));

        ledger.create_genesis().unwrap();

        // Mode unset
        let mut unconfigured = Ledger::new();
        unconfigured.create_genesis().unwrap();
        assert!(matches!(
            unconfigured.add_block(vec![]),
            Err(LedgerError::Consensus(ConsensusError::ModeNotConfigured))
        ));

        // No votes, so no winners
        assert!(matches!(
            ledger.add_block(vec![]),
            Err(LedgerError::Consensus(ConsensusError::NoEligibleProducer))
        ));
        assert_eq!(ledger.chain().len(), 1);
    }

    #[test]
    fn test_round_robin_produces_a_b_c_a() {
        let mut ledger = admin_voted_ledger();

        let mut producers = Vec::new();
        for i in 0..4 {
            let block = ledger.add_block(vec![sample_tx(&format!("rec-{i:03}"))]).unwrap();
            match block.consensus_data {
                Some(ConsensusData::Dpos(meta)) => producers.push(meta.producer),
                other => panic!("unexpected consensus data: {other:?}"),
            }
        }

        assert_eq!(producers, vec!["doc-a", "doc-b", "doc-c", "doc-a"]);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_two_way_tie_round_robins_between_both() {
        let mut ledger = base_ledger();
        ledger.set_stake("adm-a", 10.0).unwrap();
        ledger.set_stake("adm-b", 10.0).unwrap();
        ledger.set_vote("adm-a", "doc-b").unwrap();
        ledger.set_vote("adm-b", "doc-a").unwrap();
        ledger.create_genesis().unwrap();

        let (expected, winners) = ledger.expected_producer();
        assert_eq!(winners, vec!["doc-a", "doc-b"]);
        assert_eq!(expected.as_deref(), Some("doc-a"));

        let mut producers = Vec::new();
        for _ in 0..4 {
            let block = ledger.add_block(vec![]).unwrap();
            if let Some(ConsensusData::Dpos(meta)) = block.consensus_data {
                producers.push(meta.producer);
            }
        }
        assert_eq!(producers, vec!["doc-a", "doc-b", "doc-a", "doc-b"]);
    }

    #[test]
    fn test_expected_producer_is_read_only() {
        let ledger = admin_voted_ledger();

        let first = ledger.expected_producer();
        let second = ledger.expected_producer();
        assert_eq!(first, second);
    }

    #[test]
    fn test_block_stamps_scheduler_audit_metadata() {
        let mut ledger = admin_voted_ledger();
        let block = ledger.add_block(vec![]).unwrap();

        let meta = match block.consensus_data {
            Some(ConsensusData::Dpos(meta)) => meta,
            other => panic!("unexpected consensus data: {other:?}"),
        };

        assert_eq!(meta.winners, vec!["doc-a", "doc-b", "doc-c"]);
        assert_eq!(meta.pointer_before, 0);
        assert_eq!(meta.pointer_after, 1);
        assert!(meta.state_root.is_some());
    }

    #[test]
    fn test_tampered_prev_hash_is_rejected_without_growth() {
        let mut ledger = admin_voted_ledger();

        let mut block = Block::new(1, vec![sample_tx("rec-001")], "f".repeat(64), 3).unwrap();
        block.consensus_data = Some(ConsensusData::Dpos(DposMetadata {
            producer: "doc-a".to_string(),
            winners: vec!["doc-a".to_string()],
            pointer_before: 0,
            pointer_after: 0,
            producer_stake: None,
            state_root: None,
            extra: Default::default(),
        }));

        let winners = vec!["doc-a".to_string()];
        assert!(matches!(
            ledger.verify_block(&block, &winners),
            Err(IntegrityError::LinkageMismatch { index: 1 })
        ));
        assert_eq!(ledger.chain().len(), 1);
    }

    #[test]
    fn test_failed_append_rolls_back_pointer() {
        let mut ledger = admin_voted_ledger();
        ledger.add_block(vec![]).unwrap();

        // Corrupt the tip so the pre-append validation fails
        ledger.chain[1].prev_hash = "0".repeat(64);

        let result = ledger.add_block(vec![]);
        assert!(matches!(result, Err(LedgerError::Integrity(_))));
        assert_eq!(ledger.chain().len(), 2);
        // Pointer still points at the producer after the one successful block
        let (expected, _) = ledger.expected_producer();
        assert_eq!(expected.as_deref(), Some("doc-b"));
    }

    #[test]
    fn test_validate_is_idempotent() {
        let mut ledger = admin_voted_ledger();
        ledger.add_block(vec![sample_tx("rec-001")]).unwrap();

        assert!(ledger.validate().is_ok());
        assert!(ledger.validate().is_ok());

        ledger.chain[1].prev_hash = "0".repeat(64);
        assert!(ledger.validate().is_err());
        assert!(ledger.validate().is_err());
    }

    #[test]
    fn test_corrupt_then_repair_scenario() {
        let mut ledger = admin_voted_ledger();
        ledger.add_block(vec![sample_tx("rec-001")]).unwrap();

        ledger.chain[1].prev_hash = "0".repeat(64);
        assert!(matches!(
            ledger.validate(),
            Err(IntegrityError::LinkageMismatch { index: 1 })
        ));

        let report = ledger.repair().unwrap();
        assert_eq!(report.fixes.len(), 1);
        assert_eq!(report.fixes[0].index, 1);
        assert!(ledger.validate().is_ok());

        // Second invocation is a no-op
        let report = ledger.repair().unwrap();
        assert!(report.is_noop());
    }

    #[test]
    fn test_repair_never_touches_content() {
        let mut ledger = admin_voted_ledger();
        ledger.add_block(vec![sample_tx("rec-001")]).unwrap();

        ledger.chain[1].transactions[0].prescription = Some("forged".to_string());
        let timestamps: Vec<_> = ledger.chain.iter().map(|b| b.timestamp).collect();

        let report = ledger.repair().unwrap();
        assert_eq!(report.fixes[0].field, "merkle_root");

        // Content and timestamps untouched, only the derived root rewritten
        assert_eq!(
            ledger.chain[1].transactions[0].prescription.as_deref(),
            Some("forged")
        );
        assert_eq!(
            timestamps,
            ledger.chain.iter().map(|b| b.timestamp).collect::<Vec<_>>()
        );
        assert!(ledger.validate().is_ok());
    }

    #[test]
    fn test_reward_conservation_through_production() {
        let mut ledger = base_ledger();
        // Two patient supporters behind doc-a
        ledger.set_stake("pat-a", 10.0).unwrap();
        ledger.set_stake("pat-b", 10.0).unwrap();
        ledger.set_vote("pat-a", "doc-a").unwrap();
        ledger.set_vote("pat-b", "doc-a").unwrap();
        ledger.create_genesis().unwrap();

        let before: f64 = ["doc-a", "pat-a", "pat-b"]
            .iter()
            .map(|id| ledger.stakes().get(id))
            .sum();

        ledger.add_block(vec![]).unwrap();

        let after: f64 = ["doc-a", "pat-a", "pat-b"]
            .iter()
            .map(|id| ledger.stakes().get(id))
            .sum();
        assert_eq!(after - before, ledger.block_reward());

        // 30% pool split between the two supporters, credits additive
        assert_eq!(ledger.stakes().get("doc-a"), 70.0);
        assert_eq!(ledger.stakes().get("pat-a"), 25.0);
        assert_eq!(ledger.stakes().get("pat-b"), 25.0);
    }

    #[test]
    fn test_producer_takes_all_without_supporters() {
        let mut ledger = admin_voted_ledger();
        ledger.add_block(vec![]).unwrap();

        // Admin voters are not supporters; doc-a keeps the whole reward
        assert_eq!(ledger.stakes().get("doc-a"), 100.0);
        assert_eq!(ledger.stakes().get("adm-a"), 10.0);
    }

    #[test]
    fn test_explicit_delegates_restrict_winner_pool() {
        let mut ledger = base_ledger();
        for (admin, doctor) in [("adm-a", "doc-a"), ("adm-b", "doc-b"), ("adm-c", "doc-c")] {
            ledger.set_stake(admin, 10.0).unwrap();
            ledger.set_vote(admin, doctor).unwrap();
        }
        ledger.set_stake("adm-b", 25.0).unwrap();

        let delegates = ledger.select_delegates(2).unwrap();
        assert_eq!(delegates, vec!["doc-b", "doc-a"]);

        // doc-c is tallied but not in the delegate pool
        let (_, winners) = ledger.expected_producer();
        assert_eq!(winners, vec!["doc-b"]);
    }

    #[test]
    fn test_state_root_tracks_consensus_state() {
        let mut ledger = base_ledger();
        let initial = ledger.state_root();
        assert_eq!(initial, ledger.state_root());

        ledger.set_stake("pat-a", 5.0).unwrap();
        let after_stake = ledger.state_root();
        assert_ne!(initial, after_stake);

        ledger.set_vote("pat-a", "doc-a").unwrap();
        assert_ne!(after_stake, ledger.state_root());
    }

    #[test]
    fn test_authorize_record_requires_consent() {
        let mut ledger = base_ledger();
        let tx = sample_tx("rec-001");

        assert!(matches!(
            ledger.authorize_record(&tx),
            Err(LedgerError::Validation(ValidationError::MissingConsent(_)))
        ));

        // The denial is in the audit trail with its reason
        let last = ledger.access_log().last().unwrap();
        assert_eq!(last.action, AccessAction::RecordWrite);
        assert!(!last.success);
        assert_eq!(last.reason.as_deref(), Some("no_consent"));

        ledger.grant_consent("pat-a", "doc-a").unwrap();
        assert!(ledger.authorize_record(&tx).is_ok());
    }

    #[test]
    fn test_emergency_record_bypasses_consent() {
        let mut ledger = base_ledger();
        let mut tx = sample_tx("rec-911");
        tx.record_type = "Emergency".to_string();
        tx.operation = "Emergency_Add".to_string();
        tx.emergency = Some(true);

        assert!(ledger.authorize_record(&tx).is_ok());
        let last = ledger.access_log().last().unwrap();
        assert_eq!(last.reason.as_deref(), Some("emergency_override"));
    }

    #[test]
    fn test_snapshot_restore_sanitizes_state() {
        let mut ledger = admin_voted_ledger();
        ledger.add_block(vec![]).unwrap();

        let mut snapshot = ledger.snapshot();
        // Corrupt the persisted delegate list with a patient id
        snapshot.delegates = vec!["doc-a".to_string(), "pat-a".to_string()];

        let restored = Ledger::from_snapshot(snapshot, None);
        assert_eq!(restored.delegates(), ["doc-a".to_string()]);

        // Every registered user has a stake entry after load
        assert_eq!(restored.stakes().balances().len(), 9);
        assert_eq!(restored.chain().len(), 2);
        assert!(restored.is_valid());

        // Scheduler pointer survives the round trip
        assert_eq!(restored.scheduler.pointer(), ledger.scheduler.pointer());
    }

    #[test]
    fn test_persisted_state_survives_reopen() {
        let path = std::env::temp_dir().join(format!("medichain-{}", uuid::Uuid::new_v4()));

        // First process lifetime: build state and let it flush
        {
            let mut ledger = Ledger::with_storage(&path).unwrap();
            for (id, name) in [("doc-a", "Alice Grey"), ("doc-b", "Ben Ode")] {
                ledger.register_user(Role::Doctor, id, name).unwrap();
            }
            ledger.register_user(Role::Admin, "adm-a", "Ada Vox").unwrap();
            ledger.enable_dpos();
            ledger.set_stake("adm-a", 10.0).unwrap();
            ledger.set_vote("adm-a", "doc-a").unwrap();
            ledger.create_genesis().unwrap();
            ledger.add_block(vec![sample_tx("rec-001")]).unwrap();
        }

        // Second lifetime: the saved snapshot must load, not fall back fresh
        let reloaded = Ledger::with_storage(&path).unwrap();
        assert_eq!(reloaded.chain().len(), 2);
        assert!(reloaded.is_valid());
        assert_eq!(reloaded.registry().doctor_count(), 2);
        assert_eq!(reloaded.consensus_mode(), Some(ConsensusMode::Dpos));
        assert_eq!(reloaded.votes().get("adm-a"), Some("doc-a"));
        assert_eq!(reloaded.stakes().get("doc-a"), 100.0);
        assert_eq!(
            reloaded.expected_producer().0.as_deref(),
            Some("doc-a")
        );
        assert!(!reloaded.access_log().is_empty());

        drop(reloaded);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_block_added_events_are_logged() {
        let mut ledger = admin_voted_ledger();
        ledger.add_block(vec![sample_tx("rec-001")]).unwrap();

        let actions: Vec<AccessAction> =
            ledger.access_log().iter().map(|r| r.action).collect();
        assert!(actions.contains(&AccessAction::GenesisCreated));
        assert!(actions.contains(&AccessAction::BlockAdded));
        assert!(actions.contains(&AccessAction::RewardCredited));
        assert!(actions.contains(&AccessAction::RewardDistributed));
    }
}
