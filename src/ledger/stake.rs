use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::registry::Registry;
use super::transaction::ValidationError;

/// Numeric stake balances per user id
///
/// Balances default to 0 for unknown ids, grow only via reward credit or
/// administrative set, and never implicitly decay.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct StakeLedger {
    balances: BTreeMap<String, f64>,
}

impl StakeLedger {
    pub fn new() -> Self {
        StakeLedger::default()
    }

    /// Gets a user's stake, defaulting to 0 for unknown ids
    pub fn get(&self, id: &str) -> f64 {
        self.balances.get(id).copied().unwrap_or(0.0)
    }

    /// Overwrites a user's stake
    ///
    /// Rejects negative or non-finite amounts and ids missing from the
    /// registry; this is an overwrite, not an accumulation.
    pub fn set(
        &mut self,
        id: &str,
        amount: f64,
        registry: &Registry,
    ) -> Result<(), ValidationError> {
        if !amount.is_finite() {
            return Err(ValidationError::NonFiniteStake);
        }
        if amount < 0.0 {
            return Err(ValidationError::NegativeStake(amount));
        }
        if !registry.contains(id) {
            return Err(ValidationError::UnknownUser(id.to_string()));
        }

        self.balances.insert(id.to_string(), amount);
        Ok(())
    }

    /// Adds to a user's balance; reward credits are always additive
    pub fn credit(&mut self, id: &str, amount: f64) {
        *self.balances.entry(id.to_string()).or_insert(0.0) += amount;
    }

    /// Inserts a zero balance for any registered user missing one
    pub fn backfill_defaults(&mut self, registry: &Registry) {
        for id in registry.all_ids() {
            self.balances.entry(id).or_insert(0.0);
        }
    }

    /// Balances in ascending id order
    pub fn balances(&self) -> &BTreeMap<String, f64> {
        &self.balances
    }
}

/// Active votes, voter id to candidate doctor id
///
/// At most one vote per voter; re-voting overwrites the previous assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct VoteLedger {
    votes: BTreeMap<String, String>,
}

impl VoteLedger {
    pub fn new() -> Self {
        VoteLedger::default()
    }

    /// Casts or overwrites a voter's vote
    ///
    /// The voter must be registered and the candidate must be a registered
    /// doctor; patients can never be voted for.
    pub fn cast(
        &mut self,
        voter: &str,
        candidate: &str,
        registry: &Registry,
    ) -> Result<(), ValidationError> {
        if !registry.contains(voter) {
            return Err(ValidationError::UnknownUser(voter.to_string()));
        }
        if !registry.is_doctor(candidate) {
            return Err(ValidationError::NotADoctor(candidate.to_string()));
        }

        self.votes.insert(voter.to_string(), candidate.to_string());
        Ok(())
    }

    pub fn get(&self, voter: &str) -> Option<&str> {
        self.votes.get(voter).map(String::as_str)
    }

    /// Votes in ascending voter order
    pub fn votes(&self) -> &BTreeMap<String, String> {
        &self.votes
    }

    /// Patients whose current vote targets the given doctor, ascending id
    pub fn supporters_of(&self, doctor_id: &str, registry: &Registry) -> Vec<String> {
        self.votes
            .iter()
            .filter(|(voter, candidate)| {
                candidate.as_str() == doctor_id && registry.is_patient(voter)
            })
            .map(|(voter, _)| voter.clone())
            .collect()
    }
}

/// Aggregated vote weight and count for one doctor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TallyEntry {
    /// Sum of the voters' current stakes
    pub weight: f64,

    /// Number of votes
    pub count: u64,
}

/// Tallies votes per doctor, weighted by the voters' current stakes
///
/// Only votes whose candidate is currently a registered doctor are counted,
/// and weight is recomputed from current stakes on every call; votes never
/// snapshot weight.
pub fn tally(
    votes: &VoteLedger,
    stakes: &StakeLedger,
    registry: &Registry,
) -> BTreeMap<String, TallyEntry> {
    let mut result: BTreeMap<String, TallyEntry> = BTreeMap::new();

    for (voter, candidate) in votes.votes() {
        if !registry.is_doctor(candidate) {
            continue;
        }

        let entry = result
            .entry(candidate.clone())
            .or_insert(TallyEntry { weight: 0.0, count: 0 });
        entry.weight += stakes.get(voter);
        entry.count += 1;
    }

    result
}
