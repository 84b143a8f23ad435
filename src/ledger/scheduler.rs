use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::stake::TallyEntry;

/// Errors raised while scheduling a block producer
///
/// Consensus failures are recoverable: the caller may retry after
/// reconfiguring voters, stakes, or delegates.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("No eligible producer: winners set is empty")]
    NoEligibleProducer,

    #[error("Consensus mode not configured")]
    ModeNotConfigured,

    #[error("Create genesis first")]
    GenesisMissing,

    #[error("Genesis already exists")]
    GenesisAlreadyExists,
}

/// Configured consensus mechanism
///
/// DPoS is the only supported mechanism; the tag exists so that blocks record
/// the mode they were produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ConsensusMode {
    #[serde(rename = "DPoS")]
    Dpos,
}

/// Computes the winner set from a tally
///
/// Winners are the doctor ids tied at maximum vote weight, in ascending id
/// order; that order fixes the round-robin iteration deterministically. An
/// empty tally yields an empty set.
pub fn winners(tally: &BTreeMap<String, TallyEntry>) -> Vec<String> {
    let max_weight = tally
        .values()
        .map(|entry| entry.weight)
        .fold(f64::NEG_INFINITY, f64::max);

    tally
        .iter()
        .filter(|(_, entry)| entry.weight == max_weight)
        .map(|(id, _)| id.clone())
        .collect()
}

/// Round-robin producer scheduler over the winner set
///
/// The pointer is the scheduler's only persistent state. A stale pointer
/// (for example after the winner set shrank) is clamped back into range.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DposScheduler {
    pointer: usize,
}

impl DposScheduler {
    pub fn new() -> Self {
        DposScheduler::default()
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Restores the pointer, used for load and append rollback
    pub fn set_pointer(&mut self, pointer: usize) {
        self.pointer = pointer;
    }

    fn clamped(&self, len: usize) -> usize {
        if self.pointer < len {
            self.pointer
        } else {
            0
        }
    }

    /// Read-only peek at the next producer
    ///
    /// Clamps a stale pointer for the computation without persisting the
    /// clamp.
    pub fn expected(&self, winners: &[String]) -> Option<(String, usize)> {
        if winners.is_empty() {
            return None;
        }

        let pointer = self.clamped(winners.len());
        Some((winners[pointer].clone(), pointer))
    }

    /// Selects the current producer and advances the pointer
    ///
    /// The caller owns committing or rolling back the pointer mutation as
    /// part of the block append.
    pub fn advance(&mut self, winners: &[String]) -> Result<String, ConsensusError> {
        if winners.is_empty() {
            return Err(ConsensusError::NoEligibleProducer);
        }

        let pointer = self.clamped(winners.len());
        let producer = winners[pointer].clone();
        self.pointer = (pointer + 1) % winners.len();

        Ok(producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally_of(entries: &[(&str, f64)]) -> BTreeMap<String, TallyEntry> {
        entries
            .iter()
            .map(|(id, weight)| {
                (
                    id.to_string(),
                    TallyEntry {
                        weight: *weight,
                        count: 1,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_tally_has_no_winners() {
        assert!(winners(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_winners_are_tied_maximum_sorted_ascending() {
        let tally = tally_of(&[("doc-03", 20.0), ("doc-01", 20.0), ("doc-02", 5.0)]);
        assert_eq!(winners(&tally), vec!["doc-01", "doc-03"]);
    }

    #[test]
    fn test_round_robin_cycles_deterministically() {
        let mut scheduler = DposScheduler::new();
        let pool = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let picks: Vec<String> = (0..4)
            .map(|_| scheduler.advance(&pool).unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_expected_peek_does_not_move_pointer() {
        let mut scheduler = DposScheduler::new();
        let pool = vec!["a".to_string(), "b".to_string()];

        assert_eq!(scheduler.expected(&pool), Some(("a".to_string(), 0)));
        assert_eq!(scheduler.expected(&pool), Some(("a".to_string(), 0)));

        scheduler.advance(&pool).unwrap();
        assert_eq!(scheduler.expected(&pool), Some(("b".to_string(), 1)));
    }

    #[test]
    fn test_stale_pointer_is_clamped_without_persisting() {
        let mut scheduler = DposScheduler::new();
        scheduler.set_pointer(5);

        let pool = vec!["a".to_string(), "b".to_string()];
        assert_eq!(scheduler.expected(&pool), Some(("a".to_string(), 0)));
        // Peek did not persist the clamp
        assert_eq!(scheduler.pointer(), 5);

        // Advance reads the clamped pointer, then moves on
        assert_eq!(scheduler.advance(&pool).unwrap(), "a");
        assert_eq!(scheduler.pointer(), 1);
    }

    #[test]
    fn test_advance_on_empty_winners_fails() {
        let mut scheduler = DposScheduler::new();
        assert!(matches!(
            scheduler.advance(&[]),
            Err(ConsensusError::NoEligibleProducer)
        ));
    }
}
