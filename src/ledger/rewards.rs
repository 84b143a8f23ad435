use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default per-block reward; configurable on the chain, not a constant of the
/// algorithm
pub const DEFAULT_BLOCK_REWARD: f64 = 100.0;

/// Default fraction of the reward shared with the producer's supporters
pub const DEFAULT_SHARE_RATIO: f64 = 0.30;

/// Fixed rounding precision for individual supporter shares
const PRECISION: f64 = 1_000_000.0;

fn round6(value: f64) -> f64 {
    (value * PRECISION).round() / PRECISION
}

/// The credits produced by one block reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RewardOutcome {
    /// The producing delegate
    pub producer: String,

    /// Credit going to the producer
    pub producer_credit: f64,

    /// Per-supporter credits, ascending supporter id
    pub supporter_credits: Vec<(String, f64)>,
}

impl RewardOutcome {
    /// Sum of all credits; equals the block reward exactly
    pub fn total(&self) -> f64 {
        self.producer_credit
            + self
                .supporter_credits
                .iter()
                .map(|(_, amount)| amount)
                .sum::<f64>()
    }
}

/// Splits a block reward between the producer and its supporters
///
/// The supporters' pool is `block_reward * share_ratio`, the producer keeps
/// the rest. Supporters must arrive deduplicated and sorted ascending; each
/// receives an equal part rounded to 6 decimals except the last, who absorbs
/// the rounding remainder so the pool is paid out exactly. With no
/// supporters the producer receives the whole reward; no reward is ever
/// lost.
pub fn split_reward(
    block_reward: f64,
    share_ratio: f64,
    producer: &str,
    supporters: &[String],
) -> RewardOutcome {
    let supporters_share = round6(block_reward * share_ratio);
    let producer_share = block_reward - supporters_share;

    if supporters.is_empty() {
        return RewardOutcome {
            producer: producer.to_string(),
            producer_credit: block_reward,
            supporter_credits: Vec::new(),
        };
    }

    let count = supporters.len();
    let per_supporter = round6(supporters_share / count as f64);

    let mut supporter_credits = Vec::with_capacity(count);
    let mut distributed = 0.0;
    for supporter in &supporters[..count - 1] {
        supporter_credits.push((supporter.clone(), per_supporter));
        distributed += per_supporter;
    }

    // The last supporter absorbs the rounding remainder
    supporter_credits.push((
        supporters[count - 1].clone(),
        supporters_share - distributed,
    ));

    RewardOutcome {
        producer: producer.to_string(),
        producer_credit: producer_share,
        supporter_credits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_split_with_one_supporter() {
        let outcome = split_reward(100.0, 0.30, "doc-01", &ids(&["pat-01"]));

        assert_eq!(outcome.producer_credit, 70.0);
        assert_eq!(outcome.supporter_credits, vec![("pat-01".to_string(), 30.0)]);
        assert_eq!(outcome.total(), 100.0);
    }

    #[test]
    fn test_no_supporters_producer_takes_everything() {
        let outcome = split_reward(100.0, 0.30, "doc-01", &[]);

        assert_eq!(outcome.producer_credit, 100.0);
        assert!(outcome.supporter_credits.is_empty());
    }

    #[test]
    fn test_conservation_with_uneven_split() {
        // 30 / 7 does not divide evenly at 6 decimal places
        let supporters = ids(&["p1", "p2", "p3", "p4", "p5", "p6", "p7"]);
        let outcome = split_reward(100.0, 0.30, "doc-01", &supporters);

        assert_eq!(outcome.total(), 100.0);

        // All but the last receive the rounded amount
        let first = outcome.supporter_credits[0].1;
        for (_, amount) in &outcome.supporter_credits[..6] {
            assert_eq!(*amount, first);
        }
    }

    #[test]
    fn test_conservation_across_parameters() {
        for (reward, ratio, n) in [
            (100.0, 0.30, 3),
            (50.0, 0.25, 1),
            (1.0, 0.999, 11),
            (200.0, 0.50, 4),
        ] {
            let supporters: Vec<String> = (0..n).map(|i| format!("pat-{i:02}")).collect();
            let outcome = split_reward(reward, ratio, "doc-01", &supporters);
            assert_eq!(outcome.total(), reward, "reward {reward} ratio {ratio} n {n}");
        }
    }

    #[test]
    fn test_zero_ratio_gives_supporters_nothing() {
        let outcome = split_reward(100.0, 0.0, "doc-01", &ids(&["pat-01", "pat-02"]));

        assert_eq!(outcome.producer_credit, 100.0);
        assert_eq!(outcome.supporter_credits.iter().map(|(_, a)| a).sum::<f64>(), 0.0);
    }
}
