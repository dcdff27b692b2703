//! Thompson-sampling strategy selection
//!
//! Each strategy keeps a Beta posterior over its success probability. A
//! selection draws one sample per arm from the engine's seeded RNG and the
//! largest sample wins, so a fixed seed replays the same choices.

use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::require_positive;
use crate::error::ToolkitError;
use crate::models::ObjectiveKind;

/// Placement strategy families arbitrated by the bandit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    DataLocal,
    Performance,
    CostOptimal,
    Balanced,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::DataLocal,
        Strategy::Performance,
        Strategy::CostOptimal,
        Strategy::Balanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::DataLocal => "data_local",
            Strategy::Performance => "performance",
            Strategy::CostOptimal => "cost_optimal",
            Strategy::Balanced => "balanced",
        }
    }

    /// Objectives whose weight this strategy tilts upward
    pub fn emphasis(&self) -> &'static [ObjectiveKind] {
        match self {
            Strategy::DataLocal => &[ObjectiveKind::DataLocality, ObjectiveKind::NetworkCost],
            Strategy::Performance => &[
                ObjectiveKind::Latency,
                ObjectiveKind::Throughput,
                ObjectiveKind::QueueDepth,
            ],
            Strategy::CostOptimal => &[
                ObjectiveKind::ComputeCost,
                ObjectiveKind::NetworkCost,
                ObjectiveKind::Energy,
            ],
            Strategy::Balanced => &[],
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    pub arms: Vec<Strategy>,
    pub prior_alpha: f64,
    pub prior_beta: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            arms: Strategy::ALL.to_vec(),
            prior_alpha: 1.0,
            prior_beta: 1.0,
        }
    }
}

impl BanditConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.arms.is_empty() {
            return Err("bandit.arms must not be empty".into());
        }
        require_positive("bandit.prior_alpha", self.prior_alpha)?;
        require_positive("bandit.prior_beta", self.prior_beta)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaPosterior {
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Observations folded in beyond the prior
    pub fn trials(&self, prior: &BetaPosterior) -> f64 {
        (self.alpha - prior.alpha) + (self.beta - prior.beta)
    }
}

#[derive(Debug, Clone)]
pub struct BanditSelector {
    prior: BetaPosterior,
    arms: BTreeMap<Strategy, BetaPosterior>,
}

impl BanditSelector {
    pub fn new(config: &BanditConfig) -> Self {
        let prior = BetaPosterior {
            alpha: config.prior_alpha,
            beta: config.prior_beta,
        };
        Self {
            prior,
            arms: config.arms.iter().map(|&arm| (arm, prior)).collect(),
        }
    }

    /// Draw one Beta sample per arm and return the arm with the largest.
    /// Ties go to the arm listed first.
    pub fn select_strategy<R: Rng + ?Sized>(&self, rng: &mut R) -> Strategy {
        let mut best: Option<(Strategy, f64)> = None;
        for (&arm, posterior) in &self.arms {
            let sample = match Beta::new(posterior.alpha, posterior.beta) {
                Ok(dist) => dist.sample(rng),
                Err(_) => posterior.mean(),
            };
            if best.map_or(true, |(_, s)| sample > s) {
                best = Some((arm, sample));
            }
        }
        best.map_or(Strategy::Balanced, |(arm, _)| arm)
    }

    pub fn update_strategy(&mut self, arm: Strategy, success: bool) -> Result<(), ToolkitError> {
        let posterior = self
            .arms
            .get_mut(&arm)
            .ok_or_else(|| ToolkitError::UnknownArm(arm.to_string()))?;
        if success {
            posterior.alpha += 1.0;
        } else {
            posterior.beta += 1.0;
        }
        Ok(())
    }

    pub fn posterior(&self, arm: Strategy) -> Option<BetaPosterior> {
        self.arms.get(&arm).copied()
    }

    pub fn posterior_means(&self) -> BTreeMap<Strategy, f64> {
        self.arms.iter().map(|(&arm, p)| (arm, p.mean())).collect()
    }

    pub fn total_trials(&self) -> f64 {
        self.arms.values().map(|p| p.trials(&self.prior)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_update_moves_posterior() {
        let mut bandit = BanditSelector::new(&BanditConfig::default());
        bandit.update_strategy(Strategy::Performance, true).unwrap();
        bandit.update_strategy(Strategy::Performance, false).unwrap();
        bandit.update_strategy(Strategy::Performance, true).unwrap();

        let p = bandit.posterior(Strategy::Performance).unwrap();
        assert_eq!(p.alpha, 3.0);
        assert_eq!(p.beta, 2.0);
        assert_eq!(bandit.total_trials(), 3.0);
    }

    #[test]
    fn test_unknown_arm() {
        let config = BanditConfig {
            arms: vec![Strategy::Balanced],
            ..Default::default()
        };
        let mut bandit = BanditSelector::new(&config);
        assert_eq!(
            bandit.update_strategy(Strategy::DataLocal, true),
            Err(ToolkitError::UnknownArm("data_local".into()))
        );
    }

    #[test]
    fn test_same_seed_same_choices() {
        let bandit = BanditSelector::new(&BanditConfig::default());
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let first: Vec<_> = (0..50).map(|_| bandit.select_strategy(&mut a)).collect();
        let second: Vec<_> = (0..50).map(|_| bandit.select_strategy(&mut b)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_converges_to_best_arm() {
        let mut bandit = BanditSelector::new(&BanditConfig::default());
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..300 {
            let arm = bandit.select_strategy(&mut rng);
            let success = arm == Strategy::CostOptimal || rng.gen_bool(0.2);
            bandit.update_strategy(arm, success).unwrap();
        }

        let picks = (0..200)
            .filter(|_| bandit.select_strategy(&mut rng) == Strategy::CostOptimal)
            .count();
        assert!(picks > 150, "cost-optimal picked {} of 200", picks);
    }

    #[test]
    fn test_strategy_emphasis() {
        assert!(Strategy::DataLocal
            .emphasis()
            .contains(&ObjectiveKind::DataLocality));
        assert!(Strategy::Balanced.emphasis().is_empty());
    }
}
