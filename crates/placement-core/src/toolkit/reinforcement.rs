//! Tabular Q-learning over coarse placement states
//!
//! States bucket the data location, data size, pipeline stage and compute
//! load. Actions are the four placement moves. Unvisited pairs are 0.0.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::{require_non_negative, require_range};
use crate::models::{LocationKind, Outcome, Process, SystemState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RlAction {
    Stay,
    MoveToEdge,
    MoveToCloud,
    MoveToHpc,
}

impl RlAction {
    pub const ALL: [RlAction; 4] = [
        RlAction::Stay,
        RlAction::MoveToEdge,
        RlAction::MoveToCloud,
        RlAction::MoveToHpc,
    ];

    /// The move a placement on a target of `kind` represents
    pub fn for_kind(kind: LocationKind) -> Self {
        match kind {
            LocationKind::Local => RlAction::Stay,
            LocationKind::Edge => RlAction::MoveToEdge,
            LocationKind::PrivateCloud | LocationKind::PublicCloud => RlAction::MoveToCloud,
            LocationKind::Hpc => RlAction::MoveToHpc,
        }
    }

    pub fn matches(&self, kind: LocationKind) -> bool {
        RlAction::for_kind(kind) == *self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RlAction::Stay => "stay",
            RlAction::MoveToEdge => "move_to_edge",
            RlAction::MoveToCloud => "move_to_cloud",
            RlAction::MoveToHpc => "move_to_hpc",
        }
    }
}

impl fmt::Display for RlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSizeBucket {
    /// < 10 MB
    Tiny,
    /// < 100 MB
    Small,
    /// < 1 GB
    Medium,
    Large,
}

impl DataSizeBucket {
    pub fn from_mb(mb: f64) -> Self {
        if mb < 10.0 {
            DataSizeBucket::Tiny
        } else if mb < 100.0 {
            DataSizeBucket::Small
        } else if mb < 1024.0 {
            DataSizeBucket::Medium
        } else {
            DataSizeBucket::Large
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageBucket {
    Standalone,
    First,
    Middle,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBucket {
    Low,
    Moderate,
    High,
    Saturated,
}

impl LoadBucket {
    pub fn from_usage(usage: f64) -> Self {
        if usage < 0.3 {
            LoadBucket::Low
        } else if usage < 0.6 {
            LoadBucket::Moderate
        } else if usage < 0.8 {
            LoadBucket::High
        } else {
            LoadBucket::Saturated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RlState {
    pub data_location: Option<LocationKind>,
    pub data_size: DataSizeBucket,
    pub stage: StageBucket,
    pub load: LoadBucket,
}

impl RlState {
    pub fn observe(process: &Process, state: &SystemState) -> Self {
        let stage = match &process.pipeline {
            None => StageBucket::Standalone,
            Some(p) if p.is_first() => StageBucket::First,
            Some(p) if p.is_last() => StageBucket::Last,
            Some(_) => StageBucket::Middle,
        };
        Self {
            data_location: process.data_location.as_ref().map(|l| l.kind),
            data_size: DataSizeBucket::from_mb(process.io_size_mb),
            stage,
            load: LoadBucket::from_usage(state.compute_usage),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinforcementConfig {
    /// Learning rate
    pub alpha: f64,
    /// Discount factor
    pub gamma: f64,
    /// Exploration probability
    pub epsilon: f64,
    pub cost_weight: f64,
    pub performance_bonus: f64,
    pub sla_penalty: f64,
}

impl Default for ReinforcementConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.9,
            epsilon: 0.1,
            cost_weight: 1.0,
            performance_bonus: 1.0,
            sla_penalty: 2.0,
        }
    }
}

impl ReinforcementConfig {
    pub fn validate(&self) -> Result<(), String> {
        require_range("reinforcement.alpha", self.alpha, 0.0, 1.0)?;
        require_range("reinforcement.gamma", self.gamma, 0.0, 1.0)?;
        require_range("reinforcement.epsilon", self.epsilon, 0.0, 1.0)?;
        require_non_negative("reinforcement.cost_weight", self.cost_weight)?;
        require_non_negative("reinforcement.performance_bonus", self.performance_bonus)?;
        require_non_negative("reinforcement.sla_penalty", self.sla_penalty)
    }
}

#[derive(Debug, Clone)]
pub struct ReinforcementLearner {
    config: ReinforcementConfig,
    q: HashMap<(RlState, RlAction), f64>,
    updates: u64,
}

impl ReinforcementLearner {
    pub fn new(config: ReinforcementConfig) -> Self {
        Self {
            config,
            q: HashMap::new(),
            updates: 0,
        }
    }

    pub fn q_value(&self, state: &RlState, action: RlAction) -> f64 {
        self.q.get(&(*state, action)).copied().unwrap_or(0.0)
    }

    /// Greedy action; ties go to the earliest action in [`RlAction::ALL`]
    pub fn best_action(&self, state: &RlState) -> RlAction {
        let mut best = (RlAction::Stay, f64::NEG_INFINITY);
        for action in RlAction::ALL {
            let q = self.q_value(state, action);
            if q > best.1 {
                best = (action, q);
            }
        }
        best.0
    }

    pub fn max_q(&self, state: &RlState) -> f64 {
        RlAction::ALL
            .iter()
            .map(|&a| self.q_value(state, a))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Epsilon-greedy recommendation
    pub fn select_action<R: Rng + ?Sized>(&self, state: &RlState, rng: &mut R) -> RlAction {
        if rng.gen::<f64>() < self.config.epsilon {
            RlAction::ALL[rng.gen_range(0..RlAction::ALL.len())]
        } else {
            self.best_action(state)
        }
    }

    /// One Q-learning step. `next` is `None` for a terminal transition.
    /// Returns the updated Q value.
    pub fn update(
        &mut self,
        state: &RlState,
        action: RlAction,
        reward: f64,
        next: Option<&RlState>,
    ) -> f64 {
        let future = next.map_or(0.0, |s| self.config.gamma * self.max_q(s));
        let current = self.q_value(state, action);
        let updated = current + self.config.alpha * (reward + future - current);
        self.q.insert((*state, action), updated);
        self.updates += 1;
        updated
    }

    /// Reward shaped from an execution outcome, clamped to `[-bound, bound]`
    pub fn shaped_reward(&self, outcome: &Outcome, deadline_ms: Option<f64>, bound: f64) -> f64 {
        let mut reward = -self.config.cost_weight * outcome.cost;
        let on_time = deadline_ms.map_or(true, |d| outcome.duration_ms <= d);
        if outcome.success && on_time {
            reward += self.config.performance_bonus;
        }
        if !outcome.success {
            reward -= self.config.performance_bonus;
        }
        if !outcome.sla_met {
            reward -= self.config.sla_penalty;
        }
        reward.clamp(-bound, bound)
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn table_size(&self) -> usize {
        self.q.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{process, state};
    use crate::models::DecisionId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn outcome(success: bool, sla_met: bool, cost: f64, duration_ms: f64) -> Outcome {
        Outcome {
            decision_id: DecisionId(1),
            success,
            duration_ms,
            cost,
            sla_met,
            attribution: None,
            reward: 0.0,
        }
    }

    #[test]
    fn test_action_for_kind() {
        assert_eq!(RlAction::for_kind(LocationKind::Local), RlAction::Stay);
        assert_eq!(RlAction::for_kind(LocationKind::PublicCloud), RlAction::MoveToCloud);
        assert!(RlAction::MoveToCloud.matches(LocationKind::PrivateCloud));
        assert!(!RlAction::MoveToHpc.matches(LocationKind::Edge));
    }

    #[test]
    fn test_state_buckets() {
        let mut p = process("p1");
        p.io_size_mb = 250.0;
        let s = RlState::observe(&p, &state(5.0, 0.85));
        assert_eq!(s.data_size, DataSizeBucket::Medium);
        assert_eq!(s.load, LoadBucket::Saturated);
        assert_eq!(s.stage, StageBucket::Standalone);
    }

    #[test]
    fn test_q_update_terminal() {
        let mut rl = ReinforcementLearner::new(ReinforcementConfig::default());
        let s = RlState::observe(&process("p1"), &state(1.0, 0.2));
        let q = rl.update(&s, RlAction::MoveToEdge, 1.0, None);
        assert!((q - 0.1).abs() < 1e-12);
        assert_eq!(rl.best_action(&s), RlAction::MoveToEdge);
    }

    #[test]
    fn test_q_update_bootstraps_from_next_state() {
        let mut rl = ReinforcementLearner::new(ReinforcementConfig::default());
        let s1 = RlState::observe(&process("p1"), &state(1.0, 0.2));
        let s2 = RlState::observe(&process("p1"), &state(1.0, 0.7));
        rl.update(&s2, RlAction::Stay, 10.0, None);
        // Q(s2, stay) = 1.0, so the target is 0 + 0.9 * 1.0
        let q = rl.update(&s1, RlAction::MoveToCloud, 0.0, Some(&s2));
        assert!((q - 0.09).abs() < 1e-12);
    }

    #[test]
    fn test_greedy_without_exploration() {
        let config = ReinforcementConfig {
            epsilon: 0.0,
            ..Default::default()
        };
        let mut rl = ReinforcementLearner::new(config);
        let s = RlState::observe(&process("p1"), &state(1.0, 0.2));
        rl.update(&s, RlAction::MoveToHpc, 2.0, None);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert_eq!(rl.select_action(&s, &mut rng), RlAction::MoveToHpc);
        }
    }

    #[test]
    fn test_shaped_reward_bounded() {
        let rl = ReinforcementLearner::new(ReinforcementConfig::default());
        let ok = rl.shaped_reward(&outcome(true, true, 0.2, 100.0), None, 5.0);
        assert!((ok - 0.8).abs() < 1e-12);
        assert_eq!(rl.shaped_reward(&outcome(false, false, 10.0, 100.0), None, 5.0), -5.0);
        // Late completion earns no performance bonus
        assert_eq!(
            rl.shaped_reward(&outcome(true, true, 0.0, 900.0), Some(500.0), 5.0),
            0.0
        );
    }
}
