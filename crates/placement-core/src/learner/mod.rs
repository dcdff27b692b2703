//! Adaptive learner
//!
//! Folds reported outcomes into the weight vector, the bandit posteriors,
//! the Q-table and the live statistics of applied patterns, and discovers
//! new patterns from the bounded decision history.

pub mod history;
pub mod patterns;

pub use history::{DecisionHistory, HistoryRecord};
pub use patterns::{
    discover, wilson_lower_bound, Candidate, Condition, DiscoveredPattern, Operator,
    PatternConfig, PatternId, PatternMerge, PatternSet, PatternSource, PatternState,
};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::{require_non_negative, require_positive};
use crate::error::{EngineError, EngineResult};
use crate::models::{ObjectiveKind, Outcome, SystemState};
use crate::toolkit::{GradientOptimizer, PredictorToolkit};
use crate::weights::WeightVector;

/// Attribution added to Latency when the SLA was missed
const SLA_MISS_ATTRIBUTION: f64 = 0.25;
/// Attribution added to ComputeCost when the cost exceeded the prediction
const COST_OVERRUN_ATTRIBUTION: f64 = 0.25;

fn default_reward_bound() -> f64 {
    5.0
}

fn default_history_capacity() -> usize {
    100
}

fn default_convergence_window() -> usize {
    20
}

fn default_convergence_epsilon() -> f64 {
    1e-3
}

fn default_discovery_interval() -> u64 {
    25
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Gradient step size. Mandatory: there is no canonical default.
    pub learning_rate: f64,
    #[serde(default)]
    pub momentum: f64,
    /// Rewards are clamped to [-bound, bound] and scaled by it
    #[serde(default = "default_reward_bound")]
    pub reward_bound: f64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Weight updates examined by the convergence indicator
    #[serde(default = "default_convergence_window")]
    pub convergence_window: usize,
    #[serde(default = "default_convergence_epsilon")]
    pub convergence_epsilon: f64,
    /// Applied outcomes between pattern discovery passes
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval: u64,
    /// An outcome counts as a success when flagged successful and its
    /// reward exceeds this
    #[serde(default)]
    pub success_reward: f64,
}

impl LearningConfig {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            reward_bound: default_reward_bound(),
            history_capacity: default_history_capacity(),
            convergence_window: default_convergence_window(),
            convergence_epsilon: default_convergence_epsilon(),
            discovery_interval: default_discovery_interval(),
            success_reward: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        require_positive("learning.learning_rate", self.learning_rate)?;
        if !(self.momentum.is_finite() && (0.0..1.0).contains(&self.momentum)) {
            return Err(format!("learning.momentum must be within [0, 1), got {}", self.momentum));
        }
        require_positive("learning.reward_bound", self.reward_bound)?;
        require_non_negative("learning.convergence_epsilon", self.convergence_epsilon)?;
        if !self.success_reward.is_finite() {
            return Err("learning.success_reward must be finite".into());
        }
        if self.history_capacity == 0 {
            return Err("learning.history_capacity must be positive".into());
        }
        if self.convergence_window == 0 {
            return Err("learning.convergence_window must be positive".into());
        }
        if self.discovery_interval == 0 {
            return Err("learning.discovery_interval must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeDisposition {
    Applied,
    /// Already processed; nothing changed
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightUpdate {
    Applied { change: f64 },
    /// The previous vector was kept
    Rejected { reason: String },
}

/// What applying one outcome changed
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeReport {
    pub disposition: OutcomeDisposition,
    pub weights: Option<WeightUpdate>,
    pub deprecated_pattern: Option<PatternId>,
    pub discovery_due: bool,
}

impl OutcomeReport {
    fn duplicate() -> Self {
        Self {
            disposition: OutcomeDisposition::Duplicate,
            weights: None,
            deprecated_pattern: None,
            discovery_due: false,
        }
    }
}

/// Read-only stability view of recent weight updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceIndicator {
    pub window: usize,
    /// Updates currently in the window
    pub samples: usize,
    pub max_recent_change: f64,
    pub converged: bool,
}

#[derive(Debug)]
struct ConvergenceTracker {
    window: usize,
    epsilon: f64,
    changes: VecDeque<f64>,
}

impl ConvergenceTracker {
    fn new(window: usize, epsilon: f64) -> Self {
        Self {
            window,
            epsilon,
            changes: VecDeque::with_capacity(window),
        }
    }

    fn record(&mut self, change: f64) {
        if self.changes.len() == self.window {
            self.changes.pop_front();
        }
        self.changes.push_back(change);
    }

    fn indicator(&self) -> ConvergenceIndicator {
        let max_recent_change = self.changes.iter().copied().fold(0.0, f64::max);
        ConvergenceIndicator {
            window: self.window,
            samples: self.changes.len(),
            max_recent_change,
            converged: self.changes.len() == self.window && max_recent_change < self.epsilon,
        }
    }
}

pub struct AdaptiveLearner {
    config: LearningConfig,
    optimizer: GradientOptimizer,
    history: DecisionHistory,
    patterns: PatternSet,
    convergence: ConvergenceTracker,
    applied: u64,
    duplicates: u64,
    successes: u64,
    rejected_updates: u64,
    since_discovery: u64,
}

impl AdaptiveLearner {
    pub fn new(config: &LearningConfig, patterns: &PatternConfig) -> Self {
        Self {
            optimizer: GradientOptimizer::new(config.learning_rate, config.momentum),
            history: DecisionHistory::new(config.history_capacity),
            patterns: PatternSet::new(patterns.clone()),
            convergence: ConvergenceTracker::new(
                config.convergence_window,
                config.convergence_epsilon,
            ),
            config: config.clone(),
            applied: 0,
            duplicates: 0,
            successes: 0,
            rejected_updates: 0,
            since_discovery: 0,
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn record_decision(&mut self, record: HistoryRecord) {
        self.history.push(record);
    }

    /// Apply one outcome.
    ///
    /// Duplicates are reported and change nothing. The bandit, Q-table and
    /// pattern statistics are always updated for a new outcome; the weight
    /// vector only when the projected step satisfies its invariants.
    pub fn apply_outcome(
        &mut self,
        outcome: &Outcome,
        weights: &mut WeightVector,
        toolkit: &mut PredictorToolkit,
    ) -> EngineResult<OutcomeReport> {
        outcome.validate()?;
        let id = outcome.decision_id;
        if self.history.is_processed(id) {
            self.duplicates += 1;
            return Ok(OutcomeReport::duplicate());
        }
        let record = match self.history.get_mut(id) {
            Some(record) => {
                record.outcome = Some(outcome.clone());
                record.clone()
            }
            None => return Err(EngineError::UnknownDecision(id)),
        };
        self.history.mark_processed(id);
        self.applied += 1;
        self.since_discovery += 1;

        let success = outcome.success && outcome.reward > self.config.success_reward;
        if success {
            self.successes += 1;
        }

        if let Err(e) = toolkit.bandit_mut().update_strategy(record.strategy, success) {
            warn!(decision = %id, error = %e, "Bandit update skipped");
        }

        let next = self.history.next_state_on_target(id);
        let shaped = toolkit.reinforcement().shaped_reward(
            outcome,
            record.deadline_ms,
            self.config.reward_bound,
        );
        let q = toolkit
            .reinforcement_mut()
            .update(&record.rl_state, record.action, shaped, next.as_ref());
        debug!(
            decision = %id,
            action = %record.action,
            reward = shaped,
            q,
            terminal = next.is_none(),
            "Q-table updated"
        );

        let deprecated_pattern = record
            .applied_pattern
            .filter(|&p| self.patterns.record_result(p, success));

        let attribution = self.attribute(&record, outcome, weights);
        let update = self.update_weights(weights, &attribution, outcome.reward);

        Ok(OutcomeReport {
            disposition: OutcomeDisposition::Applied,
            weights: Some(update),
            deprecated_pattern,
            discovery_due: self.discovery_due(),
        })
    }

    /// Per-objective share of the outcome, aligned with `weights` entries
    /// and summing to 1.
    ///
    /// A supplied attribution is normalized as given. Otherwise the shares
    /// follow the selected target's weighted cost contributions, with
    /// Latency bumped on an SLA miss and ComputeCost bumped when the
    /// actual cost exceeded the prediction.
    pub fn attribute(
        &self,
        record: &HistoryRecord,
        outcome: &Outcome,
        weights: &WeightVector,
    ) -> Vec<f64> {
        let objectives: Vec<ObjectiveKind> =
            weights.entries().iter().map(|e| e.objective).collect();

        if let Some(supplied) = &outcome.attribution {
            let raw: Vec<f64> = objectives
                .iter()
                .map(|o| supplied.get(o).copied().unwrap_or(0.0))
                .collect();
            if let Some(shares) = normalized(raw) {
                return shares;
            }
        }

        let raw: Vec<f64> = objectives
            .iter()
            .map(|o| record.contributions.get(o).copied().unwrap_or(0.0))
            .collect();
        let mut shares = normalized(raw).unwrap_or_else(|| uniform(objectives.len()));
        for (share, objective) in shares.iter_mut().zip(&objectives) {
            match objective {
                ObjectiveKind::Latency if !outcome.sla_met => *share += SLA_MISS_ATTRIBUTION,
                ObjectiveKind::ComputeCost if outcome.cost > record.predicted_compute_cost => {
                    *share += COST_OVERRUN_ATTRIBUTION
                }
                _ => {}
            }
        }
        normalized(shares).unwrap_or_else(|| uniform(objectives.len()))
    }

    /// `g_i = -(reward / bound) * a_i`, stepped by the optimizer, then
    /// clamped and renormalized into a new vector
    fn update_weights(
        &mut self,
        weights: &mut WeightVector,
        attribution: &[f64],
        reward: f64,
    ) -> WeightUpdate {
        let bound = self.config.reward_bound;
        let signal = reward.clamp(-bound, bound) / bound;
        let gradient: Vec<f64> = attribution.iter().map(|a| -signal * a).collect();

        let stepped = self
            .optimizer
            .update(&weights.values(), &gradient, -signal)
            .map_err(EngineError::from)
            .and_then(|raw| weights.with_values(&raw));

        match stepped {
            Ok(next) => {
                let change = weights.max_abs_change(&next);
                *weights = next;
                self.convergence.record(change);
                WeightUpdate::Applied { change }
            }
            Err(e) => {
                self.rejected_updates += 1;
                self.optimizer.reset_velocity();
                warn!(error = %e, "Weight update rejected; keeping previous weights");
                WeightUpdate::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn discovery_due(&self) -> bool {
        self.since_discovery >= self.config.discovery_interval
    }

    /// Completed history for a discovery pass; resets the discovery counter
    pub fn discovery_snapshot(&mut self) -> Vec<HistoryRecord> {
        self.since_discovery = 0;
        self.history.snapshot()
    }

    pub fn merge_patterns(&mut self, candidates: Vec<Candidate>, now: i64) -> PatternMerge {
        self.patterns.merge(candidates, now)
    }

    /// Snapshot, discover and merge in one step
    pub fn run_discovery(&mut self, now: i64) -> PatternMerge {
        let snapshot = self.discovery_snapshot();
        let candidates = discover(&snapshot, self.patterns.config(), self.config.success_reward);
        self.merge_patterns(candidates, now)
    }

    pub fn matching_pattern(&self, state: &SystemState) -> Option<&DiscoveredPattern> {
        self.patterns.best_match(state)
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn history(&self) -> &DecisionHistory {
        &self.history
    }

    pub fn convergence(&self) -> ConvergenceIndicator {
        self.convergence.indicator()
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn rejected_updates(&self) -> u64 {
        self.rejected_updates
    }

    /// Share of applied outcomes that succeeded; 0 before any outcome
    pub fn success_rate(&self) -> f64 {
        if self.applied == 0 {
            0.0
        } else {
            self.successes as f64 / self.applied as f64
        }
    }
}

fn normalized(values: Vec<f64>) -> Option<Vec<f64>> {
    let sum: f64 = values.iter().sum();
    (sum.is_finite() && sum > 0.0).then(|| values.into_iter().map(|v| v / sum).collect())
}

fn uniform(n: usize) -> Vec<f64> {
    vec![1.0 / n.max(1) as f64; n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{engine_config, outcome, record, state};
    use crate::models::{DecisionId, LocationKind};
    use crate::toolkit::ToolkitConfig;
    use std::collections::BTreeMap;

    struct Harness {
        learner: AdaptiveLearner,
        weights: WeightVector,
        toolkit: PredictorToolkit,
    }

    fn harness() -> Harness {
        let config = engine_config();
        Harness {
            learner: AdaptiveLearner::new(&config.learning, &config.patterns),
            weights: WeightVector::from_objectives(&config.objectives).unwrap(),
            toolkit: PredictorToolkit::new(&ToolkitConfig::default(), 7),
        }
    }

    impl Harness {
        fn report(&mut self, outcome: &Outcome) -> EngineResult<OutcomeReport> {
            self.learner
                .apply_outcome(outcome, &mut self.weights, &mut self.toolkit)
        }
    }

    fn favoring(objective: ObjectiveKind, reward: f64, id: u64) -> Outcome {
        let mut o = outcome(id, reward > 0.0, reward);
        o.attribution = Some(BTreeMap::from([(objective, 1.0)]));
        o
    }

    #[test]
    fn test_missing_learning_rate_fails_validation() {
        assert!(LearningConfig::new(0.0).validate().is_err());
        assert!(LearningConfig::new(0.01).validate().is_ok());
    }

    #[test]
    fn test_unknown_decision() {
        let mut h = harness();
        let err = h.report(&outcome(42, true, 1.0)).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDecision(DecisionId(42))));
    }

    #[test]
    fn test_duplicate_outcome_is_idempotent() {
        let mut h = harness();
        h.learner
            .record_decision(record(1, "t", LocationKind::Edge, state(5.0, 0.5)));
        let o = favoring(ObjectiveKind::QueueDepth, 3.0, 1);

        let first = h.report(&o).unwrap();
        assert_eq!(first.disposition, OutcomeDisposition::Applied);
        let after_first = h.weights.clone();

        let second = h.report(&o).unwrap();
        assert_eq!(second.disposition, OutcomeDisposition::Duplicate);
        assert_eq!(h.weights, after_first);
        assert_eq!(h.learner.applied(), 1);
        assert_eq!(h.learner.duplicates(), 1);
    }

    #[test]
    fn test_positive_reward_raises_attributed_weight() {
        let mut h = harness();
        let before = h.weights.weight(ObjectiveKind::QueueDepth).unwrap();
        for i in 0..10 {
            h.learner
                .record_decision(record(i, "t", LocationKind::Edge, state(5.0, 0.5)));
            h.report(&favoring(ObjectiveKind::QueueDepth, 4.0, i)).unwrap();
        }
        let after = h.weights.weight(ObjectiveKind::QueueDepth).unwrap();
        assert!(after > before);
        assert!((h.weights.sum() - 1.0).abs() < 1e-3);
        assert!(h.weights.check_invariants().is_ok());
    }

    #[test]
    fn test_negative_reward_lowers_attributed_weight() {
        let mut h = harness();
        let before = h.weights.weight(ObjectiveKind::NetworkCost).unwrap();
        h.learner
            .record_decision(record(1, "t", LocationKind::Edge, state(5.0, 0.5)));
        h.report(&favoring(ObjectiveKind::NetworkCost, -5.0, 1)).unwrap();
        assert!(h.weights.weight(ObjectiveKind::NetworkCost).unwrap() < before);
    }

    #[test]
    fn test_derived_attribution_bumps_latency_on_sla_miss() {
        let h = harness();
        let r = record(1, "t", LocationKind::Edge, state(5.0, 0.5));
        let mut o = outcome(1, false, -1.0);
        o.sla_met = false;

        let shares = h.learner.attribute(&r, &o, &h.weights);
        assert!((shares.iter().sum::<f64>() - 1.0).abs() < 1e-9);

        o.sla_met = true;
        let baseline = h.learner.attribute(&r, &o, &h.weights);
        let latency = h
            .weights
            .entries()
            .iter()
            .position(|e| e.objective == ObjectiveKind::Latency)
            .unwrap();
        assert!(shares[latency] > baseline[latency]);
    }

    #[test]
    fn test_zero_reward_converges() {
        let mut h = harness();
        let window = h.learner.config().convergence_window as u64;
        for i in 0..window {
            h.learner
                .record_decision(record(i, "t", LocationKind::Edge, state(5.0, 0.5)));
            h.report(&outcome(i, true, 0.0)).unwrap();
        }
        let indicator = h.learner.convergence();
        assert_eq!(indicator.samples, window as usize);
        assert!(indicator.converged);
    }

    #[test]
    fn test_outcome_updates_bandit_and_q_table() {
        let mut h = harness();
        let r = record(1, "t", LocationKind::Edge, state(5.0, 0.5));
        let (strategy, rl_state, action) = (r.strategy, r.rl_state, r.action);
        h.learner.record_decision(r);
        h.report(&outcome(1, true, 2.0)).unwrap();

        let posterior = h.toolkit.bandit().posterior(strategy).unwrap();
        assert_eq!(posterior.alpha, 2.0);
        assert!(h.toolkit.reinforcement().q_value(&rl_state, action) > 0.0);
    }

    #[test]
    fn test_discovery_due_after_interval() {
        let mut h = harness();
        let interval = h.learner.config().discovery_interval;
        for i in 0..interval {
            h.learner
                .record_decision(record(i, "t", LocationKind::Edge, state(5.0, 0.5)));
            let report = h.report(&outcome(i, true, 1.0)).unwrap();
            assert_eq!(report.discovery_due, i + 1 == interval);
        }
        h.learner.run_discovery(0);
        assert!(!h.learner.discovery_due());
    }
}
