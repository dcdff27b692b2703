//! Decision engine
//!
//! Scores every feasible target with the current weight vector and picks
//! the best one. The same engine and cost models plan unit-pool scaling.
//!
//! Per target:
//!
//! ```text
//! weighted = -sum(w_i * (minimize_i ? cost_i : -cost_i))        in [-1, 1]
//! final    = (weighted + 1) * gravity
//!            - soft_penalty * soft_penalty_scale
//!            - pipeline_penalty
//!            + bias
//! ```
//!
//! Gravity is the data/target proximity factor raised to `gravity_factor`.
//! Bias rewards the kind preferred by an applied pattern and the kind the
//! reinforcement learner recommends.

pub mod cost_model;
pub mod scaling;

pub use cost_model::{
    saturate, CostContext, CostModel, CostModelSet, CostParameters, PlacementEstimate,
    TransferPricing,
};
pub use scaling::{CooldownTracker, ScaleAction, ScaleDecision, ScalingConfig, UnitPool};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::{require_non_negative, require_range};
use crate::models::{
    ExecutionTarget, LocationKind, ObjectiveKind, ObjectiveScore, Process, SystemState,
    TargetScore,
};
use crate::policy::PolicyEvaluation;
use crate::toolkit::{RlAction, Strategy, ToolkitOutputs};
use crate::weights::WeightVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Exponent applied to the proximity factor
    pub gravity_factor: f64,
    pub soft_penalty_scale: f64,
    pub pipeline_penalty_weight: f64,
    /// Capacity-need multiplier while an anomaly is flagged
    pub anomaly_inflation: f64,
    /// Relative boost the selected strategy gives its objectives
    pub strategy_influence: f64,
    pub pattern_bonus: f64,
    pub action_bonus: f64,
    /// Bounds on the relative forecast adjustment of the capacity need
    pub forecast_adjust_min: f64,
    pub forecast_adjust_max: f64,
    /// Confidence multiplier when no forecast was available
    pub no_forecast_confidence: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            gravity_factor: 1.0,
            soft_penalty_scale: 0.1,
            pipeline_penalty_weight: 0.2,
            anomaly_inflation: 1.2,
            strategy_influence: 0.25,
            pattern_bonus: 0.1,
            action_bonus: 0.05,
            forecast_adjust_min: -0.5,
            forecast_adjust_max: 1.0,
            no_forecast_confidence: 0.8,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), String> {
        require_non_negative("scoring.gravity_factor", self.gravity_factor)?;
        require_non_negative("scoring.soft_penalty_scale", self.soft_penalty_scale)?;
        require_non_negative("scoring.pipeline_penalty_weight", self.pipeline_penalty_weight)?;
        require_range("scoring.anomaly_inflation", self.anomaly_inflation, 1.0, 10.0)?;
        require_non_negative("scoring.strategy_influence", self.strategy_influence)?;
        require_non_negative("scoring.pattern_bonus", self.pattern_bonus)?;
        require_non_negative("scoring.action_bonus", self.action_bonus)?;
        require_range("scoring.forecast_adjust_min", self.forecast_adjust_min, -1.0, 0.0)?;
        require_range("scoring.forecast_adjust_max", self.forecast_adjust_max, 0.0, 10.0)?;
        require_range(
            "scoring.no_forecast_confidence",
            self.no_forecast_confidence,
            0.0,
            1.0,
        )
    }
}

/// One objective's effective weight for a single decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveWeight {
    pub objective: ObjectiveKind,
    pub weight: f64,
    pub minimize: bool,
}

/// Everything the engine needs to score one process
pub struct ScoringInput<'a> {
    pub process: &'a Process,
    pub targets: &'a [&'a ExecutionTarget],
    pub state: &'a SystemState,
    pub weights: &'a [EffectiveWeight],
    pub capacity_need: f64,
    pub policy: &'a [PolicyEvaluation],
    /// Kind favored by an applied pattern
    pub preferred_kind: Option<LocationKind>,
    pub recommended_action: Option<RlAction>,
}

/// Ranked scores, best first
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub scores: Vec<TargetScore>,
    pub confidence: f64,
}

impl Ranking {
    pub fn best(&self) -> Option<&TargetScore> {
        self.scores.first()
    }
}

/// Margin at which confidence reaches 0.75
const CONFIDENCE_MARGIN_SCALE: f64 = 0.05;

pub struct DecisionEngine {
    config: ScoringConfig,
    cost: CostParameters,
    models: CostModelSet,
}

impl DecisionEngine {
    pub fn new(config: ScoringConfig, cost: CostParameters) -> Self {
        Self {
            models: CostModelSet::standard(&cost),
            config,
            cost,
        }
    }

    /// Replace the cost model of one objective
    pub fn with_model(mut self, model: Box<dyn CostModel>) -> Self {
        self.models.replace(model);
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn cost_parameters(&self) -> &CostParameters {
        &self.cost
    }

    /// Near-term capacity need for `process`.
    ///
    /// The base core request is adjusted by the forecast's relative change
    /// against the smoothed trend and inflated while an anomaly is flagged.
    /// Without a forecast the unadjusted base is used.
    pub fn capacity_need(&self, process: &Process, outputs: &ToolkitOutputs) -> f64 {
        let base = process.cpu_cores;
        let adjusted = match outputs.expected_change() {
            Some(change) if change.is_finite() => {
                base * (1.0
                    + change.clamp(self.config.forecast_adjust_min, self.config.forecast_adjust_max))
            }
            _ => base,
        };
        if outputs.anomaly {
            adjusted * self.config.anomaly_inflation
        } else {
            adjusted
        }
    }

    /// Weights for this decision: the strategy's objectives are boosted by
    /// `strategy_influence` and the result renormalized to sum to 1.
    /// The owned vector is never modified.
    pub fn effective_weights(
        &self,
        weights: &WeightVector,
        strategy: Strategy,
    ) -> Vec<EffectiveWeight> {
        let emphasis = strategy.emphasis();
        let mut effective: Vec<EffectiveWeight> = weights
            .entries()
            .iter()
            .map(|e| EffectiveWeight {
                objective: e.objective,
                weight: if emphasis.contains(&e.objective) {
                    e.weight * (1.0 + self.config.strategy_influence)
                } else {
                    e.weight
                },
                minimize: e.minimize,
            })
            .collect();

        let sum: f64 = effective.iter().map(|e| e.weight).sum();
        if sum > 0.0 {
            effective.iter_mut().for_each(|e| e.weight /= sum);
        }
        effective
    }

    /// Score one target without policy, gravity or bias adjustments
    pub fn objective_scores(
        &self,
        process: &Process,
        target: &ExecutionTarget,
        state: &SystemState,
        weights: &[EffectiveWeight],
        capacity_need: f64,
    ) -> (Vec<ObjectiveScore>, f64, PlacementEstimate) {
        let estimate = self.cost.estimate(process, target, capacity_need);
        let ctx = CostContext {
            process,
            target,
            state,
            capacity_need,
            estimate: &estimate,
        };

        let objectives: Vec<ObjectiveScore> = weights
            .iter()
            .map(|w| {
                let cost = self.models.cost(w.objective, &ctx);
                let signed = if w.minimize { cost } else { -cost };
                ObjectiveScore {
                    objective: w.objective,
                    cost,
                    weight: w.weight,
                    minimize: w.minimize,
                    contribution: -w.weight * signed,
                }
            })
            .collect();
        let weighted = objectives.iter().map(|o| o.contribution).sum();
        (objectives, weighted, estimate)
    }

    /// `soft_penalty` is the raw severity sum from the policy engine
    pub fn score_target(
        &self,
        input: &ScoringInput<'_>,
        target: &ExecutionTarget,
        soft_penalty: f64,
    ) -> TargetScore {
        let (objectives, weighted_score, estimate) = self.objective_scores(
            input.process,
            target,
            input.state,
            input.weights,
            input.capacity_need,
        );

        let gravity_multiplier = estimate
            .proximity
            .map_or(1.0, |p| p.factor().powf(self.config.gravity_factor));

        let soft_penalty = soft_penalty * self.config.soft_penalty_scale;

        let pipeline_penalty = self.pipeline_penalty(input.process, target);

        let mut bias = 0.0;
        if input.preferred_kind == Some(target.kind()) {
            bias += self.config.pattern_bonus;
        }
        if input.recommended_action.map_or(false, |a| a.matches(target.kind())) {
            bias += self.config.action_bonus;
        }

        let final_score =
            (weighted_score + 1.0) * gravity_multiplier - soft_penalty - pipeline_penalty + bias;

        TargetScore {
            target_id: target.id.clone(),
            kind: target.kind(),
            objectives,
            weighted_score,
            gravity_multiplier,
            soft_penalty,
            pipeline_penalty,
            bias,
            final_score,
        }
    }

    /// Penalty for placing a pipeline stage far from where the next stage runs
    fn pipeline_penalty(&self, process: &Process, target: &ExecutionTarget) -> f64 {
        let Some(pipeline) = &process.pipeline else {
            return 0.0;
        };
        let Some(downstream) = &pipeline.downstream_location else {
            return 0.0;
        };
        let distance = 1.0 - target.location.proximity(downstream).factor();
        self.config.pipeline_penalty_weight
            * distance
            * saturate(pipeline.downstream_data_mb / 1024.0, 1.0)
    }

    /// Score every target and order best first; ties go to the lowest id
    pub fn rank(&self, input: &ScoringInput<'_>, forecast_available: bool) -> Ranking {
        let penalties: HashMap<&str, f64> = input
            .policy
            .iter()
            .map(|e| (e.target_id.as_str(), e.soft_penalty))
            .collect();
        let mut scores: Vec<TargetScore> = input
            .targets
            .iter()
            .map(|t| {
                let penalty = penalties.get(t.id.as_str()).copied().unwrap_or(0.0);
                self.score_target(input, t, penalty)
            })
            .collect();
        scores.sort_by(compare_scores);

        let confidence = self.confidence(&scores, forecast_available);
        Ranking { scores, confidence }
    }

    /// 0.5 + 0.5 * margin / (margin + scale) over the runner-up; 1.0 with a
    /// single candidate, 0.0 with none
    pub fn confidence(&self, scores: &[TargetScore], forecast_available: bool) -> f64 {
        let base = match scores {
            [] => return 0.0,
            [_] => 1.0,
            [best, second, ..] => {
                let margin = (best.final_score - second.final_score).max(0.0);
                0.5 + 0.5 * margin / (margin + CONFIDENCE_MARGIN_SCALE)
            }
        };
        if forecast_available {
            base
        } else {
            base * self.config.no_forecast_confidence
        }
    }
}

/// Higher final score first, then lower target id
pub fn compare_scores(a: &TargetScore, b: &TargetScore) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| a.target_id.cmp(&b.target_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{cost_parameters, engine_config, process, state, target};
    use crate::models::Location;
    use crate::toolkit::Forecast;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(ScoringConfig::default(), cost_parameters())
    }

    fn weights() -> WeightVector {
        WeightVector::from_objectives(&engine_config().objectives).unwrap()
    }

    fn outputs(forecast: Option<f64>, trend: f64, anomaly: bool) -> ToolkitOutputs {
        ToolkitOutputs {
            current: trend,
            forecast: forecast.map(|value| Forecast { value, error: 0.0 }),
            trend,
            anomaly,
            cumulative: 0.0,
            from_cache: false,
        }
    }

    fn rank(
        engine: &DecisionEngine,
        process: &Process,
        targets: &[ExecutionTarget],
        preferred: Option<LocationKind>,
    ) -> Ranking {
        let refs: Vec<&ExecutionTarget> = targets.iter().collect();
        let effective = engine.effective_weights(&weights(), Strategy::Balanced);
        let st = state(5.0, 0.5);
        engine.rank(
            &ScoringInput {
                process,
                targets: &refs,
                state: &st,
                weights: &effective,
                capacity_need: process.cpu_cores,
                policy: &[],
                preferred_kind: preferred,
                recommended_action: None,
            },
            true,
        )
    }

    #[test]
    fn test_capacity_need_without_forecast_is_base() {
        let p = process("p1");
        let need = engine().capacity_need(&p, &outputs(None, 0.5, false));
        assert_eq!(need, p.cpu_cores);
    }

    #[test]
    fn test_capacity_need_follows_forecast_and_anomaly() {
        let engine = engine();
        let p = process("p1");
        let rising = engine.capacity_need(&p, &outputs(Some(0.6), 0.5, false));
        assert!((rising - p.cpu_cores * 1.2).abs() < 1e-9);

        let inflated = engine.capacity_need(&p, &outputs(Some(0.6), 0.5, true));
        assert!((inflated - p.cpu_cores * 1.2 * 1.2).abs() < 1e-9);

        // Relative change is capped at +100%
        let spike = engine.capacity_need(&p, &outputs(Some(5.0), 0.5, false));
        assert!((spike - p.cpu_cores * 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_effective_weights_sum_to_one() {
        let engine = engine();
        let w = weights();
        for strategy in Strategy::ALL {
            let effective = engine.effective_weights(&w, strategy);
            let sum: f64 = effective.iter().map(|e| e.weight).sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
        let tilted = engine.effective_weights(&w, Strategy::DataLocal);
        let plain = engine.effective_weights(&w, Strategy::Balanced);
        let locality = |ws: &[EffectiveWeight]| {
            ws.iter()
                .find(|e| e.objective == ObjectiveKind::DataLocality)
                .map(|e| e.weight)
        };
        assert!(locality(&tilted) > locality(&plain));
    }

    #[test]
    fn test_weighted_score_in_range() {
        let p = process("p1");
        let targets: Vec<_> = LocationKind::ALL
            .iter()
            .enumerate()
            .map(|(i, &k)| target(&format!("t{}", i), k))
            .collect();
        for s in rank(&engine(), &p, &targets, None).scores {
            assert!((-1.0..=1.0).contains(&s.weighted_score));
        }
    }

    #[test]
    fn test_tie_breaks_on_lowest_id() {
        let p = process("p1");
        let targets = vec![
            target("b-edge", LocationKind::Edge),
            target("a-edge", LocationKind::Edge),
        ];
        let ranking = rank(&engine(), &p, &targets, None);
        assert_eq!(ranking.best().unwrap().target_id, "a-edge");
        assert_eq!(ranking.scores[0].final_score, ranking.scores[1].final_score);
        assert!((ranking.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_gravity_prefers_data_location() {
        let mut p = process("p1");
        let near = target("near", LocationKind::PublicCloud);
        let mut far = target("far", LocationKind::PublicCloud);
        far.location = Location::new(LocationKind::PublicCloud, "other", "elsewhere", "z");
        p.data_location = Some(near.location.clone());
        p.io_size_mb = 500.0;

        let ranking = rank(&engine(), &p, &[far, near], None);
        let best = ranking.best().unwrap();
        assert_eq!(best.target_id, "near");
        assert_eq!(best.gravity_multiplier, 1.0);
        assert!((ranking.scores[1].gravity_multiplier - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_pattern_bias_breaks_even_scores() {
        let p = process("p1");
        let targets = vec![
            target("a-edge", LocationKind::Edge),
            target("b-edge", LocationKind::Edge),
        ];
        let ranking = rank(&engine(), &p, &targets, Some(LocationKind::Edge));
        assert!(ranking.scores.iter().all(|s| s.bias > 0.0));
    }

    #[test]
    fn test_soft_penalty_lowers_score() {
        let engine = engine();
        let p = process("p1");
        let targets = vec![
            target("a", LocationKind::Edge),
            target("b", LocationKind::Edge),
        ];
        let refs: Vec<&ExecutionTarget> = targets.iter().collect();
        let effective = engine.effective_weights(&weights(), Strategy::Balanced);
        let st = state(5.0, 0.5);
        let policy = vec![PolicyEvaluation {
            target_id: "a".into(),
            hard_violations: vec![],
            soft_violations: vec![],
            soft_penalty: 1.0,
        }];
        let ranking = engine.rank(
            &ScoringInput {
                process: &p,
                targets: &refs,
                state: &st,
                weights: &effective,
                capacity_need: 1.0,
                policy: &policy,
                preferred_kind: None,
                recommended_action: None,
            },
            false,
        );
        assert_eq!(ranking.best().unwrap().target_id, "b");
        assert!(ranking.confidence < 1.0);
    }

    #[test]
    fn test_single_target_confidence() {
        let engine = engine();
        let p = process("p1");
        let ranking = rank(&engine, &p, &[target("only", LocationKind::Hpc)], None);
        assert_eq!(ranking.confidence, 1.0);
        assert_eq!(engine.confidence(&ranking.scores, false), 0.8);
    }
}
