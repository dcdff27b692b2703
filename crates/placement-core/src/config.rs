//! Engine configuration
//!
//! The engine never reads files. An external loader deserializes these types
//! and every value passes [`EngineConfig::validate`] before any runtime state
//! is built from it. Cost parameters, objective weights and the learning rate
//! have no defaults: leaving one out is a configuration error.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::decision::{CostParameters, ScalingConfig, ScoringConfig};
use crate::error::{EngineError, EngineResult};
use crate::learner::{LearningConfig, PatternConfig};
use crate::models::ObjectiveKind;
use crate::policy::PolicyConfig;
use crate::toolkit::ToolkitConfig;
use crate::weights::WeightVector;

/// One entry of the objective list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    pub metric: ObjectiveKind,
    pub weight: f64,
    /// Lower cost is better when true
    pub minimize: bool,
    pub min_weight: f64,
    pub max_weight: f64,
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub objectives: Vec<ObjectiveConfig>,
    pub cost: CostParameters,
    pub learning: LearningConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub toolkit: ToolkitConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    /// Seed for every stochastic draw (bandit samples, exploration)
    #[serde(default)]
    pub seed: u64,
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_json::from_str(raw)
            .map_err(|e| EngineError::ConfigurationInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.validate_objectives()
            .and_then(|_| self.cost.validate())
            .and_then(|_| self.learning.validate())
            .and_then(|_| self.scoring.validate())
            .and_then(|_| self.toolkit.validate())
            .and_then(|_| self.patterns.validate())
            .and_then(|_| self.policy.validate())
            .and_then(|_| self.scaling.validate())
            .map_err(EngineError::ConfigurationInvalid)?;

        WeightVector::from_objectives(&self.objectives)?;
        Ok(())
    }

    fn validate_objectives(&self) -> Result<(), String> {
        if self.objectives.is_empty() {
            return Err("at least one objective is required".into());
        }

        let mut seen = HashSet::new();
        let mut min_sum = 0.0;
        let mut max_sum = 0.0;
        let mut weight_sum = 0.0;

        for o in &self.objectives {
            if !seen.insert(o.metric) {
                return Err(format!("objective {} listed twice", o.metric));
            }
            for (name, value) in [
                ("weight", o.weight),
                ("min_weight", o.min_weight),
                ("max_weight", o.max_weight),
            ] {
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(format!("{} {} is {}", o.metric, name, value));
                }
            }
            if o.min_weight > o.max_weight {
                return Err(format!(
                    "{} min_weight {} exceeds max_weight {}",
                    o.metric, o.min_weight, o.max_weight
                ));
            }
            if o.weight < o.min_weight || o.weight > o.max_weight {
                return Err(format!(
                    "{} weight {} outside [{}, {}]",
                    o.metric, o.weight, o.min_weight, o.max_weight
                ));
            }
            min_sum += o.min_weight;
            max_sum += o.max_weight;
            weight_sum += o.weight;
        }

        if (weight_sum - 1.0_f64).abs() > crate::weights::SUM_TOLERANCE {
            return Err(format!("objective weights sum to {:.4}, expected 1.0", weight_sum));
        }
        if min_sum > 1.0 || max_sum < 1.0 {
            return Err(format!(
                "weight bounds cannot sum to 1.0 (min sum {:.3}, max sum {:.3})",
                min_sum, max_sum
            ));
        }
        Ok(())
    }
}

/// Check that a value is finite and strictly positive
pub(crate) fn require_positive(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be positive, got {}", name, value))
    }
}

/// Check that a value is finite and not negative
pub(crate) fn require_non_negative(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be non-negative, got {}", name, value))
    }
}

/// Check that a value lies in [lo, hi]
pub(crate) fn require_range(name: &str, value: f64, lo: f64, hi: f64) -> Result<(), String> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be within [{}, {}], got {}", name, lo, hi, value))
    }
}
