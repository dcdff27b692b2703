//! Objective weight vector
//!
//! The vector always sums to 1.0 (within [`SUM_TOLERANCE`]) and every weight
//! stays inside its configured bounds. Updates that cannot satisfy both are
//! rejected and the caller keeps the previous vector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ObjectiveConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::ObjectiveKind;

/// Allowed deviation of the weight sum from 1.0
pub const SUM_TOLERANCE: f64 = 0.001;

/// Residual below which renormalization stops iterating
const RENORMALIZE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub objective: ObjectiveKind,
    pub weight: f64,
    pub min: f64,
    pub max: f64,
    pub minimize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    entries: Vec<WeightEntry>,
}

impl WeightVector {
    /// Build the initial vector from validated objective configuration
    pub fn from_objectives(objectives: &[ObjectiveConfig]) -> EngineResult<Self> {
        let vector = Self {
            entries: objectives
                .iter()
                .map(|o| WeightEntry {
                    objective: o.metric,
                    weight: o.weight,
                    min: o.min_weight,
                    max: o.max_weight,
                    minimize: o.minimize,
                })
                .collect(),
        };
        vector
            .check_invariants()
            .map_err(|e| EngineError::ConfigurationInvalid(e.to_string()))?;
        Ok(vector)
    }

    pub fn entries(&self) -> &[WeightEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn weight(&self, objective: ObjectiveKind) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.objective == objective)
            .map(|e| e.weight)
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.weight).collect()
    }

    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|e| e.weight).sum()
    }

    pub fn as_map(&self) -> BTreeMap<ObjectiveKind, f64> {
        self.entries.iter().map(|e| (e.objective, e.weight)).collect()
    }

    pub fn check_invariants(&self) -> EngineResult<()> {
        if self.entries.is_empty() {
            return Err(EngineError::WeightInvariant("no objectives".into()));
        }
        for e in &self.entries {
            if !e.weight.is_finite() {
                return Err(EngineError::WeightInvariant(format!(
                    "{} weight is not finite",
                    e.objective
                )));
            }
            if e.weight < e.min - f64::EPSILON || e.weight > e.max + f64::EPSILON {
                return Err(EngineError::WeightInvariant(format!(
                    "{} weight {:.6} outside [{}, {}]",
                    e.objective, e.weight, e.min, e.max
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(EngineError::WeightInvariant(format!(
                "weights sum to {:.6}",
                sum
            )));
        }
        Ok(())
    }

    /// Clamp `raw` to the per-objective bounds and renormalize to sum 1.0.
    ///
    /// Weights pinned at a bound stay there; the remaining free weights are
    /// rescaled proportionally to absorb the residual.
    pub fn with_values(&self, raw: &[f64]) -> EngineResult<WeightVector> {
        if raw.len() != self.entries.len() {
            return Err(EngineError::WeightInvariant(format!(
                "expected {} weights, got {}",
                self.entries.len(),
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::WeightInvariant("non-finite weight".into()));
        }

        let n = raw.len();
        let mut w: Vec<f64> = raw
            .iter()
            .zip(&self.entries)
            .map(|(v, e)| v.clamp(e.min, e.max))
            .collect();
        let mut pinned = vec![false; n];

        for _ in 0..=n {
            let residual = 1.0 - w.iter().sum::<f64>();
            if residual.abs() <= RENORMALIZE_EPSILON {
                break;
            }

            let free: Vec<usize> = (0..n)
                .filter(|&i| {
                    !pinned[i]
                        && if residual > 0.0 {
                            w[i] < self.entries[i].max
                        } else {
                            w[i] > self.entries[i].min
                        }
                })
                .collect();
            if free.is_empty() {
                break;
            }

            let free_sum: f64 = free.iter().map(|&i| w[i]).sum();
            for &i in &free {
                let share = if free_sum > RENORMALIZE_EPSILON {
                    w[i] / free_sum
                } else {
                    1.0 / free.len() as f64
                };
                let candidate = w[i] + residual * share;
                let entry = &self.entries[i];
                if candidate >= entry.max {
                    w[i] = entry.max;
                    pinned[i] = true;
                } else if candidate <= entry.min {
                    w[i] = entry.min;
                    pinned[i] = true;
                } else {
                    w[i] = candidate;
                }
            }
        }

        let next = WeightVector {
            entries: self
                .entries
                .iter()
                .zip(w)
                .map(|(e, weight)| WeightEntry { weight, ..e.clone() })
                .collect(),
        };
        next.check_invariants()?;
        Ok(next)
    }

    /// Largest absolute per-objective change between two vectors
    pub fn max_abs_change(&self, other: &WeightVector) -> f64 {
        self.entries
            .iter()
            .zip(&other.entries)
            .map(|(a, b)| (a.weight - b.weight).abs())
            .fold(0.0, f64::max)
    }
}
