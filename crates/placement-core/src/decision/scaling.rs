//! Unit-pool scaling
//!
//! Predicted demand is spread over the pools best-score-first, each pool
//! taking units up to its maximum. Unit counts are sized for a target
//! utilization, then gated by per-pool cooldowns and a scale-down
//! hysteresis so pools do not flap around a boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{DecisionEngine, EffectiveWeight};
use crate::config::{require_non_negative, require_range};
use crate::error::{EngineError, EngineResult};
use crate::models::{DataSensitivity, ExecutionTarget, Process, SystemState};
use crate::toolkit::ToolkitOutputs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Utilization each pool is sized for
    pub target_utilization: f64,
    pub scale_up_cooldown_secs: u64,
    pub scale_down_cooldown_secs: u64,
    /// Fraction of a unit the need must fall below the smaller size before
    /// a unit is removed
    pub scale_down_hysteresis: f64,
    /// Cores each queued process is expected to need
    pub cores_per_queued_process: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            target_utilization: 0.7,
            scale_up_cooldown_secs: 30,
            scale_down_cooldown_secs: 300,
            scale_down_hysteresis: 0.5,
            cores_per_queued_process: 0.25,
        }
    }
}

impl ScalingConfig {
    pub fn validate(&self) -> Result<(), String> {
        require_range("scaling.target_utilization", self.target_utilization, 0.05, 1.0)?;
        require_range("scaling.scale_down_hysteresis", self.scale_down_hysteresis, 0.0, 1.0)?;
        require_non_negative("scaling.cores_per_queued_process", self.cores_per_queued_process)
    }
}

/// A homogeneous group of execution units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitPool {
    pub id: String,
    /// Characteristics of one unit
    pub profile: ExecutionTarget,
    pub running: u32,
    pub min_units: u32,
    pub max_units: u32,
    /// Cores per unit
    pub unit_capacity: f64,
}

impl UnitPool {
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidInput("pool id is empty".into()));
        }
        if self.min_units > self.max_units {
            return Err(EngineError::InvalidInput(format!(
                "pool {} min {} exceeds max {}",
                self.id, self.min_units, self.max_units
            )));
        }
        if !(self.unit_capacity.is_finite() && self.unit_capacity > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "pool {} has unit capacity {}",
                self.id, self.unit_capacity
            )));
        }
        self.profile.validate()
    }

    fn unit_process(&self) -> Process {
        Process {
            id: format!("{}-unit", self.id),
            cpu_cores: self.unit_capacity,
            memory_mb: 0.0,
            io_size_mb: 0.0,
            priority: 0,
            deadline_ms: None,
            sensitivity: DataSensitivity::Public,
            safety_critical: false,
            data_location: None,
            pipeline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleTo(u32),
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleDecision {
    pub pool_id: String,
    pub action: ScaleAction,
    pub running: u32,
    /// Size the demand called for before cooldown and hysteresis
    pub desired: u32,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct PoolCooldown {
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
}

/// Last scaling time per pool
#[derive(Debug, Default)]
pub struct CooldownTracker {
    pools: HashMap<String, PoolCooldown>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

fn within(last: Option<Instant>, now: Instant, window: Duration) -> bool {
    last.map_or(false, |t| now.saturating_duration_since(t) < window)
}

impl DecisionEngine {
    /// Plan a unit count for every pool.
    ///
    /// Demand in cores is the predicted utilization (forecast, else trend)
    /// of the currently running capacity plus the queued work, inflated
    /// while an anomaly is flagged. Pools that fail validation are left
    /// unchanged.
    #[allow(clippy::too_many_arguments)]
    pub fn decide_scaling(
        &self,
        config: &ScalingConfig,
        pools: &[UnitPool],
        outputs: &ToolkitOutputs,
        state: &SystemState,
        weights: &[EffectiveWeight],
        cooldowns: &mut CooldownTracker,
        now: Instant,
    ) -> Vec<ScaleDecision> {
        let utilization = outputs
            .forecast
            .map_or(outputs.trend, |f| f.value)
            .clamp(0.0, 1.0);
        let inflation = if outputs.anomaly {
            self.config.anomaly_inflation
        } else {
            1.0
        };

        let mut scored: Vec<(&UnitPool, f64)> = Vec::with_capacity(pools.len());
        let mut decisions = Vec::with_capacity(pools.len());
        for pool in pools {
            if let Err(e) = pool.validate() {
                debug!(pool = %pool.id, error = %e, "Skipping invalid pool");
                decisions.push(ScaleDecision {
                    pool_id: pool.id.clone(),
                    action: ScaleAction::NoChange,
                    running: pool.running,
                    desired: pool.running,
                    score: f64::NEG_INFINITY,
                    reason: format!("invalid pool: {}", e),
                });
                continue;
            }
            let (_, weighted, _) = self.objective_scores(
                &pool.unit_process(),
                &pool.profile,
                state,
                weights,
                pool.unit_capacity,
            );
            scored.push((pool, weighted + 1.0));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));

        let running_capacity: f64 = scored
            .iter()
            .map(|(p, _)| f64::from(p.running) * p.unit_capacity)
            .sum();
        let demand = (utilization * running_capacity
            + state.queue_depth * config.cores_per_queued_process)
            * inflation;
        let mut remaining = demand / config.target_utilization;

        for (pool, score) in scored {
            let exact = (remaining / pool.unit_capacity).min(f64::from(pool.max_units));
            let desired = (exact.ceil() as u32).clamp(pool.min_units, pool.max_units);
            remaining = (remaining - f64::from(desired) * pool.unit_capacity).max(0.0);

            let cooldown = cooldowns.pools.entry(pool.id.clone()).or_default();
            let (action, reason) = if desired > pool.running {
                if within(
                    cooldown.last_scale_up,
                    now,
                    Duration::from_secs(config.scale_up_cooldown_secs),
                ) {
                    (ScaleAction::NoChange, "scale-up cooldown active".to_string())
                } else {
                    cooldown.last_scale_up = Some(now);
                    (
                        ScaleAction::ScaleTo(desired),
                        format!("need {:.2} units, running {}", exact, pool.running),
                    )
                }
            } else if desired < pool.running {
                let window = Duration::from_secs(config.scale_down_cooldown_secs);
                if exact > f64::from(pool.running - 1) - config.scale_down_hysteresis {
                    (
                        ScaleAction::NoChange,
                        format!("need {:.2} units within hysteresis band", exact),
                    )
                } else if within(cooldown.last_scale_down, now, window)
                    || within(cooldown.last_scale_up, now, window)
                {
                    (ScaleAction::NoChange, "scale-down cooldown active".to_string())
                } else {
                    cooldown.last_scale_down = Some(now);
                    (
                        ScaleAction::ScaleTo(desired),
                        format!("need {:.2} units, running {}", exact, pool.running),
                    )
                }
            } else {
                (ScaleAction::NoChange, "at desired size".to_string())
            };

            debug!(
                pool = %pool.id,
                running = pool.running,
                desired,
                score,
                action = ?action,
                "Scaling evaluated"
            );
            decisions.push(ScaleDecision {
                pool_id: pool.id.clone(),
                action,
                running: pool.running,
                desired,
                score,
                reason,
            });
        }
        decisions
    }
}
