//! Predictor toolkit
//!
//! Independent online algorithms consulted by the decision engine and the
//! learner. [`PredictorToolkit`] bundles the ones that run on every decision
//! (forecast, smoothing, change detection, strategy and action selection);
//! the gradient optimizer and sequence matcher are owned by the learner.

pub mod bandit;
pub mod change_detector;
pub mod forecaster;
pub mod gradient;
pub mod reinforcement;
pub mod sequence;
pub mod smoother;

pub use bandit::{BanditConfig, BanditSelector, BetaPosterior, Strategy};
pub use change_detector::{ChangeDetector, ChangeDetectorConfig, ChangeResult, ShiftDirection};
pub use forecaster::{Forecast, Forecaster, ForecasterConfig};
pub use gradient::GradientOptimizer;
pub use reinforcement::{ReinforcementConfig, ReinforcementLearner, RlAction, RlState};
pub use sequence::{SequenceMatcher, SequencePattern};
pub use smoother::{Smoother, SmootherConfig};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Configuration for the per-decision toolkit components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    pub forecaster: ForecasterConfig,
    pub smoother: SmootherConfig,
    pub change_detector: ChangeDetectorConfig,
    pub bandit: BanditConfig,
    pub reinforcement: ReinforcementConfig,
}

impl ToolkitConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.forecaster.validate()?;
        self.smoother.validate()?;
        self.change_detector.validate()?;
        self.bandit.validate()?;
        self.reinforcement.validate()
    }
}

/// What the toolkit reported for one decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolkitOutputs {
    /// Demand signal as observed
    pub current: f64,
    /// `None` until the forecaster has enough history
    pub forecast: Option<Forecast>,
    /// Smoothed demand
    pub trend: f64,
    pub anomaly: bool,
    pub cumulative: f64,
    /// True when the decision deadline had passed and these are the
    /// previous decision's outputs
    pub from_cache: bool,
}

impl ToolkitOutputs {
    /// Relative change expected by the forecast against the smoothed trend
    pub fn expected_change(&self) -> Option<f64> {
        self.forecast
            .map(|f| (f.value - self.trend) / self.trend.abs().max(f64::EPSILON))
    }
}

pub struct PredictorToolkit {
    forecaster: Forecaster,
    smoother: Smoother,
    change_detector: ChangeDetector,
    bandit: BanditSelector,
    reinforcement: ReinforcementLearner,
    rng: StdRng,
    last: Option<ToolkitOutputs>,
    anomalies: u64,
}

impl PredictorToolkit {
    pub fn new(config: &ToolkitConfig, seed: u64) -> Self {
        Self {
            forecaster: Forecaster::new(config.forecaster.clone()),
            smoother: Smoother::new(&config.smoother),
            change_detector: ChangeDetector::new(config.change_detector.clone()),
            bandit: BanditSelector::new(&config.bandit),
            reinforcement: ReinforcementLearner::new(config.reinforcement.clone()),
            rng: StdRng::seed_from_u64(seed),
            last: None,
            anomalies: 0,
        }
    }

    /// Feed the demand signal and report forecast, trend and change state.
    ///
    /// Once `deadline` has passed the previous outputs are returned with
    /// `from_cache` set and the signal is not recorded. The first call always
    /// computes fresh outputs since there is nothing cached yet.
    pub fn observe(&mut self, demand: f64, deadline: Option<Instant>) -> ToolkitOutputs {
        if let (Some(cached), true) = (&self.last, deadline_passed(deadline)) {
            debug!(event = "toolkit_cache_fallback", "Decision deadline passed; using cached toolkit outputs");
            return ToolkitOutputs {
                from_cache: true,
                ..cached.clone()
            };
        }

        let change = self.change_detector.update(demand);
        if change.is_anomaly {
            self.anomalies += 1;
        }
        let trend = self.smoother.update(demand);
        if let Err(e) = self.forecaster.add_observation(demand) {
            debug!(event = "forecaster_rejected_observation", error = %e);
        }

        let forecast = if deadline_passed(deadline) {
            self.last.as_ref().and_then(|l| l.forecast)
        } else {
            self.forecaster.predict().ok()
        };

        let outputs = ToolkitOutputs {
            current: demand,
            forecast,
            trend,
            anomaly: change.is_anomaly,
            cumulative: change.cumulative,
            from_cache: false,
        };
        self.last = Some(outputs.clone());
        outputs
    }

    pub fn select_strategy(&mut self) -> Strategy {
        self.bandit.select_strategy(&mut self.rng)
    }

    pub fn recommend_action(&mut self, state: &RlState) -> RlAction {
        self.reinforcement.select_action(state, &mut self.rng)
    }

    pub fn bandit(&self) -> &BanditSelector {
        &self.bandit
    }

    pub fn bandit_mut(&mut self) -> &mut BanditSelector {
        &mut self.bandit
    }

    pub fn reinforcement(&self) -> &ReinforcementLearner {
        &self.reinforcement
    }

    pub fn reinforcement_mut(&mut self) -> &mut ReinforcementLearner {
        &mut self.reinforcement
    }

    pub fn last_outputs(&self) -> Option<&ToolkitOutputs> {
        self.last.as_ref()
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn forecaster_ready(&self) -> bool {
        self.forecaster.is_ready()
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}
