//! Change-point detection
//!
//! Two-sided CUSUM chart over the demand signal. The reference mean and
//! standard deviation are learned from a warm-up window, after which drift
//! `k` and threshold `h` are expressed in multiples of that deviation.
//! Both cumulative sums reset as soon as a shift is flagged.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::require_positive;

/// Minimum samples before the reference statistics are trusted
const MIN_SAMPLES_FOR_DETECTION: usize = 10;

/// Lower bound on the reference deviation, relative to the mean
const RELATIVE_SIGMA_FLOOR: f64 = 0.01;
const ABSOLUTE_SIGMA_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeDetectorConfig {
    /// Allowed drift `k` in reference standard deviations
    pub drift_sigma: f64,
    /// Decision threshold `h` in reference standard deviations
    pub threshold_sigma: f64,
    /// Samples used to learn the reference mean and deviation
    pub warmup_samples: usize,
}

impl Default for ChangeDetectorConfig {
    fn default() -> Self {
        Self {
            drift_sigma: 0.5,
            threshold_sigma: 5.0,
            warmup_samples: MIN_SAMPLES_FOR_DETECTION,
        }
    }
}

impl ChangeDetectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        require_positive("change_detector.drift_sigma", self.drift_sigma)?;
        require_positive("change_detector.threshold_sigma", self.threshold_sigma)?;
        if self.warmup_samples < 2 {
            return Err(format!(
                "change_detector.warmup_samples must be at least 2, got {}",
                self.warmup_samples
            ));
        }
        Ok(())
    }
}

/// Direction of a detected level shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeResult {
    /// max(S+, S-) after this sample; 0 right after a detection
    pub cumulative: f64,
    pub is_anomaly: bool,
    pub direction: Option<ShiftDirection>,
}

/// Windowed mean and standard deviation
#[derive(Debug, Clone)]
pub struct RollingStats {
    pub mean: f64,
    pub std_dev: f64,
    pub count: u64,
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            mean: 0.0,
            std_dev: 0.0,
            count: 0,
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add_sample(&mut self, value: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.recalculate_stats();
    }

    /// Two-pass mean and population deviation over the window
    fn recalculate_stats(&mut self) {
        self.count = self.samples.len() as u64;
        if self.count == 0 {
            self.mean = 0.0;
            self.std_dev = 0.0;
            return;
        }

        let n = self.count as f64;
        self.mean = self.samples.iter().sum::<f64>() / n;
        let variance = self
            .samples
            .iter()
            .map(|v| (v - self.mean).powi(2))
            .sum::<f64>()
            / n;
        self.std_dev = variance.sqrt();
    }

    pub fn has_sufficient_data(&self, min_samples: usize) -> bool {
        self.count >= min_samples as u64
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.recalculate_stats();
    }
}

pub struct ChangeDetector {
    config: ChangeDetectorConfig,
    reference: RollingStats,
    baseline: Option<(f64, f64)>,
    upper: f64,
    lower: f64,
    detections: u64,
}

impl ChangeDetector {
    pub fn new(config: ChangeDetectorConfig) -> Self {
        Self {
            reference: RollingStats::new(config.warmup_samples),
            config,
            baseline: None,
            upper: 0.0,
            lower: 0.0,
            detections: 0,
        }
    }

    /// Use a known reference instead of learning one from the warm-up window
    pub fn with_reference(mut self, mean: f64, std_dev: f64) -> Self {
        self.baseline = Some((mean, sigma_with_floor(mean, std_dev)));
        self
    }

    pub fn update(&mut self, x: f64) -> ChangeResult {
        let (mean, sigma) = match self.baseline {
            Some(b) => b,
            None => {
                self.reference.add_sample(x);
                if self.reference.has_sufficient_data(self.config.warmup_samples) {
                    self.baseline = Some((
                        self.reference.mean,
                        sigma_with_floor(self.reference.mean, self.reference.std_dev),
                    ));
                }
                return ChangeResult {
                    cumulative: 0.0,
                    is_anomaly: false,
                    direction: None,
                };
            }
        };

        let k = self.config.drift_sigma * sigma;
        let h = self.config.threshold_sigma * sigma;
        self.upper = (self.upper + x - mean - k).max(0.0);
        self.lower = (self.lower + mean - x - k).max(0.0);

        let direction = if self.upper > h {
            Some(ShiftDirection::Up)
        } else if self.lower > h {
            Some(ShiftDirection::Down)
        } else {
            None
        };

        if direction.is_some() {
            self.upper = 0.0;
            self.lower = 0.0;
            self.detections += 1;
            return ChangeResult {
                cumulative: 0.0,
                is_anomaly: true,
                direction,
            };
        }

        ChangeResult {
            cumulative: self.cumulative(),
            is_anomaly: false,
            direction: None,
        }
    }

    pub fn cumulative(&self) -> f64 {
        self.upper.max(self.lower)
    }

    pub fn detections(&self) -> u64 {
        self.detections
    }

    pub fn is_warmed_up(&self) -> bool {
        self.baseline.is_some()
    }

    /// Forget the reference and learn a new one from the next samples
    pub fn rebaseline(&mut self) {
        self.baseline = None;
        self.reference.clear();
        self.upper = 0.0;
        self.lower = 0.0;
    }
}

fn sigma_with_floor(mean: f64, std_dev: f64) -> f64 {
    std_dev
        .max(mean.abs() * RELATIVE_SIGMA_FLOOR)
        .max(ABSOLUTE_SIGMA_FLOOR)
}
