//! Exponential moving average

use serde::{Deserialize, Serialize};

use crate::config::require_range;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Weight of the newest observation
    pub alpha: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        // Equivalent to an 11-sample span
        Self { alpha: 0.167 }
    }
}

impl SmootherConfig {
    pub fn validate(&self) -> Result<(), String> {
        require_range("smoother.alpha", self.alpha, f64::MIN_POSITIVE, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct Smoother {
    alpha: f64,
    value: Option<f64>,
}

impl Smoother {
    pub fn new(config: &SmootherConfig) -> Self {
        Self {
            alpha: config.alpha,
            value: None,
        }
    }

    /// Fold in an observation and return the smoothed value.
    /// The first observation initializes the average.
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_initializes() {
        let mut s = Smoother::new(&SmootherConfig::default());
        assert_eq!(s.value(), None);
        assert_eq!(s.update(0.8), 0.8);
    }

    #[test]
    fn test_converges_toward_level() {
        let mut s = Smoother::new(&SmootherConfig { alpha: 0.5 });
        s.update(0.0);
        assert_eq!(s.update(1.0), 0.5);
        assert_eq!(s.update(1.0), 0.75);
        for _ in 0..30 {
            s.update(1.0);
        }
        assert!((s.value().unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_alpha_bounds_validated() {
        assert!(SmootherConfig { alpha: 0.0 }.validate().is_err());
        assert!(SmootherConfig { alpha: 1.5 }.validate().is_err());
        assert!(SmootherConfig::default().validate().is_ok());
    }
}
