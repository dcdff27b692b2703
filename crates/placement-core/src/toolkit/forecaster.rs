//! Online ARIMA(p, d, q) forecaster
//!
//! Keeps a bounded window of observations. The window is differenced `d`
//! times; AR coefficients are solved from the Yule-Walker equations with
//! Levinson-Durbin, MA coefficients come from the residual autocorrelation
//! at each lag. Forecasts are integrated back to the observation scale.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::ToolkitError;

/// Floor on the history required before any forecast is produced
pub const MIN_OBSERVATIONS: usize = 10;

/// Largest magnitude allowed for an MA coefficient
const MAX_MA_COEFFICIENT: f64 = 0.95;

/// Below this autocovariance the differenced series is treated as constant
const VARIANCE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecasterConfig {
    /// Autoregressive order
    pub p: usize,
    /// Differencing order
    pub d: usize,
    /// Moving-average order
    pub q: usize,
    /// Observations retained
    pub window: usize,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            p: 3,
            d: 1,
            q: 2,
            window: 64,
        }
    }
}

impl ForecasterConfig {
    pub fn min_history(&self) -> usize {
        MIN_OBSERVATIONS.max(self.p + self.d + self.q + 1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.p > 8 || self.q > 8 {
            return Err(format!("forecaster orders p={} q={} exceed 8", self.p, self.q));
        }
        if self.d > 2 {
            return Err(format!("forecaster differencing d={} exceeds 2", self.d));
        }
        if self.window < self.min_history() {
            return Err(format!(
                "forecaster window {} smaller than minimum history {}",
                self.window,
                self.min_history()
            ));
        }
        Ok(())
    }
}

/// One-step-ahead forecast with its standard error
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub value: f64,
    pub error: f64,
}

pub struct Forecaster {
    config: ForecasterConfig,
    observations: VecDeque<f64>,
    residuals: VecDeque<f64>,
}

impl Forecaster {
    pub fn new(config: ForecasterConfig) -> Self {
        Self {
            observations: VecDeque::with_capacity(config.window),
            residuals: VecDeque::with_capacity(config.window),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.observations.len() >= self.config.min_history()
    }

    /// Record a new observation.
    ///
    /// When a forecast was available beforehand, the one-step residual is
    /// stored for the MA terms and the error estimate.
    pub fn add_observation(&mut self, x: f64) -> Result<(), ToolkitError> {
        if !x.is_finite() {
            return Err(ToolkitError::NonFinite("observation"));
        }

        if let Ok(forecast) = self.predict() {
            if self.residuals.len() >= self.config.window {
                self.residuals.pop_front();
            }
            self.residuals.push_back(x - forecast.value);
        }

        if self.observations.len() >= self.config.window {
            self.observations.pop_front();
        }
        self.observations.push_back(x);
        Ok(())
    }

    pub fn predict(&self) -> Result<Forecast, ToolkitError> {
        let need = self.config.min_history();
        if self.observations.len() < need {
            return Err(ToolkitError::InsufficientHistory {
                have: self.observations.len(),
                need,
            });
        }

        let levels = difference(self.observations.iter().copied().collect(), self.config.d);
        let y = &levels[self.config.d];
        let n = y.len();
        let mean = y.iter().sum::<f64>() / n as f64;

        let acov = autocovariance(y, mean, self.config.p);
        let phi = levinson_durbin(&acov, self.config.p);
        let ar: f64 = phi
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < n)
            .map(|(i, coef)| coef * (y[n - 1 - i] - mean))
            .sum();

        let residuals: Vec<f64> = self.residuals.iter().copied().collect();
        let theta = residual_autocorrelation(&residuals, self.config.q);
        let ma: f64 = theta
            .iter()
            .enumerate()
            .filter(|(j, _)| *j < residuals.len())
            .map(|(j, coef)| coef * residuals[residuals.len() - 1 - j])
            .sum();

        let y_hat = mean + ar + ma;
        let value = y_hat
            + levels[..self.config.d]
                .iter()
                .filter_map(|level| level.last())
                .sum::<f64>();

        let error = if residuals.len() >= 2 {
            (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
        } else {
            acov[0].max(0.0).sqrt()
        };

        if !value.is_finite() || !error.is_finite() {
            return Err(ToolkitError::NonFinite("forecast"));
        }
        Ok(Forecast { value, error })
    }
}

/// Returns `[x, Δx, Δ²x, ...]` up to `order` differences
fn difference(series: Vec<f64>, order: usize) -> Vec<Vec<f64>> {
    let mut levels = vec![series];
    for k in 0..order {
        let next: Vec<f64> = levels[k].windows(2).map(|w| w[1] - w[0]).collect();
        levels.push(next);
    }
    levels
}

/// Biased autocovariance for lags `0..=max_lag`
fn autocovariance(y: &[f64], mean: f64, max_lag: usize) -> Vec<f64> {
    let n = y.len();
    (0..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            (lag..n)
                .map(|t| (y[t] - mean) * (y[t - lag] - mean))
                .sum::<f64>()
                / n as f64
        })
        .collect()
}

/// Solve the Yule-Walker equations for AR coefficients
fn levinson_durbin(r: &[f64], order: usize) -> Vec<f64> {
    let mut phi = vec![0.0; order];
    if order == 0 || r[0] <= VARIANCE_EPSILON {
        return phi;
    }

    let mut prev = vec![0.0; order];
    let mut err = r[0];
    for k in 1..=order {
        let mut acc = r[k];
        for j in 1..k {
            acc -= prev[j - 1] * r[k - j];
        }
        let kappa = acc / err;
        phi[k - 1] = kappa;
        for j in 1..k {
            phi[j - 1] = prev[j - 1] - kappa * prev[k - j - 1];
        }
        err *= 1.0 - kappa * kappa;
        if err <= VARIANCE_EPSILON {
            break;
        }
        prev[..k].copy_from_slice(&phi[..k]);
    }
    phi
}

fn residual_autocorrelation(residuals: &[f64], order: usize) -> Vec<f64> {
    let energy: f64 = residuals.iter().map(|e| e * e).sum();
    (1..=order)
        .map(|lag| {
            if residuals.len() <= lag + 1 || energy <= VARIANCE_EPSILON {
                return 0.0;
            }
            let cross: f64 = (lag..residuals.len())
                .map(|t| residuals[t] * residuals[t - lag])
                .sum();
            (cross / energy).clamp(-MAX_MA_COEFFICIENT, MAX_MA_COEFFICIENT)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_history() {
        let mut f = Forecaster::new(ForecasterConfig::default());
        for i in 0..5 {
            f.add_observation(i as f64).unwrap();
        }
        assert_eq!(
            f.predict(),
            Err(ToolkitError::InsufficientHistory { have: 5, need: 10 })
        );
    }

    #[test]
    fn test_linear_trend_is_extrapolated() {
        let mut f = Forecaster::new(ForecasterConfig::default());
        for i in 1..=20 {
            f.add_observation(i as f64).unwrap();
        }
        let forecast = f.predict().unwrap();
        assert!((forecast.value - 21.0).abs() < 1e-9, "got {}", forecast.value);
        assert!(forecast.error < 1e-9);
    }

    #[test]
    fn test_constant_series() {
        let mut f = Forecaster::new(ForecasterConfig::default());
        for _ in 0..15 {
            f.add_observation(0.4).unwrap();
        }
        let forecast = f.predict().unwrap();
        assert!((forecast.value - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_oscillating_series_tracks_pattern() {
        let mut f = Forecaster::new(ForecasterConfig::default());
        // Alternating 1, 3, 1, 3 ... : next value after a 3 is a 1
        for i in 0..40 {
            f.add_observation(if i % 2 == 0 { 1.0 } else { 3.0 }).unwrap();
        }
        let forecast = f.predict().unwrap();
        assert!(
            (forecast.value - 1.0).abs() < (forecast.value - 3.0).abs(),
            "forecast {} should be closer to 1 than 3",
            forecast.value
        );
    }

    #[test]
    fn test_window_is_bounded() {
        let config = ForecasterConfig {
            window: 16,
            ..Default::default()
        };
        let mut f = Forecaster::new(config);
        for i in 0..100 {
            f.add_observation(i as f64 * 0.5).unwrap();
        }
        assert_eq!(f.len(), 16);
    }

    #[test]
    fn test_non_finite_observation_rejected() {
        let mut f = Forecaster::new(ForecasterConfig::default());
        assert!(f.add_observation(f64::NAN).is_err());
        assert!(f.is_empty());
    }

    #[test]
    fn test_levinson_durbin_ar1() {
        // AR(1) with phi = 0.5 has autocovariances r_k = 0.5^k * r_0
        let r = [1.0, 0.5, 0.25, 0.125];
        let phi = levinson_durbin(&r, 3);
        assert!((phi[0] - 0.5).abs() < 1e-9);
        assert!(phi[1].abs() < 1e-9);
        assert!(phi[2].abs() < 1e-9);
    }

    #[test]
    fn test_difference_levels() {
        let levels = difference(vec![1.0, 4.0, 9.0, 16.0], 2);
        assert_eq!(levels[1], vec![3.0, 5.0, 7.0]);
        assert_eq!(levels[2], vec![2.0, 2.0]);
    }
}
