//! Gradient step with momentum
//!
//! `v' = momentum * v - learning_rate * g`, `p' = p + v'`. The optimizer
//! never clamps; callers project the result back into their feasible set.

use crate::error::ToolkitError;

#[derive(Debug, Clone)]
pub struct GradientOptimizer {
    learning_rate: f64,
    momentum: f64,
    velocity: Vec<f64>,
    updates: u64,
    last_loss: Option<f64>,
}

impl GradientOptimizer {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: Vec::new(),
            updates: 0,
            last_loss: None,
        }
    }

    /// Compute the next parameter vector.
    ///
    /// Velocity is created lazily on the first call; later calls must keep
    /// the same dimension.
    pub fn update(
        &mut self,
        params: &[f64],
        gradient: &[f64],
        loss: f64,
    ) -> Result<Vec<f64>, ToolkitError> {
        if gradient.len() != params.len() {
            return Err(ToolkitError::DimensionMismatch {
                expected: params.len(),
                actual: gradient.len(),
            });
        }
        if !self.velocity.is_empty() && self.velocity.len() != params.len() {
            return Err(ToolkitError::DimensionMismatch {
                expected: self.velocity.len(),
                actual: params.len(),
            });
        }
        if params.iter().chain(gradient).any(|v| !v.is_finite()) {
            return Err(ToolkitError::NonFinite("gradient"));
        }
        if !loss.is_finite() {
            return Err(ToolkitError::NonFinite("loss"));
        }

        if self.velocity.is_empty() {
            self.velocity = vec![0.0; params.len()];
        }

        let next = params
            .iter()
            .zip(gradient)
            .zip(self.velocity.iter_mut())
            .map(|((p, g), v)| {
                *v = self.momentum * *v - self.learning_rate * g;
                p + *v
            })
            .collect();

        self.updates += 1;
        self.last_loss = Some(loss);
        Ok(next)
    }

    /// Drop accumulated velocity, e.g. after a rejected step
    pub fn reset_velocity(&mut self) {
        self.velocity.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.last_loss
    }
}
