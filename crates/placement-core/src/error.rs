//! Engine error types.

use thiserror::Error;

use crate::models::{Decision, DecisionId};

/// Errors surfaced by the decision-and-learning engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed process, target, state or outcome.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Every candidate target was rejected. Carries the explanatory decision
    /// (no selected target) so the caller can audit and pick a fallback.
    #[error("no feasible target for process {}: {}", .0.process_id, .0.explanation)]
    NoFeasibleTarget(Box<Decision>),

    #[error("insufficient history: have {have} samples, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// A learner update would have broken the weight-vector invariants.
    /// The previous vector is retained.
    #[error("weight invariant violated: {0}")]
    WeightInvariant(String),

    #[error("unknown decision: {0}")]
    UnknownDecision(DecisionId),

    #[error("toolkit error: {0}")]
    Toolkit(#[from] ToolkitError),
}

/// Errors raised by the individual predictor toolkit primitives.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolkitError {
    #[error("insufficient history: have {have} samples, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("unknown bandit arm: {0}")]
    UnknownArm(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
