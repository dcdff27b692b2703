//! Adaptive placement engine
//!
//! This crate provides the core functionality for:
//! - Multi-objective scoring of execution targets
//! - Hard and soft policy rules with an audit trail
//! - Forecasting, change detection, bandit and Q-learning predictors
//! - Outcome-driven weight learning and pattern discovery
//! - Unit-pool scaling decisions
//! - Health checks and observability

pub mod config;
pub mod decision;
pub mod error;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod health;
pub mod learner;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod policy;
pub mod toolkit;
pub mod weights;

pub use config::{EngineConfig, ObjectiveConfig};
pub use decision::{DecisionEngine, ScaleAction, ScaleDecision, UnitPool};
pub use error::{EngineError, EngineResult, ToolkitError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use learner::{ConvergenceIndicator, DiscoveredPattern, OutcomeDisposition, PatternMerge};
pub use models::*;
pub use observability::{render_metrics, EngineMetrics, StructuredLogger};
pub use orchestrator::{DecisionRequest, EngineStats, Orchestrator};
pub use weights::WeightVector;
