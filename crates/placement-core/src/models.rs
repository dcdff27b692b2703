//! Core data models for the placement engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::learner::PatternId;
use crate::policy::PolicyEvaluation;
use crate::toolkit::{RlAction, Strategy, ToolkitOutputs};

/// Class of execution location, from the caller's own node outward
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Local,
    Edge,
    PrivateCloud,
    PublicCloud,
    Hpc,
}

impl LocationKind {
    pub const ALL: [LocationKind; 5] = [
        LocationKind::Local,
        LocationKind::Edge,
        LocationKind::PrivateCloud,
        LocationKind::PublicCloud,
        LocationKind::Hpc,
    ];

    pub fn is_local(self) -> bool {
        matches!(self, LocationKind::Local)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LocationKind::Local => "local",
            LocationKind::Edge => "edge",
            LocationKind::PrivateCloud => "private_cloud",
            LocationKind::PublicCloud => "public_cloud",
            LocationKind::Hpc => "hpc",
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical placement of data or compute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub kind: LocationKind,
    pub provider: String,
    pub region: String,
    pub zone: String,
}

impl Location {
    pub fn new(
        kind: LocationKind,
        provider: impl Into<String>,
        region: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            provider: provider.into(),
            region: region.into(),
            zone: zone.into(),
        }
    }

    /// Classify how close two locations are to each other
    pub fn proximity(&self, other: &Location) -> Proximity {
        if self.provider != other.provider {
            Proximity::DifferentProvider
        } else if self.region != other.region {
            Proximity::AdjacentRegion
        } else if self.zone != other.zone {
            Proximity::SameRegion
        } else {
            Proximity::SameLocation
        }
    }
}

/// Location-pair proximity classes used for data gravity and transfer pricing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    SameLocation,
    SameRegion,
    AdjacentRegion,
    DifferentProvider,
}

impl Proximity {
    /// Gravity factor of the pair before the gravity exponent is applied
    pub fn factor(self) -> f64 {
        match self {
            Proximity::SameLocation => 1.0,
            Proximity::SameRegion => 0.7,
            Proximity::AdjacentRegion => 0.4,
            Proximity::DifferentProvider => 0.1,
        }
    }
}

/// Sensitivity classification of the data a process touches
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DataSensitivity {
    #[default]
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl DataSensitivity {
    /// Minimum target security level allowed to host this sensitivity
    pub fn required_level(self) -> SecurityLevel {
        match self {
            DataSensitivity::Public => SecurityLevel::Basic,
            DataSensitivity::Internal => SecurityLevel::Standard,
            DataSensitivity::Confidential => SecurityLevel::High,
            DataSensitivity::Restricted => SecurityLevel::Sovereign,
        }
    }
}

/// Security posture of an execution target
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Basic,
    Standard,
    High,
    Sovereign,
}

/// Position of a process inside a multi-stage pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    pub pipeline_id: String,
    pub stage_index: u32,
    pub total_stages: u32,
    /// Where the next stage is expected to run, if already known
    pub downstream_location: Option<Location>,
    /// Data handed to the next stage
    pub downstream_data_mb: f64,
}

impl PipelineContext {
    pub fn is_first(&self) -> bool {
        self.stage_index == 0
    }

    pub fn is_last(&self) -> bool {
        self.stage_index + 1 >= self.total_stages
    }
}

/// A computational process awaiting placement. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub cpu_cores: f64,
    pub memory_mb: f64,
    /// Input data the process consumes
    pub io_size_mb: f64,
    /// 0 = lowest
    pub priority: u8,
    pub deadline_ms: Option<f64>,
    pub sensitivity: DataSensitivity,
    pub safety_critical: bool,
    pub data_location: Option<Location>,
    pub pipeline: Option<PipelineContext>,
}

impl Process {
    pub fn data_size_gb(&self) -> f64 {
        self.io_size_mb / 1024.0
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidInput("process id is empty".into()));
        }
        check_non_negative("process.cpu_cores", self.cpu_cores)?;
        check_non_negative("process.memory_mb", self.memory_mb)?;
        check_non_negative("process.io_size_mb", self.io_size_mb)?;
        if let Some(deadline) = self.deadline_ms {
            if !deadline.is_finite() || deadline <= 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "process {} has invalid deadline {}",
                    self.id, deadline
                )));
            }
        }
        if let Some(pipeline) = &self.pipeline {
            if pipeline.total_stages == 0 || pipeline.stage_index >= pipeline.total_stages {
                return Err(EngineError::InvalidInput(format!(
                    "process {} has stage {} of {}",
                    self.id, pipeline.stage_index, pipeline.total_stages
                )));
            }
            check_non_negative("pipeline.downstream_data_mb", pipeline.downstream_data_mb)?;
        }
        Ok(())
    }
}

/// Network characteristics of a target as seen from the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub latency_ms: f64,
    pub bandwidth_mbps: f64,
    /// 0.0-1.0
    pub stability: f64,
    /// Egress price per GB moved into or out of the target
    pub cost_per_gb: f64,
}

/// A remote (or local) execution target. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTarget {
    pub id: String,
    pub location: Location,
    /// Cores
    pub total_capacity: f64,
    pub available_capacity: f64,
    pub memory_mb: f64,
    pub available_memory_mb: f64,
    pub network: NetworkProfile,
    /// Relative to a baseline core (1.0)
    pub processing_speed: f64,
    /// 0.0-1.0
    pub reliability: f64,
    pub compute_cost_per_core_hour: f64,
    pub energy_kwh_per_core_hour: f64,
    pub security_level: SecurityLevel,
    pub jurisdiction: String,
    /// 0.0-1.0
    pub current_load: f64,
}

impl ExecutionTarget {
    pub fn kind(&self) -> LocationKind {
        self.location.kind
    }

    /// Fraction of capacity currently in use
    pub fn utilization(&self) -> f64 {
        if self.total_capacity <= 0.0 {
            return 1.0;
        }
        ((self.total_capacity - self.available_capacity) / self.total_capacity).clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidInput("target id is empty".into()));
        }
        check_non_negative("target.total_capacity", self.total_capacity)?;
        check_non_negative("target.available_capacity", self.available_capacity)?;
        check_non_negative("target.memory_mb", self.memory_mb)?;
        check_non_negative("target.available_memory_mb", self.available_memory_mb)?;
        check_non_negative("target.network.latency_ms", self.network.latency_ms)?;
        check_non_negative("target.network.cost_per_gb", self.network.cost_per_gb)?;
        check_non_negative(
            "target.compute_cost_per_core_hour",
            self.compute_cost_per_core_hour,
        )?;
        check_non_negative("target.energy_kwh_per_core_hour", self.energy_kwh_per_core_hour)?;
        check_unit("target.network.stability", self.network.stability)?;
        check_unit("target.reliability", self.reliability)?;
        check_unit("target.current_load", self.current_load)?;

        if self.total_capacity == 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "target {} has zero total capacity",
                self.id
            )));
        }
        if self.available_capacity > self.total_capacity {
            return Err(EngineError::InvalidInput(format!(
                "target {} reports {} available of {} total",
                self.id, self.available_capacity, self.total_capacity
            )));
        }
        if !(self.network.bandwidth_mbps.is_finite() && self.network.bandwidth_mbps > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "target {} has non-positive bandwidth",
                self.id
            )));
        }
        if !(self.processing_speed.is_finite() && self.processing_speed > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "target {} has non-positive processing speed",
                self.id
            )));
        }
        Ok(())
    }
}

/// Fields of [`SystemState`] that discovered patterns may condition on
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    QueueDepth,
    QueueVelocity,
    Throughput,
    ComputeUsage,
    MemoryUsage,
    NetworkUsage,
    HourOfDay,
    DataLocality,
    PipelinePressure,
}

impl StateField {
    pub const ALL: [StateField; 9] = [
        StateField::QueueDepth,
        StateField::QueueVelocity,
        StateField::Throughput,
        StateField::ComputeUsage,
        StateField::MemoryUsage,
        StateField::NetworkUsage,
        StateField::HourOfDay,
        StateField::DataLocality,
        StateField::PipelinePressure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StateField::QueueDepth => "queue_depth",
            StateField::QueueVelocity => "queue_velocity",
            StateField::Throughput => "throughput",
            StateField::ComputeUsage => "compute_usage",
            StateField::MemoryUsage => "memory_usage",
            StateField::NetworkUsage => "network_usage",
            StateField::HourOfDay => "hour_of_day",
            StateField::DataLocality => "data_locality",
            StateField::PipelinePressure => "pipeline_pressure",
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of queue and resource pressure from the metrics collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub queue_depth: f64,
    /// Change in queue depth per second
    pub queue_velocity: f64,
    /// Completed processes per second
    pub throughput: f64,
    pub compute_usage: f64,
    pub memory_usage: f64,
    pub network_usage: f64,
    pub hour_of_day: u8,
    pub data_locality: Option<f64>,
    pub pipeline_pressure: Option<f64>,
}

impl SystemState {
    pub fn field(&self, field: StateField) -> f64 {
        match field {
            StateField::QueueDepth => self.queue_depth,
            StateField::QueueVelocity => self.queue_velocity,
            StateField::Throughput => self.throughput,
            StateField::ComputeUsage => self.compute_usage,
            StateField::MemoryUsage => self.memory_usage,
            StateField::NetworkUsage => self.network_usage,
            StateField::HourOfDay => f64::from(self.hour_of_day),
            StateField::DataLocality => self.data_locality.unwrap_or(0.0),
            StateField::PipelinePressure => self.pipeline_pressure.unwrap_or(0.0),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        check_non_negative("state.queue_depth", self.queue_depth)?;
        check_non_negative("state.throughput", self.throughput)?;
        if !self.queue_velocity.is_finite() {
            return Err(EngineError::InvalidInput(
                "state.queue_velocity is not finite".into(),
            ));
        }
        check_unit("state.compute_usage", self.compute_usage)?;
        check_unit("state.memory_usage", self.memory_usage)?;
        check_unit("state.network_usage", self.network_usage)?;
        if self.hour_of_day > 23 {
            return Err(EngineError::InvalidInput(format!(
                "state.hour_of_day {} out of range",
                self.hour_of_day
            )));
        }
        if let Some(v) = self.data_locality {
            check_unit("state.data_locality", v)?;
        }
        if let Some(v) = self.pipeline_pressure {
            check_unit("state.pipeline_pressure", v)?;
        }
        Ok(())
    }
}

/// Objectives the scoring function can weigh against each other
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    QueueDepth,
    LoadBalance,
    NetworkCost,
    Latency,
    Energy,
    DataLocality,
    ComputeCost,
    Throughput,
}

impl ObjectiveKind {
    pub const ALL: [ObjectiveKind; 8] = [
        ObjectiveKind::QueueDepth,
        ObjectiveKind::LoadBalance,
        ObjectiveKind::NetworkCost,
        ObjectiveKind::Latency,
        ObjectiveKind::Energy,
        ObjectiveKind::DataLocality,
        ObjectiveKind::ComputeCost,
        ObjectiveKind::Throughput,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectiveKind::QueueDepth => "queue_depth",
            ObjectiveKind::LoadBalance => "load_balance",
            ObjectiveKind::NetworkCost => "network_cost",
            ObjectiveKind::Latency => "latency",
            ObjectiveKind::Energy => "energy",
            ObjectiveKind::DataLocality => "data_locality",
            ObjectiveKind::ComputeCost => "compute_cost",
            ObjectiveKind::Throughput => "throughput",
        }
    }
}

impl fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sequential identifier assigned by the orchestrator
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DecisionId(pub u64);

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dec-{:08}", self.0)
    }
}

/// One objective's contribution to a target's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveScore {
    pub objective: ObjectiveKind,
    /// Normalized cost in [0, 1]
    pub cost: f64,
    /// Effective weight used for this decision
    pub weight: f64,
    pub minimize: bool,
    /// Signed term added to the weighted score
    pub contribution: f64,
}

/// Score breakdown for a single feasible target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetScore {
    pub target_id: String,
    pub kind: LocationKind,
    pub objectives: Vec<ObjectiveScore>,
    /// `-sum(w_i * signed cost_i)`, in [-1, 1]
    pub weighted_score: f64,
    pub gravity_multiplier: f64,
    pub soft_penalty: f64,
    pub pipeline_penalty: f64,
    /// Pattern and reinforcement-learner bonus
    pub bias: f64,
    pub final_score: f64,
}

impl TargetScore {
    pub fn objective(&self, kind: ObjectiveKind) -> Option<&ObjectiveScore> {
        self.objectives.iter().find(|o| o.objective == kind)
    }
}

/// Result of one placement decision. Created once and never mutated; the
/// outcome is attached later by [`DecisionId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub process_id: String,
    pub selected_target: Option<String>,
    pub selected_kind: Option<LocationKind>,
    /// Best first
    pub scores: Vec<TargetScore>,
    pub applied_pattern: Option<PatternId>,
    pub policy: Vec<PolicyEvaluation>,
    pub strategy: Strategy,
    pub recommended_action: RlAction,
    pub capacity_need: f64,
    pub toolkit: ToolkitOutputs,
    pub confidence: f64,
    pub explanation: String,
    pub timestamp: i64,
}

impl Decision {
    pub fn selected_score(&self) -> Option<&TargetScore> {
        let selected = self.selected_target.as_deref()?;
        self.scores.iter().find(|s| s.target_id == selected)
    }
}

/// Execution result reported by the external execution monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub decision_id: DecisionId,
    pub success: bool,
    pub duration_ms: f64,
    pub cost: f64,
    pub sla_met: bool,
    /// Per-objective share of the reward; derived by the learner when absent
    #[serde(default)]
    pub attribution: Option<BTreeMap<ObjectiveKind, f64>>,
    /// Bounded by the configured reward bound (default 5.0)
    pub reward: f64,
}

impl Outcome {
    pub fn validate(&self) -> EngineResult<()> {
        check_non_negative("outcome.duration_ms", self.duration_ms)?;
        check_non_negative("outcome.cost", self.cost)?;
        if !self.reward.is_finite() {
            return Err(EngineError::InvalidInput("outcome.reward is not finite".into()));
        }
        if let Some(attribution) = &self.attribution {
            for (objective, share) in attribution {
                if !share.is_finite() || *share < 0.0 {
                    return Err(EngineError::InvalidInput(format!(
                        "attribution for {} is {}",
                        objective, share
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_non_negative(name: &str, value: f64) -> EngineResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!("{} is {}", name, value)))
    }
}

fn check_unit(name: &str, value: f64) -> EngineResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "{} is {}, expected 0.0-1.0",
            name, value
        )))
    }
}
