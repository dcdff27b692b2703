//! Builders shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use placement_core::decision::{CostParameters, TransferPricing};
use placement_core::learner::LearningConfig;
use placement_core::{
    DataSensitivity, Decision, DecisionId, DecisionRequest, EngineConfig, ExecutionTarget,
    Location, LocationKind, NetworkProfile, ObjectiveConfig, ObjectiveKind, Outcome, Process,
    SecurityLevel, SystemState,
};

pub const OBJECTIVES: [ObjectiveKind; 6] = [
    ObjectiveKind::QueueDepth,
    ObjectiveKind::LoadBalance,
    ObjectiveKind::NetworkCost,
    ObjectiveKind::Latency,
    ObjectiveKind::Energy,
    ObjectiveKind::DataLocality,
];

pub fn engine_config(seed: u64) -> EngineConfig {
    let raw = serde_json::json!({
        "objectives": OBJECTIVES
            .iter()
            .map(|o| serde_json::json!({
                "metric": o,
                "weight": 1.0 / OBJECTIVES.len() as f64,
                "minimize": true,
                "min_weight": 0.02,
                "max_weight": 0.6,
            }))
            .collect::<Vec<_>>(),
        "cost": cost_parameters(),
        "learning": LearningConfig::new(0.01),
        "seed": seed,
    });
    EngineConfig::from_json(&raw.to_string()).expect("reference config is valid")
}

pub fn cost_parameters() -> CostParameters {
    CostParameters {
        transfer: TransferPricing {
            same_location: 0.0,
            same_region: 0.01,
            adjacent_region: 0.02,
            different_provider: 0.09,
        },
        reference_runtime_ms: 1000.0,
        energy_price_per_kwh: 0.15,
        queue_depth_scale: 20.0,
        network_cost_scale: 1.0,
        latency_scale_ms: 500.0,
        compute_cost_scale: 0.01,
        energy_cost_scale: 0.001,
        throughput_scale: 32.0,
    }
}

pub fn process(id: &str) -> Process {
    Process {
        id: id.to_string(),
        cpu_cores: 1.0,
        memory_mb: 1024.0,
        io_size_mb: 100.0,
        priority: 1,
        deadline_ms: None,
        sensitivity: DataSensitivity::Public,
        safety_critical: false,
        data_location: None,
        pipeline: None,
    }
}

pub fn target(id: &str, kind: LocationKind) -> ExecutionTarget {
    let (capacity, speed, latency_ms, price) = match kind {
        LocationKind::Local => (8.0, 1.0, 1.0, 0.0),
        LocationKind::Edge => (16.0, 1.0, 5.0, 0.05),
        LocationKind::PrivateCloud => (64.0, 1.5, 20.0, 0.08),
        LocationKind::PublicCloud => (128.0, 2.0, 40.0, 0.1),
        LocationKind::Hpc => (256.0, 4.0, 60.0, 0.3),
    };
    ExecutionTarget {
        id: id.to_string(),
        location: Location::new(kind, "acme", "eu-west-1", "a"),
        total_capacity: capacity,
        available_capacity: capacity * 0.75,
        memory_mb: 65536.0,
        available_memory_mb: 49152.0,
        network: NetworkProfile {
            latency_ms,
            bandwidth_mbps: 1000.0,
            stability: 0.95,
            cost_per_gb: 0.01,
        },
        processing_speed: speed,
        reliability: 0.99,
        compute_cost_per_core_hour: price,
        energy_kwh_per_core_hour: 0.02,
        security_level: SecurityLevel::High,
        jurisdiction: "eu".to_string(),
        current_load: 0.25,
    }
}

/// One target of every kind
pub fn mixed_targets() -> Vec<ExecutionTarget> {
    LocationKind::ALL
        .iter()
        .map(|&kind| target(&format!("{}-1", kind), kind))
        .collect()
}

pub fn state(queue_depth: f64, compute_usage: f64) -> SystemState {
    SystemState {
        queue_depth,
        queue_velocity: 0.0,
        throughput: 10.0,
        compute_usage,
        memory_usage: 0.5,
        network_usage: 0.3,
        hour_of_day: 12,
        data_locality: None,
        pipeline_pressure: None,
    }
}

pub fn request(process_id: &str, targets: Vec<ExecutionTarget>, state: SystemState) -> DecisionRequest {
    DecisionRequest {
        process: process(process_id),
        targets,
        state,
        deadline: None,
    }
}

pub fn outcome(decision: &Decision, success: bool, reward: f64) -> Outcome {
    Outcome {
        decision_id: decision.id,
        success,
        duration_ms: 100.0,
        cost: 0.2,
        sla_met: success,
        attribution: None,
        reward,
    }
}

/// Outcome whose reward is attributed entirely to `objective`
pub fn attributed(id: DecisionId, objective: ObjectiveKind, reward: f64) -> Outcome {
    Outcome {
        decision_id: id,
        success: reward > 0.0,
        duration_ms: 100.0,
        cost: 0.2,
        sla_met: true,
        attribution: Some(BTreeMap::from([(objective, 1.0)])),
        reward,
    }
}
