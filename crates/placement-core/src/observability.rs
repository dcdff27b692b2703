//! Observability infrastructure for the placement engine
//!
//! Provides:
//! - Prometheus metrics (decision latency, outcome and pattern counters, weights)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_gauge, Encoder, Gauge, GaugeVec, Histogram, IntCounter, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::learner::{ConvergenceIndicator, DiscoveredPattern, PatternId};
use crate::models::Decision;
use crate::weights::WeightVector;

/// Histogram buckets for decision latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.000025, 0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.05,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    decision_latency_seconds: Histogram,
    decisions: IntCounter,
    infeasible_decisions: IntCounter,
    outcomes_applied: IntCounter,
    duplicate_outcomes: IntCounter,
    weight_updates_rejected: IntCounter,
    anomalies_detected: IntCounter,
    active_patterns: IntGauge,
    objective_weight: GaugeVec,
    weight_max_recent_change: Gauge,
    converged: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            decision_latency_seconds: register_histogram!(
                "placement_engine_decision_latency_seconds",
                "Time spent producing one placement decision",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register decision_latency_seconds"),

            decisions: register_int_counter!(
                "placement_engine_decisions_total",
                "Placement decisions produced"
            )
            .expect("Failed to register decisions_total"),

            infeasible_decisions: register_int_counter!(
                "placement_engine_infeasible_decisions_total",
                "Decisions where no target passed the hard policy rules"
            )
            .expect("Failed to register infeasible_decisions_total"),

            outcomes_applied: register_int_counter!(
                "placement_engine_outcomes_applied_total",
                "Outcomes folded into the learner"
            )
            .expect("Failed to register outcomes_applied_total"),

            duplicate_outcomes: register_int_counter!(
                "placement_engine_duplicate_outcomes_total",
                "Outcomes rejected as duplicates"
            )
            .expect("Failed to register duplicate_outcomes_total"),

            weight_updates_rejected: register_int_counter!(
                "placement_engine_weight_updates_rejected_total",
                "Weight updates rejected for breaking the vector invariants"
            )
            .expect("Failed to register weight_updates_rejected_total"),

            anomalies_detected: register_int_counter!(
                "placement_engine_anomalies_detected_total",
                "Demand shifts flagged by the change detector"
            )
            .expect("Failed to register anomalies_detected_total"),

            active_patterns: register_int_gauge!(
                "placement_engine_active_patterns",
                "Discovered patterns that are not deprecated"
            )
            .expect("Failed to register active_patterns"),

            objective_weight: register_gauge_vec!(
                "placement_engine_objective_weight",
                "Current weight of each scoring objective",
                &["objective"]
            )
            .expect("Failed to register objective_weight"),

            weight_max_recent_change: register_gauge!(
                "placement_engine_weight_max_recent_change",
                "Largest weight change over the convergence window"
            )
            .expect("Failed to register weight_max_recent_change"),

            converged: register_int_gauge!(
                "placement_engine_converged",
                "1 while recent weight changes stay below epsilon"
            )
            .expect("Failed to register converged"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_decision_latency(&self, duration_secs: f64) {
        self.inner().decision_latency_seconds.observe(duration_secs);
    }

    pub fn inc_decisions(&self) {
        self.inner().decisions.inc();
    }

    pub fn inc_infeasible(&self) {
        self.inner().infeasible_decisions.inc();
    }

    pub fn inc_outcomes_applied(&self) {
        self.inner().outcomes_applied.inc();
    }

    pub fn inc_duplicate_outcomes(&self) {
        self.inner().duplicate_outcomes.inc();
    }

    pub fn inc_weight_updates_rejected(&self) {
        self.inner().weight_updates_rejected.inc();
    }

    pub fn inc_anomalies(&self) {
        self.inner().anomalies_detected.inc();
    }

    pub fn set_active_patterns(&self, count: usize) {
        self.inner().active_patterns.set(count as i64);
    }

    pub fn set_weights(&self, weights: &WeightVector) {
        for entry in weights.entries() {
            self.inner()
                .objective_weight
                .with_label_values(&[entry.objective.as_str()])
                .set(entry.weight);
        }
    }

    pub fn set_convergence(&self, indicator: &ConvergenceIndicator) {
        self.inner()
            .weight_max_recent_change
            .set(indicator.max_recent_change);
        self.inner().converged.set(i64::from(indicator.converged));
    }
}

/// Prometheus text exposition of every registered metric
pub fn render_metrics() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(buffer)
}

/// Structured logger for engine events
///
/// One JSON event per significant state change, tagged with `event` so
/// downstream collectors can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_decision(&self, decision: &Decision, latency_us: u128) {
        let score = decision.selected_score().map(|s| s.final_score);
        debug!(
            event = "decision_made",
            node = %self.node_name,
            decision_id = %decision.id,
            process_id = %decision.process_id,
            target = ?decision.selected_target,
            score = ?score,
            strategy = %decision.strategy,
            pattern = ?decision.applied_pattern.map(|p| p.to_string()),
            confidence = decision.confidence,
            latency_us = latency_us as u64,
            "Placement decided"
        );
    }

    pub fn log_no_feasible_target(&self, decision: &Decision) {
        warn!(
            event = "no_feasible_target",
            node = %self.node_name,
            decision_id = %decision.id,
            process_id = %decision.process_id,
            candidates = decision.policy.len(),
            explanation = %decision.explanation,
            "No feasible target"
        );
    }

    pub fn log_outcome_applied(&self, decision_id: &str, reward: f64, weight_change: Option<f64>) {
        debug!(
            event = "outcome_applied",
            node = %self.node_name,
            decision_id = %decision_id,
            reward = reward,
            weight_change = ?weight_change,
            "Outcome applied"
        );
    }

    pub fn log_outcome_duplicate(&self, decision_id: &str) {
        info!(
            event = "outcome_duplicate",
            node = %self.node_name,
            decision_id = %decision_id,
            "Duplicate outcome ignored"
        );
    }

    pub fn log_weights_updated(&self, weights: &WeightVector, indicator: &ConvergenceIndicator) {
        debug!(
            event = "weights_updated",
            node = %self.node_name,
            weights = ?weights.as_map(),
            max_recent_change = indicator.max_recent_change,
            converged = indicator.converged,
            "Weights updated"
        );
    }

    pub fn log_weight_update_rejected(&self, decision_id: &str, reason: &str) {
        warn!(
            event = "weight_update_rejected",
            node = %self.node_name,
            decision_id = %decision_id,
            reason = %reason,
            "Weight update rejected, keeping previous weights"
        );
    }

    pub fn log_pattern_promoted(&self, pattern: &DiscoveredPattern) {
        let conditions: Vec<String> = pattern.conditions.iter().map(|c| c.to_string()).collect();
        info!(
            event = "pattern_promoted",
            node = %self.node_name,
            pattern_id = %pattern.id,
            action = %pattern.action,
            conditions = ?conditions,
            success_rate = pattern.success_rate,
            samples = pattern.sample_count,
            "Pattern validated"
        );
    }

    pub fn log_pattern_deprecated(&self, pattern_id: PatternId, reason: &str) {
        info!(
            event = "pattern_deprecated",
            node = %self.node_name,
            pattern_id = %pattern_id,
            reason = %reason,
            "Pattern deprecated"
        );
    }

    pub fn log_anomaly(&self, demand: f64, cumulative: f64) {
        warn!(
            event = "anomaly_detected",
            node = %self.node_name,
            demand = demand,
            cumulative = cumulative,
            "Demand shift detected"
        );
    }

    pub fn log_startup(&self, version: &str, objectives: usize, seed: u64) {
        info!(
            event = "engine_started",
            node = %self.node_name,
            version = %version,
            objectives = objectives,
            seed = seed,
            "Placement engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Placement engine shutting down"
        );
    }
}
