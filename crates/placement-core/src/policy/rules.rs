//! Policy rule definitions
//!
//! Built-in conditions are plain data so they can come from configuration.
//! Embedders can add a [`RuleCondition::Custom`] predicate in code; those
//! never round-trip through serde.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::decision::PlacementEstimate;
use crate::models::{DataSensitivity, ExecutionTarget, Process};

/// Rule id of the always-installed safety rule
pub const SAFETY_RULE_ID: &str = "safety-critical-local-only";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Violations remove the target
    Hard,
    /// Violations only lower the target's score
    Soft,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Penalty weight summed into a target's soft penalty
    pub fn weight(self) -> f64 {
        match self {
            Severity::Low => 0.2,
            Severity::Medium => 0.5,
            Severity::High => 0.8,
            Severity::Critical => 1.0,
        }
    }
}

/// Everything a rule may look at for one (process, target) pair
pub struct RuleContext<'a> {
    pub process: &'a Process,
    pub target: &'a ExecutionTarget,
    pub capacity_need: f64,
    /// Capacity the target must keep free beyond the need, as a fraction
    pub capacity_margin: f64,
    pub estimate: &'a PlacementEstimate,
}

type Predicate = dyn Fn(&RuleContext<'_>) -> Option<String> + Send + Sync;

/// Code-defined rule predicate. Returns a violation detail, or `None` when
/// the pair complies.
#[derive(Clone)]
pub struct CustomPredicate(Arc<Predicate>);

impl CustomPredicate {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&RuleContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomPredicate(..)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    SafetyCriticalLocalOnly,
    /// Target security level must cover the process data sensitivity
    SecurityClearance,
    /// Non-public data may only run in the listed jurisdictions
    DataJurisdiction { allowed: Vec<String> },
    CapacityFit,
    MemoryFit,
    /// Estimated completion must land before the process deadline
    DeadlineReachable,
    MinReliability { threshold: f64 },
    MaxLoad { threshold: f64 },
    MinNetworkStability { threshold: f64 },
    MaxComputeCost { per_core_hour: f64 },
    #[serde(skip)]
    Custom(CustomPredicate),
}

impl RuleCondition {
    /// Violation detail, or `None` when the pair complies
    pub fn check(&self, ctx: &RuleContext<'_>) -> Option<String> {
        let (process, target) = (ctx.process, ctx.target);
        match self {
            RuleCondition::SafetyCriticalLocalOnly => (process.safety_critical
                && !target.kind().is_local())
            .then(|| format!("safety-critical process on {} target", target.kind())),

            RuleCondition::SecurityClearance => {
                let required = process.sensitivity.required_level();
                (target.security_level < required).then(|| {
                    format!(
                        "{:?} data needs {:?}, target offers {:?}",
                        process.sensitivity, required, target.security_level
                    )
                })
            }

            RuleCondition::DataJurisdiction { allowed } => (process.sensitivity
                != DataSensitivity::Public
                && !allowed.iter().any(|j| j == &target.jurisdiction))
            .then(|| format!("jurisdiction {} not allowed", target.jurisdiction)),

            RuleCondition::CapacityFit => {
                let required = ctx.capacity_need * (1.0 + ctx.capacity_margin);
                (target.available_capacity < required).then(|| {
                    format!(
                        "needs {:.2} cores, {:.2} available",
                        required, target.available_capacity
                    )
                })
            }

            RuleCondition::MemoryFit => (target.available_memory_mb < process.memory_mb)
                .then(|| {
                    format!(
                        "needs {:.0} MB, {:.0} MB available",
                        process.memory_mb, target.available_memory_mb
                    )
                }),

            RuleCondition::DeadlineReachable => process.deadline_ms.and_then(|deadline| {
                (ctx.estimate.completion_ms > deadline).then(|| {
                    format!(
                        "estimated {:.0} ms exceeds deadline {:.0} ms",
                        ctx.estimate.completion_ms, deadline
                    )
                })
            }),

            RuleCondition::MinReliability { threshold } => (target.reliability < *threshold)
                .then(|| format!("reliability {:.3} below {:.3}", target.reliability, threshold)),

            RuleCondition::MaxLoad { threshold } => (target.current_load > *threshold)
                .then(|| format!("load {:.2} above {:.2}", target.current_load, threshold)),

            RuleCondition::MinNetworkStability { threshold } => (target.network.stability
                < *threshold)
                .then(|| {
                    format!(
                        "network stability {:.2} below {:.2}",
                        target.network.stability, threshold
                    )
                }),

            RuleCondition::MaxComputeCost { per_core_hour } => (target
                .compute_cost_per_core_hour
                > *per_core_hour)
                .then(|| {
                    format!(
                        "compute cost {:.3}/core-hour above {:.3}",
                        target.compute_cost_per_core_hour, per_core_hour
                    )
                }),

            RuleCondition::Custom(predicate) => (predicate.0)(ctx),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, RuleCondition::Custom(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub kind: RuleKind,
    /// Lower runs first
    pub priority: u32,
    pub severity: Severity,
    pub description: String,
    pub condition: RuleCondition,
}

impl PolicyRule {
    pub fn hard(id: &str, priority: u32, description: &str, condition: RuleCondition) -> Self {
        Self {
            id: id.to_string(),
            kind: RuleKind::Hard,
            priority,
            severity: Severity::Critical,
            description: description.to_string(),
            condition,
        }
    }

    pub fn soft(
        id: &str,
        priority: u32,
        severity: Severity,
        description: &str,
        condition: RuleCondition,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind: RuleKind::Soft,
            priority,
            severity,
            description: description.to_string(),
            condition,
        }
    }

    pub fn safety() -> Self {
        Self::hard(
            SAFETY_RULE_ID,
            0,
            "Safety-critical processes run on the local node only",
            RuleCondition::SafetyCriticalLocalOnly,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{cost_parameters, process, target};
    use crate::models::{LocationKind, SecurityLevel};

    fn check(condition: &RuleCondition, process: &Process, target: &ExecutionTarget) -> Option<String> {
        let estimate = cost_parameters().estimate(process, target, process.cpu_cores);
        condition.check(&RuleContext {
            process,
            target,
            capacity_need: process.cpu_cores,
            capacity_margin: 0.0,
            estimate: &estimate,
        })
    }

    #[test]
    fn test_safety_rule() {
        let mut p = process("p1");
        p.safety_critical = true;
        let rule = RuleCondition::SafetyCriticalLocalOnly;
        assert!(check(&rule, &p, &target("local", LocationKind::Local)).is_none());
        assert!(check(&rule, &p, &target("edge", LocationKind::Edge)).is_some());

        p.safety_critical = false;
        assert!(check(&rule, &p, &target("edge", LocationKind::Edge)).is_none());
    }

    #[test]
    fn test_security_clearance() {
        let mut p = process("p1");
        p.sensitivity = DataSensitivity::Confidential;
        let mut t = target("t", LocationKind::PublicCloud);
        t.security_level = SecurityLevel::Standard;
        assert!(check(&RuleCondition::SecurityClearance, &p, &t).is_some());
        t.security_level = SecurityLevel::High;
        assert!(check(&RuleCondition::SecurityClearance, &p, &t).is_none());
    }

    #[test]
    fn test_jurisdiction_ignores_public_data() {
        let rule = RuleCondition::DataJurisdiction {
            allowed: vec!["eu".into()],
        };
        let mut t = target("t", LocationKind::PublicCloud);
        t.jurisdiction = "us".into();
        let mut p = process("p1");
        assert!(check(&rule, &p, &t).is_none());
        p.sensitivity = DataSensitivity::Internal;
        assert!(check(&rule, &p, &t).is_some());
    }

    #[test]
    fn test_capacity_and_memory_fit() {
        let mut p = process("p1");
        let mut t = target("t", LocationKind::Edge);
        p.cpu_cores = t.available_capacity + 1.0;
        assert!(check(&RuleCondition::CapacityFit, &p, &t).is_some());

        p.cpu_cores = 1.0;
        p.memory_mb = t.available_memory_mb * 2.0;
        assert!(check(&RuleCondition::MemoryFit, &p, &t).is_some());

        t.available_memory_mb = p.memory_mb;
        assert!(check(&RuleCondition::MemoryFit, &p, &t).is_none());
    }

    #[test]
    fn test_deadline() {
        let mut p = process("p1");
        let t = target("t", LocationKind::PublicCloud);
        assert!(check(&RuleCondition::DeadlineReachable, &p, &t).is_none());
        p.deadline_ms = Some(0.001);
        assert!(check(&RuleCondition::DeadlineReachable, &p, &t).is_some());
    }

    #[test]
    fn test_custom_predicate() {
        let rule = RuleCondition::Custom(CustomPredicate::new(|ctx| {
            ctx.target.id.starts_with("blocked").then(|| "blocked prefix".to_string())
        }));
        let p = process("p1");
        assert!(check(&rule, &p, &target("blocked-1", LocationKind::Edge)).is_some());
        assert!(check(&rule, &p, &target("open-1", LocationKind::Edge)).is_none());
        assert!(rule.is_custom());
    }

    #[test]
    fn test_rule_deserializes_from_tagged_json() {
        let raw = r#"{
            "id": "reliable", "kind": "soft", "priority": 60, "severity": "low",
            "description": "prefer reliable targets",
            "condition": {"type": "min_reliability", "threshold": 0.95}
        }"#;
        let rule: PolicyRule = serde_json::from_str(raw).unwrap();
        assert_eq!(rule.kind, RuleKind::Soft);
        assert!(matches!(
            rule.condition,
            RuleCondition::MinReliability { threshold } if threshold == 0.95
        ));
    }

    #[test]
    fn test_severity_weights() {
        assert_eq!(Severity::Low.weight(), 0.2);
        assert_eq!(Severity::Critical.weight(), 1.0);
    }
}
