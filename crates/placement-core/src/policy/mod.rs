//! Policy engine
//!
//! Evaluates hard and soft rules for each (process, target) pair in
//! ascending priority order. Hard violations remove a target from
//! consideration; soft violations add a severity-weighted penalty. Every
//! rule evaluation is audited, pass or fail.

pub mod audit;
pub mod rules;

pub use audit::{AuditEntry, AuditLog, AuditSink, DEFAULT_AUDIT_CAPACITY};
pub use rules::{
    CustomPredicate, PolicyRule, RuleCondition, RuleContext, RuleKind, Severity, SAFETY_RULE_ID,
};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::{require_non_negative, require_range};
use crate::decision::CostParameters;
use crate::models::{ExecutionTarget, Process};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Configured rules; the safety rule is added on top of these
    pub rules: Vec<PolicyRule>,
    /// Spare capacity a target must keep beyond the predicted need
    pub capacity_margin: f64,
    pub audit_capacity: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                PolicyRule::hard(
                    "security-clearance",
                    10,
                    "Target security level covers the data sensitivity",
                    RuleCondition::SecurityClearance,
                ),
                PolicyRule::hard(
                    "capacity-fit",
                    20,
                    "Target has the predicted cores available",
                    RuleCondition::CapacityFit,
                ),
                PolicyRule::hard(
                    "memory-fit",
                    30,
                    "Target has the requested memory available",
                    RuleCondition::MemoryFit,
                ),
                PolicyRule::soft(
                    "deadline-reachable",
                    40,
                    Severity::High,
                    "Estimated completion meets the deadline",
                    RuleCondition::DeadlineReachable,
                ),
                PolicyRule::soft(
                    "max-load",
                    50,
                    Severity::Medium,
                    "Avoid heavily loaded targets",
                    RuleCondition::MaxLoad { threshold: 0.9 },
                ),
                PolicyRule::soft(
                    "min-reliability",
                    60,
                    Severity::Low,
                    "Prefer reliable targets",
                    RuleCondition::MinReliability { threshold: 0.9 },
                ),
            ],
            capacity_margin: 0.1,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), String> {
        require_non_negative("policy.capacity_margin", self.capacity_margin)?;
        if self.audit_capacity == 0 {
            return Err("policy.audit_capacity must be positive".into());
        }

        let mut ids = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err("policy rule with empty id".into());
            }
            if !ids.insert(rule.id.as_str()) {
                return Err(format!("policy rule {} defined twice", rule.id));
            }
            match &rule.condition {
                RuleCondition::MinReliability { threshold }
                | RuleCondition::MaxLoad { threshold }
                | RuleCondition::MinNetworkStability { threshold } => {
                    require_range(&format!("policy.{}.threshold", rule.id), *threshold, 0.0, 1.0)?
                }
                RuleCondition::MaxComputeCost { per_core_hour } => require_non_negative(
                    &format!("policy.{}.per_core_hour", rule.id),
                    *per_core_hour,
                )?,
                RuleCondition::DataJurisdiction { allowed } if allowed.is_empty() => {
                    return Err(format!("policy {} allows no jurisdiction", rule.id))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    pub detail: String,
}

/// Rule results for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub target_id: String,
    pub hard_violations: Vec<Violation>,
    pub soft_violations: Vec<Violation>,
    /// Sum of soft-violation severity weights
    pub soft_penalty: f64,
}

impl PolicyEvaluation {
    pub fn is_feasible(&self) -> bool {
        self.hard_violations.is_empty()
    }
}

/// Targets left after hard-rule filtering, plus every target's evaluation
pub struct PolicyFilter<'a> {
    pub feasible: Vec<&'a ExecutionTarget>,
    pub evaluations: Vec<PolicyEvaluation>,
}

impl PolicyFilter<'_> {
    pub fn evaluation(&self, target_id: &str) -> Option<&PolicyEvaluation> {
        self.evaluations.iter().find(|e| e.target_id == target_id)
    }
}

pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
    capacity_margin: f64,
    cost: CostParameters,
    audit: AuditLog,
}

impl PolicyEngine {
    pub fn new(config: &PolicyConfig, cost: CostParameters) -> Self {
        let mut engine = Self {
            rules: Vec::with_capacity(config.rules.len() + 1),
            capacity_margin: config.capacity_margin,
            cost,
            audit: AuditLog::new(config.audit_capacity),
        };
        engine.rules.push(PolicyRule::safety());
        for rule in &config.rules {
            engine.add_rule(rule.clone());
        }
        engine
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = self.audit.with_sink(sink);
        self
    }

    /// Install a rule. The built-in safety rule cannot be replaced.
    pub fn add_rule(&mut self, rule: PolicyRule) {
        if rule.id == SAFETY_RULE_ID {
            debug!(rule = %rule.id, "Ignoring redefinition of built-in rule");
            return;
        }
        self.rules.retain(|r| r.id != rule.id);
        self.rules.push(rule);
        self.rules
            .sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Evaluate with the process's own core request as the capacity need
    pub fn evaluate(&self, process: &Process, target: &ExecutionTarget) -> PolicyEvaluation {
        self.evaluate_for_need(process, target, process.cpu_cores)
    }

    pub fn evaluate_for_need(
        &self,
        process: &Process,
        target: &ExecutionTarget,
        capacity_need: f64,
    ) -> PolicyEvaluation {
        let estimate = self.cost.estimate(process, target, capacity_need);
        let ctx = RuleContext {
            process,
            target,
            capacity_need,
            capacity_margin: self.capacity_margin,
            estimate: &estimate,
        };

        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut evaluation = PolicyEvaluation {
            target_id: target.id.clone(),
            hard_violations: Vec::new(),
            soft_violations: Vec::new(),
            soft_penalty: 0.0,
        };

        for rule in &self.rules {
            let violation = rule.condition.check(&ctx);
            self.audit.push(AuditEntry {
                timestamp,
                rule_id: rule.id.clone(),
                rule_kind: rule.kind,
                severity: rule.severity,
                process_id: process.id.clone(),
                target_id: target.id.clone(),
                passed: violation.is_none(),
                detail: violation.clone(),
            });

            if let Some(detail) = violation {
                let v = Violation {
                    rule_id: rule.id.clone(),
                    severity: rule.severity,
                    detail,
                };
                match rule.kind {
                    RuleKind::Hard => evaluation.hard_violations.push(v),
                    RuleKind::Soft => {
                        evaluation.soft_penalty += rule.severity.weight();
                        evaluation.soft_violations.push(v);
                    }
                }
            }
        }
        evaluation
    }

    pub fn filter_targets<'a>(
        &self,
        process: &Process,
        targets: &'a [ExecutionTarget],
    ) -> PolicyFilter<'a> {
        self.filter_targets_for_need(process, targets, process.cpu_cores)
    }

    /// Drop every target with at least one hard violation
    pub fn filter_targets_for_need<'a>(
        &self,
        process: &Process,
        targets: &'a [ExecutionTarget],
        capacity_need: f64,
    ) -> PolicyFilter<'a> {
        let mut feasible = Vec::with_capacity(targets.len());
        let mut evaluations = Vec::with_capacity(targets.len());
        for target in targets {
            let evaluation = self.evaluate_for_need(process, target, capacity_need);
            if evaluation.is_feasible() {
                feasible.push(target);
            } else {
                debug!(
                    process = %process.id,
                    target = %target.id,
                    violations = evaluation.hard_violations.len(),
                    "Target removed by hard policy"
                );
            }
            evaluations.push(evaluation);
        }
        PolicyFilter {
            feasible,
            evaluations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{cost_parameters, process, target};
    use crate::models::LocationKind;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(&PolicyConfig::default(), cost_parameters())
    }

    #[test]
    fn test_safety_rule_always_first() {
        let config = PolicyConfig {
            rules: vec![PolicyRule::soft(
                SAFETY_RULE_ID,
                99,
                Severity::Low,
                "weakened",
                RuleCondition::MaxLoad { threshold: 1.0 },
            )],
            ..Default::default()
        };
        let engine = PolicyEngine::new(&config, cost_parameters());
        assert_eq!(engine.rules()[0].id, SAFETY_RULE_ID);
        assert_eq!(engine.rules()[0].kind, RuleKind::Hard);
        assert_eq!(engine.rules().len(), 1);
    }

    #[test]
    fn test_rules_sorted_by_priority() {
        let engine = engine();
        let priorities: Vec<u32> = engine.rules().iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_filter_removes_hard_violations_only() {
        let engine = engine();
        let mut p = process("p1");
        p.safety_critical = true;
        let targets = vec![
            target("local", LocationKind::Local),
            target("edge", LocationKind::Edge),
            target("cloud", LocationKind::PublicCloud),
        ];
        let filter = engine.filter_targets(&p, &targets);
        assert_eq!(filter.feasible.len(), 1);
        assert_eq!(filter.feasible[0].id, "local");
        assert_eq!(filter.evaluations.len(), 3);
        assert!(!filter.evaluation("edge").unwrap().is_feasible());
    }

    #[test]
    fn test_soft_penalty_accumulates() {
        let engine = engine();
        let p = process("p1");
        let mut t = target("busy", LocationKind::Edge);
        t.current_load = 0.95;
        t.reliability = 0.5;
        let evaluation = engine.evaluate(&p, &t);
        assert!(evaluation.is_feasible());
        assert_eq!(evaluation.soft_violations.len(), 2);
        assert!((evaluation.soft_penalty - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_every_rule_is_audited() {
        let engine = engine();
        let p = process("p1");
        let targets = vec![
            target("a", LocationKind::Edge),
            target("b", LocationKind::Hpc),
        ];
        engine.filter_targets(&p, &targets);
        let entries = engine.audit().drain();
        assert_eq!(entries.len(), engine.rules().len() * targets.len());
        assert!(entries.iter().all(|e| e.process_id == "p1"));
    }

    #[test]
    fn test_custom_rule_can_be_added() {
        let mut engine = engine();
        engine.add_rule(PolicyRule::hard(
            "no-hpc",
            5,
            "HPC reserved",
            RuleCondition::Custom(CustomPredicate::new(|ctx| {
                (ctx.target.kind() == LocationKind::Hpc).then(|| "reserved".to_string())
            })),
        ));
        let p = process("p1");
        let targets = vec![target("a", LocationKind::Edge), target("b", LocationKind::Hpc)];
        let filter = engine.filter_targets(&p, &targets);
        assert_eq!(filter.feasible.len(), 1);
        assert_eq!(engine.rules()[1].id, "no-hpc");
    }

    #[test]
    fn test_config_validation() {
        assert!(PolicyConfig::default().validate().is_ok());

        let mut config = PolicyConfig::default();
        config.rules.push(config.rules[0].clone());
        assert!(config.validate().is_err());

        let config = PolicyConfig {
            rules: vec![PolicyRule::soft(
                "bad",
                1,
                Severity::Low,
                "bad threshold",
                RuleCondition::MaxLoad { threshold: 1.5 },
            )],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
