//! Orchestrator
//!
//! Owns the weight vector, toolkit state, decision history and pattern set.
//! Every mutation goes through one mutex held for a single state
//! transition: a decision, an outcome, or a pattern merge. Pattern search
//! itself runs on a snapshot outside the lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::decision::{
    CooldownTracker, DecisionEngine, ScaleDecision, ScoringInput, UnitPool,
};
use crate::error::{EngineError, EngineResult};
use crate::learner::{
    discover, AdaptiveLearner, ConvergenceIndicator, DiscoveredPattern, HistoryRecord,
    OutcomeDisposition, PatternMerge, PatternState, WeightUpdate,
};
use crate::models::{
    Decision, DecisionId, ExecutionTarget, ObjectiveKind, Outcome, Process, SystemState,
};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::policy::{AuditEntry, AuditSink, PolicyEngine, PolicyEvaluation, PolicyRule};
use crate::toolkit::{PredictorToolkit, RlAction, RlState, Strategy, ToolkitOutputs};
use crate::weights::WeightVector;

/// One placement request
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub process: Process,
    pub targets: Vec<ExecutionTarget>,
    pub state: SystemState,
    /// Past this instant the toolkit answers from its cache
    pub deadline: Option<Instant>,
}

/// Snapshot for the monitoring collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub decisions: u64,
    pub infeasible: u64,
    pub outcomes_applied: u64,
    pub duplicates_rejected: u64,
    pub weight_updates_rejected: u64,
    pub success_rate: f64,
    pub weights: BTreeMap<ObjectiveKind, f64>,
    pub convergence: ConvergenceIndicator,
    pub active_patterns: usize,
    pub validated_patterns: usize,
    pub strategy_posteriors: BTreeMap<Strategy, f64>,
    pub anomalies: u64,
    pub forecast_ready: bool,
    pub audit_entries: usize,
}

struct EngineState {
    weights: WeightVector,
    toolkit: PredictorToolkit,
    learner: AdaptiveLearner,
    cooldowns: CooldownTracker,
    next_id: u64,
    decisions: u64,
    infeasible: u64,
}

pub struct Orchestrator {
    config: EngineConfig,
    engine: DecisionEngine,
    policy: PolicyEngine,
    state: Mutex<EngineState>,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::build(config, None)
    }

    /// Build with an external receiver for policy audit entries
    pub fn with_audit_sink(config: EngineConfig, sink: Arc<dyn AuditSink>) -> EngineResult<Self> {
        Self::build(config, Some(sink))
    }

    fn build(config: EngineConfig, sink: Option<Arc<dyn AuditSink>>) -> EngineResult<Self> {
        config.validate()?;
        let weights = WeightVector::from_objectives(&config.objectives)?;

        let mut policy = PolicyEngine::new(&config.policy, config.cost.clone());
        if let Some(sink) = sink {
            policy = policy.with_audit_sink(sink);
        }

        let state = EngineState {
            toolkit: PredictorToolkit::new(&config.toolkit, config.seed),
            learner: AdaptiveLearner::new(&config.learning, &config.patterns),
            cooldowns: CooldownTracker::new(),
            weights,
            next_id: 1,
            decisions: 0,
            infeasible: 0,
        };

        let metrics = EngineMetrics::new();
        metrics.set_weights(&state.weights);

        Ok(Self {
            engine: DecisionEngine::new(config.scoring.clone(), config.cost.clone()),
            policy,
            state: Mutex::new(state),
            metrics,
            logger: StructuredLogger::new("placement-engine"),
            config,
        })
    }

    /// Tag structured events with the hosting node's name
    pub fn with_node_name(mut self, node_name: &str) -> Self {
        self.logger = StructuredLogger::new(node_name);
        self
    }

    /// Install an extra policy rule; only valid before the engine is shared
    pub fn add_rule(&mut self, rule: PolicyRule) {
        self.policy.add_rule(rule);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Choose a target for one process.
    ///
    /// Invalid targets are dropped with a logged reason; an invalid process
    /// or state fails the call. When no target survives the hard rules the
    /// explanatory decision is returned inside `NoFeasibleTarget`.
    pub fn decide(&self, request: &DecisionRequest) -> EngineResult<Decision> {
        let started = Instant::now();
        let DecisionRequest {
            process,
            targets,
            state: system,
            deadline,
        } = request;
        process.validate()?;
        system.validate()?;

        let valid: Vec<ExecutionTarget> = targets
            .iter()
            .filter(|t| match t.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(process = %process.id, target = %t.id, reason = %e, "Dropping malformed target");
                    false
                }
            })
            .cloned()
            .collect();

        let mut guard = self.lock();
        let st = &mut *guard;

        let outputs = st.toolkit.observe(system.compute_usage, *deadline);
        if outputs.anomaly && !outputs.from_cache {
            self.metrics.inc_anomalies();
            self.logger.log_anomaly(outputs.current, outputs.cumulative);
        }
        let strategy = st.toolkit.select_strategy();
        let rl_state = RlState::observe(process, system);
        let recommended = st.toolkit.recommend_action(&rl_state);
        let pattern = st
            .learner
            .matching_pattern(system)
            .map(|p| (p.id, p.action));

        let id = DecisionId(st.next_id);
        st.next_id += 1;
        st.decisions += 1;

        let need = self.engine.capacity_need(process, &outputs);
        let filter = self.policy.filter_targets_for_need(process, &valid, need);
        let effective = self.engine.effective_weights(&st.weights, strategy);
        let ranking = self.engine.rank(
            &ScoringInput {
                process,
                targets: &filter.feasible,
                state: system,
                weights: &effective,
                capacity_need: need,
                policy: &filter.evaluations,
                preferred_kind: pattern.map(|(_, kind)| kind),
                recommended_action: Some(recommended),
            },
            outputs.forecast.is_some(),
        );

        let timestamp = chrono::Utc::now().timestamp_millis();
        let Some(best) = ranking.best() else {
            st.infeasible += 1;
            let decision = Decision {
                id,
                process_id: process.id.clone(),
                selected_target: None,
                selected_kind: None,
                scores: Vec::new(),
                applied_pattern: None,
                explanation: explain_infeasible(targets.len(), valid.len(), &filter.evaluations),
                policy: filter.evaluations,
                strategy,
                recommended_action: recommended,
                capacity_need: need,
                toolkit: outputs,
                confidence: 0.0,
                timestamp,
            };
            drop(guard);
            self.metrics.inc_decisions();
            self.metrics.inc_infeasible();
            self.logger.log_no_feasible_target(&decision);
            return Err(EngineError::NoFeasibleTarget(Box::new(decision)));
        };

        let kind = best.kind;
        let target_id = best.target_id.clone();
        let applied_pattern = pattern
            .filter(|(_, preferred)| *preferred == kind)
            .map(|(pid, _)| pid);

        let explanation = explain_selection(
            best.final_score,
            ranking.scores.len(),
            targets.len(),
            strategy,
            ranking.confidence,
            applied_pattern.map(|p| p.to_string()),
            &outputs,
        );

        if let Some(selected) = valid.iter().find(|t| t.id == target_id) {
            let estimate = self.engine.cost_parameters().estimate(process, selected, need);
            st.learner.record_decision(HistoryRecord {
                decision_id: id,
                process_id: process.id.clone(),
                timestamp,
                state: system.clone(),
                rl_state,
                target_id: target_id.clone(),
                kind,
                action: RlAction::for_kind(kind),
                strategy,
                applied_pattern,
                selected_score: best.final_score,
                contributions: best
                    .objectives
                    .iter()
                    .map(|o| (o.objective, o.contribution.abs()))
                    .collect(),
                predicted_compute_cost: estimate.compute_cost,
                deadline_ms: process.deadline_ms,
                outcome: None,
            });
        }

        let decision = Decision {
            id,
            process_id: process.id.clone(),
            selected_target: Some(target_id),
            selected_kind: Some(kind),
            confidence: ranking.confidence,
            scores: ranking.scores,
            applied_pattern,
            policy: filter.evaluations,
            strategy,
            recommended_action: recommended,
            capacity_need: need,
            toolkit: outputs,
            explanation,
            timestamp,
        };
        drop(guard);

        let elapsed = started.elapsed();
        self.metrics.inc_decisions();
        self.metrics.observe_decision_latency(elapsed.as_secs_f64());
        self.logger.log_decision(&decision, elapsed.as_micros());
        Ok(decision)
    }

    /// Fold one outcome into the learner.
    ///
    /// A weight step that would break the vector invariants is surfaced as
    /// `WeightInvariant`; the outcome still counts as applied and the
    /// previous weights are kept.
    pub fn report_outcome(&self, outcome: &Outcome) -> EngineResult<OutcomeDisposition> {
        let decision_id = outcome.decision_id.to_string();
        let (report, weights, convergence, active) = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let report = st
                .learner
                .apply_outcome(outcome, &mut st.weights, &mut st.toolkit)?;
            (
                report,
                st.weights.clone(),
                st.learner.convergence(),
                st.learner.patterns().active_count(),
            )
        };

        if report.disposition == OutcomeDisposition::Duplicate {
            self.metrics.inc_duplicate_outcomes();
            self.logger.log_outcome_duplicate(&decision_id);
            return Ok(OutcomeDisposition::Duplicate);
        }
        self.metrics.inc_outcomes_applied();

        if let Some(pattern) = report.deprecated_pattern {
            self.logger
                .log_pattern_deprecated(pattern, "live success rate below threshold");
            self.metrics.set_active_patterns(active);
        }

        let mut rejected = None;
        match &report.weights {
            Some(WeightUpdate::Applied { change }) => {
                self.logger
                    .log_outcome_applied(&decision_id, outcome.reward, Some(*change));
                self.logger.log_weights_updated(&weights, &convergence);
                self.metrics.set_weights(&weights);
                self.metrics.set_convergence(&convergence);
            }
            Some(WeightUpdate::Rejected { reason }) => {
                self.logger.log_outcome_applied(&decision_id, outcome.reward, None);
                self.logger.log_weight_update_rejected(&decision_id, reason);
                self.metrics.inc_weight_updates_rejected();
                rejected = Some(reason.clone());
            }
            None => {}
        }

        if report.discovery_due {
            self.adapt();
        }

        match rejected {
            Some(reason) => Err(EngineError::WeightInvariant(reason)),
            None => Ok(OutcomeDisposition::Applied),
        }
    }

    /// Pattern discovery pass
    pub fn adapt(&self) -> PatternMerge {
        let (snapshot, pattern_config, success_reward) = {
            let mut st = self.lock();
            let snapshot = st.learner.discovery_snapshot();
            (
                snapshot,
                st.learner.patterns().config().clone(),
                st.learner.config().success_reward,
            )
        };

        let candidates = discover(&snapshot, &pattern_config, success_reward);
        let now = chrono::Utc::now().timestamp_millis();

        let (merge, promoted, active) = {
            let mut st = self.lock();
            let merge = st.learner.merge_patterns(candidates, now);
            let promoted: Vec<DiscoveredPattern> = merge
                .promoted
                .iter()
                .filter_map(|id| st.learner.patterns().get(*id).cloned())
                .collect();
            (merge, promoted, st.learner.patterns().active_count())
        };

        for pattern in &promoted {
            self.logger.log_pattern_promoted(pattern);
        }
        for id in &merge.deprecated {
            self.logger
                .log_pattern_deprecated(*id, "below validation threshold or over capacity");
        }
        self.metrics.set_active_patterns(active);
        debug!(
            records = snapshot.len(),
            promoted = merge.promoted.len(),
            deprecated = merge.deprecated.len(),
            pruned = merge.pruned,
            "Pattern discovery finished"
        );
        merge
    }

    /// Unit counts for each pool from the latest demand outlook
    pub fn plan_scaling(
        &self,
        pools: &[UnitPool],
        system: &SystemState,
    ) -> EngineResult<Vec<ScaleDecision>> {
        system.validate()?;
        let mut guard = self.lock();
        let st = &mut *guard;
        let cached = st.toolkit.last_outputs().cloned();
        let outputs: ToolkitOutputs = match cached {
            Some(last) => last,
            None => st.toolkit.observe(system.compute_usage, None),
        };
        let effective = self.engine.effective_weights(&st.weights, Strategy::Balanced);
        Ok(self.engine.decide_scaling(
            &self.config.scaling,
            pools,
            &outputs,
            system,
            &effective,
            &mut st.cooldowns,
            Instant::now(),
        ))
    }

    pub fn stats(&self) -> EngineStats {
        let st = self.lock();
        let patterns = st.learner.patterns();
        EngineStats {
            decisions: st.decisions,
            infeasible: st.infeasible,
            outcomes_applied: st.learner.applied(),
            duplicates_rejected: st.learner.duplicates(),
            weight_updates_rejected: st.learner.rejected_updates(),
            success_rate: st.learner.success_rate(),
            weights: st.weights.as_map(),
            convergence: st.learner.convergence(),
            active_patterns: patterns.active_count(),
            validated_patterns: patterns
                .all()
                .iter()
                .filter(|p| p.state == PatternState::Validated)
                .count(),
            strategy_posteriors: st.toolkit.bandit().posterior_means(),
            anomalies: st.toolkit.anomalies(),
            forecast_ready: st.toolkit.forecaster_ready(),
            audit_entries: self.policy.audit().len(),
        }
    }

    pub fn weights(&self) -> WeightVector {
        self.lock().weights.clone()
    }

    pub fn patterns(&self) -> Vec<DiscoveredPattern> {
        self.lock().learner.patterns().all().to_vec()
    }

    /// Remove up to `limit` of the oldest policy audit entries
    pub fn drain_audit(&self, limit: usize) -> Vec<AuditEntry> {
        self.policy.audit().drain_batch(limit)
    }

    /// Start the ordered outcome worker.
    ///
    /// One task consumes the channel, so outcomes are applied in the order
    /// they were sent.
    pub fn spawn_outcome_worker(self: Arc<Self>, capacity: usize) -> mpsc::Sender<Outcome> {
        let (tx, mut rx) = mpsc::channel::<Outcome>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(outcome) = rx.recv().await {
                if let Err(e) = self.report_outcome(&outcome) {
                    warn!(decision = %outcome.decision_id, error = %e, "Outcome not applied cleanly");
                }
            }
            debug!("Outcome channel closed");
        });
        tx
    }

    /// Run pattern discovery on a timer until shutdown
    pub async fn run_adaptation_loop(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(interval_secs = period.as_secs(), "Starting adaptation loop");

        let mut ticker = interval(period);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.adapt();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down adaptation loop");
                    break;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn explain_selection(
    score: f64,
    feasible: usize,
    candidates: usize,
    strategy: Strategy,
    confidence: f64,
    pattern: Option<String>,
    outputs: &ToolkitOutputs,
) -> String {
    let mut text = format!(
        "score {:.3}, best of {} feasible among {} candidates; strategy {}, confidence {:.2}",
        score, feasible, candidates, strategy, confidence
    );
    if let Some(pattern) = pattern {
        text.push_str(&format!("; followed pattern {}", pattern));
    }
    if outputs.forecast.is_none() {
        text.push_str("; no forecast, base capacity estimate");
    }
    if outputs.from_cache {
        text.push_str("; deadline passed, cached toolkit outputs");
    }
    if outputs.anomaly {
        text.push_str("; demand anomaly, capacity need inflated");
    }
    text
}

fn explain_infeasible(
    candidates: usize,
    valid: usize,
    evaluations: &[PolicyEvaluation],
) -> String {
    let mut text = format!(
        "no feasible target: {} candidates, {} well-formed",
        candidates, valid
    );
    for evaluation in evaluations {
        let rules: Vec<&str> = evaluation
            .hard_violations
            .iter()
            .map(|v| v.rule_id.as_str())
            .collect();
        text.push_str(&format!("; {} [{}]", evaluation.target_id, rules.join(", ")));
    }
    text
}
