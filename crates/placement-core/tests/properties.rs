mod common;

use common::{attributed, engine_config, process, state, target, OBJECTIVES};
use placement_core::{
    DecisionRequest, EngineError, ExecutionTarget, LocationKind, Orchestrator,
};
use proptest::prelude::*;

fn arb_kind() -> impl Strategy<Value = LocationKind> {
    prop::sample::select(LocationKind::ALL.to_vec())
}

fn arb_target(index: usize) -> impl Strategy<Value = ExecutionTarget> {
    (arb_kind(), 0.0..1.0f64, 0.5..1.0f64, 0.0..0.3f64).prop_map(
        move |(kind, load, reliability, spare)| {
            let mut t = target(&format!("t{:02}", index), kind);
            t.current_load = load;
            t.reliability = reliability;
            t.available_capacity = (t.total_capacity * spare).max(0.0);
            t
        },
    )
}

fn arb_targets() -> impl Strategy<Value = Vec<ExecutionTarget>> {
    (1usize..8).prop_flat_map(|n| (0..n).map(arb_target).collect::<Vec<_>>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn weights_stay_valid_under_any_feedback(
        feedback in prop::collection::vec((0usize..OBJECTIVES.len(), -5.0..5.0f64), 1..60),
    ) {
        let engine = Orchestrator::new(engine_config(17)).unwrap();
        let config = engine.config().clone();
        for (i, (objective, reward)) in feedback.into_iter().enumerate() {
            let decision = engine
                .decide(&DecisionRequest {
                    process: process(&format!("p{}", i)),
                    targets: vec![target("edge-1", LocationKind::Edge)],
                    state: state(10.0, 0.5),
                    deadline: None,
                })
                .unwrap();
            let outcome = attributed(decision.id, OBJECTIVES[objective], reward);
            match engine.report_outcome(&outcome) {
                Ok(_) | Err(EngineError::WeightInvariant(_)) => {}
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }

            let weights = engine.weights();
            prop_assert!((weights.sum() - 1.0).abs() <= 0.001);
            for bounds in &config.objectives {
                let w = weights.weight(bounds.metric).unwrap();
                prop_assert!(w >= bounds.min_weight - 1e-9);
                prop_assert!(w <= bounds.max_weight + 1e-9);
            }
        }
    }

    #[test]
    fn safety_critical_processes_run_locally(
        targets in arb_targets(),
        queue_depth in 0.0..100.0f64,
        usage in 0.0..1.0f64,
    ) {
        let engine = Orchestrator::new(engine_config(5)).unwrap();
        let mut p = process("critical");
        p.safety_critical = true;
        let request = DecisionRequest {
            process: p,
            targets,
            state: state(queue_depth, usage),
            deadline: None,
        };
        match engine.decide(&request) {
            Ok(decision) => prop_assert_eq!(decision.selected_kind, Some(LocationKind::Local)),
            Err(EngineError::NoFeasibleTarget(decision)) => {
                prop_assert!(decision.selected_target.is_none());
            }
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }

    #[test]
    fn selected_target_has_no_hard_violation(
        targets in arb_targets(),
        cores in 0.5..16.0f64,
        queue_depth in 0.0..100.0f64,
        usage in 0.0..1.0f64,
    ) {
        let engine = Orchestrator::new(engine_config(8)).unwrap();
        let mut p = process("p1");
        p.cpu_cores = cores;
        let request = DecisionRequest {
            process: p,
            targets,
            state: state(queue_depth, usage),
            deadline: None,
        };
        match engine.decide(&request) {
            Ok(decision) => {
                let selected = decision.selected_target.clone().unwrap();
                let evaluation = decision
                    .policy
                    .iter()
                    .find(|e| e.target_id == selected)
                    .unwrap();
                prop_assert!(evaluation.hard_violations.is_empty());
                prop_assert!(decision.confidence > 0.0 && decision.confidence <= 1.0);
            }
            Err(EngineError::NoFeasibleTarget(decision)) => {
                prop_assert!(decision.policy.iter().all(|e| !e.is_feasible()));
            }
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }
}
