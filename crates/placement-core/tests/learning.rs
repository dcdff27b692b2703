mod common;

use common::{attributed, engine_config, mixed_targets, request, state};
use placement_core::{EngineError, ObjectiveKind, Orchestrator, OutcomeDisposition};

#[test]
fn test_rewarded_objective_gains_weight_and_invariants_hold() {
    let engine = Orchestrator::new(engine_config(11)).unwrap();
    let initial = engine.weights();
    let bounds = engine.config().objectives.clone();

    for i in 0..200u32 {
        let decision = engine
            .decide(&request(
                &format!("p{}", i),
                mixed_targets(),
                state(f64::from(i % 50), 0.5),
            ))
            .unwrap();

        let outcome = if i % 2 == 0 {
            attributed(decision.id, ObjectiveKind::QueueDepth, 4.0)
        } else {
            attributed(decision.id, ObjectiveKind::NetworkCost, -4.0)
        };
        match engine.report_outcome(&outcome) {
            Ok(disposition) => assert_eq!(disposition, OutcomeDisposition::Applied),
            // A rejected step keeps the previous vector
            Err(EngineError::WeightInvariant(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }

        let weights = engine.weights();
        weights.check_invariants().unwrap();
        assert!((weights.sum() - 1.0).abs() <= 0.001);
        for objective in &bounds {
            let w = weights.weight(objective.metric).unwrap();
            assert!(w >= objective.min_weight - 1e-9 && w <= objective.max_weight + 1e-9);
        }
    }

    let learned = engine.weights();
    assert!(
        learned.weight(ObjectiveKind::QueueDepth).unwrap()
            > initial.weight(ObjectiveKind::QueueDepth).unwrap()
    );
    assert!(
        learned.weight(ObjectiveKind::NetworkCost).unwrap()
            < initial.weight(ObjectiveKind::NetworkCost).unwrap()
    );

    let stats = engine.stats();
    assert_eq!(stats.decisions, 200);
    assert_eq!(stats.outcomes_applied, 200);
    assert_eq!(stats.convergence.window, engine.config().learning.convergence_window);
}

#[test]
fn test_neutral_outcomes_converge() {
    let engine = Orchestrator::new(engine_config(3)).unwrap();
    let window = engine.config().learning.convergence_window;

    for i in 0..window * 2 {
        let decision = engine
            .decide(&request(&format!("p{}", i), mixed_targets(), state(5.0, 0.4)))
            .unwrap();
        engine
            .report_outcome(&attributed(decision.id, ObjectiveKind::Latency, 0.0))
            .unwrap();
    }

    let convergence = engine.stats().convergence;
    assert_eq!(convergence.samples, window);
    assert!(convergence.converged);
}

#[test]
fn test_duplicate_outcome_changes_nothing() {
    let engine = Orchestrator::new(engine_config(5)).unwrap();
    let decision = engine
        .decide(&request("p1", mixed_targets(), state(5.0, 0.4)))
        .unwrap();
    let outcome = attributed(decision.id, ObjectiveKind::QueueDepth, 2.0);

    engine.report_outcome(&outcome).unwrap();
    let weights = engine.weights();
    let stats = engine.stats();

    assert_eq!(
        engine.report_outcome(&outcome).unwrap(),
        OutcomeDisposition::Duplicate
    );
    assert_eq!(engine.weights(), weights);
    assert_eq!(engine.stats().outcomes_applied, stats.outcomes_applied);
    assert_eq!(engine.stats().duplicates_rejected, 1);
}
