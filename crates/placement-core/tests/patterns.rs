mod common;

use common::{engine_config, outcome, request, state, target};
use placement_core::learner::PatternState;
use placement_core::{LocationKind, Orchestrator, StateField};

fn edge_only() -> Vec<placement_core::ExecutionTarget> {
    vec![target("edge-1", LocationKind::Edge)]
}

#[test]
fn test_pressure_pattern_is_discovered_and_validated() {
    let mut config = engine_config(21);
    config.learning.success_reward = 1.5;
    let engine = Orchestrator::new(config).unwrap();

    // Contrast: edge placements that did not pay off outside the pressure regime
    let contrast = [(10.0, 0.9), (40.0, 0.3), (5.0, 0.2)];
    for (i, &(qd, cu)) in contrast.iter().cycle().take(6).enumerate() {
        let decision = engine
            .decide(&request(&format!("c{}", i), edge_only(), state(qd, cu)))
            .unwrap();
        let _ = engine.report_outcome(&outcome(&decision, false, 0.5));
    }

    for i in 0..24 {
        let qd = 31.0 + f64::from(i);
        let cu = 0.81 + f64::from(i % 5) * 0.03;
        let decision = engine
            .decide(&request(&format!("p{}", i), edge_only(), state(qd, cu)))
            .unwrap();
        let _ = engine.report_outcome(&outcome(&decision, true, 2.0));
    }

    engine.adapt();

    let patterns = engine.patterns();
    let found = patterns
        .iter()
        .find(|p| {
            p.state == PatternState::Validated
                && p.action == LocationKind::Edge
                && p.conditions.iter().any(|c| c.field == StateField::QueueDepth)
                && p.conditions.iter().any(|c| c.field == StateField::ComputeUsage)
        })
        .expect("pressure pattern validated");
    assert!(found.success_rate > 0.8);
    assert!(found.sample_count >= 10);
    assert!(found.matches(&state(40.0, 0.85)));
    assert!(!found.matches(&state(5.0, 0.2)));

    let stats = engine.stats();
    assert!(stats.validated_patterns >= 1);
    assert!(stats.active_patterns >= stats.validated_patterns);
}

#[test]
fn test_validated_pattern_is_applied_to_matching_decisions() {
    let engine = Orchestrator::new(engine_config(22)).unwrap();
    for i in 0..6 {
        let (qd, cu) = if i % 2 == 0 { (5.0, 0.2) } else { (40.0, 0.3) };
        let d = engine
            .decide(&request(&format!("c{}", i), edge_only(), state(qd, cu)))
            .unwrap();
        let _ = engine.report_outcome(&outcome(&d, false, -1.0));
    }
    for i in 0..15 {
        let d = engine
            .decide(&request(
                &format!("p{}", i),
                edge_only(),
                state(35.0 + f64::from(i), 0.9),
            ))
            .unwrap();
        let _ = engine.report_outcome(&outcome(&d, true, 2.0));
    }
    engine.adapt();

    let decision = engine
        .decide(&request(
            "next",
            vec![
                target("edge-1", LocationKind::Edge),
                target("cloud-1", LocationKind::PublicCloud),
            ],
            state(42.0, 0.9),
        ))
        .unwrap();
    if decision.selected_kind == Some(LocationKind::Edge) {
        assert!(decision.applied_pattern.is_some());
        assert!(decision.explanation.contains("pattern"));
    }
    let edge = decision
        .scores
        .iter()
        .find(|s| s.target_id == "edge-1")
        .unwrap();
    assert!(edge.bias > 0.0);
}
