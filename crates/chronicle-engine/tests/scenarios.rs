//! Seeded end-to-end scenarios over the full engine.
//!
//! Each test builds a trivial domain, runs the engine to completion, and
//! checks the behavior the engine guarantees: growth bounds, budget caps,
//! protected-edge preservation, pressure smoothing, and distribution
//! guidance.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chronicle_engine::distribution::DistributionTargets;
use chronicle_engine::engine::{EndReason, EngineSpec, WorldEngine};
use chronicle_engine::era::Era;
use chronicle_engine::stats::ValidationResults;
use chronicle_engine::template::Template;
use chronicle_engine::system::System;
use chronicle_graph::schema::RelationshipSpec;
use chronicle_types::{EntityKind, PressureId, RelationshipKind, SeedLink};
use chronicle_testkit::{
    BondSystem, FloodSystem, SpawnTemplate, config, constant_pressure, inert_schema,
    paired_schema, seeds, single_era,
};

#[tokio::test]
async fn zero_growth_world_only_decays() {
    let mut engine_config = config(0);
    engine_config.max_ticks = 10;
    engine_config.ticks_per_epoch = 5;

    let mut engine = WorldEngine::new(EngineSpec {
        config: engine_config,
        schema: inert_schema(),
        eras: single_era(),
        templates: Vec::new(),
        systems: Vec::new(),
        pressures: vec![constant_pressure("quietude", 40.0, 10.0, 0.0)],
        initial: seeds("stone", "plain", 3),
        hooks: None,
        names: None,
    })
    .expect("engine construction");

    let summary = engine.run().await;
    assert_eq!(summary.total_ticks, 10);
    assert_eq!(engine.graph().entity_count(), 3);
    assert_eq!(engine.graph().relationship_count(), 0);
    // Two epoch updates, each -10: 40 -> 20, decaying toward 0.
    assert_eq!(
        engine.graph().pressure(&PressureId::from("quietude")),
        Some(20.0)
    );
    engine.graph().check_invariants().expect("invariants");
}

#[tokio::test]
async fn budget_cap_limits_one_tick_to_the_budget() {
    let mut engine_config = config(0);
    engine_config.max_ticks = 1;
    engine_config.ticks_per_epoch = 1;
    engine_config.relationship_budget.max_per_simulation_tick = 50;

    let systems: Vec<Box<dyn System>> = vec![Box::new(FloodSystem::new(200))];
    let mut engine = WorldEngine::new(EngineSpec {
        config: engine_config,
        schema: paired_schema(),
        eras: single_era(),
        templates: Vec::new(),
        systems,
        pressures: Vec::new(),
        initial: seeds("alpha", "plain", 30),
        hooks: None,
        names: None,
    })
    .expect("engine construction");

    let summary = engine.run().await;
    assert_eq!(summary.total_ticks, 1);
    assert_eq!(summary.end_reason, EndReason::MaxTicks);
    assert_eq!(engine.graph().relationship_count(), 50);

    let stats = engine.export_statistics(ValidationResults::default());
    assert!(stats.performance.relationship_budget_hits >= 1);
    assert_eq!(stats.performance.relationships_dropped, 150);
    assert!(!engine.warnings().is_empty());
    engine.graph().check_invariants().expect("invariants");
}

#[tokio::test]
async fn protected_edges_survive_culling_with_violations_recorded() {
    let mut engine_config = config(0);
    engine_config.max_ticks = 40;
    engine_config.ticks_per_epoch = 5;
    engine_config.cull.interval = 10;
    engine_config.cull.threshold = 0.15;
    engine_config.cull.grace = 20;

    let schema = paired_schema().with_relationship(
        RelationshipSpec::new("sworn_to", &["alpha"], &["alpha"]).protected(),
    );
    let mut initial = seeds("alpha", "plain", 2);
    if let Some(first) = initial.first_mut() {
        first.links.push(SeedLink {
            kind: RelationshipKind::from("sworn_to"),
            target: "alpha 1".to_owned(),
            strength: Some(0.01),
        });
    }

    // Four eras stretch the era schedule past the tick ceiling.
    let eras: Vec<Era> = (0..4)
        .map(|i| Era::new(format!("age_{i}"), format!("Age {i}")))
        .collect();
    let mut engine = WorldEngine::new(EngineSpec {
        config: engine_config,
        schema,
        eras,
        templates: Vec::new(),
        systems: Vec::new(),
        pressures: Vec::new(),
        initial,
        hooks: None,
        names: None,
    })
    .expect("engine construction");

    engine.run().await;
    // The weak protected edge is still there.
    let sworn = RelationshipKind::from("sworn_to");
    assert!(
        engine
            .graph()
            .relationships()
            .iter()
            .any(|r| r.kind == sworn)
    );
    let stats = engine.export_statistics(ValidationResults::default());
    assert!(
        stats
            .performance
            .protected_relationship_violations
            .total_violations
            >= 1
    );
    engine.graph().check_invariants().expect("invariants");
}

#[tokio::test]
async fn pressure_smoothing_caps_the_first_epoch_at_fifteen() {
    let mut engine_config = config(0);
    engine_config.max_ticks = 1;
    engine_config.ticks_per_epoch = 1;

    let mut engine = WorldEngine::new(EngineSpec {
        config: engine_config,
        schema: inert_schema(),
        eras: single_era(),
        templates: Vec::new(),
        systems: Vec::new(),
        pressures: vec![constant_pressure("strife", 50.0, 0.0, 100.0)],
        initial: seeds("stone", "plain", 2),
        hooks: None,
        names: None,
    })
    .expect("engine construction");

    engine.run().await;
    assert_eq!(
        engine.graph().pressure(&PressureId::from("strife")),
        Some(65.0)
    );
}

#[tokio::test]
async fn distribution_targets_steer_growth_toward_the_deficit() {
    let mut engine_config = config(0);
    engine_config.max_ticks = 100;
    engine_config.ticks_per_epoch = 1;
    engine_config.epochs_per_era = 1;
    engine_config.target_entities_per_kind = 20;

    let mut targets = DistributionTargets::default();
    targets.entity_kinds.insert(EntityKind::from("alpha"), 0.3);
    targets.entity_kinds.insert(EntityKind::from("beta"), 0.7);
    engine_config.distribution_targets = Some(targets);

    // Three spawn templates per kind so the per-epoch draw order decides
    // which kind actually grows.
    let templates: Vec<Box<dyn Template>> = vec![
        Box::new(SpawnTemplate::new("spawn_alpha_1", "alpha", "plain")),
        Box::new(SpawnTemplate::new("spawn_alpha_2", "alpha", "plain")),
        Box::new(SpawnTemplate::new("spawn_alpha_3", "alpha", "plain")),
        Box::new(SpawnTemplate::new("spawn_beta_1", "beta", "plain")),
        Box::new(SpawnTemplate::new("spawn_beta_2", "beta", "plain")),
        Box::new(SpawnTemplate::new("spawn_beta_3", "beta", "plain")),
    ];
    let eras: Vec<Era> = (0..3)
        .map(|i| Era::new(format!("age_{i}"), format!("Age {i}")))
        .collect();

    // Alpha starts saturated (20 of 20), beta empty: the deficit boost
    // points every draw at beta for the whole run.
    let mut engine = WorldEngine::new(EngineSpec {
        config: engine_config,
        schema: paired_schema(),
        eras,
        templates,
        systems: Vec::new(),
        pressures: Vec::new(),
        initial: seeds("alpha", "plain", 20),
        hooks: None,
        names: None,
    })
    .expect("engine construction");

    engine.run().await;
    let counts = engine.graph().counts_by_kind();
    let alpha_created = counts
        .get(&EntityKind::from("alpha"))
        .copied()
        .unwrap_or(0)
        .saturating_sub(20);
    let beta_created = counts.get(&EntityKind::from("beta")).copied().unwrap_or(0);

    assert!(beta_created > 0, "beta never grew");
    // The under-represented kind outgrows the saturated one by well over
    // the 20% the guidance promises.
    assert!(
        beta_created * 5 >= alpha_created * 6,
        "beta {beta_created} vs alpha {alpha_created}"
    );
    engine.graph().check_invariants().expect("invariants");
}

#[tokio::test]
async fn bonding_system_respects_schema_and_invariants() {
    let mut engine_config = config(7);
    engine_config.max_ticks = 20;
    engine_config.ticks_per_epoch = 5;

    let systems: Vec<Box<dyn System>> = vec![Box::new(BondSystem::new())];
    let templates: Vec<Box<dyn Template>> = vec![
        Box::new(SpawnTemplate::new("spawn_alpha", "alpha", "plain")),
        Box::new(SpawnTemplate::new("spawn_beta", "beta", "plain")),
    ];
    let eras: Vec<Era> = (0..2)
        .map(|i| Era::new(format!("age_{i}"), format!("Age {i}")))
        .collect();
    let mut engine = WorldEngine::new(EngineSpec {
        config: engine_config,
        schema: paired_schema(),
        eras,
        templates,
        systems,
        pressures: vec![constant_pressure("vigor", 10.0, 1.0, 2.0)],
        initial: seeds("alpha", "plain", 4),
        hooks: None,
        names: None,
    })
    .expect("engine construction");

    let summary = engine.run().await;
    assert!(summary.total_ticks <= 20);
    assert!(engine.graph().relationship_count() > 0);
    engine.graph().check_invariants().expect("invariants");

    let stats = engine.export_statistics(ValidationResults::default());
    assert!(stats.performance.template_applications > 0);
    assert!(stats.performance.system_executions > 0);
    assert_eq!(stats.epochs.len() as u64, summary.total_epochs);
    // Fitness components are probabilities-like scores.
    assert!((0.0..=1.0).contains(&stats.fitness.overall_fitness));
    assert!((0.0..=1.0).contains(&stats.fitness.stability_score));
}
