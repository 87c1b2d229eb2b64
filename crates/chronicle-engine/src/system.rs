//! System runtime: per-tick rules and the executor that applies them.
//!
//! A system reads the graph and returns a recorded write-buffer (the
//! [`SystemOutcome`]): relationships to insert, entity patches, pressure
//! deltas, and any discovery events. The executor applies outcomes in
//! declaration order, enforces the per-tick relationship budget, tracks
//! per-system insertion totals for the aggressive-system warning, and
//! emits one simulation history event when anything changed.
//!
//! Systems never hold references into the graph across ticks; a system's
//! entire view of the world is the `&Graph` it receives for one call.

use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chronicle_graph::store::Graph;
use chronicle_types::ids::SystemId;
use chronicle_types::{
    EntityId, EntityPatch, HistoryEventKind, PressureId, RelationshipFields, RelationshipKind,
};

use crate::pressure;

/// Hard ceiling on any branch probability a system helper will return.
pub const MAX_BRANCH_PROBABILITY: f64 = 0.95;

/// Total insertions beyond which a system is considered aggressive.
const AGGRESSION_THRESHOLD: u64 = 500;

/// Minimum ticks between aggressive-system warnings for one system.
const AGGRESSION_WARNING_SPACING: u64 = 20;

/// Errors raised by system execution.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// The system failed; it is skipped for this tick.
    #[error("system failed: {reason}")]
    Failed {
        /// What went wrong, for the log.
        reason: String,
    },
}

/// Value-typed description of a system's footprint, used by the
/// distribution-guided selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    /// The system's identifier.
    pub id: SystemId,
    /// Display name for logs.
    pub name: String,
    /// Relationship kinds this system chiefly produces.
    pub produces_relationship_kinds: Vec<RelationshipKind>,
    /// Whether the system tends to diversify relationship kinds.
    #[serde(default)]
    pub diversity_positive: bool,
    /// How strongly the diversity boost applies to this system.
    #[serde(default = "default_diversity_strength")]
    pub diversity_strength: f64,
    /// Whether the system tends to form clusters.
    #[serde(default)]
    pub forms_clusters: bool,
    /// Whether the system tends to connect isolated entities.
    #[serde(default)]
    pub raises_density: bool,
}

const fn default_diversity_strength() -> f64 {
    1.0
}

impl SystemMetadata {
    /// Metadata from the system's ID and produced relationship kinds.
    pub fn new(id: impl Into<SystemId>, name: impl Into<String>, produces: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            produces_relationship_kinds: produces
                .iter()
                .map(|k| RelationshipKind::from(*k))
                .collect(),
            diversity_positive: false,
            diversity_strength: default_diversity_strength(),
            forms_clusters: false,
            raises_density: false,
        }
    }

    /// Flag the system as diversity-positive.
    #[must_use]
    pub const fn diversity_positive(mut self, strength: f64) -> Self {
        self.diversity_positive = true;
        self.diversity_strength = strength;
        self
    }

    /// Flag the system as cluster-forming.
    #[must_use]
    pub const fn forms_clusters(mut self) -> Self {
        self.forms_clusters = true;
        self
    }

    /// Flag the system as density-raising.
    #[must_use]
    pub const fn raises_density(mut self) -> Self {
        self.raises_density = true;
        self
    }
}

/// A relationship proposed by a system, applied by the executor subject to
/// the tick budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedRelationship {
    /// Relationship kind.
    pub kind: RelationshipKind,
    /// Edge source.
    pub src: EntityId,
    /// Edge destination.
    pub dst: EntityId,
    /// Optional fields (strength, distance, catalyst, status).
    #[serde(default)]
    pub fields: RelationshipFields,
}

impl ProposedRelationship {
    /// Propose an edge with default fields.
    pub fn new(kind: impl Into<RelationshipKind>, src: EntityId, dst: EntityId) -> Self {
        Self {
            kind: kind.into(),
            src,
            dst,
            fields: RelationshipFields::default(),
        }
    }

    /// Set the strength, builder-style.
    #[must_use]
    pub const fn with_strength(mut self, strength: f64) -> Self {
        self.fields.strength = Some(strength);
        self
    }
}

/// A location discovery surfaced by a system, forwarded to the discovery
/// enrichment hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    /// The discovered location.
    pub location: EntityId,
    /// The discovering entity, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer: Option<EntityId>,
    /// Domain label for the discovery ("cavern", "ruin", ...).
    pub discovery_type: String,
    /// What prompted the discovery, for the narrative hook.
    pub trigger_context: String,
    /// Theme of a further location this discovery reveals, when the domain
    /// chains discoveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_theme: Option<String>,
}

/// The recorded write-buffer a system returns from one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemOutcome {
    /// Relationships to insert, in order.
    pub relationships: Vec<ProposedRelationship>,
    /// Entity patches to apply immediately.
    pub modifications: Vec<(EntityId, EntityPatch)>,
    /// Pressure deltas to apply after the tick.
    pub pressure_deltas: BTreeMap<PressureId, f64>,
    /// Discoveries to forward to the enrichment hooks.
    pub discoveries: Vec<DiscoveryEvent>,
    /// Human-readable summary of what the system did.
    pub description: String,
}

impl SystemOutcome {
    /// An outcome that changes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the outcome proposes no changes at all.
    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
            && self.modifications.is_empty()
            && self.pressure_deltas.is_empty()
            && self.discoveries.is_empty()
    }
}

/// A per-tick simulation rule.
pub trait System: Send + Sync {
    /// Metadata consumed by the distribution-guided selector.
    fn metadata(&self) -> &SystemMetadata;

    /// Produce this tick's write-buffer.
    ///
    /// `modifier` is the era modifier multiplied by the distribution
    /// adjustment; systems scale their activity (typically their branch
    /// probabilities) by it.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the system cannot run; the engine logs
    /// and skips it for the tick.
    fn apply(
        &self,
        graph: &Graph,
        modifier: f64,
        rng: &mut dyn RngCore,
    ) -> Result<SystemOutcome, SystemError>;
}

/// Cap a branch probability at [`MAX_BRANCH_PROBABILITY`], flooring at 0.
pub fn cap_probability(p: f64) -> f64 {
    p.clamp(0.0, MAX_BRANCH_PROBABILITY)
}

/// What one simulation tick did, for statistics and history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Relationships inserted across all systems this tick.
    pub relationships_inserted: u32,
    /// Relationships dropped by the budget this tick.
    pub relationships_dropped: u32,
    /// Entities modified this tick, in application order.
    pub entities_modified: Vec<EntityId>,
    /// Whether the budget was hit this tick.
    pub budget_hit: bool,
    /// Systems that ran.
    pub executions: u32,
    /// Systems that failed and were skipped.
    pub failures: u32,
    /// Aggressive-system warnings raised this tick.
    pub aggression_warnings: u32,
    /// Discoveries surfaced this tick.
    pub discoveries: Vec<DiscoveryEvent>,
    /// Raw warning messages for the engine's warning log.
    pub warnings: Vec<String>,
}

/// Runs every system once per tick and applies their outcomes.
///
/// Owned by the engine for the length of a run so per-system insertion
/// totals survive across ticks.
#[derive(Debug)]
pub struct SystemExecutor {
    /// Relationship budget per simulation tick.
    budget: u32,
    /// Cumulative relationship insertions per system.
    totals: BTreeMap<SystemId, u64>,
    /// Tick of the last aggressive-system warning per system.
    last_warned: BTreeMap<SystemId, u64>,
}

impl SystemExecutor {
    /// An executor with the given per-tick relationship budget.
    pub const fn new(budget: u32) -> Self {
        Self {
            budget,
            totals: BTreeMap::new(),
            last_warned: BTreeMap::new(),
        }
    }

    /// Cumulative insertions for a system.
    pub fn total_for(&self, system: &SystemId) -> u64 {
        self.totals.get(system).copied().unwrap_or(0)
    }

    /// Execute one simulation tick.
    ///
    /// `modifiers` aligns with `systems`; a modifier of 0 skips the system.
    /// Outcomes apply in declaration order: relationship insertions up to
    /// the budget, entity patches immediately, pressure deltas (clamped)
    /// after the last system. Emits a simulation history event when
    /// anything changed.
    pub fn run_tick(
        &mut self,
        graph: &mut Graph,
        systems: &[Box<dyn System>],
        modifiers: &[f64],
        rng: &mut dyn RngCore,
    ) -> TickReport {
        let tick = graph.tick();
        let mut report = TickReport::default();
        let mut pending_pressures: BTreeMap<PressureId, f64> = BTreeMap::new();
        let mut descriptions: Vec<String> = Vec::new();

        for (index, system) in systems.iter().enumerate() {
            let modifier = modifiers.get(index).copied().unwrap_or(1.0);
            if modifier <= 0.0 {
                continue;
            }
            let id = system.metadata().id.clone();
            report.executions = report.executions.saturating_add(1);

            let outcome = match system.apply(graph, modifier, rng) {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(system = %id, %error, "system failed; skipping for this tick");
                    report.failures = report.failures.saturating_add(1);
                    continue;
                }
            };
            if outcome.is_empty() {
                continue;
            }

            let mut inserted_by_system: u64 = 0;
            for proposal in outcome.relationships {
                if report.relationships_inserted >= self.budget {
                    report.relationships_dropped = report.relationships_dropped.saturating_add(1);
                    if !report.budget_hit {
                        report.budget_hit = true;
                        report.warnings.push(format!(
                            "relationship budget of {} reached; dropping further edges",
                            self.budget
                        ));
                    }
                    continue;
                }
                if graph.add_relationship(
                    &proposal.kind,
                    &proposal.src,
                    &proposal.dst,
                    proposal.fields,
                ) {
                    report.relationships_inserted =
                        report.relationships_inserted.saturating_add(1);
                    inserted_by_system = inserted_by_system.saturating_add(1);
                }
            }

            for (entity_id, patch) in outcome.modifications {
                match graph.update_entity(&entity_id, patch) {
                    Ok(()) => report.entities_modified.push(entity_id),
                    Err(error) => {
                        debug!(system = %id, %error, "entity patch rejected");
                    }
                }
            }

            for (pressure_id, delta) in outcome.pressure_deltas {
                let slot = pending_pressures.entry(pressure_id).or_insert(0.0);
                *slot += delta;
            }

            report.discoveries.extend(outcome.discoveries);
            if !outcome.description.is_empty() {
                descriptions.push(outcome.description);
            }

            // Aggression accounting.
            let total = self
                .totals
                .entry(id.clone())
                .or_insert(0);
            *total = total.saturating_add(inserted_by_system);
            if *total > AGGRESSION_THRESHOLD {
                let last = self.last_warned.get(&id).copied();
                let spaced = last.is_none_or(|t| {
                    tick.saturating_sub(t) >= AGGRESSION_WARNING_SPACING
                });
                if spaced {
                    self.last_warned.insert(id.clone(), tick);
                    report.aggression_warnings = report.aggression_warnings.saturating_add(1);
                    report.warnings.push(format!(
                        "system {id} has created {total} relationships; consider damping it"
                    ));
                }
            }
        }

        pressure::apply_system_deltas(graph, &pending_pressures);

        if report.relationships_inserted > 0 || !report.entities_modified.is_empty() {
            let description = if descriptions.is_empty() {
                "the world shifted".to_owned()
            } else {
                descriptions.join("; ")
            };
            graph.record_event(
                HistoryEventKind::SimulationTick,
                description,
                report.entities_modified.clone(),
                u64::from(report.relationships_inserted),
            );
        }

        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use chronicle_graph::schema::{DomainSchema, KindSpec, RelationshipSpec};
    use chronicle_types::EntityDraft;

    fn schema() -> Arc<DomainSchema> {
        Arc::new(
            DomainSchema::new()
                .with_kind(KindSpec::new("npc", &["hero"], &["alive", "dead"], "alive"))
                .with_relationship(RelationshipSpec::new("allied_with", &["npc"], &["npc"])),
        )
    }

    fn seeded_graph(count: u32) -> Graph {
        let mut graph = Graph::new(schema());
        for i in 0..count {
            graph
                .add_entity(EntityDraft::new("npc", "hero").named(format!("npc {i}")))
                .unwrap();
        }
        graph
    }

    /// Proposes an alliance between every ordered pair of entities.
    struct FloodSystem {
        metadata: SystemMetadata,
    }

    impl FloodSystem {
        fn new() -> Self {
            Self {
                metadata: SystemMetadata::new("flood", "Flood", &["allied_with"]),
            }
        }
    }

    impl System for FloodSystem {
        fn metadata(&self) -> &SystemMetadata {
            &self.metadata
        }

        fn apply(
            &self,
            graph: &Graph,
            _modifier: f64,
            _rng: &mut dyn RngCore,
        ) -> Result<SystemOutcome, SystemError> {
            let ids: Vec<EntityId> = graph.entities().map(|e| e.id.clone()).collect();
            let mut outcome = SystemOutcome::empty();
            for src in &ids {
                for dst in &ids {
                    if src != dst {
                        outcome.relationships.push(ProposedRelationship::new(
                            "allied_with",
                            src.clone(),
                            dst.clone(),
                        ));
                    }
                }
            }
            outcome.description = "alliances everywhere".to_owned();
            Ok(outcome)
        }
    }

    /// Always fails.
    struct BrokenSystem {
        metadata: SystemMetadata,
    }

    impl System for BrokenSystem {
        fn metadata(&self) -> &SystemMetadata {
            &self.metadata
        }

        fn apply(
            &self,
            _graph: &Graph,
            _modifier: f64,
            _rng: &mut dyn RngCore,
        ) -> Result<SystemOutcome, SystemError> {
            Err(SystemError::Failed {
                reason: "intentional".to_owned(),
            })
        }
    }

    #[test]
    fn budget_caps_insertions_and_counts_drops() {
        let mut graph = seeded_graph(8); // 56 ordered pairs proposed.
        let systems: Vec<Box<dyn System>> = vec![Box::new(FloodSystem::new())];
        let mut executor = SystemExecutor::new(10);
        let mut rng = StdRng::seed_from_u64(0);

        let report = executor.run_tick(&mut graph, &systems, &[1.0], &mut rng);
        assert_eq!(report.relationships_inserted, 10);
        assert_eq!(report.relationships_dropped, 46);
        assert!(report.budget_hit);
        assert_eq!(graph.relationship_count(), 10);
        assert_eq!(report.warnings.len(), 1);
        graph.check_invariants().unwrap();
    }

    #[test]
    fn zero_modifier_skips_the_system() {
        let mut graph = seeded_graph(4);
        let systems: Vec<Box<dyn System>> = vec![Box::new(FloodSystem::new())];
        let mut executor = SystemExecutor::new(50);
        let mut rng = StdRng::seed_from_u64(0);

        let report = executor.run_tick(&mut graph, &systems, &[0.0], &mut rng);
        assert_eq!(report.executions, 0);
        assert_eq!(graph.relationship_count(), 0);
    }

    #[test]
    fn failing_system_is_skipped_not_fatal() {
        let mut graph = seeded_graph(3);
        let systems: Vec<Box<dyn System>> = vec![
            Box::new(BrokenSystem {
                metadata: SystemMetadata::new("broken", "Broken", &[]),
            }),
            Box::new(FloodSystem::new()),
        ];
        let mut executor = SystemExecutor::new(50);
        let mut rng = StdRng::seed_from_u64(0);

        let report = executor.run_tick(&mut graph, &systems, &[1.0, 1.0], &mut rng);
        assert_eq!(report.failures, 1);
        assert_eq!(report.relationships_inserted, 6);
    }

    #[test]
    fn simulation_history_event_cites_the_changes() {
        let mut graph = seeded_graph(3);
        let systems: Vec<Box<dyn System>> = vec![Box::new(FloodSystem::new())];
        let mut executor = SystemExecutor::new(50);
        let mut rng = StdRng::seed_from_u64(0);

        let before = graph.history().len();
        executor.run_tick(&mut graph, &systems, &[1.0], &mut rng);
        let event = graph.history().get(before).unwrap();
        assert_eq!(event.kind, HistoryEventKind::SimulationTick);
        assert_eq!(event.relationships_added, 6);
    }

    #[test]
    fn aggression_warning_fires_past_the_threshold() {
        // 24 entities: 552 ordered pairs, enough to pass 500 in one tick.
        let mut graph = seeded_graph(24);
        let systems: Vec<Box<dyn System>> = vec![Box::new(FloodSystem::new())];
        let mut executor = SystemExecutor::new(600);
        let mut rng = StdRng::seed_from_u64(0);

        let report = executor.run_tick(&mut graph, &systems, &[1.0], &mut rng);
        assert_eq!(report.aggression_warnings, 1);
        assert!(executor.total_for(&SystemId::from("flood")) > 500);
    }

    #[test]
    fn probability_cap_holds() {
        assert_eq!(cap_probability(1.7), MAX_BRANCH_PROBABILITY);
        assert_eq!(cap_probability(0.4), 0.4);
        assert_eq!(cap_probability(-0.2), 0.0);
    }
}
