//! Trivial domains and canned behaviors for exercising the Chronicle
//! engine in tests.
//!
//! Production domains arrive as data plus boxed behaviors; the seeded
//! scenarios in the engine's integration suite need small, fully
//! deterministic stand-ins. This crate provides them: a couple of minimal
//! schemas, a spawn template, a pair-bonding system, a flooding system for
//! budget tests, and constant-growth pressures.

use rand::RngCore;

use chronicle_engine::config::EngineConfig;
use chronicle_engine::era::Era;
use chronicle_engine::pressure::PressureDef;
use chronicle_engine::system::{
    ProposedRelationship, System, SystemError, SystemMetadata, SystemOutcome,
};
use chronicle_engine::template::{
    Template, TemplateError, TemplateExpansion, TemplateMetadata,
};
use chronicle_graph::schema::{DomainSchema, KindSpec, RelationshipSpec};
use chronicle_graph::store::Graph;
use chronicle_types::{Entity, EntityDraft, EntityId, EntitySeed, RelationshipKind};

/// A one-kind schema with no relationship kinds: nothing can grow or bond.
pub fn inert_schema() -> DomainSchema {
    DomainSchema::new().with_kind(KindSpec::new(
        "stone",
        &["plain"],
        &["standing", "fallen"],
        "standing",
    ))
}

/// Two entity kinds (`alpha`, `beta`) plus a mutual `bonded_with` kind;
/// enough surface for growth, bonding, and distribution tests.
pub fn paired_schema() -> DomainSchema {
    DomainSchema::new()
        .with_kind(KindSpec::new("alpha", &["plain"], &["extant"], "extant"))
        .with_kind(KindSpec::new("beta", &["plain"], &["extant"], "extant"))
        .with_relationship(RelationshipSpec::new(
            "bonded_with",
            &["alpha", "beta"],
            &["alpha", "beta"],
        ))
}

/// `count` seeds of the given kind, named `<kind> 0..count`.
pub fn seeds(kind: &str, subtype: &str, count: u32) -> Vec<EntitySeed> {
    (0..count)
        .map(|i| EntitySeed::new(kind, subtype, format!("{kind} {i}")))
        .collect()
}

/// A default-config engine configuration with the given seed.
pub fn config(seed: u64) -> EngineConfig {
    EngineConfig::with_seed(seed)
}

/// A single bare era.
pub fn single_era() -> Vec<Era> {
    vec![Era::new("age_of_stone", "Age of Stone")]
}

/// A pressure with constant raw growth, for smoothing and decay tests.
pub fn constant_pressure(id: &str, initial: f64, decay: f64, growth: f64) -> PressureDef {
    PressureDef::new(id, initial, decay, move |_: &Graph| growth)
}

/// Template that spawns one unnamed entity of a fixed kind per expansion.
pub struct SpawnTemplate {
    metadata: TemplateMetadata,
    kind: String,
    subtype: String,
}

impl SpawnTemplate {
    /// A spawn template for the given kind.
    pub fn new(id: &str, kind: &str, subtype: &str) -> Self {
        Self {
            metadata: TemplateMetadata::new(id, format!("spawn {kind}"), &[kind]),
            kind: kind.to_owned(),
            subtype: subtype.to_owned(),
        }
    }
}

impl Template for SpawnTemplate {
    fn metadata(&self) -> &TemplateMetadata {
        &self.metadata
    }

    fn can_apply(&self, _graph: &Graph) -> bool {
        true
    }

    fn find_targets(&self, _graph: &Graph) -> Vec<EntityId> {
        Vec::new()
    }

    fn expand(
        &self,
        _graph: &Graph,
        _target: Option<&Entity>,
        _rng: &mut dyn RngCore,
    ) -> Result<TemplateExpansion, TemplateError> {
        Ok(TemplateExpansion {
            entities: vec![EntityDraft::new(self.kind.as_str(), self.subtype.as_str())],
            relationships: Vec::new(),
            description: format!("a new {} appears", self.kind),
        })
    }
}

/// System that bonds the first unbonded entity pair it finds, one edge per
/// tick. Fully deterministic.
pub struct BondSystem {
    metadata: SystemMetadata,
}

impl BondSystem {
    /// A bonding system over the `bonded_with` kind.
    pub fn new() -> Self {
        Self {
            metadata: SystemMetadata::new("bonding", "Bonding", &["bonded_with"]),
        }
    }
}

impl Default for BondSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for BondSystem {
    fn metadata(&self) -> &SystemMetadata {
        &self.metadata
    }

    fn apply(
        &self,
        graph: &Graph,
        _modifier: f64,
        _rng: &mut dyn RngCore,
    ) -> Result<SystemOutcome, SystemError> {
        let kind = RelationshipKind::from("bonded_with");
        let ids: Vec<EntityId> = graph.entities().map(|e| e.id.clone()).collect();
        let mut outcome = SystemOutcome::empty();
        'search: for src in &ids {
            for dst in &ids {
                if src != dst && !graph.has_relationship(src, dst, &kind) {
                    outcome.relationships.push(
                        ProposedRelationship::new("bonded_with", src.clone(), dst.clone())
                            .with_strength(0.6),
                    );
                    outcome.description = "two parties bonded".to_owned();
                    break 'search;
                }
            }
        }
        Ok(outcome)
    }
}

/// System that proposes a fixed number of edges every tick, for budget
/// tests. Proposals walk ordered entity pairs, so they are deterministic
/// and distinct within a tick.
pub struct FloodSystem {
    metadata: SystemMetadata,
    proposals_per_tick: u32,
}

impl FloodSystem {
    /// A flooding system proposing `proposals_per_tick` edges per tick.
    pub fn new(proposals_per_tick: u32) -> Self {
        Self {
            metadata: SystemMetadata::new("flood", "Flood", &["bonded_with"]),
            proposals_per_tick,
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
        let kind = RelationshipKind::from("bonded_with");
        let ids: Vec<EntityId> = graph.entities().map(|e| e.id.clone()).collect();
        let mut outcome = SystemOutcome::empty();
        let mut proposed: u32 = 0;
        'outer: for src in &ids {
            for dst in &ids {
                if proposed >= self.proposals_per_tick {
                    break 'outer;
                }
                if src != dst && !graph.has_exact_relationship(&kind, src, dst) {
                    outcome.relationships.push(ProposedRelationship::new(
                        "bonded_with",
                        src.clone(),
                        dst.clone(),
                    ));
                    proposed = proposed.saturating_add(1);
                }
            }
        }
        outcome.description = format!("{proposed} bonds proposed");
        Ok(outcome)
    }
}
