//! Template runtime: the entity-creation machinery of the growth phase.
//!
//! A template is an authoring unit with three verbs: `can_apply` gates it
//! on the current graph, `find_targets` proposes focal entities, and
//! `expand` produces partial entities plus relationships. Relationships in
//! an expansion may reference entities created by the same expansion
//! through [`EntityRef::Local`] indices, resolved positionally against the
//! expansion's entity list at insert time. An unresolved local reference
//! aborts that template's result only -- never the epoch.

use rand::Rng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use chronicle_graph::schema::NameGenerator;
use chronicle_graph::store::Graph;
use chronicle_types::ids::TemplateId;
use chronicle_types::{
    Entity, EntityDraft, EntityId, EntityKind, RelationshipFields, RelationshipKind,
    RelationshipStatus,
};

/// Smallest growth target an epoch may receive.
pub const GROWTH_TARGET_MIN: u64 = 3;

/// Largest growth target an epoch may receive.
pub const GROWTH_TARGET_MAX: u64 = 25;

/// Errors raised by template execution.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template itself failed; it is skipped for this epoch.
    #[error("template failed: {reason}")]
    Failed {
        /// What went wrong, for the log.
        reason: String,
    },

    /// An expansion referenced a local entity index it never declared.
    #[error("unresolved local entity reference #{index}")]
    UnresolvedRef {
        /// The out-of-range local index.
        index: u32,
    },
}

/// Value-typed description of what a template produces, used by the
/// distribution-guided selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// The template's identifier.
    pub id: TemplateId,
    /// Display name for logs.
    pub name: String,
    /// Entity kinds this template can create.
    pub produces_entity_kinds: Vec<EntityKind>,
    /// Relationship kinds this template can create.
    pub produces_relationship_kinds: Vec<RelationshipKind>,
}

impl TemplateMetadata {
    /// Metadata from the template's ID and produced kinds.
    pub fn new(id: impl Into<TemplateId>, name: impl Into<String>, produces: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            produces_entity_kinds: produces.iter().map(|k| EntityKind::from(*k)).collect(),
            produces_relationship_kinds: Vec::new(),
        }
    }
}

/// Endpoint reference inside a template expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    /// An entity that already exists in the graph.
    Existing(EntityId),
    /// The `n`-th entity of this expansion's `entities` list (0-based),
    /// assigned a real ID at insert time.
    Local(u32),
}

/// A relationship authored by an expansion, with possibly-local endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftEdge {
    /// Relationship kind.
    pub kind: RelationshipKind,
    /// Edge source.
    pub src: EntityRef,
    /// Edge destination.
    pub dst: EntityRef,
    /// Optional strength in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    /// Optional normalized distance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Optional catalyzing entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalyzed_by: Option<EntityRef>,
    /// Optional current/historical marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RelationshipStatus>,
}

impl DraftEdge {
    /// An edge between two refs with everything else defaulted.
    pub const fn new(kind: RelationshipKind, src: EntityRef, dst: EntityRef) -> Self {
        Self {
            kind,
            src,
            dst,
            strength: None,
            distance: None,
            catalyzed_by: None,
            status: None,
        }
    }
}

/// The authoring act: partial entities, relationships, and a description
/// used for the growth history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateExpansion {
    /// Entities to create, in order (local refs index this list).
    pub entities: Vec<EntityDraft>,
    /// Relationships to create once entities have real IDs.
    pub relationships: Vec<DraftEdge>,
    /// Human-readable description of what happened.
    pub description: String,
}

/// An entity-creation template.
///
/// Implementations are value-typed behavior: the engine owns them in a
/// `Vec<Box<dyn Template>>` and invokes them one growth phase at a time.
/// No references to the graph outlive a single call.
pub trait Template: Send + Sync {
    /// Metadata consumed by the distribution-guided selector.
    fn metadata(&self) -> &TemplateMetadata;

    /// Whether the template's prerequisites hold (entity counts,
    /// pressures, saturation).
    fn can_apply(&self, graph: &Graph) -> bool;

    /// Candidate focal entities; the engine draws one at random.
    /// An empty list means the template expands without a target.
    fn find_targets(&self, graph: &Graph) -> Vec<EntityId>;

    /// Produce the expansion.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Failed`] when the template cannot expand;
    /// the engine logs and skips it for the epoch.
    fn expand(
        &self,
        graph: &Graph,
        target: Option<&Entity>,
        rng: &mut dyn RngCore,
    ) -> Result<TemplateExpansion, TemplateError>;
}

/// Result of inserting one expansion into the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedExpansion {
    /// IDs of the entities created, in expansion order.
    pub created: Vec<EntityId>,
    /// Relationships actually inserted.
    pub relationships_inserted: u32,
    /// Relationships dropped by the growth-phase budget.
    pub relationships_dropped: u32,
}

/// Insert an expansion into the graph.
///
/// Local references are validated before anything is inserted, so a bad
/// expansion leaves the graph untouched. Unnamed drafts are named through
/// the `names` generator. Relationship insertions stop at
/// `budget_remaining`; excess edges are counted as dropped.
///
/// # Errors
///
/// Returns [`TemplateError::UnresolvedRef`] if any edge references a local
/// index outside the expansion's entity list.
pub fn apply_expansion(
    graph: &mut Graph,
    expansion: TemplateExpansion,
    names: &dyn NameGenerator,
    rng: &mut dyn RngCore,
    budget_remaining: u32,
) -> Result<AppliedExpansion, TemplateError> {
    let local_count = u32::try_from(expansion.entities.len()).unwrap_or(u32::MAX);
    for edge in &expansion.relationships {
        for reference in [Some(&edge.src), Some(&edge.dst), edge.catalyzed_by.as_ref()]
            .into_iter()
            .flatten()
        {
            if let EntityRef::Local(index) = reference
                && *index >= local_count
            {
                return Err(TemplateError::UnresolvedRef { index: *index });
            }
        }
    }

    // Validate drafts up front so a bad one cannot strand earlier inserts.
    for draft in &expansion.entities {
        let Some(spec) = graph.schema().kind(&draft.kind) else {
            return Err(TemplateError::Failed {
                reason: format!("kind {} not declared by the domain schema", draft.kind),
            });
        };
        if !spec.subtypes.contains(&draft.subtype) {
            return Err(TemplateError::Failed {
                reason: format!(
                    "subtype {:?} not declared for kind {}",
                    draft.subtype, draft.kind
                ),
            });
        }
        if let Some(status) = &draft.status
            && !spec.statuses.contains(status)
        {
            return Err(TemplateError::Failed {
                reason: format!("status {status:?} not declared for kind {}", draft.kind),
            });
        }
    }

    let mut applied = AppliedExpansion::default();
    let mut taken = graph.names_taken();
    for mut draft in expansion.entities {
        if draft.name.is_empty() {
            draft.name = names.name_for(&draft.kind, &draft.subtype, &taken, rng);
        }
        taken.insert(draft.name.clone());
        match graph.add_entity(draft) {
            Ok(id) => applied.created.push(id),
            Err(error) => {
                // Unreachable after up-front validation, but kept total.
                debug!(%error, "expansion draft rejected");
                return Err(TemplateError::Failed {
                    reason: error.to_string(),
                });
            }
        }
    }

    for edge in expansion.relationships {
        if applied.relationships_inserted >= budget_remaining {
            applied.relationships_dropped = applied.relationships_dropped.saturating_add(1);
            continue;
        }
        let (Some(src), Some(dst)) = (
            resolve_ref(&edge.src, &applied.created),
            resolve_ref(&edge.dst, &applied.created),
        ) else {
            // Local refs were validated above; this covers Existing refs
            // naming entities that vanished between expand and insert.
            applied.relationships_dropped = applied.relationships_dropped.saturating_add(1);
            continue;
        };
        let catalyzed_by = edge
            .catalyzed_by
            .as_ref()
            .and_then(|r| resolve_ref(r, &applied.created));
        let fields = RelationshipFields {
            strength: edge.strength,
            distance: edge.distance,
            catalyzed_by,
            status: edge.status,
        };
        if graph.add_relationship(&edge.kind, &src, &dst, fields) {
            applied.relationships_inserted = applied.relationships_inserted.saturating_add(1);
        }
    }

    Ok(applied)
}

/// Map an [`EntityRef`] to a real ID against the created-entity list.
fn resolve_ref(reference: &EntityRef, created: &[EntityId]) -> Option<EntityId> {
    match reference {
        EntityRef::Existing(id) => Some(id.clone()),
        EntityRef::Local(index) => created.get(usize::try_from(*index).ok()?).cloned(),
    }
}

/// Compute the epoch's growth target `T`.
///
/// `T = clamp(ceil(remaining / epochs_remaining * jitter), 3, 25)` where
/// `remaining` sums each kind's deficit against `per_kind_target` and
/// `jitter ~ U(0.7, 1.3)`. When every kind meets its target, `T` is 3.
pub fn compute_growth_target(
    graph: &Graph,
    per_kind_target: u64,
    planned_epochs: u64,
    rng: &mut dyn RngCore,
) -> u64 {
    let counts = graph.counts_by_kind();
    let remaining: u64 = graph
        .schema()
        .kinds
        .keys()
        .map(|kind| per_kind_target.saturating_sub(counts.get(kind).copied().unwrap_or(0)))
        .sum();
    if remaining == 0 {
        return GROWTH_TARGET_MIN;
    }
    let epochs_remaining = planned_epochs.saturating_sub(graph.epoch()).max(1);
    let jitter: f64 = rng.random_range(0.7..1.3);
    let remaining_f = u32::try_from(remaining.min(u64::from(u32::MAX)))
        .map(f64::from)
        .unwrap_or(f64::MAX);
    let epochs_f = u32::try_from(epochs_remaining.min(u64::from(u32::MAX)))
        .map(f64::from)
        .unwrap_or(1.0);
    let raw = (remaining_f / epochs_f * jitter).ceil();
    let target = if raw.is_finite() && raw >= 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            raw.min(1e18) as u64
        }
    } else {
        GROWTH_TARGET_MIN
    };
    target.clamp(GROWTH_TARGET_MIN, GROWTH_TARGET_MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use chronicle_graph::schema::{DomainSchema, KindSpec, PoolNameGenerator, RelationshipSpec};

    fn schema() -> Arc<DomainSchema> {
        Arc::new(
            DomainSchema::new()
                .with_kind(KindSpec::new(
                    "settlement",
                    &["village"],
                    &["thriving"],
                    "thriving",
                ))
                .with_kind(KindSpec::new("npc", &["hero"], &["alive"], "alive"))
                .with_relationship(RelationshipSpec::new(
                    "resident_of",
                    &["npc"],
                    &["settlement"],
                )),
        )
    }

    fn expansion_with_local_edge() -> TemplateExpansion {
        TemplateExpansion {
            entities: vec![
                EntityDraft::new("npc", "hero").named("Wren"),
                EntityDraft::new("settlement", "village").named("Brinehold"),
            ],
            relationships: vec![DraftEdge::new(
                RelationshipKind::from("resident_of"),
                EntityRef::Local(0),
                EntityRef::Local(1),
            )],
            description: "a founder settles".to_owned(),
        }
    }

    #[test]
    fn local_refs_resolve_positionally() {
        let mut graph = Graph::new(schema());
        let names = PoolNameGenerator::default();
        let mut rng = StdRng::seed_from_u64(0);

        let applied =
            apply_expansion(&mut graph, expansion_with_local_edge(), &names, &mut rng, 10)
                .unwrap();
        assert_eq!(applied.created.len(), 2);
        assert_eq!(applied.relationships_inserted, 1);
        let rel = graph.relationships().first().unwrap();
        assert_eq!(rel.src.as_str(), "npc-0");
        assert_eq!(rel.dst.as_str(), "settlement-0");
        graph.check_invariants().unwrap();
    }

    #[test]
    fn unresolved_local_ref_aborts_before_any_insert() {
        let mut graph = Graph::new(schema());
        let names = PoolNameGenerator::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut expansion = expansion_with_local_edge();
        expansion.relationships = vec![DraftEdge::new(
            RelationshipKind::from("resident_of"),
            EntityRef::Local(0),
            EntityRef::Local(7),
        )];

        let result = apply_expansion(&mut graph, expansion, &names, &mut rng, 10);
        assert!(matches!(result, Err(TemplateError::UnresolvedRef { index: 7 })));
        assert_eq!(graph.entity_count(), 0);
        assert_eq!(graph.relationship_count(), 0);
    }

    #[test]
    fn unnamed_drafts_get_generated_names() {
        let mut graph = Graph::new(schema());
        let names = PoolNameGenerator::new(&["Tarn"]);
        let mut rng = StdRng::seed_from_u64(0);
        let expansion = TemplateExpansion {
            entities: vec![EntityDraft::new("npc", "hero")],
            relationships: vec![],
            description: String::new(),
        };

        let applied = apply_expansion(&mut graph, expansion, &names, &mut rng, 10).unwrap();
        let id = applied.created.first().unwrap();
        assert_eq!(graph.entity(id).unwrap().name, "Tarn");
    }

    #[test]
    fn growth_budget_drops_excess_edges() {
        let mut graph = Graph::new(schema());
        let names = PoolNameGenerator::default();
        let mut rng = StdRng::seed_from_u64(0);

        let applied =
            apply_expansion(&mut graph, expansion_with_local_edge(), &names, &mut rng, 0)
                .unwrap();
        assert_eq!(applied.relationships_inserted, 0);
        assert_eq!(applied.relationships_dropped, 1);
        assert_eq!(graph.relationship_count(), 0);
    }

    #[test]
    fn growth_target_is_three_when_every_kind_meets_target() {
        let mut graph = Graph::new(schema());
        for i in 0..2 {
            graph
                .add_entity(EntityDraft::new("npc", "hero").named(format!("n{i}")))
                .unwrap();
            graph
                .add_entity(EntityDraft::new("settlement", "village").named(format!("s{i}")))
                .unwrap();
        }
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(compute_growth_target(&graph, 2, 10, &mut rng), 3);
    }

    #[test]
    fn growth_target_respects_the_clamp() {
        let graph = Graph::new(schema());
        let mut rng = StdRng::seed_from_u64(0);
        // Two kinds, 1000 per kind, 1 epoch remaining: raw target is huge.
        assert_eq!(compute_growth_target(&graph, 1000, 1, &mut rng), 25);
        // Tiny deficit keeps the floor.
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(compute_growth_target(&graph, 1, 10, &mut rng), 3);
    }
}
