//! Relationship culling: the always-present pruning pass.
//!
//! Every `interval` ticks the engine walks the full relationship list and
//! removes weak edges -- those whose strength fell below the threshold and
//! whose endpoints are both past the grace period. Protected and immutable
//! kinds are never removed: a weak edge of such a kind is recorded in the
//! graph's violation log instead, so an outer tuning loop can see the
//! tension without the world losing structure. Edges with a missing
//! endpoint are always removed.

use std::collections::BTreeSet;

use tracing::debug;

use chronicle_graph::store::Graph;
use chronicle_types::HistoryEventKind;

use crate::config::CullPolicy;

/// What one culling pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullReport {
    /// Weak edges removed.
    pub culled: u64,
    /// Broken edges (missing endpoint) removed.
    pub broken_removed: u64,
    /// Protected/immutable edges recorded as violations and kept.
    pub violations_recorded: u64,
}

/// Whether a culling pass is due at the given tick.
pub fn cull_due(tick: u64, policy: &CullPolicy) -> bool {
    tick > 0 && matches!(tick.checked_rem(policy.interval), Some(0))
}

/// Run one culling pass over every relationship.
pub fn run_cull(graph: &mut Graph, policy: &CullPolicy) -> CullReport {
    let tick = graph.tick();
    let mut report = CullReport::default();
    let mut to_remove: BTreeSet<usize> = BTreeSet::new();
    let mut violations: Vec<(usize, f64)> = Vec::new();

    for (index, rel) in graph.relationships().iter().enumerate() {
        let (src, dst) = (graph.entity(&rel.src), graph.entity(&rel.dst));
        let (Some(src), Some(dst)) = (src, dst) else {
            to_remove.insert(index);
            report.broken_removed = report.broken_removed.saturating_add(1);
            continue;
        };

        if rel.strength >= policy.threshold {
            continue;
        }
        let shielded =
            graph.schema().is_protected(&rel.kind) || graph.schema().is_immutable(&rel.kind);
        if shielded {
            violations.push((index, rel.strength));
            continue;
        }
        let both_aged =
            src.age_at(tick) > policy.grace && dst.age_at(tick) > policy.grace;
        if both_aged {
            to_remove.insert(index);
            report.culled = report.culled.saturating_add(1);
        }
    }

    for (index, strength) in violations {
        if let Some(rel) = graph.relationships().get(index) {
            let (kind, src, dst) = (rel.kind.clone(), rel.src.clone(), rel.dst.clone());
            graph.record_violation(&kind, &src, &dst, strength);
            report.violations_recorded = report.violations_recorded.saturating_add(1);
        }
    }

    if !to_remove.is_empty() {
        let removed = graph.remove_relationships(&to_remove);
        debug!(tick, removed = removed.len(), "culling pass removed edges");
        graph.record_event(
            HistoryEventKind::RelationshipsCulled,
            format!("{} weakened bonds faded from the world", removed.len()),
            Vec::new(),
            0,
        );
    }

    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chronicle_graph::schema::{DomainSchema, KindSpec, RelationshipSpec};
    use chronicle_types::{EntityDraft, EntityId, RelationshipFields, RelationshipKind};

    fn schema() -> Arc<DomainSchema> {
        Arc::new(
            DomainSchema::new()
                .with_kind(KindSpec::new("npc", &["hero"], &["alive"], "alive"))
                .with_relationship(RelationshipSpec::new("allied_with", &["npc"], &["npc"]))
                .with_relationship(
                    RelationshipSpec::new("sworn_to", &["npc"], &["npc"]).protected(),
                )
                .with_relationship(
                    RelationshipSpec::new("met_at_dawn", &["npc"], &["npc"]).immutable(),
                ),
        )
    }

    fn policy() -> CullPolicy {
        CullPolicy {
            interval: 10,
            threshold: 0.15,
            grace: 20,
        }
    }

    fn aged_pair(graph: &mut Graph) -> (EntityId, EntityId) {
        let a = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Wren"))
            .unwrap();
        let b = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Moss"))
            .unwrap();
        // Age both endpoints past the grace period.
        for _ in 0..25 {
            graph.advance_tick();
        }
        (a, b)
    }

    #[test]
    fn weak_aged_edges_are_culled() {
        let mut graph = Graph::new(schema());
        let (a, b) = aged_pair(&mut graph);
        graph.add_relationship(
            &RelationshipKind::from("allied_with"),
            &a,
            &b,
            RelationshipFields::with_strength(0.05),
        );

        let report = run_cull(&mut graph, &policy());
        assert_eq!(report.culled, 1);
        assert_eq!(graph.relationship_count(), 0);
        graph.check_invariants().unwrap();
    }

    #[test]
    fn strong_edges_survive() {
        let mut graph = Graph::new(schema());
        let (a, b) = aged_pair(&mut graph);
        graph.add_relationship(
            &RelationshipKind::from("allied_with"),
            &a,
            &b,
            RelationshipFields::with_strength(0.8),
        );

        let report = run_cull(&mut graph, &policy());
        assert_eq!(report.culled, 0);
        assert_eq!(graph.relationship_count(), 1);
    }

    #[test]
    fn young_endpoints_grant_grace() {
        let mut graph = Graph::new(schema());
        let a = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Wren"))
            .unwrap();
        let b = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Moss"))
            .unwrap();
        graph.add_relationship(
            &RelationshipKind::from("allied_with"),
            &a,
            &b,
            RelationshipFields::with_strength(0.05),
        );

        let report = run_cull(&mut graph, &policy());
        assert_eq!(report.culled, 0);
        assert_eq!(graph.relationship_count(), 1);
    }

    #[test]
    fn protected_edges_are_kept_and_recorded() {
        let mut graph = Graph::new(schema());
        let (a, b) = aged_pair(&mut graph);
        graph.add_relationship(
            &RelationshipKind::from("sworn_to"),
            &a,
            &b,
            RelationshipFields::with_strength(0.01),
        );

        let report = run_cull(&mut graph, &policy());
        assert_eq!(report.culled, 0);
        assert_eq!(report.violations_recorded, 1);
        assert_eq!(graph.relationship_count(), 1);
        assert_eq!(graph.violations().len(), 1);
    }

    #[test]
    fn immutable_edges_are_never_culled() {
        let mut graph = Graph::new(schema());
        let (a, b) = aged_pair(&mut graph);
        graph.add_relationship(
            &RelationshipKind::from("met_at_dawn"),
            &a,
            &b,
            RelationshipFields::with_strength(0.01),
        );

        let report = run_cull(&mut graph, &policy());
        assert_eq!(report.culled, 0);
        assert_eq!(report.violations_recorded, 1);
        assert_eq!(graph.relationship_count(), 1);
    }

    #[test]
    fn cull_cadence_follows_the_interval() {
        let p = policy();
        assert!(!cull_due(0, &p));
        assert!(!cull_due(7, &p));
        assert!(cull_due(10, &p));
        assert!(cull_due(20, &p));
    }
}
