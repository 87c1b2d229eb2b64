//! Change detection: kind-specific snapshots and epoch-boundary diffs.
//!
//! At each epoch boundary the detector walks every entity whose kind
//! appears in the schema watchlist, compares it against the snapshot taken
//! at the previous boundary, and emits human-readable change strings for
//! the deltas the watchlist declares significant. Non-empty change lists
//! are forwarded to the change-narration hook by the engine; the snapshot
//! is refreshed either way.
//!
//! Snapshots are value copies. Nothing here holds a reference into the
//! graph between epochs.

use std::collections::{BTreeMap, BTreeSet};

use chronicle_graph::schema::{WatchRule, WatchSpec};
use chronicle_graph::store::Graph;
use chronicle_types::{Entity, EntityId, Prominence};

/// Value copy of an entity's watched surface at one epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySnapshot {
    /// Tick the snapshot was taken.
    pub tick: u64,
    /// Status at snapshot time.
    pub status: String,
    /// Prominence at snapshot time.
    pub prominence: Prominence,
    /// Related-ID sets per watch-rule label.
    pub sets: BTreeMap<String, BTreeSet<EntityId>>,
    /// Related-entity counts per watch-rule label.
    pub counters: BTreeMap<String, u64>,
}

/// Detects narratively-significant deltas between epoch snapshots.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    /// Last snapshot per watched entity.
    snapshots: BTreeMap<EntityId, EntitySnapshot>,
}

impl ChangeDetector {
    /// A detector with no snapshots yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities currently snapshotted.
    pub fn tracked(&self) -> usize {
        self.snapshots.len()
    }

    /// Diff every watched entity against its previous snapshot, refresh
    /// all snapshots, and return the non-empty change lists in entity
    /// insertion order.
    pub fn detect_and_refresh(&mut self, graph: &Graph) -> Vec<(EntityId, Vec<String>)> {
        let mut results = Vec::new();
        let watched: Vec<(EntityId, EntitySnapshot, Option<Vec<String>>)> = graph
            .entities()
            .filter_map(|entity| {
                let watch = graph.schema().watch(&entity.kind)?;
                let current = take_snapshot(graph, entity, watch);
                let changes = self.snapshots.get(&entity.id).map(|previous| {
                    diff_snapshots(graph, entity, watch, previous, &current)
                });
                Some((entity.id.clone(), current, changes))
            })
            .collect();

        for (id, current, changes) in watched {
            if let Some(changes) = changes
                && !changes.is_empty()
            {
                results.push((id.clone(), changes));
            }
            self.snapshots.insert(id, current);
        }
        results
    }
}

/// Capture the watched surface of one entity.
fn take_snapshot(graph: &Graph, entity: &Entity, watch: &WatchSpec) -> EntitySnapshot {
    let mut sets = BTreeMap::new();
    let mut counters = BTreeMap::new();
    for rule in &watch.rules {
        let related: BTreeSet<EntityId> = graph
            .related(&entity.id, rule.relationship_kind(), rule.direction())
            .into_iter()
            .collect();
        counters.insert(rule.label().to_owned(), to_u64(related.len()));
        sets.insert(rule.label().to_owned(), related);
    }
    EntitySnapshot {
        tick: graph.tick(),
        status: entity.status.clone(),
        prominence: entity.prominence,
        sets,
        counters,
    }
}

/// Compute the change strings between two snapshots of one entity.
fn diff_snapshots(
    graph: &Graph,
    entity: &Entity,
    watch: &WatchSpec,
    previous: &EntitySnapshot,
    current: &EntitySnapshot,
) -> Vec<String> {
    let mut changes = Vec::new();

    // Built-in observations: status and prominence always matter.
    if previous.status != current.status {
        changes.push(format!(
            "status changed from {} to {}",
            previous.status, current.status
        ));
    }
    if previous.prominence != current.prominence {
        let verb = if current.prominence > previous.prominence {
            "rose"
        } else {
            "faded"
        };
        changes.push(format!(
            "prominence {verb} from {} to {}",
            previous.prominence.as_str(),
            current.prominence.as_str()
        ));
    }

    for rule in &watch.rules {
        let label = rule.label();
        let prev_set = previous.sets.get(label);
        let cur_set = current.sets.get(label);
        let prev_count = previous.counters.get(label).copied().unwrap_or(0);
        let cur_count = current.counters.get(label).copied().unwrap_or(0);

        match rule {
            WatchRule::Population { min_delta, .. } => {
                let delta = cur_count.abs_diff(prev_count);
                if delta >= *min_delta {
                    let verb = if cur_count > prev_count { "grew" } else { "shrank" };
                    changes.push(format!(
                        "{label} {verb} from {prev_count} to {cur_count}"
                    ));
                }
            }
            WatchRule::Holder { .. } => {
                let prev_holder = prev_set.and_then(|s| s.iter().next());
                let cur_holder = cur_set.and_then(|s| s.iter().next());
                if prev_holder != cur_holder {
                    changes.push(format!(
                        "{label} changed from {} to {}",
                        display_name(graph, prev_holder),
                        display_name(graph, cur_holder)
                    ));
                }
            }
            WatchRule::Extent { .. } => {
                if prev_count != cur_count {
                    changes.push(format!(
                        "{label} went from {prev_count} to {cur_count}"
                    ));
                }
            }
            WatchRule::Additions { min_prominence, .. } => {
                if let Some(min) = min_prominence
                    && entity.prominence < *min
                {
                    continue;
                }
                if let (Some(prev), Some(cur)) = (prev_set, cur_set) {
                    for added in cur.difference(prev) {
                        changes.push(format!(
                            "new {label}: {}",
                            display_name(graph, Some(added))
                        ));
                    }
                }
            }
        }
    }

    if !passes_tier_gate(entity, watch, previous, current) {
        return Vec::new();
    }
    changes
}

/// The watchlist tier gate: changes emit when the entity's prominence has
/// reached the watch threshold, or when this very diff is a prominence
/// transition arriving at [`Prominence::Recognized`] or above.
fn passes_tier_gate(
    entity: &Entity,
    watch: &WatchSpec,
    previous: &EntitySnapshot,
    current: &EntitySnapshot,
) -> bool {
    if entity.prominence >= watch.emit_min_prominence {
        return true;
    }
    previous.prominence != current.prominence && current.prominence >= Prominence::Recognized
}

/// Resolve an ID to a display name, falling back to the raw ID, with a
/// placeholder for an absent holder.
fn display_name(graph: &Graph, id: Option<&EntityId>) -> String {
    match id {
        None => "none".to_owned(),
        Some(id) => graph
            .entity(id)
            .map_or_else(|| id.to_string(), |e| e.name.clone()),
    }
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chronicle_graph::schema::{DomainSchema, KindSpec, RelationshipSpec};
    use chronicle_types::{
        EntityDraft, EntityPatch, LinkDirection, RelationshipFields, RelationshipKind,
    };

    fn schema() -> Arc<DomainSchema> {
        Arc::new(
            DomainSchema::new()
                .with_kind(KindSpec::new(
                    "settlement",
                    &["village"],
                    &["thriving", "ruined"],
                    "thriving",
                ))
                .with_kind(KindSpec::new("npc", &["hero"], &["alive", "exiled"], "alive"))
                .with_kind(KindSpec::new("faction", &["clan"], &["active"], "active"))
                .with_relationship(RelationshipSpec::new(
                    "resident_of",
                    &["npc"],
                    &["settlement"],
                ))
                .with_relationship(RelationshipSpec::new("leader_of", &["npc"], &["faction"]))
                .with_relationship(RelationshipSpec::new("allied_with", &["faction"], &["faction"]))
                .with_watch(
                    WatchSpec::new("settlement", Prominence::Forgotten).rule(
                        WatchRule::Population {
                            kind: RelationshipKind::from("resident_of"),
                            direction: LinkDirection::Incoming,
                            label: "residents".to_owned(),
                            min_delta: 3,
                        },
                    ),
                )
                .with_watch(
                    WatchSpec::new("faction", Prominence::Forgotten)
                        .rule(WatchRule::Holder {
                            kind: RelationshipKind::from("leader_of"),
                            direction: LinkDirection::Incoming,
                            label: "leader".to_owned(),
                        })
                        .rule(WatchRule::Additions {
                            kind: RelationshipKind::from("allied_with"),
                            direction: LinkDirection::Outgoing,
                            label: "ally".to_owned(),
                            min_prominence: None,
                        }),
                )
                .with_watch(WatchSpec::new("npc", Prominence::Renowned)),
        )
    }

    fn resident(graph: &mut Graph, name: &str, home: &EntityId) {
        let id = graph
            .add_entity(EntityDraft::new("npc", "hero").named(name))
            .unwrap();
        graph.add_relationship(
            &RelationshipKind::from("resident_of"),
            &id,
            home,
            RelationshipFields::default(),
        );
    }

    #[test]
    fn population_rule_needs_the_min_delta() {
        let mut graph = Graph::new(schema());
        let home = graph
            .add_entity(EntityDraft::new("settlement", "village").named("Brinehold"))
            .unwrap();
        let mut detector = ChangeDetector::new();

        // First pass establishes the baseline.
        assert!(detector.detect_and_refresh(&graph).is_empty());

        // Two newcomers: below the threshold of 3.
        resident(&mut graph, "Wren", &home);
        resident(&mut graph, "Moss", &home);
        assert!(detector.detect_and_refresh(&graph).is_empty());

        // Three more arrive: now it emits.
        resident(&mut graph, "Fern", &home);
        resident(&mut graph, "Tarn", &home);
        resident(&mut graph, "Rime", &home);
        let changes = detector.detect_and_refresh(&graph);
        assert_eq!(changes.len(), 1);
        let (id, lines) = changes.first().unwrap();
        assert_eq!(*id, home);
        assert_eq!(lines, &vec!["residents grew from 2 to 5".to_owned()]);
    }

    #[test]
    fn holder_rule_narrates_leadership_changes() {
        let mut graph = Graph::new(schema());
        let clan = graph
            .add_entity(EntityDraft::new("faction", "clan").named("Tide Clan"))
            .unwrap();
        let old = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Wren"))
            .unwrap();
        let leader_of = RelationshipKind::from("leader_of");
        graph.add_relationship(&leader_of, &old, &clan, RelationshipFields::default());

        let mut detector = ChangeDetector::new();
        detector.detect_and_refresh(&graph);

        // Depose Wren; Moss takes over.
        let mut indices = BTreeSet::new();
        indices.insert(
            graph
                .relationships()
                .iter()
                .position(|r| r.kind == leader_of)
                .unwrap(),
        );
        graph.remove_relationships(&indices);
        let new = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Moss"))
            .unwrap();
        graph.add_relationship(&leader_of, &new, &clan, RelationshipFields::default());

        let changes = detector.detect_and_refresh(&graph);
        let (_, lines) = changes.first().unwrap();
        assert!(lines.iter().any(|l| l == "leader changed from Wren to Moss"));
    }

    #[test]
    fn additions_rule_emits_one_line_per_new_ally() {
        let mut graph = Graph::new(schema());
        let tide = graph
            .add_entity(EntityDraft::new("faction", "clan").named("Tide Clan"))
            .unwrap();
        let stone = graph
            .add_entity(EntityDraft::new("faction", "clan").named("Stone Clan"))
            .unwrap();
        let mut detector = ChangeDetector::new();
        detector.detect_and_refresh(&graph);

        graph.add_relationship(
            &RelationshipKind::from("allied_with"),
            &tide,
            &stone,
            RelationshipFields::default(),
        );
        let changes = detector.detect_and_refresh(&graph);
        let (id, lines) = changes.first().unwrap();
        assert_eq!(*id, tide);
        assert_eq!(lines, &vec!["new ally: Stone Clan".to_owned()]);
    }

    #[test]
    fn tier_gate_silences_marginal_npcs() {
        let mut graph = Graph::new(schema());
        let hero = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Wren"))
            .unwrap();
        let mut detector = ChangeDetector::new();
        detector.detect_and_refresh(&graph);

        // Status flips but the NPC is marginal and the watch demands
        // renowned: nothing emits.
        graph
            .update_entity(&hero, EntityPatch::status("exiled"))
            .unwrap();
        assert!(detector.detect_and_refresh(&graph).is_empty());
    }

    #[test]
    fn prominence_transition_to_recognized_pierces_the_gate() {
        let mut graph = Graph::new(schema());
        let hero = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Wren"))
            .unwrap();
        let mut detector = ChangeDetector::new();
        detector.detect_and_refresh(&graph);

        graph
            .update_entity(&hero, EntityPatch::prominence(Prominence::Recognized))
            .unwrap();
        let changes = detector.detect_and_refresh(&graph);
        let (_, lines) = changes.first().unwrap();
        assert_eq!(
            lines,
            &vec!["prominence rose from marginal to recognized".to_owned()]
        );
    }
}
