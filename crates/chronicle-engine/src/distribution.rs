//! Distribution tracking: measuring the graph's statistical shape and its
//! deviation from configured targets.
//!
//! The tracker condenses the graph into a [`GraphShape`] -- ratios by
//! entity kind, prominence, and relationship kind, plus connectivity
//! metrics from a union-find pass -- and compares it against the
//! [`DistributionTargets`] to produce a [`DeviationReport`]. Deviations
//! feed three consumers: template weighting, system modifier adjustment,
//! and additive pressure feedback.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use chronicle_graph::store::Graph;
use chronicle_types::{EntityId, EntityKind, PressureId, Prominence, RelationshipKind};

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// A deviation axis a feedback rule can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationAxis {
    /// Mean absolute deviation of entity-kind ratios.
    EntityKinds,
    /// Mean absolute deviation of prominence ratios.
    Prominence,
    /// Relationship-kind diversity shortfall.
    RelationshipDiversity,
    /// Cluster-count delta plus isolated-node excess.
    Connectivity,
}

/// Maps an over-threshold deviation axis to an additive pressure bump.
///
/// The bump is `min(deviation * gain, cap)`, applied during the epoch
/// pressure update. Which axis feeds which pressure is configuration, not
/// code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureFeedback {
    /// The watched axis.
    pub axis: DeviationAxis,
    /// The pressure that receives the bump.
    pub pressure: PressureId,
    /// Multiplier on the deviation.
    #[serde(default = "default_feedback_gain")]
    pub gain: f64,
    /// Ceiling on the bump.
    #[serde(default = "default_feedback_cap")]
    pub cap: f64,
}

const fn default_feedback_gain() -> f64 {
    20.0
}

const fn default_feedback_cap() -> f64 {
    5.0
}

/// Desired statistical shape of the output graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionTargets {
    /// Target ratio per entity kind (should sum to roughly 1).
    #[serde(default)]
    pub entity_kinds: BTreeMap<EntityKind, f64>,
    /// Target ratio per prominence level.
    #[serde(default)]
    pub prominence: BTreeMap<Prominence, f64>,
    /// Target normalized relationship-kind entropy, in `[0, 1]`.
    #[serde(default = "default_relationship_diversity")]
    pub relationship_diversity: f64,
    /// Ratio above which a single relationship kind counts as dominant.
    #[serde(default = "default_max_single_type_ratio")]
    pub max_single_type_ratio: f64,
    /// Desired number of clusters (components of two or more entities).
    #[serde(default = "default_target_clusters")]
    pub target_clusters: u64,
    /// Tolerated ratio of isolated (degree-0) entities.
    #[serde(default = "default_max_isolated_ratio")]
    pub max_isolated_ratio: f64,
    /// Deviation above which feedback rules fire.
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
    /// Axis-to-pressure feedback rules.
    #[serde(default)]
    pub feedback: Vec<PressureFeedback>,
}

impl Default for DistributionTargets {
    fn default() -> Self {
        Self {
            entity_kinds: BTreeMap::new(),
            prominence: BTreeMap::new(),
            relationship_diversity: default_relationship_diversity(),
            max_single_type_ratio: default_max_single_type_ratio(),
            target_clusters: default_target_clusters(),
            max_isolated_ratio: default_max_isolated_ratio(),
            convergence_threshold: default_convergence_threshold(),
            feedback: Vec::new(),
        }
    }
}

const fn default_relationship_diversity() -> f64 {
    0.6
}

const fn default_max_single_type_ratio() -> f64 {
    0.4
}

const fn default_target_clusters() -> u64 {
    4
}

const fn default_max_isolated_ratio() -> f64 {
    0.2
}

const fn default_convergence_threshold() -> f64 {
    0.15
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// The graph's current statistical shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphShape {
    /// Total entity count.
    pub total_entities: u64,
    /// Total relationship count.
    pub total_relationships: u64,
    /// Entity count share by kind.
    pub entity_kind_ratios: BTreeMap<EntityKind, f64>,
    /// Entity count share by prominence.
    pub prominence_ratios: BTreeMap<Prominence, f64>,
    /// Relationship count share by kind.
    pub relationship_type_ratios: BTreeMap<RelationshipKind, f64>,
    /// Components holding two or more entities.
    pub clusters: u64,
    /// Mean size of those components.
    pub avg_cluster_size: f64,
    /// Entities with no incident edges.
    pub isolated_nodes: u64,
    /// Isolated entities as a share of all entities.
    pub isolated_node_ratio: f64,
    /// `2|E| / |V|`.
    pub avg_degree: f64,
    /// Mean internal edge density over clusters.
    pub intra_cluster_density: f64,
    /// Normalized relationship-kind entropy, in `[0, 1]`.
    pub relationship_diversity: f64,
}

/// Union-find over entity indices, with path halving.
///
/// The engine commits to union-find (rather than DFS) for component
/// discovery; it is allocation-light and deterministic.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        loop {
            let Some(&p) = self.parent.get(x) else {
                return x;
            };
            if p == x {
                return x;
            }
            let grand = self.parent.get(p).copied().unwrap_or(p);
            if let Some(slot) = self.parent.get_mut(x) {
                *slot = grand;
            }
            x = grand;
        }
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb
            && let Some(slot) = self.parent.get_mut(rb)
        {
            *slot = ra;
        }
    }
}

/// Measure the graph's current shape.
pub fn measure(graph: &Graph) -> GraphShape {
    let total_entities = graph.entity_count();
    let total_relationships = graph.relationship_count();
    let mut shape = GraphShape {
        total_entities: to_u64(total_entities),
        total_relationships: to_u64(total_relationships),
        ..GraphShape::default()
    };
    if total_entities == 0 {
        return shape;
    }
    let entity_total = to_f64(total_entities);

    for (kind, count) in graph.counts_by_kind() {
        shape
            .entity_kind_ratios
            .insert(kind, u64_to_f64(count) / entity_total);
    }
    for (prominence, count) in graph.counts_by_prominence() {
        shape
            .prominence_ratios
            .insert(prominence, u64_to_f64(count) / entity_total);
    }

    let relationship_counts = graph.counts_by_relationship_kind();
    if total_relationships > 0 {
        let edge_total = to_f64(total_relationships);
        for (kind, count) in &relationship_counts {
            shape
                .relationship_type_ratios
                .insert(kind.clone(), u64_to_f64(*count) / edge_total);
        }
    }
    shape.relationship_diversity = normalized_entropy(
        &relationship_counts,
        graph.schema().relationships.len(),
    );

    // Connectivity via union-find over entity indices.
    let index_of: BTreeMap<&EntityId, usize> = graph
        .entities()
        .enumerate()
        .map(|(i, e)| (&e.id, i))
        .collect();
    let mut uf = UnionFind::new(total_entities);
    let mut degrees = vec![0_u64; total_entities];
    for rel in graph.relationships() {
        if let (Some(&a), Some(&b)) = (index_of.get(&rel.src), index_of.get(&rel.dst)) {
            uf.union(a, b);
            if let Some(d) = degrees.get_mut(a) {
                *d = d.saturating_add(1);
            }
            if let Some(d) = degrees.get_mut(b) {
                *d = d.saturating_add(1);
            }
        }
    }

    let mut component_sizes: BTreeMap<usize, u64> = BTreeMap::new();
    for index in 0..total_entities {
        let root = uf.find(index);
        let slot = component_sizes.entry(root).or_insert(0);
        *slot = slot.saturating_add(1);
    }
    let mut component_edges: BTreeMap<usize, u64> = BTreeMap::new();
    for rel in graph.relationships() {
        if let Some(&a) = index_of.get(&rel.src) {
            let root = uf.find(a);
            let slot = component_edges.entry(root).or_insert(0);
            *slot = slot.saturating_add(1);
        }
    }

    shape.isolated_nodes = to_u64(degrees.iter().filter(|d| **d == 0).count());
    shape.isolated_node_ratio = u64_to_f64(shape.isolated_nodes) / entity_total;
    shape.avg_degree = 2.0 * to_f64(total_relationships) / entity_total;

    let clusters: Vec<(usize, u64)> = component_sizes
        .iter()
        .filter(|(_, size)| **size >= 2)
        .map(|(root, size)| (*root, *size))
        .collect();
    shape.clusters = to_u64(clusters.len());
    if !clusters.is_empty() {
        let cluster_total: u64 = clusters.iter().map(|(_, size)| *size).sum();
        shape.avg_cluster_size = u64_to_f64(cluster_total) / to_f64(clusters.len());
        let density_sum: f64 = clusters
            .iter()
            .map(|(root, size)| {
                let n = u64_to_f64(*size);
                let possible = n * (n - 1.0) / 2.0;
                let internal = u64_to_f64(component_edges.get(root).copied().unwrap_or(0));
                if possible > 0.0 { (internal / possible).min(1.0) } else { 0.0 }
            })
            .sum();
        shape.intra_cluster_density = density_sum / to_f64(clusters.len());
    }

    shape
}

/// Normalized Shannon entropy of relationship-kind counts against the
/// schema's declared kind count. 0 when fewer than two kinds are declared
/// or no edges exist.
fn normalized_entropy(counts: &BTreeMap<RelationshipKind, u64>, declared_kinds: usize) -> f64 {
    let total: u64 = counts.values().sum();
    if total == 0 || declared_kinds < 2 {
        return 0.0;
    }
    let total_f = u64_to_f64(total);
    let entropy: f64 = counts
        .values()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = u64_to_f64(*c) / total_f;
            -p * p.ln()
        })
        .sum();
    let max_entropy = to_f64(declared_kinds).ln();
    if max_entropy > 0.0 {
        (entropy / max_entropy).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Deviation
// ---------------------------------------------------------------------------

/// How far the graph's shape sits from the configured targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviationReport {
    /// Mean absolute entity-kind ratio deviation.
    pub entity_kinds: f64,
    /// Mean absolute prominence ratio deviation.
    pub prominence: f64,
    /// Relationship-diversity deviation (`1 - entropy/max entropy`).
    pub relationship_diversity: f64,
    /// Connectivity deviation (cluster delta + isolated excess).
    pub connectivity: f64,
}

impl DeviationReport {
    /// The deviation along one axis.
    pub const fn along(&self, axis: DeviationAxis) -> f64 {
        match axis {
            DeviationAxis::EntityKinds => self.entity_kinds,
            DeviationAxis::Prominence => self.prominence,
            DeviationAxis::RelationshipDiversity => self.relationship_diversity,
            DeviationAxis::Connectivity => self.connectivity,
        }
    }
}

/// Compute the deviation of a measured shape from the targets.
pub fn deviations(shape: &GraphShape, targets: &DistributionTargets) -> DeviationReport {
    let entity_kinds = mean_abs_deviation(
        &targets.entity_kinds,
        &shape.entity_kind_ratios,
    );
    let prominence = mean_abs_deviation(&targets.prominence, &shape.prominence_ratios);

    let relationship_diversity = if shape.total_relationships == 0 {
        0.0
    } else {
        (1.0 - shape.relationship_diversity).clamp(0.0, 1.0)
    };

    let cluster_target = u64_to_f64(targets.target_clusters).max(1.0);
    let cluster_delta =
        ((u64_to_f64(shape.clusters) - cluster_target).abs() / cluster_target).min(1.0);
    let isolated_excess = if targets.max_isolated_ratio > 0.0 {
        ((shape.isolated_node_ratio - targets.max_isolated_ratio).max(0.0)
            / targets.max_isolated_ratio)
            .min(1.0)
    } else {
        shape.isolated_node_ratio.min(1.0)
    };
    let connectivity = 0.5 * cluster_delta + 0.5 * isolated_excess;

    DeviationReport {
        entity_kinds,
        prominence,
        relationship_diversity,
        connectivity,
    }
}

/// Mean of `|actual - target|` over the target keys.
fn mean_abs_deviation<K: Ord>(targets: &BTreeMap<K, f64>, actual: &BTreeMap<K, f64>) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let sum: f64 = targets
        .iter()
        .map(|(key, target)| (actual.get(key).copied().unwrap_or(0.0) - target).abs())
        .sum();
    sum / to_f64(targets.len())
}

/// Additive pressure bumps for every feedback rule whose axis deviates
/// past the convergence threshold.
pub fn pressure_feedback(
    report: &DeviationReport,
    targets: &DistributionTargets,
) -> BTreeMap<PressureId, f64> {
    let mut bumps = BTreeMap::new();
    for rule in &targets.feedback {
        let deviation = report.along(rule.axis);
        if deviation > targets.convergence_threshold {
            let bump = (deviation * rule.gain).min(rule.cap);
            let slot = bumps.entry(rule.pressure.clone()).or_insert(0.0);
            *slot += bump;
        }
    }
    bumps
}

/// Deficit of a kind against the per-kind entity target: how many entities
/// short of `per_kind_target` the graph currently is.
pub fn kind_deficit(counts: &BTreeMap<EntityKind, u64>, kind: &EntityKind, per_kind_target: u64) -> u64 {
    per_kind_target.saturating_sub(counts.get(kind).copied().unwrap_or(0))
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn to_f64(value: usize) -> f64 {
    u32::try_from(value).map(f64::from).unwrap_or(f64::MAX)
}

fn u64_to_f64(value: u64) -> f64 {
    u32::try_from(value.min(u64::from(u32::MAX)))
        .map(f64::from)
        .unwrap_or(f64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chronicle_graph::schema::{DomainSchema, KindSpec, RelationshipSpec};
    use chronicle_types::{EntityDraft, RelationshipFields};

    fn schema() -> Arc<DomainSchema> {
        Arc::new(
            DomainSchema::new()
                .with_kind(KindSpec::new("npc", &["hero"], &["alive"], "alive"))
                .with_kind(KindSpec::new(
                    "settlement",
                    &["village"],
                    &["thriving"],
                    "thriving",
                ))
                .with_relationship(RelationshipSpec::new("allied_with", &["npc"], &["npc"]))
                .with_relationship(RelationshipSpec::new(
                    "resident_of",
                    &["npc"],
                    &["settlement"],
                )),
        )
    }

    fn populated_graph() -> Graph {
        let mut graph = Graph::new(schema());
        let a = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Wren"))
            .unwrap();
        let b = graph
            .add_entity(EntityDraft::new("npc", "hero").named("Moss"))
            .unwrap();
        let home = graph
            .add_entity(EntityDraft::new("settlement", "village").named("Brinehold"))
            .unwrap();
        // Isolated fourth entity.
        graph
            .add_entity(EntityDraft::new("npc", "hero").named("Fern"))
            .unwrap();
        graph.add_relationship(
            &RelationshipKind::from("allied_with"),
            &a,
            &b,
            RelationshipFields::default(),
        );
        graph.add_relationship(
            &RelationshipKind::from("resident_of"),
            &a,
            &home,
            RelationshipFields::default(),
        );
        graph
    }

    #[test]
    fn shape_ratios_sum_to_one() {
        let shape = measure(&populated_graph());
        let kind_sum: f64 = shape.entity_kind_ratios.values().sum();
        assert!((kind_sum - 1.0).abs() < 1e-9);
        assert_eq!(shape.total_entities, 4);
        assert_eq!(shape.entity_kind_ratios[&EntityKind::from("npc")], 0.75);
    }

    #[test]
    fn connectivity_metrics_count_clusters_and_isolates() {
        let shape = measure(&populated_graph());
        // One cluster of {a, b, home}; Fern is isolated.
        assert_eq!(shape.clusters, 1);
        assert_eq!(shape.avg_cluster_size, 3.0);
        assert_eq!(shape.isolated_nodes, 1);
        assert_eq!(shape.isolated_node_ratio, 0.25);
        assert_eq!(shape.avg_degree, 1.0);
    }

    #[test]
    fn empty_graph_measures_cleanly() {
        let shape = measure(&Graph::new(schema()));
        assert_eq!(shape.total_entities, 0);
        assert_eq!(shape.clusters, 0);
        assert_eq!(shape.isolated_node_ratio, 0.0);
    }

    #[test]
    fn uniform_edge_mix_maximizes_diversity() {
        let shape = measure(&populated_graph());
        // Two kinds, one edge each: entropy ln2 over max ln2.
        assert!((shape.relationship_diversity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn entity_kind_deviation_is_mean_absolute() {
        let shape = measure(&populated_graph());
        let mut targets = DistributionTargets::default();
        targets.entity_kinds.insert(EntityKind::from("npc"), 0.5);
        targets
            .entity_kinds
            .insert(EntityKind::from("settlement"), 0.5);
        let report = deviations(&shape, &targets);
        // |0.75 - 0.5| and |0.25 - 0.5| average to 0.25.
        assert!((report.entity_kinds - 0.25).abs() < 1e-9);
    }

    #[test]
    fn feedback_fires_only_past_the_threshold() {
        let mut targets = DistributionTargets::default();
        targets.feedback.push(PressureFeedback {
            axis: DeviationAxis::EntityKinds,
            pressure: PressureId::from("cultural_tension"),
            gain: 20.0,
            cap: 5.0,
        });
        let mut report = DeviationReport::default();

        report.entity_kinds = 0.1; // below the 0.15 threshold
        assert!(pressure_feedback(&report, &targets).is_empty());

        report.entity_kinds = 0.4;
        let bumps = pressure_feedback(&report, &targets);
        // 0.4 * 20 = 8, capped at 5.
        assert_eq!(bumps[&PressureId::from("cultural_tension")], 5.0);
    }

    #[test]
    fn kind_deficit_saturates_at_zero() {
        let graph = populated_graph();
        let counts = graph.counts_by_kind();
        assert_eq!(kind_deficit(&counts, &EntityKind::from("npc"), 10), 7);
        assert_eq!(kind_deficit(&counts, &EntityKind::from("npc"), 2), 0);
    }
}
