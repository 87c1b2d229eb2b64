//! Template and system selection under distribution guidance.
//!
//! The template selector biases era weights toward templates that produce
//! under-represented kinds, then draws without replacement. The system
//! selector nudges era modifiers when a system's output would worsen (or
//! could repair) the graph's shape. Both collapse to the era tables alone
//! when no distribution targets are configured -- except the template
//! fallback heuristic, which still leans on per-kind deficits.

use rand::Rng;
use rand::RngCore;

use chronicle_graph::store::Graph;

use crate::distribution::{self, DeviationReport, DistributionTargets, GraphShape};
use crate::era::Era;
use crate::system::SystemMetadata;
use crate::template::{Template, TemplateMetadata};

/// Bounds on the distribution adjustment applied to system modifiers.
pub const SYSTEM_ADJUSTMENT_RANGE: (f64, f64) = (0.2, 2.0);

/// Bounds on the fallback template weight heuristic.
const FALLBACK_WEIGHT_RANGE: (f64, f64) = (0.5, 3.0);

/// Weight of one template under the active era and distribution state.
///
/// With targets configured, the era weight is multiplied by the mean over
/// produced kinds of `0.5 + deficit / per_kind_target * 2.5`. Without
/// targets, the fallback multiplies by
/// `clamp(1 + avg_deficit / per_kind_target * 2.5, 0.5, 3.0)`.
pub fn template_weight(
    metadata: &TemplateMetadata,
    era: &Era,
    graph: &Graph,
    targets: Option<&DistributionTargets>,
    per_kind_target: u64,
) -> f64 {
    let era_weight = era.template_weight(&metadata.id);
    if era_weight <= 0.0 {
        return 0.0;
    }
    if metadata.produces_entity_kinds.is_empty() || per_kind_target == 0 {
        return era_weight;
    }

    let counts = graph.counts_by_kind();
    let target_f = u64_to_f64(per_kind_target);
    let deficits: Vec<f64> = metadata
        .produces_entity_kinds
        .iter()
        .map(|kind| u64_to_f64(distribution::kind_deficit(&counts, kind, per_kind_target)))
        .collect();
    let avg_deficit = deficits.iter().sum::<f64>() / to_f64(deficits.len().max(1));

    let boost = if targets.is_some() {
        let sum: f64 = deficits
            .iter()
            .map(|deficit| 0.5 + deficit / target_f * 2.5)
            .sum();
        sum / to_f64(deficits.len().max(1))
    } else {
        (1.0 + avg_deficit / target_f * 2.5).clamp(FALLBACK_WEIGHT_RANGE.0, FALLBACK_WEIGHT_RANGE.1)
    };
    era_weight * boost
}

/// Draw up to `draws` template indices without replacement, weighted.
///
/// Entries with non-positive weight never appear. The draw is
/// deterministic given the RNG state.
pub fn weighted_sample_without_replacement(
    weights: &[f64],
    draws: usize,
    rng: &mut dyn RngCore,
) -> Vec<usize> {
    let mut remaining: Vec<(usize, f64)> = weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0.0)
        .map(|(i, w)| (i, *w))
        .collect();
    let mut picked = Vec::new();

    while picked.len() < draws && !remaining.is_empty() {
        let total: f64 = remaining.iter().map(|(_, w)| *w).sum();
        if total <= 0.0 {
            break;
        }
        let mut roll = rng.random_range(0.0..total);
        let mut chosen = remaining.len().saturating_sub(1);
        for (position, (_, weight)) in remaining.iter().enumerate() {
            if roll < *weight {
                chosen = position;
                break;
            }
            roll -= *weight;
        }
        let (index, _) = remaining.remove(chosen);
        picked.push(index);
    }
    picked
}

/// Select the templates to attempt this growth phase.
///
/// Filters by `can_apply`, weighs each survivor, and draws `3 * target`
/// without replacement. Returns indices into `templates`.
pub fn select_templates(
    templates: &[Box<dyn Template>],
    era: &Era,
    graph: &Graph,
    targets: Option<&DistributionTargets>,
    per_kind_target: u64,
    growth_target: u64,
    rng: &mut dyn RngCore,
) -> Vec<usize> {
    let weights: Vec<f64> = templates
        .iter()
        .map(|template| {
            if template.can_apply(graph) {
                template_weight(template.metadata(), era, graph, targets, per_kind_target)
            } else {
                0.0
            }
        })
        .collect();
    let draws = usize::try_from(growth_target.saturating_mul(3)).unwrap_or(usize::MAX);
    weighted_sample_without_replacement(&weights, draws, rng)
}

/// Distribution adjustment for one system, in `[0.2, 2.0]`.
///
/// Returns 1.0 when no targets are configured. Otherwise:
/// - ×0.6 when any kind the system chiefly produces is dominant (ratio
///   above `0.8 * max_single_type_ratio`);
/// - ×`1 + deviation * diversity_strength * 0.5` when diversity lags and
///   the system is diversity-positive;
/// - ×1.3 / ×0.8 for cluster-forming systems when the graph has too few /
///   too many clusters;
/// - ×1.25 for density-raising systems when isolated nodes exceed the
///   tolerance.
pub fn system_adjustment(
    metadata: &SystemMetadata,
    shape: &GraphShape,
    report: &DeviationReport,
    targets: Option<&DistributionTargets>,
) -> f64 {
    let Some(targets) = targets else {
        return 1.0;
    };
    let mut adjustment = 1.0;

    let dominance_cutoff = 0.8 * targets.max_single_type_ratio;
    let produces_dominant = metadata.produces_relationship_kinds.iter().any(|kind| {
        shape
            .relationship_type_ratios
            .get(kind)
            .copied()
            .unwrap_or(0.0)
            > dominance_cutoff
    });
    if produces_dominant {
        adjustment *= 0.6;
    }

    if metadata.diversity_positive && shape.relationship_diversity < targets.relationship_diversity
    {
        adjustment *= 1.0 + report.relationship_diversity * metadata.diversity_strength * 0.5;
    }

    if metadata.forms_clusters {
        if shape.clusters < targets.target_clusters {
            adjustment *= 1.3;
        } else if shape.clusters > targets.target_clusters {
            adjustment *= 0.8;
        }
    }

    if metadata.raises_density && shape.isolated_node_ratio > targets.max_isolated_ratio {
        adjustment *= 1.25;
    }

    adjustment.clamp(SYSTEM_ADJUSTMENT_RANGE.0, SYSTEM_ADJUSTMENT_RANGE.1)
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
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use chronicle_graph::schema::{DomainSchema, KindSpec};
    use chronicle_types::EntityDraft;

    fn schema() -> Arc<DomainSchema> {
        Arc::new(
            DomainSchema::new()
                .with_kind(KindSpec::new("alpha", &["plain"], &["extant"], "extant"))
                .with_kind(KindSpec::new("beta", &["plain"], &["extant"], "extant")),
        )
    }

    fn graph_heavy_on_alpha() -> Graph {
        let mut graph = Graph::new(schema());
        for i in 0..10 {
            graph
                .add_entity(EntityDraft::new("alpha", "plain").named(format!("a{i}")))
                .unwrap();
        }
        graph
    }

    #[test]
    fn deficit_boost_favors_underrepresented_kinds() {
        let graph = graph_heavy_on_alpha();
        let era = Era::new("dawn", "Dawn");
        let targets = DistributionTargets::default();

        let alpha = TemplateMetadata::new("make_alpha", "Make Alpha", &["alpha"]);
        let beta = TemplateMetadata::new("make_beta", "Make Beta", &["beta"]);

        let w_alpha = template_weight(&alpha, &era, &graph, Some(&targets), 10);
        let w_beta = template_weight(&beta, &era, &graph, Some(&targets), 10);
        // Alpha is saturated: 0.5 + 0 = 0.5. Beta deficit 10/10: 0.5 + 2.5 = 3.
        assert_eq!(w_alpha, 0.5);
        assert_eq!(w_beta, 3.0);
    }

    #[test]
    fn fallback_heuristic_clamps_its_boost() {
        let graph = graph_heavy_on_alpha();
        let era = Era::new("dawn", "Dawn");
        let beta = TemplateMetadata::new("make_beta", "Make Beta", &["beta"]);
        // Huge deficit: clamped at 3.0.
        let weight = template_weight(&beta, &era, &graph, None, 100);
        assert_eq!(weight, 3.0);
    }

    #[test]
    fn zero_era_weight_disables_a_template() {
        let graph = graph_heavy_on_alpha();
        let era = Era::new("dawn", "Dawn").with_template_weight("make_beta", 0.0);
        let beta = TemplateMetadata::new("make_beta", "Make Beta", &["beta"]);
        assert_eq!(template_weight(&beta, &era, &graph, None, 10), 0.0);
    }

    #[test]
    fn sampling_without_replacement_never_repeats() {
        let weights = [1.0, 2.0, 3.0, 0.0, 4.0];
        let mut rng = StdRng::seed_from_u64(7);
        let picks = weighted_sample_without_replacement(&weights, 10, &mut rng);
        // Only 4 entries have positive weight.
        assert_eq!(picks.len(), 4);
        let mut sorted = picks.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), picks.len());
        assert!(!picks.contains(&3));
    }

    #[test]
    fn sampling_is_deterministic_for_a_seed() {
        let weights = [1.0, 2.0, 3.0, 4.0];
        let mut rng_a = StdRng::seed_from_u64(11);
        let mut rng_b = StdRng::seed_from_u64(11);
        assert_eq!(
            weighted_sample_without_replacement(&weights, 3, &mut rng_a),
            weighted_sample_without_replacement(&weights, 3, &mut rng_b)
        );
    }

    #[test]
    fn dominant_kind_damps_its_producer() {
        let mut shape = GraphShape::default();
        shape
            .relationship_type_ratios
            .insert("allied_with".into(), 0.5);
        let targets = DistributionTargets::default(); // cutoff 0.32
        let metadata = SystemMetadata::new("bonds", "Bonds", &["allied_with"]);

        let adjustment =
            system_adjustment(&metadata, &shape, &DeviationReport::default(), Some(&targets));
        assert_eq!(adjustment, 0.6);
    }

    #[test]
    fn diversity_positive_system_gets_boosted_when_diversity_lags() {
        let shape = GraphShape {
            relationship_diversity: 0.2,
            ..GraphShape::default()
        };
        let report = DeviationReport {
            relationship_diversity: 0.8,
            ..DeviationReport::default()
        };
        let targets = DistributionTargets::default(); // target diversity 0.6
        let metadata = SystemMetadata::new("mixer", "Mixer", &[]).diversity_positive(1.0);

        let adjustment = system_adjustment(&metadata, &shape, &report, Some(&targets));
        assert_eq!(adjustment, 1.4);
    }

    #[test]
    fn adjustment_clamps_to_range() {
        let shape = GraphShape {
            isolated_node_ratio: 0.9,
            relationship_diversity: 0.0,
            ..GraphShape::default()
        };
        let report = DeviationReport {
            relationship_diversity: 1.0,
            ..DeviationReport::default()
        };
        let targets = DistributionTargets::default();
        let metadata = SystemMetadata::new("super", "Super", &[])
            .diversity_positive(4.0)
            .forms_clusters()
            .raises_density();

        let adjustment = system_adjustment(&metadata, &shape, &report, Some(&targets));
        assert_eq!(adjustment, SYSTEM_ADJUSTMENT_RANGE.1);
    }

    #[test]
    fn no_targets_means_no_adjustment() {
        let metadata = SystemMetadata::new("bonds", "Bonds", &["allied_with"]);
        let adjustment = system_adjustment(
            &metadata,
            &GraphShape::default(),
            &DeviationReport::default(),
            None,
        );
        assert_eq!(adjustment, 1.0);
    }
}
