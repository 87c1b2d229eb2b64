//! Statistics: per-epoch records and the end-of-run report.
//!
//! Every epoch appends one [`EpochStats`] row. At the end of a run the
//! engine assembles [`SimulationStatistics`]: the measured distribution
//! with its deviations, enrichment counters, externally supplied
//! validation results, performance counters, temporal bounds, and the
//! fitness block a genetic-algorithm outer loop selects on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use chronicle_graph::store::ProtectedViolation;
use chronicle_types::ids::EraId;
use chronicle_types::{EntityKind, PressureId, RelationshipKind};

use crate::distribution::{DeviationReport, DistributionTargets, GraphShape};

/// Fitness weights: entity kinds, prominence, relationship diversity,
/// connectivity.
const FITNESS_WEIGHTS: (f64, f64, f64, f64) = (0.30, 0.20, 0.20, 0.30);

/// Entity-kind deviation above which a constraint violation is flagged.
const ENTITY_DEVIATION_LIMIT: f64 = 0.5;

/// One epoch's worth of accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// The epoch this row describes.
    pub epoch: u64,
    /// Tick at which the epoch closed.
    pub tick: u64,
    /// Entity counts by kind.
    pub entity_counts: BTreeMap<EntityKind, u64>,
    /// Entity counts by `kind/subtype`.
    pub subtype_counts: BTreeMap<String, u64>,
    /// Relationship counts by kind.
    pub relationship_counts: BTreeMap<RelationshipKind, u64>,
    /// Pressure values at the epoch boundary.
    pub pressures: BTreeMap<PressureId, f64>,
    /// The growth target the epoch aimed for.
    pub growth_target: u64,
    /// Entities actually created during the growth phase.
    pub growth_actual: u64,
    /// Entities created per simulation tick across the epoch.
    pub growth_rate: f64,
}

/// Increment-only enrichment analytics.
///
/// Counters accumulate whether or not hooks are configured, so runs with
/// enrichment disabled still report what *would* have been enriched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentCounts {
    /// Entity-description enrichment opportunities.
    pub descriptions: u64,
    /// Relationship enrichment opportunities.
    pub relationships: u64,
    /// Change-narration opportunities.
    pub change_narratives: u64,
    /// Era-narrative opportunities.
    pub era_narratives: u64,
    /// Discovery-narration opportunities.
    pub discovery_narratives: u64,
    /// Mythic-imagery opportunities.
    pub images: u64,
    /// Hook tasks that were actually scheduled.
    pub scheduled: u64,
    /// Hook tasks that failed (suppressed, but counted).
    pub failures: u64,
}

/// Results from an external validation pass, recorded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResults {
    /// Whether the validator passed the run.
    pub passed: bool,
    /// Issues the validator reported.
    pub issues: Vec<String>,
}

/// Summary of protected-relationship threshold violations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationSummary {
    /// Total violations recorded across the run.
    pub total_violations: u64,
    /// Violations by relationship kind.
    pub by_kind: BTreeMap<RelationshipKind, u64>,
}

impl ViolationSummary {
    /// Summarize a violation log.
    pub fn from_log(log: &[ProtectedViolation]) -> Self {
        let mut by_kind: BTreeMap<RelationshipKind, u64> = BTreeMap::new();
        for violation in log {
            let slot = by_kind.entry(violation.kind.clone()).or_insert(0);
            *slot = slot.saturating_add(1);
        }
        Self {
            total_violations: u64::try_from(log.len()).unwrap_or(u64::MAX),
            by_kind,
        }
    }
}

/// Engine performance counters across the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Template expansions successfully applied.
    pub template_applications: u64,
    /// Template attempts that failed and were skipped.
    pub template_failures: u64,
    /// System invocations.
    pub system_executions: u64,
    /// System invocations that failed and were skipped.
    pub system_failures: u64,
    /// Ticks on which the relationship budget was hit.
    pub relationship_budget_hits: u64,
    /// Relationships dropped by budgets.
    pub relationships_dropped: u64,
    /// Aggressive-system warnings raised.
    pub aggressive_system_warnings: u64,
    /// Total warning-log entries.
    pub warnings: u64,
    /// Per-epoch growth actuals, in epoch order.
    pub growth_history: Vec<f64>,
    /// Protected-relationship violation summary.
    pub protected_relationship_violations: ViolationSummary,
}

/// Temporal bounds of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalStats {
    /// Ticks executed.
    pub total_ticks: u64,
    /// Epochs executed.
    pub total_epochs: u64,
    /// Eras traversed, in activation order.
    pub eras_traversed: Vec<EraId>,
}

/// The fitness block consumed by a genetic-algorithm outer loop.
///
/// Every component sits in `[0, 1]`; higher is better.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessMetrics {
    /// `1 - min(1, entity-kind deviation)`.
    pub entity_distribution_fitness: f64,
    /// `1 - min(1, prominence deviation)`.
    pub prominence_distribution_fitness: f64,
    /// `1 - min(1, relationship-diversity deviation)`.
    pub relationship_diversity_fitness: f64,
    /// `1 - min(1, connectivity deviation)`.
    pub connectivity_fitness: f64,
    /// Weighted blend: 0.30 entity + 0.20 prominence + 0.20 relationship
    /// + 0.30 connectivity.
    pub overall_fitness: f64,
    /// Hard-constraint breaches, by name.
    pub constraint_violations: Vec<String>,
    /// `max(0, 1 - std/mean)` over the growth history; 1 with
    /// insufficient data.
    pub stability_score: f64,
}

/// Distribution block of the final report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    /// The measured shape at end of run.
    pub shape: GraphShape,
    /// Deviation from the configured targets.
    pub deviations: DeviationReport,
}

/// The end-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatistics {
    /// Distribution shape and deviations.
    pub distribution: DistributionStats,
    /// Per-epoch rows, in epoch order.
    pub epochs: Vec<EpochStats>,
    /// Enrichment analytics.
    pub enrichment: EnrichmentCounts,
    /// External validation results.
    pub validation: ValidationResults,
    /// Engine performance counters.
    pub performance: PerformanceStats,
    /// Temporal bounds.
    pub temporal: TemporalStats,
    /// The fitness block.
    pub fitness: FitnessMetrics,
}

/// Compute the fitness block from deviations, the measured shape, and the
/// growth history.
pub fn compute_fitness(
    deviations: &DeviationReport,
    shape: &GraphShape,
    targets: Option<&DistributionTargets>,
    growth_history: &[f64],
) -> FitnessMetrics {
    let entity = 1.0 - deviations.entity_kinds.min(1.0);
    let prominence = 1.0 - deviations.prominence.min(1.0);
    let relationship = 1.0 - deviations.relationship_diversity.min(1.0);
    let connectivity = 1.0 - deviations.connectivity.min(1.0);
    let (w_entity, w_prominence, w_relationship, w_connectivity) = FITNESS_WEIGHTS;

    let mut constraint_violations = Vec::new();
    if let Some(targets) = targets
        && shape.isolated_node_ratio > targets.max_isolated_ratio
    {
        constraint_violations.push(format!(
            "isolated-node ratio {:.3} exceeds tolerance {:.3}",
            shape.isolated_node_ratio, targets.max_isolated_ratio
        ));
    }
    if deviations.entity_kinds > ENTITY_DEVIATION_LIMIT {
        constraint_violations.push(format!(
            "entity-kind deviation {:.3} exceeds {ENTITY_DEVIATION_LIMIT}",
            deviations.entity_kinds
        ));
    }

    FitnessMetrics {
        entity_distribution_fitness: entity,
        prominence_distribution_fitness: prominence,
        relationship_diversity_fitness: relationship,
        connectivity_fitness: connectivity,
        overall_fitness: w_entity * entity
            + w_prominence * prominence
            + w_relationship * relationship
            + w_connectivity * connectivity,
        constraint_violations,
        stability_score: stability_score(growth_history),
    }
}

/// `max(0, 1 - std/mean)` over the growth history. Returns 1 when fewer
/// than two samples exist or the mean is zero (nothing to destabilize).
pub fn stability_score(history: &[f64]) -> f64 {
    if history.len() < 2 {
        return 1.0;
    }
    let mean = history.iter().sum::<f64>() / sample_count(history);
    if mean <= 0.0 {
        return 1.0;
    }
    let variance = history
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / sample_count(history);
    let std = variance.sqrt();
    (1.0 - std / mean).max(0.0)
}

fn sample_count(history: &[f64]) -> f64 {
    u32::try_from(history.len()).map(f64::from).unwrap_or(f64::MAX)
}
