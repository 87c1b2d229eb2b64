//! Eras: epoch-indexed phase modifiers.
//!
//! An era scales template weights, system modifiers, and pressure deltas
//! while it is active, and may carry a special rule invoked once per epoch.
//! Era selection is a pure function of the epoch counter: the era list is
//! walked front to back, `epochs_per_era` epochs each, and the final era
//! holds for the remainder of the run.

use std::collections::BTreeMap;

use chronicle_graph::store::Graph;
use chronicle_types::ids::{EraId, PressureId, SystemId, TemplateId};

/// A per-epoch rule an era applies directly to the graph.
///
/// Implemented for plain closures over `&mut Graph`.
pub trait EraRule: Send + Sync {
    /// Apply the rule. Runs after the epoch's simulation ticks.
    fn apply(&self, graph: &mut Graph);
}

impl<F> EraRule for F
where
    F: Fn(&mut Graph) + Send + Sync,
{
    fn apply(&self, graph: &mut Graph) {
        self(graph);
    }
}

/// One era: a named phase with its weight tables.
///
/// A weight or modifier of 0 disables the template or system for the era;
/// anything absent from a table defaults to 1.0.
pub struct Era {
    /// The era's identifier.
    pub id: EraId,
    /// Display name used in narratives and history events.
    pub name: String,
    /// Template weight overrides.
    pub template_weights: BTreeMap<TemplateId, f64>,
    /// System modifier overrides.
    pub system_modifiers: BTreeMap<SystemId, f64>,
    /// Pressure delta multipliers.
    pub pressure_modifiers: BTreeMap<PressureId, f64>,
    /// Optional once-per-epoch rule.
    pub special_rules: Option<Box<dyn EraRule>>,
}

impl Era {
    /// An era with empty tables (everything at the 1.0 default).
    pub fn new(id: impl Into<EraId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            template_weights: BTreeMap::new(),
            system_modifiers: BTreeMap::new(),
            pressure_modifiers: BTreeMap::new(),
            special_rules: None,
        }
    }

    /// Override a template weight (0 disables the template).
    #[must_use]
    pub fn with_template_weight(mut self, template: impl Into<TemplateId>, weight: f64) -> Self {
        self.template_weights.insert(template.into(), weight.max(0.0));
        self
    }

    /// Override a system modifier (0 disables the system).
    #[must_use]
    pub fn with_system_modifier(mut self, system: impl Into<SystemId>, modifier: f64) -> Self {
        self.system_modifiers.insert(system.into(), modifier.max(0.0));
        self
    }

    /// Override a pressure multiplier.
    #[must_use]
    pub fn with_pressure_modifier(mut self, pressure: impl Into<PressureId>, modifier: f64) -> Self {
        self.pressure_modifiers.insert(pressure.into(), modifier);
        self
    }

    /// Attach a special rule.
    #[must_use]
    pub fn with_special_rules(mut self, rule: impl EraRule + 'static) -> Self {
        self.special_rules = Some(Box::new(rule));
        self
    }

    /// Weight for a template under this era (1.0 when not overridden).
    pub fn template_weight(&self, template: &TemplateId) -> f64 {
        self.template_weights.get(template).copied().unwrap_or(1.0)
    }

    /// Modifier for a system under this era (1.0 when not overridden).
    pub fn system_modifier(&self, system: &SystemId) -> f64 {
        self.system_modifiers.get(system).copied().unwrap_or(1.0)
    }
}

impl core::fmt::Debug for Era {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Era")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("template_weights", &self.template_weights)
            .field("system_modifiers", &self.system_modifiers)
            .field("pressure_modifiers", &self.pressure_modifiers)
            .finish_non_exhaustive()
    }
}

/// Index of the era active at the given epoch:
/// `min(epoch / epochs_per_era, era_count - 1)`.
///
/// Returns 0 for an empty era list or a zero divisor (callers validate both
/// at construction; this keeps the function total).
pub fn era_index_for_epoch(epoch: u64, era_count: usize, epochs_per_era: u64) -> usize {
    if era_count == 0 || epochs_per_era == 0 {
        return 0;
    }
    let last = era_count.saturating_sub(1);
    let index = epoch.checked_div(epochs_per_era).unwrap_or(0);
    usize::try_from(index).map_or(last, |idx| idx.min(last))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn era_index_walks_the_list_then_holds() {
        // 3 eras, 2 epochs each.
        assert_eq!(era_index_for_epoch(0, 3, 2), 0);
        assert_eq!(era_index_for_epoch(1, 3, 2), 0);
        assert_eq!(era_index_for_epoch(2, 3, 2), 1);
        assert_eq!(era_index_for_epoch(3, 3, 2), 1);
        assert_eq!(era_index_for_epoch(4, 3, 2), 2);
        // Beyond the table, the final era holds.
        assert_eq!(era_index_for_epoch(99, 3, 2), 2);
    }

    #[test]
    fn era_index_is_total_on_degenerate_input() {
        assert_eq!(era_index_for_epoch(5, 0, 2), 0);
        assert_eq!(era_index_for_epoch(5, 3, 0), 0);
    }

    #[test]
    fn missing_table_entries_default_to_one() {
        let era = Era::new("dawn", "The Dawn").with_template_weight("found_settlement", 2.5);
        assert_eq!(era.template_weight(&TemplateId::from("found_settlement")), 2.5);
        assert_eq!(era.template_weight(&TemplateId::from("other")), 1.0);
        assert_eq!(era.system_modifier(&SystemId::from("anything")), 1.0);
    }

    #[test]
    fn zero_weight_survives_the_builder() {
        let era = Era::new("dawn", "The Dawn").with_template_weight("disabled", 0.0);
        assert_eq!(era.template_weight(&TemplateId::from("disabled")), 0.0);
    }
}
