//! Pressures: named scalars in `[0, 100]` with growth and decay laws.
//!
//! Pressures are the feedback spine of the engine. Each epoch, every
//! pressure's growth function reads the graph, the raw growth is scaled by
//! diminishing returns as the value approaches 100, decay and the era
//! modifier are applied, distribution feedback is added, and the final
//! delta is smoothed to at most ±15 before the value clamps to `[0, 100]`.
//!
//! Systems can also push pressure deltas mid-epoch; those apply with the
//! range clamp only -- smoothing is an epoch-boundary rule.

use std::collections::BTreeMap;

use tracing::debug;

use chronicle_graph::store::Graph;
use chronicle_types::PressureId;

/// Largest absolute pressure change one epoch update may apply.
pub const MAX_EPOCH_DELTA: f64 = 15.0;

/// Floor of the diminishing-returns scale factor.
const SCALE_FLOOR: f64 = 0.1;

/// Computes a pressure's raw per-epoch growth from the graph.
///
/// Implemented for plain closures, so domains can write
/// `|graph: &Graph| ...` and parametric forms can be swapped in by an
/// outer tuning loop.
pub trait PressureGrowth: Send + Sync {
    /// Raw growth for this epoch; negative results are treated as 0.
    fn compute(&self, graph: &Graph) -> f64;
}

impl<F> PressureGrowth for F
where
    F: Fn(&Graph) -> f64 + Send + Sync,
{
    fn compute(&self, graph: &Graph) -> f64 {
        self(graph)
    }
}

/// Definition of one pressure.
pub struct PressureDef {
    /// The pressure's identifier.
    pub id: PressureId,
    /// Starting value, clamped to `[0, 100]` on initialization.
    pub initial: f64,
    /// Per-epoch decay, subtracted from scaled growth. Never negative.
    pub decay: f64,
    /// The growth law.
    pub growth: Box<dyn PressureGrowth>,
}

impl PressureDef {
    /// Define a pressure from its parts.
    pub fn new(
        id: impl Into<PressureId>,
        initial: f64,
        decay: f64,
        growth: impl PressureGrowth + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            initial,
            decay: decay.max(0.0),
            growth: Box::new(growth),
        }
    }

    /// A pressure with no growth of its own (moved only by systems,
    /// feedback, and decay).
    pub fn inert(id: impl Into<PressureId>, initial: f64, decay: f64) -> Self {
        Self::new(id, initial, decay, |_: &Graph| 0.0)
    }
}

impl core::fmt::Debug for PressureDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PressureDef")
            .field("id", &self.id)
            .field("initial", &self.initial)
            .field("decay", &self.decay)
            .finish_non_exhaustive()
    }
}

/// Run the per-epoch pressure update over every definition, in definition
/// order.
///
/// `era_modifiers` multiplies the net delta (default 1.0);
/// `feedback` adds the distribution-feedback bump (default 0.0).
pub fn update_pressures(
    graph: &mut Graph,
    defs: &[PressureDef],
    era_modifiers: &BTreeMap<PressureId, f64>,
    feedback: &BTreeMap<PressureId, f64>,
) {
    for def in defs {
        let value = graph.pressure(&def.id).unwrap_or(def.initial);
        let raw = def.growth.compute(graph).max(0.0);
        let scaled = raw * diminishing_scale(value);
        let era_modifier = era_modifiers.get(&def.id).copied().unwrap_or(1.0);
        let bump = feedback.get(&def.id).copied().unwrap_or(0.0);
        let delta = ((scaled - def.decay) * era_modifier + bump)
            .clamp(-MAX_EPOCH_DELTA, MAX_EPOCH_DELTA);
        let next = (value + delta).clamp(0.0, 100.0);
        debug!(pressure = %def.id, value, raw, scaled, delta, next, "pressure updated");
        graph.set_pressure(def.id.clone(), next);
    }
}

/// Apply pressure deltas accumulated from systems during a tick.
///
/// Values clamp to `[0, 100]`; unknown pressures are created at the delta
/// from zero (a system may reference a pressure before its first epoch
/// update).
pub fn apply_system_deltas(graph: &mut Graph, pending: &BTreeMap<PressureId, f64>) {
    for (id, delta) in pending {
        let value = graph.pressure(id).unwrap_or(0.0);
        graph.set_pressure(id.clone(), (value + delta).clamp(0.0, 100.0));
    }
}

/// Diminishing-returns scale: `max(0.1, 1 - (value/100)^2)`.
fn diminishing_scale(value: f64) -> f64 {
    let ratio = value / 100.0;
    (1.0 - ratio * ratio).max(SCALE_FLOOR)
}

/// Seed every pressure's initial value into the graph.
pub fn initialize_pressures(graph: &mut Graph, defs: &[PressureDef]) {
    for def in defs {
        graph.set_pressure(def.id.clone(), def.initial.clamp(0.0, 100.0));
    }
}
