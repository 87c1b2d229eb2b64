//! Epoch orchestration for the Chronicle world-history engine.
//!
//! This crate owns the outer loop that grows and simulates a world graph:
//!
//! - [`config`] -- strongly-typed engine configuration with YAML loading.
//! - [`pressure`] -- scalar feedback variables with growth/decay laws,
//!   diminishing returns, and epoch smoothing.
//! - [`era`] -- epoch-indexed phase modifiers over templates, systems, and
//!   pressures.
//! - [`template`] -- the entity-creation runtime: gates, target selection,
//!   expansion with positional placeholder resolution, growth targets.
//! - [`system`] -- the per-tick rule runtime: recorded write-buffers,
//!   relationship budgets, aggression warnings.
//! - [`culling`] -- the always-present relationship-pruning pass.
//! - [`distribution`] / [`selector`] -- statistical shape measurement,
//!   deviation from targets, and the weighting it applies to template and
//!   system selection.
//! - [`change`] -- kind-specific snapshots and epoch-boundary change
//!   narration.
//! - [`stats`] -- per-epoch records and the end-of-run fitness report.
//! - [`enrich`] -- the async side-effect hook surface and its
//!   fire-and-forget queue.
//! - [`engine`] -- [`WorldEngine`], the orchestrator tying it together.
//!
//! A single run is deterministic given `(config, initial state, seed)`:
//! entity IDs, relationships, history events, and statistics are
//! byte-identical across runs. Enrichment hooks affect lore text only.
//!
//! [`WorldEngine`]: engine::WorldEngine

pub mod change;
pub mod config;
pub mod culling;
pub mod distribution;
pub mod engine;
pub mod enrich;
pub mod era;
pub mod error;
pub mod pressure;
pub mod selector;
pub mod stats;
pub mod system;
pub mod template;

pub use config::EngineConfig;
pub use engine::{EngineSpec, RunSummary, WorldEngine};
pub use enrich::{EnrichmentContext, EnrichmentHooks};
pub use era::Era;
pub use pressure::{PressureDef, PressureGrowth};
pub use stats::{SimulationStatistics, ValidationResults};
pub use system::{System, SystemMetadata, SystemOutcome};
pub use template::{Template, TemplateExpansion, TemplateMetadata};
