//! Engine-level error types.
//!
//! The propagation policy is deliberate: configuration problems fail fast
//! at construction, while template, system, and hook failures during a run
//! are caught, logged, and counted -- a run always returns a graph.

use chronicle_types::ids::{EraId, PressureId, SystemId, TemplateId};
use chronicle_graph::error::{GraphError, SchemaError};

/// Errors that abort engine construction or, exceptionally, a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The domain schema is internally inconsistent.
    #[error("invalid domain schema: {source}")]
    Schema {
        /// The underlying schema error.
        #[from]
        source: SchemaError,
    },

    /// No eras were supplied; the engine cannot select a phase.
    #[error("at least one era is required")]
    NoEras,

    /// An era references a template the engine does not know.
    #[error("era {era} references unknown template {template}")]
    UnknownTemplate {
        /// The referencing era.
        era: EraId,
        /// The unknown template ID.
        template: TemplateId,
    },

    /// An era references a system the engine does not know.
    #[error("era {era} references unknown system {system}")]
    UnknownSystem {
        /// The referencing era.
        era: EraId,
        /// The unknown system ID.
        system: SystemId,
    },

    /// An era references a pressure the engine does not know.
    #[error("era {era} references unknown pressure {pressure}")]
    UnknownPressure {
        /// The referencing era.
        era: EraId,
        /// The unknown pressure ID.
        pressure: PressureId,
    },

    /// A distribution-feedback rule references a pressure the engine does
    /// not know.
    #[error("distribution feedback references unknown pressure {pressure}")]
    UnknownFeedbackPressure {
        /// The unknown pressure ID.
        pressure: PressureId,
    },

    /// An initial-state seed was rejected by the graph.
    #[error("invalid initial entity {name:?}: {source}")]
    InvalidSeed {
        /// Display name of the offending seed.
        name: String,
        /// The underlying graph error.
        source: GraphError,
    },

    /// Two templates or systems share an ID.
    #[error("duplicate {what} id: {id}")]
    DuplicateId {
        /// Whether a template or a system collided.
        what: &'static str,
        /// The colliding ID.
        id: String,
    },
}
