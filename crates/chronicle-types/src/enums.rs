//! Closed enumerations shared across the engine.
//!
//! The only ordered scale in the engine is [`Prominence`]; everything else
//! here is a small tag enum. Domain-extensible vocabularies (entity kinds,
//! statuses, subtypes) are deliberately *not* enums -- they are opaque keys
//! declared by the domain schema.

use serde::{Deserialize, Serialize};

/// Ordered level of narrative importance.
///
/// The ordering `Forgotten < Marginal < Recognized < Renowned < Mythic` is
/// load-bearing: prominence adjustments move exactly one step per call and
/// clamp at the extremes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Prominence {
    /// Dropped out of the world's living memory.
    Forgotten,
    /// Exists, but nobody tells stories about it.
    Marginal,
    /// Known within its own corner of the world.
    Recognized,
    /// Known across the world.
    Renowned,
    /// The stuff of legend.
    Mythic,
}

impl Prominence {
    /// All levels in ascending order.
    pub const ALL: [Self; 5] = [
        Self::Forgotten,
        Self::Marginal,
        Self::Recognized,
        Self::Renowned,
        Self::Mythic,
    ];

    /// One step up the scale, clamped at [`Prominence::Mythic`].
    pub const fn raised(self) -> Self {
        match self {
            Self::Forgotten => Self::Marginal,
            Self::Marginal => Self::Recognized,
            Self::Recognized => Self::Renowned,
            Self::Renowned | Self::Mythic => Self::Mythic,
        }
    }

    /// One step down the scale, clamped at [`Prominence::Forgotten`].
    pub const fn lowered(self) -> Self {
        match self {
            Self::Mythic => Self::Renowned,
            Self::Renowned => Self::Recognized,
            Self::Recognized => Self::Marginal,
            Self::Marginal | Self::Forgotten => Self::Forgotten,
        }
    }

    /// Stable lowercase label, matching the serde representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forgotten => "forgotten",
            Self::Marginal => "marginal",
            Self::Recognized => "recognized",
            Self::Renowned => "renowned",
            Self::Mythic => "mythic",
        }
    }
}

/// Direction of a single prominence adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProminenceShift {
    /// Move one step up the scale.
    Raise,
    /// Move one step down the scale.
    Lower,
}

/// Whether a relationship describes the present or a superseded past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStatus {
    /// The relationship holds right now.
    #[default]
    Current,
    /// The relationship held once and is retained as history.
    Historical,
}

/// Whether a relationship kind represents a changeable bond or a fixed fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    /// A fixed fact (spatial placement, a discovery). Never culled.
    Immutable,
    /// A bond that can strengthen, weaken, or be culled.
    Mutable,
}

/// Traversal direction for link queries.
///
/// This is the committed convention for the whole engine:
/// [`LinkDirection::Outgoing`] follows edges where the queried entity is the
/// *source* and yields destinations; [`LinkDirection::Incoming`] follows
/// edges where the queried entity is the *destination* and yields sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    /// The queried entity is the edge source; yields `dst` endpoints.
    Outgoing,
    /// The queried entity is the edge destination; yields `src` endpoints.
    Incoming,
}

/// How much enrichment work the host wants scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMode {
    /// No hook invocations are scheduled. Counters still accumulate.
    #[default]
    Off,
    /// Capped invocations for the most valuable enrichment classes.
    Partial,
    /// Every enrichment opportunity is forwarded to the hooks.
    Full,
}

/// Category of an entry in the graph's history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventKind {
    /// The run started and the initial world was seeded.
    WorldInitialized,
    /// A single entity entered the world.
    EntityCreated,
    /// A template fired during a growth phase.
    TemplateApplied,
    /// A simulation tick changed the world.
    SimulationTick,
    /// The active era changed between epochs.
    EraTransition,
    /// A culling pass removed weak relationships.
    RelationshipsCulled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prominence_is_ordered() {
        assert!(Prominence::Forgotten < Prominence::Marginal);
        assert!(Prominence::Renowned < Prominence::Mythic);
    }

    #[test]
    fn raised_clamps_at_mythic() {
        assert_eq!(Prominence::Mythic.raised(), Prominence::Mythic);
        assert_eq!(Prominence::Renowned.raised(), Prominence::Mythic);
    }

    #[test]
    fn lowered_clamps_at_forgotten() {
        assert_eq!(Prominence::Forgotten.lowered(), Prominence::Forgotten);
        assert_eq!(Prominence::Marginal.lowered(), Prominence::Forgotten);
    }

    #[test]
    fn prominence_serializes_lowercase() {
        let json = serde_json::to_string(&Prominence::Renowned).unwrap_or_default();
        assert_eq!(json, "\"renowned\"");
    }
}
