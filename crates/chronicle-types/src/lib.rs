//! Shared type definitions for the Chronicle world-history engine.
//!
//! This crate holds the vocabulary every other Chronicle crate speaks:
//! strongly-typed identifiers, the ordered [`Prominence`] scale, the
//! [`Entity`] and [`Relationship`] records that make up the graph, history
//! events, lore records, and the seed types used to load an initial world.
//!
//! Nothing in here knows about any particular domain. Entity kinds,
//! relationship kinds, statuses, and subtypes are all opaque keys declared
//! by a domain schema at runtime.
//!
//! [`Prominence`]: enums::Prominence
//! [`Entity`]: structs::Entity
//! [`Relationship`]: structs::Relationship

pub mod enums;
pub mod ids;
pub mod structs;

pub use enums::{
    EnrichmentMode, HistoryEventKind, LinkDirection, Mutability, Prominence, ProminenceShift,
    RelationshipStatus,
};
pub use ids::{EntityId, EntityKind, EraId, PressureId, RelationshipKind, SystemId, TemplateId};
pub use structs::{
    Entity, EntityDraft, EntityPatch, HistoryEvent, Link, LoreRecord, Relationship,
    RelationshipFields, SeedLink, EntitySeed,
};
