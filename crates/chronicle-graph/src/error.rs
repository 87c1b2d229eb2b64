//! Error types for the graph store and domain schema.

use chronicle_types::{EntityId, EntityKind, RelationshipKind};

/// Errors raised by [`Graph`] mutations.
///
/// A rejected mutation leaves the graph exactly as it was; the run is
/// expected to continue after logging the diagnostic.
///
/// [`Graph`]: crate::store::Graph
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The referenced entity does not exist in the graph.
    #[error("unknown entity: {id}")]
    UnknownEntity {
        /// The missing entity's ID.
        id: EntityId,
    },

    /// An entity with this ID already exists.
    #[error("duplicate entity id: {id}")]
    DuplicateEntity {
        /// The colliding ID.
        id: EntityId,
    },

    /// A draft or patch names a kind, subtype, or status the domain schema
    /// does not declare.
    #[error("invalid entity: {reason}")]
    InvalidEntity {
        /// What exactly the schema rejected.
        reason: String,
    },

    /// A structural invariant would be violated by the mutation.
    #[error("invariant violation: {reason}")]
    InvariantViolation {
        /// Which invariant, and where.
        reason: String,
    },
}

/// Errors raised by [`DomainSchema`] validation.
///
/// These are configuration errors: they fail fast at engine construction.
///
/// [`DomainSchema`]: crate::schema::DomainSchema
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A relationship spec references an entity kind that is not declared.
    #[error("relationship {relationship} references undeclared entity kind {kind}")]
    UndeclaredKind {
        /// The offending relationship kind.
        relationship: RelationshipKind,
        /// The entity kind that is missing from the registry.
        kind: EntityKind,
    },

    /// A kind's default status is not in its status list.
    #[error("kind {kind} default status {status:?} is not in its status list")]
    DefaultStatusNotDeclared {
        /// The offending entity kind.
        kind: EntityKind,
        /// The default status that is missing.
        status: String,
    },

    /// The contradiction matrix references an undeclared relationship kind.
    #[error("contradiction matrix references undeclared relationship kind {kind}")]
    UndeclaredRelationship {
        /// The relationship kind that is missing from the registry.
        kind: RelationshipKind,
    },

    /// A required-relationship rule references an undeclared relationship
    /// kind.
    #[error("kind {kind} requires undeclared relationship kind {relationship}")]
    UndeclaredRequirement {
        /// The entity kind carrying the rule.
        kind: EntityKind,
        /// The relationship kind that is missing.
        relationship: RelationshipKind,
    },

    /// The change watchlist references an undeclared kind.
    #[error("watchlist entry references undeclared {what}: {name}")]
    UndeclaredWatchTarget {
        /// Whether an entity kind or relationship kind is missing.
        what: &'static str,
        /// The missing key.
        name: String,
    },
}
