//! Typed entity-relationship store and domain schema for Chronicle.
//!
//! This crate owns the two structural halves of the engine:
//!
//! - [`schema`] -- the declarative [`DomainSchema`]: entity kinds with their
//!   subtypes and statuses, relationship kinds with their endpoint matrix,
//!   mutability and protection flags, the contradiction matrix, the change
//!   watchlist, and the [`NameGenerator`] used for unnamed drafts.
//! - [`store`] -- the [`Graph`] arena: exclusive owner of all entities and
//!   relationships, the history log, cooldown table, pressure values, lore
//!   records, and the protected-violation log.
//!
//! Domain meaning lives entirely in schema data. The store enforces
//! *structural* invariants only: endpoint existence, schema-permitted kind
//! triples, link-mirror consistency, clamped prominence steps, and the
//! never-delete entity lifecycle.
//!
//! [`DomainSchema`]: schema::DomainSchema
//! [`NameGenerator`]: schema::NameGenerator
//! [`Graph`]: store::Graph

pub mod error;
pub mod schema;
pub mod store;

pub use error::{GraphError, SchemaError};
pub use schema::{
    DomainSchema, KindSpec, NameGenerator, PoolNameGenerator, RelationshipSpec,
    RequiredRelationship, WatchRule, WatchSpec,
};
pub use store::{EntityFilter, Graph, GraphProjection, ProtectedViolation};
