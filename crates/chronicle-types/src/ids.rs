//! Type-safe identifier wrappers around domain key strings.
//!
//! Every name-like value in the engine gets a strongly-typed wrapper to
//! prevent accidental mixing of, say, a relationship kind and an entity kind
//! at compile time. Unlike UUID-keyed systems, Chronicle identifiers are
//! deterministic: entity IDs are `<kind>-<serial>` with a per-kind
//! monotonically increasing serial, so two runs with the same seed produce
//! the same ID sequence.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a key [`String`] with standard derives.
macro_rules! define_key {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new key from anything string-like.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

define_key! {
    /// An entity kind declared by the domain schema (e.g. a settlement kind,
    /// a lifeform kind). The engine never interprets the string.
    EntityKind
}

define_key! {
    /// A relationship kind declared by the domain schema.
    RelationshipKind
}

define_key! {
    /// Identifier of an entity-creation template.
    TemplateId
}

define_key! {
    /// Identifier of a per-tick simulation system.
    SystemId
}

define_key! {
    /// Identifier of a pressure (scalar feedback variable).
    PressureId
}

define_key! {
    /// Identifier of an era (phase modifier).
    EraId
}

/// Stable identifier of an entity in the graph.
///
/// Engine-assigned IDs have the form `<kind>-<serial>` (for example
/// `settlement-4`). Seed data may supply arbitrary ID strings; the graph
/// only requires uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create an entity ID from an explicit string (seed data, tests).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build the engine-assigned form `<kind>-<serial>`.
    pub fn derived(kind: &EntityKind, serial: u64) -> Self {
        Self(format!("{kind}-{serial}"))
    }

    /// Return the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_kind_prefixed() {
        let kind = EntityKind::from("settlement");
        assert_eq!(EntityId::derived(&kind, 0).as_str(), "settlement-0");
        assert_eq!(EntityId::derived(&kind, 17).as_str(), "settlement-17");
    }

    #[test]
    fn keys_serialize_transparently() {
        let kind = EntityKind::from("npc");
        let json = serde_json::to_string(&kind).unwrap_or_default();
        assert_eq!(json, "\"npc\"");
    }

    #[test]
    fn keys_are_ordered_by_string() {
        let a = RelationshipKind::from("allied_with");
        let b = RelationshipKind::from("enemy_of");
        assert!(a < b);
    }
}
