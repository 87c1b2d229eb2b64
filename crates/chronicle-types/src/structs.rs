//! Core entity and relationship records for the Chronicle graph.
//!
//! Covers [`Entity`], [`Relationship`], the draft/patch types that feed
//! mutations, history events, lore records, and the seed types an initial
//! world is loaded from.

use serde::{Deserialize, Serialize};

use crate::enums::{HistoryEventKind, Prominence, RelationshipStatus};
use crate::ids::{EntityId, EntityKind, RelationshipKind};

/// Default strength for a relationship when the author did not set one.
pub const DEFAULT_STRENGTH: f64 = 0.5;

/// Maximum number of canonical (non-`name:`) tags an entity may carry.
pub const MAX_CANONICAL_TAGS: usize = 5;

/// Prefix of the tag that mirrors the entity's display name for downstream
/// consumers.
pub const NAME_TAG_PREFIX: &str = "name:";

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Mirror of one outgoing relationship, stored inline on the source entity.
///
/// The relationship list on the graph is the source of truth; links exist
/// for fast egress lookup and are kept in sync by the graph's single
/// mutation path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Kind of the mirrored relationship.
    pub kind: RelationshipKind,
    /// Destination entity of the mirrored relationship.
    pub dst: EntityId,
    /// Strength of the mirrored relationship, in `[0, 1]`.
    pub strength: f64,
    /// Whether the mirrored relationship is current or historical.
    pub status: RelationshipStatus,
}

/// A node in the world graph.
///
/// Entities are created through the graph (never constructed ad hoc by
/// domain code), are never deleted, and are mutated only through patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, unique within the graph.
    pub id: EntityId,
    /// Domain-declared kind.
    pub kind: EntityKind,
    /// Domain-declared subtype within the kind.
    pub subtype: String,
    /// Display name.
    pub name: String,
    /// Free-text description (may be replaced by enrichment downstream).
    pub description: String,
    /// Kind-specific status (e.g. `alive`, `ruined`).
    pub status: String,
    /// Narrative importance on the ordered five-step scale.
    pub prominence: Prominence,
    /// Tag set: at most [`MAX_CANONICAL_TAGS`] canonical tags plus the
    /// synced `name:` tag. No duplicates.
    pub tags: Vec<String>,
    /// Outgoing link mirror (see [`Link`]).
    pub links: Vec<Link>,
    /// Tick at which the entity entered the world.
    pub created_at: u64,
    /// Tick of the most recent mutation.
    pub updated_at: u64,
    /// Structured coordinates, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<serde_json::Value>,
    /// Cultural affiliation label, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    /// Domain-owned capability/influence descriptor, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalyst: Option<serde_json::Value>,
}

impl Entity {
    /// Age of the entity at the given tick (0 when `tick < created_at`).
    pub const fn age_at(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.created_at)
    }

    /// Whether the entity carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Normalize a tag list for an entity named `name`.
///
/// Deduplicates while preserving first-occurrence order, caps canonical tags
/// at [`MAX_CANONICAL_TAGS`], strips any stale `name:` tags, and appends the
/// single `name:<name>` mirror tag.
pub fn normalize_tags(tags: &[String], name: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        if tag.starts_with(NAME_TAG_PREFIX) {
            continue;
        }
        if out.iter().any(|t| t == tag) {
            continue;
        }
        if out.len() >= MAX_CANONICAL_TAGS {
            continue;
        }
        out.push(tag.clone());
    }
    out.push(format!("{NAME_TAG_PREFIX}{name}"));
    out
}

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

/// A directed edge in the world graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Domain-declared relationship kind.
    pub kind: RelationshipKind,
    /// Source entity.
    pub src: EntityId,
    /// Destination entity.
    pub dst: EntityId,
    /// Bond strength in `[0, 1]`; defaults to [`DEFAULT_STRENGTH`].
    pub strength: f64,
    /// Optional normalized distance in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Entity whose influence brought this relationship about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalyzed_by: Option<EntityId>,
    /// Whether the relationship is current or historical.
    #[serde(default)]
    pub status: RelationshipStatus,
}

/// Optional fields accepted when inserting a relationship.
///
/// Everything not set here falls back to the documented defaults
/// (strength [`DEFAULT_STRENGTH`], status current).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipFields {
    /// Bond strength in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    /// Normalized distance in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Catalyzing entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalyzed_by: Option<EntityId>,
    /// Current/historical marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RelationshipStatus>,
}

impl RelationshipFields {
    /// Fields with only a strength set. The common case in systems.
    pub const fn with_strength(strength: f64) -> Self {
        Self {
            strength: Some(strength),
            distance: None,
            catalyzed_by: None,
            status: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Drafts and patches
// ---------------------------------------------------------------------------

/// A partial entity produced by a template or the initial loader.
///
/// The graph fills in the ID, timestamps, tag normalization, and the
/// schema-declared default status where fields are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDraft {
    /// Domain-declared kind. Required.
    pub kind: EntityKind,
    /// Subtype within the kind. Required.
    pub subtype: String,
    /// Display name; generated by the engine's name generator when empty.
    #[serde(default)]
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Status; the schema's default status for the kind when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Prominence; [`Prominence::Marginal`] when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prominence: Option<Prominence>,
    /// Canonical tags (normalized on insert).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Structured coordinates, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<serde_json::Value>,
    /// Cultural affiliation label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    /// Domain-owned catalyst descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalyst: Option<serde_json::Value>,
}

impl EntityDraft {
    /// A minimal draft of the given kind and subtype; everything else takes
    /// the documented defaults on insert.
    pub fn new(kind: impl Into<EntityKind>, subtype: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subtype: subtype.into(),
            name: String::new(),
            description: String::new(),
            status: None,
            prominence: None,
            tags: Vec::new(),
            coordinates: None,
            culture: None,
            catalyst: None,
        }
    }

    /// Set the display name, builder-style.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A field-wise entity mutation.
///
/// There are deliberately no `id` or `created_at` fields here: those are
/// unpatchable by construction. Unset fields leave the entity unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    /// Replace the display name (re-syncs the `name:` tag).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Replace the description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Replace the subtype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Replace the status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Replace the prominence outright (systems that want stepped movement
    /// use the graph's prominence adjustment instead).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prominence: Option<Prominence>,
    /// Replace the canonical tag set (normalized on apply).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Replace the coordinates blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<serde_json::Value>,
    /// Replace the culture label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    /// Replace the catalyst descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalyst: Option<serde_json::Value>,
}

impl EntityPatch {
    /// Whether the patch changes nothing.
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.subtype.is_none()
            && self.status.is_none()
            && self.prominence.is_none()
            && self.tags.is_none()
            && self.coordinates.is_none()
            && self.culture.is_none()
            && self.catalyst.is_none()
    }

    /// A patch that only replaces the status.
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    /// A patch that only replaces the prominence.
    pub fn prominence(prominence: Prominence) -> Self {
        Self {
            prominence: Some(prominence),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// History and lore
// ---------------------------------------------------------------------------

/// One entry in the graph's ordered history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Tick at which the event was recorded.
    pub tick: u64,
    /// Epoch during which the event was recorded.
    pub epoch: u64,
    /// Event category.
    pub kind: HistoryEventKind,
    /// Human-readable summary.
    pub description: String,
    /// Entities cited by the event, in citation order.
    #[serde(default)]
    pub entities: Vec<EntityId>,
    /// Number of relationships the event brought into the world.
    #[serde(default)]
    pub relationships_added: u64,
}

/// Output of an external enrichment hook, appended to the graph.
///
/// Lore text is the one output the determinism contract does not cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreRecord {
    /// Tick at which the enrichment was scheduled.
    pub tick: u64,
    /// Hook-defined category (description, era narrative, discovery, ...).
    pub category: String,
    /// The entity the record is about, when there is a single subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<EntityId>,
    /// The enriched text.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Initial-state seeds
// ---------------------------------------------------------------------------

/// An inline link on a seed entity. The target may be another seed's name
/// or an explicit entity ID; unresolvable targets are dropped silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedLink {
    /// Relationship kind.
    pub kind: RelationshipKind,
    /// Name or ID of the target entity.
    pub target: String,
    /// Optional strength in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

/// A partial entity supplied as initial state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySeed {
    /// Explicit ID; auto-assigned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Domain-declared kind. Required.
    pub kind: EntityKind,
    /// Subtype within the kind. Required.
    pub subtype: String,
    /// Display name. Required (seed links resolve by name).
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Status; schema default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Prominence; marginal when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prominence: Option<Prominence>,
    /// Canonical tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Inline links expanded into relationships during loading.
    #[serde(default)]
    pub links: Vec<SeedLink>,
    /// Structured coordinates, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<serde_json::Value>,
    /// Cultural affiliation label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
}

impl EntitySeed {
    /// A minimal seed with the fields the loader requires.
    pub fn new(
        kind: impl Into<EntityKind>,
        subtype: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            subtype: subtype.into(),
            name: name.into(),
            description: String::new(),
            status: None,
            prominence: None,
            tags: Vec::new(),
            links: Vec::new(),
            coordinates: None,
            culture: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tag(s: &str) -> String {
        s.to_owned()
    }

    #[test]
    fn normalize_tags_deduplicates_and_appends_name_tag() {
        let tags = vec![tag("coastal"), tag("coastal"), tag("ancient")];
        let out = normalize_tags(&tags, "Brinehold");
        assert_eq!(
            out,
            vec![tag("coastal"), tag("ancient"), tag("name:Brinehold")]
        );
    }

    #[test]
    fn normalize_tags_caps_canonical_tags() {
        let tags: Vec<String> = (0..8).map(|i| format!("t{i}")).collect();
        let out = normalize_tags(&tags, "X");
        // 5 canonical tags plus the name tag.
        assert_eq!(out.len(), MAX_CANONICAL_TAGS + 1);
        assert_eq!(out.last().unwrap(), "name:X");
    }

    #[test]
    fn normalize_tags_replaces_stale_name_tag() {
        let tags = vec![tag("name:Old"), tag("windswept")];
        let out = normalize_tags(&tags, "New");
        assert_eq!(out, vec![tag("windswept"), tag("name:New")]);
    }

    #[test]
    fn empty_patch_reports_empty() {
        assert!(EntityPatch::default().is_empty());
        assert!(!EntityPatch::status("ruined").is_empty());
    }

    #[test]
    fn entity_age_saturates() {
        let entity = Entity {
            id: EntityId::from("npc-0"),
            kind: EntityKind::from("npc"),
            subtype: tag("hero"),
            name: tag("Wren"),
            description: String::new(),
            status: tag("alive"),
            prominence: Prominence::Marginal,
            tags: vec![],
            links: vec![],
            created_at: 10,
            updated_at: 10,
            coordinates: None,
            culture: None,
            catalyst: None,
        };
        assert_eq!(entity.age_at(25), 15);
        assert_eq!(entity.age_at(5), 0);
    }
}
