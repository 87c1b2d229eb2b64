//! Declarative domain schema: the data that gives the graph its meaning.
//!
//! The engine never hardcodes a domain string. Everything it needs to know
//! about a world -- which entity kinds exist, which relationships may
//! connect them, which kinds are protected from culling, which deltas the
//! change detector should narrate -- is declared here and consumed through
//! narrow query methods.
//!
//! A schema is plain data: it can be built in code, deserialized from
//! configuration, cloned, and compared. The one behavioral piece, the
//! [`NameGenerator`], lives outside the schema so the schema itself stays
//! value-typed.

use std::collections::BTreeSet;
use std::collections::BTreeMap;

use rand::Rng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use chronicle_types::{EntityKind, LinkDirection, Mutability, Prominence, RelationshipKind};

use crate::error::SchemaError;

// ---------------------------------------------------------------------------
// Kind and relationship specs
// ---------------------------------------------------------------------------

/// A structural requirement: entities of a kind should participate in a
/// relationship of the given kind, optionally only for one subtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredRelationship {
    /// The relationship kind the entity should participate in.
    pub kind: RelationshipKind,
    /// When set, the rule applies only to entities of this subtype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

/// Declaration of one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindSpec {
    /// The kind being declared.
    pub kind: EntityKind,
    /// Allowed subtypes. Drafts must use one of these.
    pub subtypes: Vec<String>,
    /// Allowed statuses. Drafts and patches must use one of these.
    pub statuses: Vec<String>,
    /// Status assigned when a draft does not set one.
    pub default_status: String,
    /// Whether the engine's aging policy applies mortality to this kind.
    #[serde(default)]
    pub mortal: bool,
    /// Whether entities of this kind get the per-entity enrichment hook.
    #[serde(default)]
    pub solo_enrichment: bool,
    /// Structural completeness rules for this kind.
    #[serde(default)]
    pub required: Vec<RequiredRelationship>,
}

impl KindSpec {
    /// Declare a kind with its subtype and status vocabulary.
    pub fn new(
        kind: impl Into<EntityKind>,
        subtypes: &[&str],
        statuses: &[&str],
        default_status: &str,
    ) -> Self {
        Self {
            kind: kind.into(),
            subtypes: subtypes.iter().map(|s| (*s).to_owned()).collect(),
            statuses: statuses.iter().map(|s| (*s).to_owned()).collect(),
            default_status: default_status.to_owned(),
            mortal: false,
            solo_enrichment: false,
            required: Vec::new(),
        }
    }

    /// Mark the kind as subject to the aging policy's mortality rule.
    #[must_use]
    pub const fn mortal(mut self) -> Self {
        self.mortal = true;
        self
    }

    /// Mark the kind for per-entity enrichment.
    #[must_use]
    pub const fn solo_enrichment(mut self) -> Self {
        self.solo_enrichment = true;
        self
    }

    /// Add a structural requirement.
    #[must_use]
    pub fn requires(mut self, kind: impl Into<RelationshipKind>, subtype: Option<&str>) -> Self {
        self.required.push(RequiredRelationship {
            kind: kind.into(),
            subtype: subtype.map(str::to_owned),
        });
        self
    }
}

/// Declaration of one relationship kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    /// The relationship kind being declared.
    pub kind: RelationshipKind,
    /// Entity kinds allowed as the edge source.
    pub source_kinds: Vec<EntityKind>,
    /// Entity kinds allowed as the edge destination.
    pub dest_kinds: Vec<EntityKind>,
    /// Whether the relationship is a fixed fact or a changeable bond.
    pub mutability: Mutability,
    /// Whether culling must never remove this kind.
    #[serde(default)]
    pub protected: bool,
}

impl RelationshipSpec {
    /// Declare a mutable, unprotected relationship kind.
    pub fn new(
        kind: impl Into<RelationshipKind>,
        source_kinds: &[&str],
        dest_kinds: &[&str],
    ) -> Self {
        Self {
            kind: kind.into(),
            source_kinds: source_kinds.iter().map(|s| EntityKind::from(*s)).collect(),
            dest_kinds: dest_kinds.iter().map(|s| EntityKind::from(*s)).collect(),
            mutability: Mutability::Mutable,
            protected: false,
        }
    }

    /// Mark the kind as an immutable fact (never culled).
    #[must_use]
    pub const fn immutable(mut self) -> Self {
        self.mutability = Mutability::Immutable;
        self
    }

    /// Mark the kind as protected from culling.
    #[must_use]
    pub const fn protected(mut self) -> Self {
        self.protected = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Change watchlist
// ---------------------------------------------------------------------------

/// One observation rule for the change detector.
///
/// Every variant names the relationship kind it observes, the direction to
/// follow from the watched entity (per the engine-wide [`LinkDirection`]
/// convention), and a display label used in the emitted change strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum WatchRule {
    /// Count of related entities; emits when the count moves by at least
    /// `min_delta` (a population-style observation).
    Population {
        /// Observed relationship kind.
        kind: RelationshipKind,
        /// Direction to follow from the watched entity.
        direction: LinkDirection,
        /// Display label ("residents", "practitioners", ...).
        label: String,
        /// Minimum absolute count change that is worth narrating.
        min_delta: u64,
    },
    /// Single counterpart; emits when the holder changes (control or
    /// leadership style observation).
    Holder {
        /// Observed relationship kind.
        kind: RelationshipKind,
        /// Direction to follow from the watched entity.
        direction: LinkDirection,
        /// Display label ("controller", "leader", ...).
        label: String,
    },
    /// Count of related entities; emits on any nonzero delta (territory
    /// style observation).
    Extent {
        /// Observed relationship kind.
        kind: RelationshipKind,
        /// Direction to follow from the watched entity.
        direction: LinkDirection,
        /// Display label ("territories", ...).
        label: String,
    },
    /// Set of related entities; emits one string per addition (alliances,
    /// wars, enforcement, spread).
    Additions {
        /// Observed relationship kind.
        kind: RelationshipKind,
        /// Direction to follow from the watched entity.
        direction: LinkDirection,
        /// Display label ("allies", "enemies", "enforcers", ...).
        label: String,
        /// When set, additions only emit while the watched entity's
        /// prominence is at least this level.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_prominence: Option<Prominence>,
    },
}

impl WatchRule {
    /// The relationship kind this rule observes.
    pub const fn relationship_kind(&self) -> &RelationshipKind {
        match self {
            Self::Population { kind, .. }
            | Self::Holder { kind, .. }
            | Self::Extent { kind, .. }
            | Self::Additions { kind, .. } => kind,
        }
    }

    /// The direction this rule follows from the watched entity.
    pub const fn direction(&self) -> LinkDirection {
        match self {
            Self::Population { direction, .. }
            | Self::Holder { direction, .. }
            | Self::Extent { direction, .. }
            | Self::Additions { direction, .. } => *direction,
        }
    }

    /// The display label used in emitted change strings.
    pub fn label(&self) -> &str {
        match self {
            Self::Population { label, .. }
            | Self::Holder { label, .. }
            | Self::Extent { label, .. }
            | Self::Additions { label, .. } => label,
        }
    }
}

/// Change-detection policy for one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSpec {
    /// The entity kind being watched.
    pub kind: EntityKind,
    /// Minimum prominence before changes are narrated. A prominence
    /// transition that reaches [`Prominence::Recognized`] always emits.
    pub emit_min_prominence: Prominence,
    /// The observations to evaluate at each epoch boundary.
    pub rules: Vec<WatchRule>,
}

impl WatchSpec {
    /// Watch a kind with no rules yet (status/prominence changes are always
    /// observed for watched kinds).
    pub fn new(kind: impl Into<EntityKind>, emit_min_prominence: Prominence) -> Self {
        Self {
            kind: kind.into(),
            emit_min_prominence,
            rules: Vec::new(),
        }
    }

    /// Add an observation rule.
    #[must_use]
    pub fn rule(mut self, rule: WatchRule) -> Self {
        self.rules.push(rule);
        self
    }
}

// ---------------------------------------------------------------------------
// The schema registry
// ---------------------------------------------------------------------------

/// The declarative registry of a domain's structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainSchema {
    /// Entity kind declarations, keyed by kind.
    pub kinds: BTreeMap<EntityKind, KindSpec>,
    /// Relationship kind declarations, keyed by kind.
    pub relationships: BTreeMap<RelationshipKind, RelationshipSpec>,
    /// Unordered pairs of mutually exclusive relationship kinds.
    #[serde(default)]
    pub contradictions: Vec<(RelationshipKind, RelationshipKind)>,
    /// Change-detection watchlist, keyed by entity kind.
    #[serde(default)]
    pub watches: BTreeMap<EntityKind, WatchSpec>,
}

impl DomainSchema {
    /// An empty schema. Populate with the `with_*` builders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity kind.
    #[must_use]
    pub fn with_kind(mut self, spec: KindSpec) -> Self {
        self.kinds.insert(spec.kind.clone(), spec);
        self
    }

    /// Register a relationship kind.
    #[must_use]
    pub fn with_relationship(mut self, spec: RelationshipSpec) -> Self {
        self.relationships.insert(spec.kind.clone(), spec);
        self
    }

    /// Declare two relationship kinds mutually exclusive on the same pair
    /// of entities.
    #[must_use]
    pub fn with_contradiction(
        mut self,
        a: impl Into<RelationshipKind>,
        b: impl Into<RelationshipKind>,
    ) -> Self {
        self.contradictions.push((a.into(), b.into()));
        self
    }

    /// Register a change watchlist entry.
    #[must_use]
    pub fn with_watch(mut self, spec: WatchSpec) -> Self {
        self.watches.insert(spec.kind.clone(), spec);
        self
    }

    /// Look up an entity kind declaration.
    pub fn kind(&self, kind: &EntityKind) -> Option<&KindSpec> {
        self.kinds.get(kind)
    }

    /// Look up a relationship kind declaration.
    pub fn relationship(&self, kind: &RelationshipKind) -> Option<&RelationshipSpec> {
        self.relationships.get(kind)
    }

    /// Look up the watchlist entry for an entity kind.
    pub fn watch(&self, kind: &EntityKind) -> Option<&WatchSpec> {
        self.watches.get(kind)
    }

    /// Whether the `(source kind, relationship kind, destination kind)`
    /// triple is permitted.
    pub fn allows(
        &self,
        source: &EntityKind,
        relationship: &RelationshipKind,
        dest: &EntityKind,
    ) -> bool {
        self.relationships.get(relationship).is_some_and(|spec| {
            spec.source_kinds.contains(source) && spec.dest_kinds.contains(dest)
        })
    }

    /// Whether culling must never remove relationships of this kind.
    pub fn is_protected(&self, kind: &RelationshipKind) -> bool {
        self.relationships
            .get(kind)
            .is_some_and(|spec| spec.protected)
    }

    /// Whether the kind is an immutable fact (never culled).
    pub fn is_immutable(&self, kind: &RelationshipKind) -> bool {
        self.relationships
            .get(kind)
            .is_some_and(|spec| spec.mutability == Mutability::Immutable)
    }

    /// All protected relationship kinds, in key order.
    pub fn protected_kinds(&self) -> Vec<RelationshipKind> {
        self.relationships
            .values()
            .filter(|spec| spec.protected)
            .map(|spec| spec.kind.clone())
            .collect()
    }

    /// All immutable relationship kinds, in key order.
    pub fn immutable_kinds(&self) -> Vec<RelationshipKind> {
        self.relationships
            .values()
            .filter(|spec| spec.mutability == Mutability::Immutable)
            .map(|spec| spec.kind.clone())
            .collect()
    }

    /// Whether two relationship kinds are declared mutually exclusive.
    pub fn contradicts(&self, a: &RelationshipKind, b: &RelationshipKind) -> bool {
        self.contradictions
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a))
    }

    /// Validate internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found: undeclared kinds referenced
    /// by relationship specs, default statuses missing from status lists,
    /// contradiction or watchlist entries naming unknown kinds, or
    /// required-relationship rules naming unknown relationship kinds.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for spec in self.kinds.values() {
            if !spec.statuses.contains(&spec.default_status) {
                return Err(SchemaError::DefaultStatusNotDeclared {
                    kind: spec.kind.clone(),
                    status: spec.default_status.clone(),
                });
            }
            for rule in &spec.required {
                if !self.relationships.contains_key(&rule.kind) {
                    return Err(SchemaError::UndeclaredRequirement {
                        kind: spec.kind.clone(),
                        relationship: rule.kind.clone(),
                    });
                }
            }
        }

        for spec in self.relationships.values() {
            for kind in spec.source_kinds.iter().chain(spec.dest_kinds.iter()) {
                if !self.kinds.contains_key(kind) {
                    return Err(SchemaError::UndeclaredKind {
                        relationship: spec.kind.clone(),
                        kind: kind.clone(),
                    });
                }
            }
        }

        for (a, b) in &self.contradictions {
            for kind in [a, b] {
                if !self.relationships.contains_key(kind) {
                    return Err(SchemaError::UndeclaredRelationship { kind: kind.clone() });
                }
            }
        }

        for watch in self.watches.values() {
            if !self.kinds.contains_key(&watch.kind) {
                return Err(SchemaError::UndeclaredWatchTarget {
                    what: "entity kind",
                    name: watch.kind.to_string(),
                });
            }
            for rule in &watch.rules {
                if !self.relationships.contains_key(rule.relationship_kind()) {
                    return Err(SchemaError::UndeclaredWatchTarget {
                        what: "relationship kind",
                        name: rule.relationship_kind().to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Name generation
// ---------------------------------------------------------------------------

/// Produces display names for drafts that arrive unnamed.
pub trait NameGenerator: Send + Sync {
    /// Generate a name for a new entity of the given kind and subtype.
    ///
    /// `taken` holds the names already present in the graph; generators
    /// should avoid them where they can.
    fn name_for(
        &self,
        kind: &EntityKind,
        subtype: &str,
        taken: &BTreeSet<String>,
        rng: &mut dyn RngCore,
    ) -> String;
}

/// Default name pool used by [`PoolNameGenerator::default`].
const DEFAULT_NAME_POOL: &[&str] = &[
    "Alder", "Brine", "Cinder", "Drift", "Ember", "Frost", "Gale", "Hollow",
    "Isle", "Jarl", "Krill", "Lumen", "Mire", "Nadir", "Opal", "Pyre",
    "Quarry", "Rime", "Sable", "Tarn", "Umber", "Vesper", "Wake", "Yonder",
    "Zenith", "Ashen", "Boreal", "Crag", "Dune", "Eyrie", "Fjord", "Glint",
];

/// Picks names from a fixed pool, preferring unused entries and falling
/// back to a random numeric suffix when the pool is exhausted.
#[derive(Debug, Clone)]
pub struct PoolNameGenerator {
    /// The candidate names.
    pool: Vec<String>,
}

impl PoolNameGenerator {
    /// Build a generator over an explicit pool.
    pub fn new(pool: &[&str]) -> Self {
        Self {
            pool: pool.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl Default for PoolNameGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_POOL)
    }
}

impl NameGenerator for PoolNameGenerator {
    fn name_for(
        &self,
        _kind: &EntityKind,
        _subtype: &str,
        taken: &BTreeSet<String>,
        rng: &mut dyn RngCore,
    ) -> String {
        let available: Vec<&String> = self.pool.iter().filter(|n| !taken.contains(*n)).collect();
        if available.is_empty() {
            // Pool exhausted: reuse a pool entry with a numeric suffix.
            let base = pick(&self.pool, rng).cloned().unwrap_or_else(|| "Nameless".to_owned());
            let suffix: u32 = rng.random_range(1000..9999);
            return format!("{base}-{suffix}");
        }
        pick(&available, rng)
            .map(|n| (*n).clone())
            .unwrap_or_else(|| "Nameless".to_owned())
    }
}

/// Uniform random pick from a slice. `None` only for an empty slice.
fn pick<'a, T>(items: &'a [T], rng: &mut dyn RngCore) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    let idx = rng.random_range(0..items.len());
    items.get(idx)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// A minimal two-kind schema used across these tests.
    fn small_schema() -> DomainSchema {
        DomainSchema::new()
            .with_kind(KindSpec::new(
                "settlement",
                &["village", "fortress"],
                &["thriving", "ruined"],
                "thriving",
            ))
            .with_kind(KindSpec::new("npc", &["hero"], &["alive", "dead"], "alive").mortal())
            .with_relationship(RelationshipSpec::new(
                "resident_of",
                &["npc"],
                &["settlement"],
            ))
            .with_relationship(
                RelationshipSpec::new("founded_by", &["settlement"], &["npc"]).protected(),
            )
    }

    #[test]
    fn valid_schema_passes_validation() {
        assert!(small_schema().validate().is_ok());
    }

    #[test]
    fn triple_permission_checks_both_endpoints() {
        let schema = small_schema();
        let npc = EntityKind::from("npc");
        let settlement = EntityKind::from("settlement");
        let resident = RelationshipKind::from("resident_of");
        assert!(schema.allows(&npc, &resident, &settlement));
        assert!(!schema.allows(&settlement, &resident, &npc));
    }

    #[test]
    fn undeclared_kind_in_relationship_fails_validation() {
        let schema = small_schema().with_relationship(RelationshipSpec::new(
            "haunts",
            &["ghost"],
            &["settlement"],
        ));
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::UndeclaredKind { .. })
        ));
    }

    #[test]
    fn default_status_must_be_declared() {
        let schema = DomainSchema::new().with_kind(KindSpec::new(
            "relic",
            &["blade"],
            &["intact"],
            "shattered",
        ));
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::DefaultStatusNotDeclared { .. })
        ));
    }

    #[test]
    fn contradiction_matrix_is_symmetric() {
        let schema = small_schema()
            .with_relationship(RelationshipSpec::new("allied_with", &["npc"], &["npc"]))
            .with_relationship(RelationshipSpec::new("enemy_of", &["npc"], &["npc"]))
            .with_contradiction("allied_with", "enemy_of");
        let a = RelationshipKind::from("allied_with");
        let b = RelationshipKind::from("enemy_of");
        assert!(schema.contradicts(&a, &b));
        assert!(schema.contradicts(&b, &a));
        assert!(!schema.contradicts(&a, &a));
    }

    #[test]
    fn protected_and_immutable_listings() {
        let schema = small_schema().with_relationship(
            RelationshipSpec::new("discovered", &["npc"], &["settlement"]).immutable(),
        );
        assert_eq!(
            schema.protected_kinds(),
            vec![RelationshipKind::from("founded_by")]
        );
        assert_eq!(
            schema.immutable_kinds(),
            vec![RelationshipKind::from("discovered")]
        );
    }

    #[test]
    fn pool_generator_avoids_taken_names() {
        let generator = PoolNameGenerator::new(&["Ash", "Bay"]);
        let mut rng = StdRng::seed_from_u64(0);
        let mut taken = BTreeSet::new();
        taken.insert("Ash".to_owned());
        let kind = EntityKind::from("npc");
        let name = generator.name_for(&kind, "hero", &taken, &mut rng);
        assert_eq!(name, "Bay");
    }

    #[test]
    fn pool_generator_suffixes_when_exhausted() {
        let generator = PoolNameGenerator::new(&["Ash"]);
        let mut rng = StdRng::seed_from_u64(0);
        let mut taken = BTreeSet::new();
        taken.insert("Ash".to_owned());
        let kind = EntityKind::from("npc");
        let name = generator.name_for(&kind, "hero", &taken, &mut rng);
        assert!(name.starts_with("Ash-"));
    }
}
