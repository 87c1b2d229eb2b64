//! The graph store: exclusive owner of all entities and relationships.
//!
//! The relationship list is the single source of truth; the per-entity
//! `links` vectors are a mirror for fast egress lookup and are kept in sync
//! by routing every mutation through [`Graph::add_relationship`] and
//! [`Graph::remove_relationships`]. Entities are never deleted -- they fade
//! to `forgotten` prominence or a dead status but stay addressable.
//!
//! Iteration contracts: entities iterate in insertion order, relationships
//! in insertion order, and every keyed collection is a `BTreeMap`, so a
//! whole-graph walk is deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use chronicle_types::structs::{DEFAULT_STRENGTH, normalize_tags};
use chronicle_types::{
    Entity, EntityDraft, EntityId, EntityKind, EntityPatch, EraId, HistoryEvent,
    HistoryEventKind, Link, LinkDirection, LoreRecord, PressureId, Prominence, ProminenceShift,
    Relationship, RelationshipFields, RelationshipKind, RelationshipStatus,
};

use crate::error::GraphError;
use crate::schema::DomainSchema;

/// How many ticks of per-tick creation counts the growth window retains.
const GROWTH_WINDOW_RETENTION: u64 = 256;

// ---------------------------------------------------------------------------
// Query and report types
// ---------------------------------------------------------------------------

/// Equality filter for [`Graph::find_entities`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    /// Match this kind.
    pub kind: Option<EntityKind>,
    /// Match this subtype.
    pub subtype: Option<String>,
    /// Match this status.
    pub status: Option<String>,
}

impl EntityFilter {
    /// Filter by kind.
    pub fn kind(kind: impl Into<EntityKind>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    /// Also require this subtype.
    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Also require this status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    fn matches(&self, entity: &Entity) -> bool {
        self.kind.as_ref().is_none_or(|k| *k == entity.kind)
            && self.subtype.as_ref().is_none_or(|s| *s == entity.subtype)
            && self.status.as_ref().is_none_or(|s| *s == entity.status)
    }
}

/// A protected or immutable relationship observed below the cull threshold.
///
/// Recorded for GA diagnostics; the relationship itself is never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedViolation {
    /// Tick at which the violation was observed.
    pub tick: u64,
    /// Kind of the protected relationship.
    pub kind: RelationshipKind,
    /// Edge source.
    pub src: EntityId,
    /// Edge destination.
    pub dst: EntityId,
    /// Observed strength, below the cull threshold.
    pub strength: f64,
}

/// Node of the `{nodes, edges}` export projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionNode {
    /// Entity ID.
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Display name.
    pub name: String,
    /// Prominence level.
    pub prominence: Prominence,
}

/// Edge of the `{nodes, edges}` export projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionEdge {
    /// Edge source.
    pub src: EntityId,
    /// Edge destination.
    pub dst: EntityId,
    /// Relationship kind.
    pub kind: RelationshipKind,
    /// Bond strength.
    pub strength: f64,
}

/// A GraphViz-style projection of the graph for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphProjection {
    /// All entities, in insertion order.
    pub nodes: Vec<ProjectionNode>,
    /// All relationships, in insertion order.
    pub edges: Vec<ProjectionEdge>,
}

// ---------------------------------------------------------------------------
// The graph
// ---------------------------------------------------------------------------

/// The typed entity-relationship arena at the heart of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    /// The domain schema every mutation is validated against.
    schema: Arc<DomainSchema>,
    /// Entity storage, keyed by ID.
    entities: BTreeMap<EntityId, Entity>,
    /// Entity IDs in insertion order (the iteration contract).
    order: Vec<EntityId>,
    /// All relationships, in insertion order. The source of truth.
    relationships: Vec<Relationship>,
    /// Current tick.
    tick: u64,
    /// Current epoch.
    epoch: u64,
    /// The active era, once the engine has selected one.
    current_era: Option<EraId>,
    /// Current pressure values, each in `[0, 100]`.
    pressures: BTreeMap<PressureId, f64>,
    /// Ordered history log.
    history: Vec<HistoryEvent>,
    /// `(entity, relationship kind) -> last formation tick`.
    cooldowns: BTreeMap<(EntityId, RelationshipKind), u64>,
    /// Lore records appended by enrichment hooks.
    lore: Vec<LoreRecord>,
    /// Protected-relationship threshold violations (diagnostics only).
    violations: Vec<ProtectedViolation>,
    /// Rolling `(tick, entities created)` window for the growth-rate alarm.
    growth_window: VecDeque<(u64, u32)>,
    /// Per-kind ID serial counters.
    serials: BTreeMap<EntityKind, u64>,
}

impl Graph {
    /// An empty graph over the given schema, at tick 0 / epoch 0.
    pub fn new(schema: Arc<DomainSchema>) -> Self {
        Self {
            schema,
            entities: BTreeMap::new(),
            order: Vec::new(),
            relationships: Vec::new(),
            tick: 0,
            epoch: 0,
            current_era: None,
            pressures: BTreeMap::new(),
            history: Vec::new(),
            cooldowns: BTreeMap::new(),
            lore: Vec::new(),
            violations: Vec::new(),
            growth_window: VecDeque::new(),
            serials: BTreeMap::new(),
        }
    }

    // -------------------------------------------------------------------
    // Clock, era, pressures
    // -------------------------------------------------------------------

    /// Current tick.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Current epoch.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Advance the tick counter by one. Returns the new tick.
    pub const fn advance_tick(&mut self) -> u64 {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    /// Advance the epoch counter by one. Returns the new epoch.
    pub const fn advance_epoch(&mut self) -> u64 {
        self.epoch = self.epoch.saturating_add(1);
        self.epoch
    }

    /// The active era, if the engine has selected one.
    pub const fn current_era(&self) -> Option<&EraId> {
        self.current_era.as_ref()
    }

    /// Set the active era.
    pub fn set_current_era(&mut self, era: EraId) {
        self.current_era = Some(era);
    }

    /// The schema this graph validates against.
    pub fn schema(&self) -> &DomainSchema {
        &self.schema
    }

    /// Current value of a pressure, if it has been initialized.
    pub fn pressure(&self, id: &PressureId) -> Option<f64> {
        self.pressures.get(id).copied()
    }

    /// All pressure values.
    pub const fn pressures(&self) -> &BTreeMap<PressureId, f64> {
        &self.pressures
    }

    /// Set a pressure value, clamped to `[0, 100]`.
    pub fn set_pressure(&mut self, id: PressureId, value: f64) {
        self.pressures.insert(id, value.clamp(0.0, 100.0));
    }

    // -------------------------------------------------------------------
    // Entity operations
    // -------------------------------------------------------------------

    /// Insert a new entity from a draft, allocating a `<kind>-<serial>` ID.
    ///
    /// Sets `created_at = updated_at = tick`, normalizes tags, applies the
    /// schema default status when the draft has none, emits an
    /// `EntityCreated` history event, and notes the creation in the growth
    /// window.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidEntity`] if the draft's kind, subtype,
    /// or status is not declared by the schema.
    pub fn add_entity(&mut self, draft: EntityDraft) -> Result<EntityId, GraphError> {
        let id = self.allocate_id(&draft.kind);
        self.insert_entity(id, draft)
    }

    /// Insert a new entity under an explicit ID (initial-state loading).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateEntity`] if the ID is taken, or
    /// [`GraphError::InvalidEntity`] for schema violations.
    pub fn add_entity_with_id(
        &mut self,
        id: EntityId,
        draft: EntityDraft,
    ) -> Result<EntityId, GraphError> {
        if self.entities.contains_key(&id) {
            return Err(GraphError::DuplicateEntity { id });
        }
        self.insert_entity(id, draft)
    }

    /// Merge a patch into an existing entity.
    ///
    /// Unset fields are left unchanged. The ID and creation tick are not
    /// patchable. A name change re-syncs the `name:` tag; `updated_at` is
    /// bumped even for an empty patch.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownEntity`] if the entity does not exist,
    /// or [`GraphError::InvalidEntity`] if a patched subtype or status is
    /// not declared for the entity's kind.
    pub fn update_entity(&mut self, id: &EntityId, patch: EntityPatch) -> Result<(), GraphError> {
        let kind = self
            .entities
            .get(id)
            .map(|e| e.kind.clone())
            .ok_or_else(|| GraphError::UnknownEntity { id: id.clone() })?;

        if let Some(spec) = self.schema.kind(&kind) {
            if let Some(subtype) = &patch.subtype
                && !spec.subtypes.contains(subtype)
            {
                return Err(GraphError::InvalidEntity {
                    reason: format!("subtype {subtype:?} not declared for kind {kind}"),
                });
            }
            if let Some(status) = &patch.status
                && !spec.statuses.contains(status)
            {
                return Err(GraphError::InvalidEntity {
                    reason: format!("status {status:?} not declared for kind {kind}"),
                });
            }
        }

        let tick = self.tick;
        if let Some(entity) = self.entities.get_mut(id) {
            if let Some(name) = patch.name {
                entity.name = name;
            }
            if let Some(description) = patch.description {
                entity.description = description;
            }
            if let Some(subtype) = patch.subtype {
                entity.subtype = subtype;
            }
            if let Some(status) = patch.status {
                entity.status = status;
            }
            if let Some(prominence) = patch.prominence {
                entity.prominence = prominence;
            }
            if let Some(tags) = patch.tags {
                entity.tags = tags;
            }
            if let Some(coordinates) = patch.coordinates {
                entity.coordinates = Some(coordinates);
            }
            if let Some(culture) = patch.culture {
                entity.culture = Some(culture);
            }
            if let Some(catalyst) = patch.catalyst {
                entity.catalyst = Some(catalyst);
            }
            entity.tags = normalize_tags(&entity.tags, &entity.name);
            entity.updated_at = tick;
        }
        Ok(())
    }

    /// Move an entity's prominence exactly one step, clamped at the scale's
    /// extremes. Returns the resulting prominence.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownEntity`] if the entity does not exist.
    pub fn adjust_prominence(
        &mut self,
        id: &EntityId,
        shift: ProminenceShift,
    ) -> Result<Prominence, GraphError> {
        let tick = self.tick;
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownEntity { id: id.clone() })?;
        entity.prominence = match shift {
            ProminenceShift::Raise => entity.prominence.raised(),
            ProminenceShift::Lower => entity.prominence.lowered(),
        };
        entity.updated_at = tick;
        Ok(entity.prominence)
    }

    /// Look up an entity by ID.
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Whether an entity with this ID exists.
    pub fn contains_entity(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of entities in the graph.
    pub const fn entity_count(&self) -> usize {
        self.order.len()
    }

    /// Iterate entities in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Linear-scan filter over entities, in insertion order.
    pub fn find_entities(&self, filter: &EntityFilter) -> Vec<&Entity> {
        self.entities().filter(|e| filter.matches(e)).collect()
    }

    /// All display names currently in use (for name generation).
    pub fn names_taken(&self) -> BTreeSet<String> {
        self.entities().map(|e| e.name.clone()).collect()
    }

    /// Entity counts by kind.
    pub fn counts_by_kind(&self) -> BTreeMap<EntityKind, u64> {
        let mut counts: BTreeMap<EntityKind, u64> = BTreeMap::new();
        for entity in self.entities() {
            let slot = counts.entry(entity.kind.clone()).or_insert(0);
            *slot = slot.saturating_add(1);
        }
        counts
    }

    /// Entity counts by `kind/subtype`.
    pub fn counts_by_subtype(&self) -> BTreeMap<String, u64> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for entity in self.entities() {
            let key = format!("{}/{}", entity.kind, entity.subtype);
            let slot = counts.entry(key).or_insert(0);
            *slot = slot.saturating_add(1);
        }
        counts
    }

    /// Entity counts by prominence level.
    pub fn counts_by_prominence(&self) -> BTreeMap<Prominence, u64> {
        let mut counts: BTreeMap<Prominence, u64> = BTreeMap::new();
        for entity in self.entities() {
            let slot = counts.entry(entity.prominence).or_insert(0);
            *slot = slot.saturating_add(1);
        }
        counts
    }

    /// Relationship counts by kind.
    pub fn counts_by_relationship_kind(&self) -> BTreeMap<RelationshipKind, u64> {
        let mut counts: BTreeMap<RelationshipKind, u64> = BTreeMap::new();
        for rel in &self.relationships {
            let slot = counts.entry(rel.kind.clone()).or_insert(0);
            *slot = slot.saturating_add(1);
        }
        counts
    }

    // -------------------------------------------------------------------
    // Relationship operations
    // -------------------------------------------------------------------

    /// Insert a relationship if it passes every structural gate.
    ///
    /// Inserts iff both endpoints exist, `src != dst`, the schema permits
    /// the `(source kind, kind, destination kind)` triple, and no identical
    /// `(kind, src, dst)` edge exists. On insert, mirrors the link onto the
    /// source entity and stamps the `(src, kind)` cooldown with the current
    /// tick. Returns whether the edge was inserted.
    pub fn add_relationship(
        &mut self,
        kind: &RelationshipKind,
        src: &EntityId,
        dst: &EntityId,
        fields: RelationshipFields,
    ) -> bool {
        if src == dst {
            debug!(%kind, %src, "relationship rejected: self loop");
            return false;
        }
        let (Some(src_kind), Some(dst_kind)) = (
            self.entities.get(src).map(|e| e.kind.clone()),
            self.entities.get(dst).map(|e| e.kind.clone()),
        ) else {
            debug!(%kind, %src, %dst, "relationship rejected: missing endpoint");
            return false;
        };
        if !self.schema.allows(&src_kind, kind, &dst_kind) {
            debug!(
                %kind, %src_kind, %dst_kind,
                "relationship rejected: kind triple not permitted"
            );
            return false;
        }
        if self.has_exact_relationship(kind, src, dst) {
            return false;
        }

        let relationship = Relationship {
            kind: kind.clone(),
            src: src.clone(),
            dst: dst.clone(),
            strength: fields.strength.unwrap_or(DEFAULT_STRENGTH).clamp(0.0, 1.0),
            distance: fields.distance.map(|d| d.clamp(0.0, 1.0)),
            catalyzed_by: fields.catalyzed_by,
            status: fields.status.unwrap_or_default(),
        };

        if let Some(entity) = self.entities.get_mut(src) {
            entity.links.push(Link {
                kind: relationship.kind.clone(),
                dst: relationship.dst.clone(),
                strength: relationship.strength,
                status: relationship.status,
            });
        }
        self.cooldowns.insert((src.clone(), kind.clone()), self.tick);
        self.relationships.push(relationship);
        true
    }

    /// Whether an identical `(kind, src, dst)` edge already exists.
    pub fn has_exact_relationship(
        &self,
        kind: &RelationshipKind,
        src: &EntityId,
        dst: &EntityId,
    ) -> bool {
        self.relationships
            .iter()
            .any(|r| r.kind == *kind && r.src == *src && r.dst == *dst)
    }

    /// Whether an edge of this kind connects the two entities in either
    /// direction.
    pub fn has_relationship(&self, a: &EntityId, b: &EntityId, kind: &RelationshipKind) -> bool {
        self.has_exact_relationship(kind, a, b) || self.has_exact_relationship(kind, b, a)
    }

    /// Whether the `(entity, kind)` cooldown has elapsed: true when the
    /// entity has never formed an edge of this kind, or the last formation
    /// happened at least `cooldown_ticks` ago.
    pub fn can_form_relationship(
        &self,
        entity: &EntityId,
        kind: &RelationshipKind,
        cooldown_ticks: u64,
    ) -> bool {
        match self.cooldowns.get(&(entity.clone(), kind.clone())) {
            None => true,
            Some(last) => self.tick.saturating_sub(*last) >= cooldown_ticks,
        }
    }

    /// Whether a proposed edge of `kind` between `a` and `b` is compatible
    /// with every existing edge between the pair, per the schema's
    /// contradiction matrix.
    pub fn are_relationships_compatible(
        &self,
        a: &EntityId,
        b: &EntityId,
        kind: &RelationshipKind,
    ) -> bool {
        !self.relationships.iter().any(|r| {
            let same_pair = (r.src == *a && r.dst == *b) || (r.src == *b && r.dst == *a);
            same_pair && self.schema.contradicts(&r.kind, kind)
        })
    }

    /// Enumerate the IDs reachable from `entity` along edges of `kind` in
    /// the given direction, in relationship insertion order.
    ///
    /// [`LinkDirection::Outgoing`]: `entity` is the source; yields
    /// destinations. [`LinkDirection::Incoming`]: `entity` is the
    /// destination; yields sources.
    pub fn related(
        &self,
        entity: &EntityId,
        kind: &RelationshipKind,
        direction: LinkDirection,
    ) -> Vec<EntityId> {
        self.relationships
            .iter()
            .filter(|r| r.kind == *kind && r.status == RelationshipStatus::Current)
            .filter_map(|r| match direction {
                LinkDirection::Outgoing if r.src == *entity => Some(r.dst.clone()),
                LinkDirection::Incoming if r.dst == *entity => Some(r.src.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of edges incident to the entity, in either direction.
    pub fn degree(&self, entity: &EntityId) -> usize {
        self.relationships
            .iter()
            .filter(|r| r.src == *entity || r.dst == *entity)
            .count()
    }

    /// All relationships, in insertion order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Number of relationships.
    pub const fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Remove the relationships at the given indices (culling support).
    ///
    /// Link mirrors of affected source entities are rebuilt from the
    /// surviving relationship list, so the mirror invariant holds on
    /// return. Returns the removed relationships in their original order.
    pub fn remove_relationships(&mut self, indices: &BTreeSet<usize>) -> Vec<Relationship> {
        if indices.is_empty() {
            return Vec::new();
        }
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.relationships.len());
        for (idx, rel) in self.relationships.drain(..).enumerate() {
            if indices.contains(&idx) {
                removed.push(rel);
            } else {
                kept.push(rel);
            }
        }
        self.relationships = kept;

        let affected: BTreeSet<EntityId> = removed.iter().map(|r| r.src.clone()).collect();
        for id in affected {
            let links: Vec<Link> = self
                .relationships
                .iter()
                .filter(|r| r.src == id)
                .map(|r| Link {
                    kind: r.kind.clone(),
                    dst: r.dst.clone(),
                    strength: r.strength,
                    status: r.status,
                })
                .collect();
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.links = links;
            }
        }
        removed
    }

    /// Which schema-required relationships the entity is missing.
    ///
    /// Empty when the entity is structurally complete (or its kind has no
    /// requirements). Unknown entities report no missing requirements.
    pub fn missing_required_relationships(&self, id: &EntityId) -> Vec<RelationshipKind> {
        let Some(entity) = self.entities.get(id) else {
            return Vec::new();
        };
        let Some(spec) = self.schema.kind(&entity.kind) else {
            return Vec::new();
        };
        spec.required
            .iter()
            .filter(|rule| {
                rule.subtype
                    .as_ref()
                    .is_none_or(|subtype| *subtype == entity.subtype)
            })
            .filter(|rule| {
                !self
                    .relationships
                    .iter()
                    .any(|r| r.kind == rule.kind && (r.src == *id || r.dst == *id))
            })
            .map(|rule| rule.kind.clone())
            .collect()
    }

    // -------------------------------------------------------------------
    // History, lore, diagnostics
    // -------------------------------------------------------------------

    /// Append a history event stamped with the current tick and epoch.
    pub fn record_event(
        &mut self,
        kind: HistoryEventKind,
        description: impl Into<String>,
        entities: Vec<EntityId>,
        relationships_added: u64,
    ) {
        self.history.push(HistoryEvent {
            tick: self.tick,
            epoch: self.epoch,
            kind,
            description: description.into(),
            entities,
            relationships_added,
        });
    }

    /// The ordered history log.
    pub fn history(&self) -> &[HistoryEvent] {
        &self.history
    }

    /// Append a lore record from an enrichment hook.
    pub fn append_lore(&mut self, record: LoreRecord) {
        self.lore.push(record);
    }

    /// All lore records, in arrival order.
    pub fn lore(&self) -> &[LoreRecord] {
        &self.lore
    }

    /// Record a protected/immutable edge observed below the cull threshold.
    pub fn record_violation(&mut self, kind: &RelationshipKind, src: &EntityId, dst: &EntityId, strength: f64) {
        self.violations.push(ProtectedViolation {
            tick: self.tick,
            kind: kind.clone(),
            src: src.clone(),
            dst: dst.clone(),
            strength,
        });
    }

    /// The protected-violation log.
    pub fn violations(&self) -> &[ProtectedViolation] {
        &self.violations
    }

    /// Average entities created per tick over the trailing `window` ticks.
    pub fn growth_rate(&self, window: u64) -> f64 {
        if window == 0 {
            return 0.0;
        }
        let floor = self.tick.saturating_sub(window);
        let total: u64 = self
            .growth_window
            .iter()
            .filter(|(tick, _)| *tick > floor || (*tick == 0 && floor == 0))
            .map(|(_, count)| u64::from(*count))
            .sum();
        let denom = u32::try_from(window).map(f64::from).unwrap_or(f64::MAX);
        let numer = u32::try_from(total.min(u64::from(u32::MAX)))
            .map(f64::from)
            .unwrap_or(f64::MAX);
        numer / denom
    }

    /// The `{nodes, edges}` export projection.
    pub fn to_projection(&self) -> GraphProjection {
        GraphProjection {
            nodes: self
                .entities()
                .map(|e| ProjectionNode {
                    id: e.id.clone(),
                    kind: e.kind.clone(),
                    name: e.name.clone(),
                    prominence: e.prominence,
                })
                .collect(),
            edges: self
                .relationships
                .iter()
                .map(|r| ProjectionEdge {
                    src: r.src.clone(),
                    dst: r.dst.clone(),
                    kind: r.kind.clone(),
                    strength: r.strength,
                })
                .collect(),
        }
    }

    /// Verify every structural invariant the store promises.
    ///
    /// Intended for tests at epoch boundaries, not the hot path.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvariantViolation`] naming the first broken
    /// invariant: dangling endpoints, self loops, disallowed kind triples,
    /// link-mirror drift, out-of-range pressures, or tag-set violations.
    pub fn check_invariants(&self) -> Result<(), GraphError> {
        for rel in &self.relationships {
            let src = self.entities.get(&rel.src).ok_or_else(|| {
                GraphError::InvariantViolation {
                    reason: format!("dangling src {} on {} edge", rel.src, rel.kind),
                }
            })?;
            let dst = self.entities.get(&rel.dst).ok_or_else(|| {
                GraphError::InvariantViolation {
                    reason: format!("dangling dst {} on {} edge", rel.dst, rel.kind),
                }
            })?;
            if rel.src == rel.dst {
                return Err(GraphError::InvariantViolation {
                    reason: format!("self loop on {}", rel.src),
                });
            }
            if !self.schema.allows(&src.kind, &rel.kind, &dst.kind) {
                return Err(GraphError::InvariantViolation {
                    reason: format!(
                        "triple ({}, {}, {}) not permitted",
                        src.kind, rel.kind, dst.kind
                    ),
                });
            }
        }

        for entity in self.entities() {
            // The mirror must match the outgoing edges exactly, entry for
            // entry, not merely in count: every link corresponds to one
            // relationship with the same `(kind, src, dst)` and vice versa.
            let mut mirrored: Vec<(&RelationshipKind, &EntityId)> = entity
                .links
                .iter()
                .map(|link| (&link.kind, &link.dst))
                .collect();
            let mut actual: Vec<(&RelationshipKind, &EntityId)> = self
                .relationships
                .iter()
                .filter(|r| r.src == entity.id)
                .map(|r| (&r.kind, &r.dst))
                .collect();
            mirrored.sort_unstable();
            actual.sort_unstable();
            if mirrored != actual {
                return Err(GraphError::InvariantViolation {
                    reason: format!(
                        "link mirror drift on {}: {} links vs {} edges, or mismatched entries",
                        entity.id,
                        mirrored.len(),
                        actual.len()
                    ),
                });
            }
            let unique: BTreeSet<&String> = entity.tags.iter().collect();
            if unique.len() != entity.tags.len() {
                return Err(GraphError::InvariantViolation {
                    reason: format!("duplicate tags on {}", entity.id),
                });
            }
            let name_tag = format!("name:{}", entity.name);
            if entity
                .tags
                .iter()
                .any(|t| t.starts_with("name:") && *t != name_tag)
            {
                return Err(GraphError::InvariantViolation {
                    reason: format!("stale name tag on {}", entity.id),
                });
            }
        }

        for (id, value) in &self.pressures {
            if !(0.0..=100.0).contains(value) {
                return Err(GraphError::InvariantViolation {
                    reason: format!("pressure {id} out of range: {value}"),
                });
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------

    /// Allocate the next free `<kind>-<serial>` ID for the kind.
    fn allocate_id(&mut self, kind: &EntityKind) -> EntityId {
        loop {
            let serial = self.serials.entry(kind.clone()).or_insert(0);
            let id = EntityId::derived(kind, *serial);
            *serial = serial.saturating_add(1);
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }

    /// Shared insert path for [`Graph::add_entity`] and
    /// [`Graph::add_entity_with_id`].
    fn insert_entity(&mut self, id: EntityId, draft: EntityDraft) -> Result<EntityId, GraphError> {
        let spec = self
            .schema
            .kind(&draft.kind)
            .ok_or_else(|| GraphError::InvalidEntity {
                reason: format!("kind {} not declared by the domain schema", draft.kind),
            })?;
        if !spec.subtypes.contains(&draft.subtype) {
            return Err(GraphError::InvalidEntity {
                reason: format!(
                    "subtype {:?} not declared for kind {}",
                    draft.subtype, draft.kind
                ),
            });
        }
        let status = draft.status.unwrap_or_else(|| spec.default_status.clone());
        if !spec.statuses.contains(&status) {
            return Err(GraphError::InvalidEntity {
                reason: format!("status {status:?} not declared for kind {}", draft.kind),
            });
        }

        let tags = normalize_tags(&draft.tags, &draft.name);
        let entity = Entity {
            id: id.clone(),
            kind: draft.kind,
            subtype: draft.subtype,
            name: draft.name,
            description: draft.description,
            status,
            prominence: draft.prominence.unwrap_or(Prominence::Marginal),
            tags,
            links: Vec::new(),
            created_at: self.tick,
            updated_at: self.tick,
            coordinates: draft.coordinates,
            culture: draft.culture,
            catalyst: draft.catalyst,
        };

        let description = format!(
            "{} ({}/{}) entered the world",
            entity.name, entity.kind, entity.subtype
        );
        self.order.push(id.clone());
        self.entities.insert(id.clone(), entity);
        self.note_growth();
        self.record_event(
            HistoryEventKind::EntityCreated,
            description,
            vec![id.clone()],
            0,
        );
        Ok(id)
    }

    /// Count one entity creation at the current tick in the growth window.
    fn note_growth(&mut self) {
        match self.growth_window.back_mut() {
            Some((tick, count)) if *tick == self.tick => {
                *count = count.saturating_add(1);
            }
            _ => self.growth_window.push_back((self.tick, 1)),
        }
        let floor = self.tick.saturating_sub(GROWTH_WINDOW_RETENTION);
        while let Some((tick, _)) = self.growth_window.front() {
            if *tick < floor {
                self.growth_window.pop_front();
            } else {
                break;
            }
        }
    }
}
