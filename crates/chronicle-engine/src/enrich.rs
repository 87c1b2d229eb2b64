//! Enrichment hooks: the async side-effect surface of the engine.
//!
//! Hooks are fire-and-forget: the orchestrator captures an immutable
//! [`EnrichmentContext`] snapshot, spawns the hook invocation onto a
//! [`JoinSet`], and moves on without awaiting it. The run's finalization
//! drains the set, appends returned [`LoreRecord`]s to the graph, and
//! swallows (but counts) individual failures. The core never observes hook
//! output in any other way, which is why hooks can be non-deterministic
//! while the graph stays reproducible.
//!
//! Every hook method has a no-op default, so hosts implement only what
//! they care about.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::warn;

use chronicle_graph::store::Graph;
use chronicle_types::ids::{EraId, PressureId};
use chronicle_types::{Entity, EntityId, HistoryEvent, LoreRecord, Relationship};

use crate::config::{EnrichmentConfig, ImageConfig};
use crate::stats::EnrichmentCounts;
use crate::system::DiscoveryEvent;
use chronicle_types::EnrichmentMode;

/// How many trailing history events a context snapshot carries.
const CONTEXT_HISTORY_WINDOW: usize = 12;

/// Immutable value snapshot handed to every hook invocation.
///
/// Captured before the hook is scheduled; later graph mutations cannot
/// corrupt an in-flight hook.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentContext {
    /// Tick at capture time.
    pub tick: u64,
    /// Active era at capture time.
    pub era: Option<EraId>,
    /// Pressure values at capture time.
    pub pressures: BTreeMap<PressureId, f64>,
    /// The entities the hook is about (value copies).
    pub entities: Vec<Entity>,
    /// Recent history events for narrative grounding.
    pub related_history: Vec<HistoryEvent>,
}

impl EnrichmentContext {
    /// Capture a context around the given focus entities.
    pub fn capture(graph: &Graph, focus: &[EntityId]) -> Self {
        let entities = focus
            .iter()
            .filter_map(|id| graph.entity(id).cloned())
            .collect();
        let history = graph.history();
        let start = history.len().saturating_sub(CONTEXT_HISTORY_WINDOW);
        Self {
            tick: graph.tick(),
            era: graph.current_era().cloned(),
            pressures: graph.pressures().clone(),
            entities,
            related_history: history.get(start..).unwrap_or_default().to_vec(),
        }
    }
}

/// An era handover, handed to the era-narrative hook.
#[derive(Debug, Clone, PartialEq)]
pub struct EraTransition {
    /// The era being left, if any epoch has run before.
    pub from_era: Option<EraId>,
    /// The era being entered.
    pub to_era: EraId,
    /// Pressure values at the transition.
    pub pressures: BTreeMap<PressureId, f64>,
    /// Prominent entities to anchor the narrative on.
    pub actors: Vec<Entity>,
    /// Tick of the transition.
    pub tick: u64,
}

/// A chained location reveal, handed to the chain-link hook.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLinkRequest {
    /// The location the chain starts from.
    pub source_location: EntityId,
    /// Theme of the location the discovery reveals.
    pub revealed_location_theme: String,
    /// The exploring entity, when one exists.
    pub explorer: Option<EntityId>,
}

/// The async side-effect sink surface.
///
/// Each method may return a [`LoreRecord`] that the engine appends to the
/// graph at finalization. All methods default to `None`.
#[async_trait]
pub trait EnrichmentHooks: Send + Sync {
    /// Enrich a batch of entity descriptions. `preserve_names` asks the
    /// implementation not to rename (used for host-authored seeds).
    async fn enrich_entities(
        &self,
        _batch: Vec<Entity>,
        _context: EnrichmentContext,
        _preserve_names: bool,
    ) -> Option<LoreRecord> {
        None
    }

    /// Enrich one entity of a kind the schema marks for per-entity
    /// treatment.
    async fn enrich_ability(
        &self,
        _entity: Entity,
        _context: EnrichmentContext,
    ) -> Option<LoreRecord> {
        None
    }

    /// Enrich a batch of relationships between the given actors.
    async fn enrich_relationships(
        &self,
        _batch: Vec<Relationship>,
        _actors: Vec<Entity>,
        _context: EnrichmentContext,
    ) -> Option<LoreRecord> {
        None
    }

    /// Narrate detected changes on one entity.
    async fn enrich_entity_changes(
        &self,
        _entity: Entity,
        _changes: Vec<String>,
        _context: EnrichmentContext,
    ) -> Option<LoreRecord> {
        None
    }

    /// Narrate an era handover.
    async fn generate_era_narrative(&self, _transition: EraTransition) -> Option<LoreRecord> {
        None
    }

    /// Narrate a location discovery.
    async fn enrich_discovery_event(
        &self,
        _event: DiscoveryEvent,
        _tick: u64,
    ) -> Option<LoreRecord> {
        None
    }

    /// Author the next link of a discovery chain.
    async fn generate_chain_link(&self, _request: ChainLinkRequest) -> Option<LoreRecord> {
        None
    }

    /// Produce mythic imagery for a legend-tier entity.
    async fn generate_mythic_image(
        &self,
        _entity: Entity,
        _context: EnrichmentContext,
    ) -> Option<LoreRecord> {
        None
    }
}

/// Enrichment classes, for cap accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Class {
    Description,
    Relationship,
    Change,
    Era,
    Discovery,
    Image,
}

/// Fire-and-forget scheduler over the hook surface.
///
/// Owned by the engine for the length of a run. Counters accumulate for
/// every opportunity regardless of mode; tasks are only spawned when the
/// mode and caps allow and a hook object is present.
pub struct EnrichmentQueue {
    hooks: Option<Arc<dyn EnrichmentHooks>>,
    config: EnrichmentConfig,
    images: ImageConfig,
    tasks: JoinSet<Option<LoreRecord>>,
    scheduled: BTreeMap<Class, u32>,
    counts: EnrichmentCounts,
}

impl core::fmt::Debug for EnrichmentQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EnrichmentQueue")
            .field("mode", &self.config.mode)
            .field("pending", &self.tasks.len())
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl EnrichmentQueue {
    /// A queue over the given hook object and policies.
    pub fn new(
        hooks: Option<Arc<dyn EnrichmentHooks>>,
        config: EnrichmentConfig,
        images: ImageConfig,
    ) -> Self {
        Self {
            hooks,
            config,
            images,
            tasks: JoinSet::new(),
            scheduled: BTreeMap::new(),
            counts: EnrichmentCounts::default(),
        }
    }

    /// The increment-only analytics so far.
    pub const fn counts(&self) -> &EnrichmentCounts {
        &self.counts
    }

    /// Number of in-flight hook tasks.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Queue a batch-description enrichment.
    pub fn queue_entity_batch(
        &mut self,
        batch: Vec<Entity>,
        context: EnrichmentContext,
        preserve_names: bool,
    ) {
        self.counts.descriptions = self.counts.descriptions.saturating_add(1);
        if let Some(hooks) = self.admit(Class::Description) {
            self.spawn_counted(async move {
                hooks.enrich_entities(batch, context, preserve_names).await
            });
        }
    }

    /// Queue a per-entity enrichment for a solo-enrichment kind.
    pub fn queue_ability(&mut self, entity: Entity, context: EnrichmentContext) {
        self.counts.descriptions = self.counts.descriptions.saturating_add(1);
        if let Some(hooks) = self.admit(Class::Description) {
            self.spawn_counted(async move { hooks.enrich_ability(entity, context).await });
        }
    }

    /// Queue a relationship-batch enrichment.
    pub fn queue_relationships(
        &mut self,
        batch: Vec<Relationship>,
        actors: Vec<Entity>,
        context: EnrichmentContext,
    ) {
        self.counts.relationships = self.counts.relationships.saturating_add(1);
        if let Some(hooks) = self.admit(Class::Relationship) {
            self.spawn_counted(async move {
                hooks.enrich_relationships(batch, actors, context).await
            });
        }
    }

    /// Queue a change narration for one entity.
    pub fn queue_entity_changes(
        &mut self,
        entity: Entity,
        changes: Vec<String>,
        context: EnrichmentContext,
    ) {
        self.counts.change_narratives = self.counts.change_narratives.saturating_add(1);
        if let Some(hooks) = self.admit(Class::Change) {
            self.spawn_counted(async move {
                hooks.enrich_entity_changes(entity, changes, context).await
            });
        }
    }

    /// Queue an era-transition narrative.
    pub fn queue_era_narrative(&mut self, transition: EraTransition) {
        self.counts.era_narratives = self.counts.era_narratives.saturating_add(1);
        if let Some(hooks) = self.admit(Class::Era) {
            self.spawn_counted(async move { hooks.generate_era_narrative(transition).await });
        }
    }

    /// Queue a discovery narration, chaining a follow-up link when the
    /// event reveals a further theme.
    pub fn queue_discovery(&mut self, event: DiscoveryEvent, tick: u64) {
        self.counts.discovery_narratives = self.counts.discovery_narratives.saturating_add(1);
        let chain = event.revealed_theme.as_ref().map(|theme| ChainLinkRequest {
            source_location: event.location.clone(),
            revealed_location_theme: theme.clone(),
            explorer: event.explorer.clone(),
        });
        if let Some(hooks) = self.admit(Class::Discovery) {
            let chained = hooks.clone();
            self.spawn_counted(async move { hooks.enrich_discovery_event(event, tick).await });
            if let Some(request) = chain {
                self.spawn_counted(async move { chained.generate_chain_link(request).await });
            }
        }
    }

    /// Queue mythic imagery for one entity.
    pub fn queue_mythic_image(&mut self, entity: Entity, context: EnrichmentContext) {
        self.counts.images = self.counts.images.saturating_add(1);
        if !self.images.enabled {
            return;
        }
        let cap = self.images.max_images;
        let used = self.scheduled.entry(Class::Image).or_insert(0);
        if *used >= cap {
            return;
        }
        *used = used.saturating_add(1);
        if let Some(hooks) = self.hooks.clone() {
            self.spawn_counted(async move { hooks.generate_mythic_image(entity, context).await });
        }
    }

    /// Await every outstanding hook task and return the lore they
    /// produced, in completion order. Failures are logged and counted,
    /// never propagated.
    pub async fn finalize(&mut self) -> Vec<LoreRecord> {
        let mut records = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(error) => {
                    self.counts.failures = self.counts.failures.saturating_add(1);
                    warn!(%error, "enrichment hook task failed; suppressed");
                }
            }
        }
        records
    }

    /// Gatekeeper: returns the hook object when the mode, cap, and hook
    /// presence all admit a new task of this class, and charges the cap.
    fn admit(&mut self, class: Class) -> Option<Arc<dyn EnrichmentHooks>> {
        let cap = match self.config.mode {
            EnrichmentMode::Off => 0,
            EnrichmentMode::Partial => match class {
                Class::Description => self.config.max_descriptions,
                Class::Relationship => self.config.max_relationship_enrichments,
                Class::Change => self.config.max_change_narratives,
                Class::Era => self.config.max_era_narratives,
                Class::Discovery => self.config.max_discovery_narratives,
                Class::Image => self.images.max_images,
            },
            EnrichmentMode::Full => u32::MAX,
        };
        let used = self.scheduled.entry(class).or_insert(0);
        if *used >= cap {
            return None;
        }
        let hooks = self.hooks.clone()?;
        *used = used.saturating_add(1);
        Some(hooks)
    }

    /// Spawn a hook future and count the scheduling.
    fn spawn_counted<F>(&mut self, future: F)
    where
        F: core::future::Future<Output = Option<LoreRecord>> + Send + 'static,
    {
        self.counts.scheduled = self.counts.scheduled.saturating_add(1);
        self.tasks.spawn(future);
    }
}
