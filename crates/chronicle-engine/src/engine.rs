//! The epoch orchestrator: [`WorldEngine`] and its run loop.
//!
//! One run drives the loop the rest of this crate exists for:
//!
//! 1. select the era for the epoch;
//! 2. run one growth phase (template selection and expansion);
//! 3. run `ticks_per_epoch` simulation ticks (systems under era and
//!    distribution modifiers, culling on its cadence);
//! 4. apply era special rules and the epoch pressure update;
//! 5. prune/consolidate (forgotten and mortality aging rules);
//! 6. record epoch statistics;
//! 7. queue era-transition and change enrichments;
//!
//! until a stop condition holds, then finalize all outstanding enrichment
//! tasks and return. Failures inside templates, systems, and hooks are
//! caught and counted; a run always completes with a graph and measurable
//! statistics.
//!
//! The phase logic lives in free functions over explicit state, so each
//! borrows only the fields it needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use chronicle_graph::schema::{DomainSchema, NameGenerator, PoolNameGenerator};
use chronicle_graph::store::Graph;
use chronicle_types::ids::EraId;
use chronicle_types::{
    EntityDraft, EntityId, EntityPatch, EntitySeed, HistoryEventKind, Prominence, Relationship,
    RelationshipFields,
};

use crate::change::ChangeDetector;
use crate::config::{AgingPolicy, CullPolicy, EngineConfig};
use crate::culling;
use crate::distribution;
use crate::enrich::{EnrichmentContext, EnrichmentHooks, EnrichmentQueue, EraTransition};
use crate::era::{Era, era_index_for_epoch};
use crate::error::EngineError;
use crate::pressure::{self, PressureDef};
use crate::selector;
use crate::stats::{
    DistributionStats, EpochStats, PerformanceStats, SimulationStatistics, TemporalStats,
    ValidationResults, ViolationSummary, compute_fitness,
};
use crate::system::{System, SystemExecutor};
use crate::template::{self, Template};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The tick ceiling was reached.
    MaxTicks,
    /// The era schedule was exhausted (`epoch >= 2 * era count`).
    EraScheduleExhausted,
    /// The entity population reached `5 * target_entities_per_kind`.
    EntityCapReached,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Ticks executed.
    pub total_ticks: u64,
    /// Epochs executed.
    pub total_epochs: u64,
    /// Why the run stopped.
    pub end_reason: EndReason,
}

/// Everything a run needs, bundled for [`WorldEngine::new`].
pub struct EngineSpec {
    /// Engine configuration.
    pub config: EngineConfig,
    /// The domain schema.
    pub schema: DomainSchema,
    /// The era sequence, in activation order.
    pub eras: Vec<Era>,
    /// The template catalog.
    pub templates: Vec<Box<dyn Template>>,
    /// The system catalog, in declaration (execution) order.
    pub systems: Vec<Box<dyn System>>,
    /// Pressure definitions.
    pub pressures: Vec<PressureDef>,
    /// Initial world state.
    pub initial: Vec<EntitySeed>,
    /// Optional enrichment hook object.
    pub hooks: Option<Arc<dyn EnrichmentHooks>>,
    /// Optional name generator; a pool generator is used when absent.
    pub names: Option<Box<dyn NameGenerator>>,
}

/// Caller-facing warning log.
///
/// Entries are formatted `[ISO8601] [Tick N] message` and mirrored to
/// `tracing::warn`.
#[derive(Debug, Default)]
pub struct WarningLog {
    entries: Vec<String>,
}

impl WarningLog {
    /// Record one warning.
    pub fn push(&mut self, tick: u64, message: &str) {
        let entry = format!("[{}] [Tick {tick}] {message}", Utc::now().to_rfc3339());
        tracing::warn!(tick, message, "engine warning");
        self.entries.push(entry);
    }

    /// All warnings, in emission order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of warnings recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no warnings have been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run-lifetime performance counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PerfCounters {
    template_applications: u64,
    template_failures: u64,
    system_executions: u64,
    system_failures: u64,
    relationship_budget_hits: u64,
    relationships_dropped: u64,
    aggressive_system_warnings: u64,
}

/// The epoch orchestrator.
///
/// Owns the graph, the RNG, the catalogs, and every accumulator for the
/// length of one run. Construction fails fast on configuration errors;
/// [`WorldEngine::run`] always completes.
pub struct WorldEngine {
    config: EngineConfig,
    eras: Vec<Era>,
    templates: Vec<Box<dyn Template>>,
    systems: Vec<Box<dyn System>>,
    pressures: Vec<PressureDef>,
    names: Box<dyn NameGenerator>,
    graph: Graph,
    rng: StdRng,
    executor: SystemExecutor,
    detector: ChangeDetector,
    queue: EnrichmentQueue,
    warnings: WarningLog,
    counters: PerfCounters,
    epoch_rows: Vec<EpochStats>,
    growth_history: Vec<f64>,
    eras_traversed: Vec<EraId>,
    summary: Option<RunSummary>,
}

impl core::fmt::Debug for WorldEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorldEngine")
            .field("tick", &self.graph.tick())
            .field("epoch", &self.graph.epoch())
            .field("entities", &self.graph.entity_count())
            .field("relationships", &self.graph.relationship_count())
            .finish_non_exhaustive()
    }
}

impl WorldEngine {
    /// Build an engine, validating the whole configuration up front.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] naming the offending item: an invalid
    /// schema, an empty era list, duplicate template/system IDs, era
    /// tables referencing unknown templates/systems/pressures, feedback
    /// rules referencing unknown pressures, or initial seeds the schema
    /// rejects.
    pub fn new(spec: EngineSpec) -> Result<Self, EngineError> {
        spec.schema.validate()?;
        if spec.eras.is_empty() {
            return Err(EngineError::NoEras);
        }
        validate_catalogs(&spec)?;

        let schema = Arc::new(spec.schema);
        let mut graph = Graph::new(Arc::clone(&schema));
        pressure::initialize_pressures(&mut graph, &spec.pressures);
        seed_initial_state(&mut graph, &spec.initial)?;
        graph.record_event(
            HistoryEventKind::WorldInitialized,
            format!("the world began with {} entities", graph.entity_count()),
            Vec::new(),
            u64::try_from(graph.relationship_count()).unwrap_or(u64::MAX),
        );

        let budget = spec.config.relationship_budget.max_per_simulation_tick;
        let queue = EnrichmentQueue::new(
            spec.hooks,
            spec.config.enrichment.clone(),
            spec.config.images.clone(),
        );
        Ok(Self {
            executor: SystemExecutor::new(budget),
            detector: ChangeDetector::new(),
            queue,
            warnings: WarningLog::default(),
            counters: PerfCounters::default(),
            epoch_rows: Vec::new(),
            growth_history: Vec::new(),
            eras_traversed: Vec::new(),
            summary: None,
            rng: StdRng::seed_from_u64(spec.config.seed),
            names: spec
                .names
                .unwrap_or_else(|| Box::new(PoolNameGenerator::default())),
            graph,
            eras: spec.eras,
            templates: spec.templates,
            systems: spec.systems,
            pressures: spec.pressures,
            config: spec.config,
        })
    }

    /// The graph in its current state.
    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Consume the engine, yielding the graph.
    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// The warning log.
    pub const fn warnings(&self) -> &WarningLog {
        &self.warnings
    }

    /// Drive the run to completion and return its summary.
    ///
    /// Idempotent in the sense that a second call returns the first run's
    /// summary without simulating further.
    pub async fn run(&mut self) -> RunSummary {
        if let Some(summary) = self.summary {
            return summary;
        }
        info!(
            seed = self.config.seed,
            eras = self.eras.len(),
            templates = self.templates.len(),
            systems = self.systems.len(),
            "run starting"
        );

        // Initial enrichment: seed entities keep their authored names.
        let seed_ids: Vec<EntityId> = self.graph.entities().map(|e| e.id.clone()).collect();
        if !seed_ids.is_empty() {
            let context = EnrichmentContext::capture(&self.graph, &seed_ids);
            let batch = context.entities.clone();
            self.queue.queue_entity_batch(batch, context, true);
        }

        let end_reason = loop {
            if let Some(reason) = self.stop_reason() {
                break reason;
            }
            self.run_epoch();
        };

        // Mythic imagery, then the single drain that awaits everything.
        self.queue_mythic_images();
        let lore = self.queue.finalize().await;
        for record in lore {
            self.graph.append_lore(record);
        }

        let summary = RunSummary {
            total_ticks: self.graph.tick(),
            total_epochs: self.graph.epoch(),
            end_reason,
        };
        info!(
            ticks = summary.total_ticks,
            epochs = summary.total_epochs,
            reason = ?summary.end_reason,
            entities = self.graph.entity_count(),
            "run complete"
        );
        self.summary = Some(summary);
        summary
    }

    /// Assemble the end-of-run report.
    pub fn export_statistics(&self, validation: ValidationResults) -> SimulationStatistics {
        let shape = distribution::measure(&self.graph);
        let targets = self
            .config
            .distribution_targets
            .clone()
            .unwrap_or_default();
        let deviations = distribution::deviations(&shape, &targets);
        let fitness = compute_fitness(
            &deviations,
            &shape,
            self.config.distribution_targets.as_ref(),
            &self.growth_history,
        );

        SimulationStatistics {
            distribution: DistributionStats { shape, deviations },
            epochs: self.epoch_rows.clone(),
            enrichment: *self.queue.counts(),
            validation,
            performance: PerformanceStats {
                template_applications: self.counters.template_applications,
                template_failures: self.counters.template_failures,
                system_executions: self.counters.system_executions,
                system_failures: self.counters.system_failures,
                relationship_budget_hits: self.counters.relationship_budget_hits,
                relationships_dropped: self.counters.relationships_dropped,
                aggressive_system_warnings: self.counters.aggressive_system_warnings,
                warnings: u64::try_from(self.warnings.len()).unwrap_or(u64::MAX),
                growth_history: self.growth_history.clone(),
                protected_relationship_violations: ViolationSummary::from_log(
                    self.graph.violations(),
                ),
            },
            temporal: TemporalStats {
                total_ticks: self.graph.tick(),
                total_epochs: self.graph.epoch(),
                eras_traversed: self.eras_traversed.clone(),
            },
            fitness,
        }
    }

    // -------------------------------------------------------------------
    // Run-loop internals
    // -------------------------------------------------------------------

    /// The stop conditions, checked between epochs.
    fn stop_reason(&self) -> Option<EndReason> {
        if self.graph.tick() >= self.config.max_ticks {
            return Some(EndReason::MaxTicks);
        }
        if self.graph.epoch() >= self.config.planned_epochs(self.eras.len()) {
            return Some(EndReason::EraScheduleExhausted);
        }
        let entity_cap = self.config.target_entities_per_kind.saturating_mul(5);
        if u64::try_from(self.graph.entity_count()).unwrap_or(u64::MAX) >= entity_cap {
            return Some(EndReason::EntityCapReached);
        }
        None
    }

    /// One full epoch: growth, simulation, pressures, aging, accounting.
    fn run_epoch(&mut self) {
        let epoch = self.graph.epoch();
        let era_index =
            era_index_for_epoch(epoch, self.eras.len(), self.config.epochs_per_era);
        let previous_era = self.graph.current_era().cloned();
        let Some(era) = self.eras.get(era_index) else {
            return;
        };
        let era_changed = previous_era.as_ref() != Some(&era.id);
        self.graph.set_current_era(era.id.clone());
        if era_changed {
            self.eras_traversed.push(era.id.clone());
        }
        debug!(epoch, era = %era.id, "epoch starting");

        // --- Growth phase ---
        let planned_epochs = self.config.planned_epochs(self.eras.len());
        let growth = phase_growth(
            &mut self.graph,
            &self.templates,
            era,
            &self.config,
            planned_epochs,
            self.names.as_ref(),
            &mut self.rng,
            &mut self.counters,
            &mut self.warnings,
        );

        // Growth enrichment: new entities in one batch, solo kinds alone,
        // plus the relationships the phase authored.
        if !growth.created.is_empty() {
            let context = EnrichmentContext::capture(&self.graph, &growth.created);
            let (solo, batch): (Vec<_>, Vec<_>) = context
                .entities
                .iter()
                .cloned()
                .partition(|entity| {
                    self.graph
                        .schema()
                        .kind(&entity.kind)
                        .is_some_and(|spec| spec.solo_enrichment)
                });
            if !batch.is_empty() {
                self.queue.queue_entity_batch(batch, context.clone(), false);
            }
            for entity in solo {
                self.queue.queue_ability(entity, context.clone());
            }
            if !growth.relationships.is_empty() {
                let actors = context.entities.clone();
                self.queue
                    .queue_relationships(growth.relationships.clone(), actors, context);
            }
        }

        // --- Simulation ticks ---
        for _ in 0..self.config.ticks_per_epoch {
            self.graph.advance_tick();
            let shape = distribution::measure(&self.graph);
            let targets = self.config.distribution_targets.as_ref();
            let deviations = targets
                .map(|t| distribution::deviations(&shape, t))
                .unwrap_or_default();
            let modifiers: Vec<f64> = self
                .systems
                .iter()
                .map(|system| {
                    era.system_modifier(&system.metadata().id)
                        * selector::system_adjustment(
                            system.metadata(),
                            &shape,
                            &deviations,
                            targets,
                        )
                })
                .collect();

            let report =
                self.executor
                    .run_tick(&mut self.graph, &self.systems, &modifiers, &mut self.rng);
            self.counters.system_executions = self
                .counters
                .system_executions
                .saturating_add(u64::from(report.executions));
            self.counters.system_failures = self
                .counters
                .system_failures
                .saturating_add(u64::from(report.failures));
            self.counters.relationships_dropped = self
                .counters
                .relationships_dropped
                .saturating_add(u64::from(report.relationships_dropped));
            if report.budget_hit {
                self.counters.relationship_budget_hits =
                    self.counters.relationship_budget_hits.saturating_add(1);
            }
            self.counters.aggressive_system_warnings = self
                .counters
                .aggressive_system_warnings
                .saturating_add(u64::from(report.aggression_warnings));
            let tick = self.graph.tick();
            for message in &report.warnings {
                self.warnings.push(tick, message);
            }
            for discovery in report.discoveries {
                self.queue.queue_discovery(discovery, tick);
            }

            if culling::cull_due(tick, &self.config.cull) {
                phase_cull(&mut self.graph, &self.config.cull);
            }
        }

        // --- Era special rules ---
        if let Some(rule) = &era.special_rules {
            rule.apply(&mut self.graph);
        }

        // --- Pressure update ---
        let feedback = self
            .config
            .distribution_targets
            .as_ref()
            .map(|targets| {
                let shape = distribution::measure(&self.graph);
                distribution::pressure_feedback(
                    &distribution::deviations(&shape, targets),
                    targets,
                )
            })
            .unwrap_or_default();
        pressure::update_pressures(
            &mut self.graph,
            &self.pressures,
            &era.pressure_modifiers,
            &feedback,
        );

        // --- Prune / consolidate ---
        phase_prune_consolidate(&mut self.graph, &self.config.aging, &mut self.rng);

        // --- Growth-rate alarm ---
        let rate = self.graph.growth_rate(self.config.growth_alarm.window);
        if rate > f64::from(self.config.growth_alarm.max_per_tick) {
            let tick = self.graph.tick();
            self.warnings.push(
                tick,
                &format!(
                    "growth rate {rate:.1} entities/tick exceeds {} over the last {} ticks",
                    self.config.growth_alarm.max_per_tick, self.config.growth_alarm.window
                ),
            );
        }

        // --- Epoch statistics ---
        let growth_actual = u64::try_from(growth.created.len()).unwrap_or(u64::MAX);
        let ticks = self.config.ticks_per_epoch.max(1);
        let growth_rate = u32::try_from(growth_actual.min(u64::from(u32::MAX)))
            .map(f64::from)
            .unwrap_or(f64::MAX)
            / u32::try_from(ticks.min(u64::from(u32::MAX)))
                .map(f64::from)
                .unwrap_or(1.0);
        self.growth_history.push(growth_rate);
        self.epoch_rows.push(EpochStats {
            epoch,
            tick: self.graph.tick(),
            entity_counts: self.graph.counts_by_kind(),
            subtype_counts: self.graph.counts_by_subtype(),
            relationship_counts: self.graph.counts_by_relationship_kind(),
            pressures: self.graph.pressures().clone(),
            growth_target: growth.target,
            growth_actual,
            growth_rate,
        });

        // --- Era narrative (history first, then the hook) ---
        if era_changed && previous_era.is_some() {
            self.graph.record_event(
                HistoryEventKind::EraTransition,
                format!("the age of {} began", era.name),
                Vec::new(),
                0,
            );
            let actors = prominent_actors(&self.graph, 3);
            self.queue.queue_era_narrative(EraTransition {
                from_era: previous_era,
                to_era: era.id.clone(),
                pressures: self.graph.pressures().clone(),
                actors,
                tick: self.graph.tick(),
            });
        }

        // --- Change enrichments ---
        let changes = self.detector.detect_and_refresh(&self.graph);
        for (entity_id, change_list) in changes {
            if let Some(entity) = self.graph.entity(&entity_id).cloned() {
                let context = EnrichmentContext::capture(&self.graph, &[entity_id]);
                self.queue.queue_entity_changes(entity, change_list, context);
            }
        }

        self.graph.advance_epoch();
    }

    /// Queue mythic imagery for legend-tier entities, oldest first.
    fn queue_mythic_images(&mut self) {
        if !self.config.images.enabled {
            return;
        }
        let mythic: Vec<EntityId> = self
            .graph
            .entities()
            .filter(|entity| entity.prominence == Prominence::Mythic)
            .map(|entity| entity.id.clone())
            .collect();
        for id in mythic {
            if let Some(entity) = self.graph.entity(&id).cloned() {
                let context = EnrichmentContext::capture(&self.graph, &[id]);
                self.queue.queue_mythic_image(entity, context);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

/// Cross-validate era tables and feedback rules against the catalogs.
fn validate_catalogs(spec: &EngineSpec) -> Result<(), EngineError> {
    let mut template_ids = std::collections::BTreeSet::new();
    for template in &spec.templates {
        if !template_ids.insert(template.metadata().id.clone()) {
            return Err(EngineError::DuplicateId {
                what: "template",
                id: template.metadata().id.to_string(),
            });
        }
    }
    let mut system_ids = std::collections::BTreeSet::new();
    for system in &spec.systems {
        if !system_ids.insert(system.metadata().id.clone()) {
            return Err(EngineError::DuplicateId {
                what: "system",
                id: system.metadata().id.to_string(),
            });
        }
    }
    let pressure_ids: std::collections::BTreeSet<_> =
        spec.pressures.iter().map(|p| p.id.clone()).collect();

    for era in &spec.eras {
        for template in era.template_weights.keys() {
            if !template_ids.contains(template) {
                return Err(EngineError::UnknownTemplate {
                    era: era.id.clone(),
                    template: template.clone(),
                });
            }
        }
        for system in era.system_modifiers.keys() {
            if !system_ids.contains(system) {
                return Err(EngineError::UnknownSystem {
                    era: era.id.clone(),
                    system: system.clone(),
                });
            }
        }
        for pressure in era.pressure_modifiers.keys() {
            if !pressure_ids.contains(pressure) {
                return Err(EngineError::UnknownPressure {
                    era: era.id.clone(),
                    pressure: pressure.clone(),
                });
            }
        }
    }

    if let Some(targets) = &spec.config.distribution_targets {
        for rule in &targets.feedback {
            if !pressure_ids.contains(&rule.pressure) {
                return Err(EngineError::UnknownFeedbackPressure {
                    pressure: rule.pressure.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Load the initial state: entities first, then links resolved by ID or
/// name. Links with a missing endpoint are dropped silently.
fn seed_initial_state(graph: &mut Graph, seeds: &[EntitySeed]) -> Result<(), EngineError> {
    let mut by_name: BTreeMap<String, EntityId> = BTreeMap::new();
    let mut seeded: Vec<EntityId> = Vec::new();

    for seed in seeds {
        let draft = EntityDraft {
            kind: seed.kind.clone(),
            subtype: seed.subtype.clone(),
            name: seed.name.clone(),
            description: seed.description.clone(),
            status: seed.status.clone(),
            prominence: seed.prominence,
            tags: seed.tags.clone(),
            coordinates: seed.coordinates.clone(),
            culture: seed.culture.clone(),
            catalyst: None,
        };
        let result = match &seed.id {
            Some(explicit) => graph.add_entity_with_id(EntityId::new(explicit.clone()), draft),
            None => graph.add_entity(draft),
        };
        let id = result.map_err(|source| EngineError::InvalidSeed {
            name: seed.name.clone(),
            source,
        })?;
        by_name.insert(seed.name.clone(), id.clone());
        seeded.push(id);
    }

    for (seed, src) in seeds.iter().zip(seeded.iter()) {
        for link in &seed.links {
            let target_id = EntityId::new(link.target.clone());
            let dst = if graph.contains_entity(&target_id) {
                Some(target_id)
            } else {
                by_name.get(&link.target).cloned()
            };
            let Some(dst) = dst else {
                debug!(target = %link.target, "seed link target missing; dropped");
                continue;
            };
            let fields = RelationshipFields {
                strength: link.strength,
                ..RelationshipFields::default()
            };
            graph.add_relationship(&link.kind, src, &dst, fields);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Phase functions
// ---------------------------------------------------------------------------

/// What one growth phase produced.
struct GrowthResult {
    /// The target the phase aimed for.
    target: u64,
    /// Entities created, in creation order.
    created: Vec<EntityId>,
    /// Relationships the phase authored (value copies, for enrichment).
    relationships: Vec<Relationship>,
}

/// Run one growth phase: compute the target, select templates, attempt
/// each once.
#[allow(clippy::too_many_arguments)]
fn phase_growth(
    graph: &mut Graph,
    templates: &[Box<dyn Template>],
    era: &Era,
    config: &EngineConfig,
    planned_epochs: u64,
    names: &dyn NameGenerator,
    rng: &mut StdRng,
    counters: &mut PerfCounters,
    warnings: &mut WarningLog,
) -> GrowthResult {
    let target = template::compute_growth_target(
        graph,
        config.target_entities_per_kind,
        planned_epochs,
        rng,
    );
    let selected = selector::select_templates(
        templates,
        era,
        graph,
        config.distribution_targets.as_ref(),
        config.target_entities_per_kind,
        target,
        rng,
    );

    let rel_mark = graph.relationship_count();
    let budget = config.relationship_budget.max_per_growth_phase;
    let mut inserted: u32 = 0;
    let mut created: Vec<EntityId> = Vec::new();

    for index in selected {
        if u64::try_from(created.len()).unwrap_or(u64::MAX) >= target {
            break;
        }
        let Some(template) = templates.get(index) else {
            continue;
        };
        // Prerequisites are rechecked: earlier expansions this phase may
        // have invalidated them.
        if !template.can_apply(graph) {
            continue;
        }
        let targets_found = template.find_targets(graph);
        let focus = if targets_found.is_empty() {
            None
        } else {
            let pick = rng.random_range(0..targets_found.len());
            targets_found.get(pick).and_then(|id| graph.entity(id)).cloned()
        };

        let expansion = match template.expand(graph, focus.as_ref(), rng) {
            Ok(expansion) => expansion,
            Err(error) => {
                counters.template_failures = counters.template_failures.saturating_add(1);
                debug!(template = %template.metadata().id, %error, "template expand failed");
                continue;
            }
        };
        let description = expansion.description.clone();
        match template::apply_expansion(
            graph,
            expansion,
            names,
            rng,
            budget.saturating_sub(inserted),
        ) {
            Ok(applied) => {
                counters.template_applications =
                    counters.template_applications.saturating_add(1);
                inserted = inserted.saturating_add(applied.relationships_inserted);
                counters.relationships_dropped = counters
                    .relationships_dropped
                    .saturating_add(u64::from(applied.relationships_dropped));
                if applied.relationships_dropped > 0 {
                    counters.relationship_budget_hits =
                        counters.relationship_budget_hits.saturating_add(1);
                    warnings.push(
                        graph.tick(),
                        &format!(
                            "growth-phase relationship budget of {budget} reached; {} edges dropped",
                            applied.relationships_dropped
                        ),
                    );
                }
                if !applied.created.is_empty() || applied.relationships_inserted > 0 {
                    graph.record_event(
                        HistoryEventKind::TemplateApplied,
                        description,
                        applied.created.clone(),
                        u64::from(applied.relationships_inserted),
                    );
                }
                created.extend(applied.created);
            }
            Err(error) => {
                counters.template_failures = counters.template_failures.saturating_add(1);
                debug!(template = %template.metadata().id, %error, "template apply failed");
            }
        }
    }

    let relationships = graph
        .relationships()
        .get(rel_mark..)
        .unwrap_or_default()
        .to_vec();
    GrowthResult {
        target,
        created,
        relationships,
    }
}

/// Run one culling pass and fold the results into the graph's logs.
fn phase_cull(graph: &mut Graph, policy: &CullPolicy) {
    let report = culling::run_cull(graph, policy);
    if report.culled > 0 || report.broken_removed > 0 {
        debug!(
            culled = report.culled,
            broken = report.broken_removed,
            violations = report.violations_recorded,
            "culling pass complete"
        );
    }
}

/// Prune/consolidate: fade aged, disconnected entities to forgotten and
/// roll mortality for aged mortal entities.
fn phase_prune_consolidate(graph: &mut Graph, aging: &AgingPolicy, rng: &mut StdRng) {
    let tick = graph.tick();

    let to_forget: Vec<EntityId> = graph
        .entities()
        .filter(|entity| {
            entity.prominence != Prominence::Forgotten
                && entity.age_at(tick) > aging.forgotten_after
        })
        .map(|entity| entity.id.clone())
        .collect();
    for id in to_forget {
        if graph.degree(&id) < aging.isolation_degree {
            let patch = EntityPatch::prominence(Prominence::Forgotten);
            if graph.update_entity(&id, patch).is_ok() {
                debug!(entity = %id, "faded to forgotten");
            }
        }
    }

    let mortal_candidates: Vec<EntityId> = graph
        .entities()
        .filter(|entity| {
            graph
                .schema()
                .kind(&entity.kind)
                .is_some_and(|spec| spec.mortal)
                && entity.status == aging.alive_status
                && entity.age_at(tick) > aging.mortal_after
        })
        .map(|entity| entity.id.clone())
        .collect();
    for id in mortal_candidates {
        if rng.random::<f64>() < aging.mortality_chance {
            let patch = EntityPatch::status(aging.dead_status.clone());
            if graph.update_entity(&id, patch).is_ok() {
                debug!(entity = %id, "died of age");
            }
        }
    }
}

/// The most prominent entities, for narrative anchoring. Ties break by
/// insertion order.
fn prominent_actors(graph: &Graph, limit: usize) -> Vec<chronicle_types::Entity> {
    let mut actors: Vec<&chronicle_types::Entity> = graph.entities().collect();
    actors.sort_by(|a, b| b.prominence.cmp(&a.prominence));
    actors.into_iter().take(limit).cloned().collect()
}
