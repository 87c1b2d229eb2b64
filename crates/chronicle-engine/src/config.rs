//! Engine configuration: typed structs with defaults and a YAML loader.
//!
//! Every tunable the orchestrator consults lives here, with defaults
//! matching the engine's documented behavior. Domains override through
//! YAML or by building the structs directly.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use chronicle_types::{EnrichmentMode, RelationshipKind};

use crate::distribution::DistributionTargets;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seed for the run's single RNG. Equal seeds reproduce equal graphs.
    #[serde(default)]
    pub seed: u64,

    /// Number of epochs each era stays active.
    #[serde(default = "default_epochs_per_era")]
    pub epochs_per_era: u64,

    /// Simulation ticks executed after each growth phase.
    #[serde(default = "default_ticks_per_epoch")]
    pub ticks_per_epoch: u64,

    /// Desired entity count per kind; drives growth targets and deficits.
    #[serde(default = "default_target_entities_per_kind")]
    pub target_entities_per_kind: u64,

    /// Hard tick ceiling for the run.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Relationship-insertion budgets.
    #[serde(default)]
    pub relationship_budget: RelationshipBudget,

    /// Aging thresholds applied by prune/consolidate.
    #[serde(default)]
    pub aging: AgingPolicy,

    /// Growth-rate alarm thresholds.
    #[serde(default)]
    pub growth_alarm: GrowthAlarm,

    /// Relationship culling policy.
    #[serde(default)]
    pub cull: CullPolicy,

    /// Per-relationship-kind formation cooldowns, with a fallback default.
    #[serde(default)]
    pub cooldowns: CooldownPolicy,

    /// Desired statistical shape of the output graph. Optional; without it
    /// selection falls back to the deficit heuristic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_targets: Option<DistributionTargets>,

    /// Enrichment scheduling policy.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Mythic-imagery policy.
    #[serde(default)]
    pub images: ImageConfig,
}

impl EngineConfig {
    /// A configuration with every field at its documented default and the
    /// given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&contents)?)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// The run's planned epoch count given the era list length; the epoch
    /// stop condition is `epoch >= 2 * era_count`.
    pub const fn planned_epochs(&self, era_count: usize) -> u64 {
        (era_count as u64).saturating_mul(2)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            epochs_per_era: default_epochs_per_era(),
            ticks_per_epoch: default_ticks_per_epoch(),
            target_entities_per_kind: default_target_entities_per_kind(),
            max_ticks: default_max_ticks(),
            relationship_budget: RelationshipBudget::default(),
            aging: AgingPolicy::default(),
            growth_alarm: GrowthAlarm::default(),
            cull: CullPolicy::default(),
            cooldowns: CooldownPolicy::default(),
            distribution_targets: None,
            enrichment: EnrichmentConfig::default(),
            images: ImageConfig::default(),
        }
    }
}

/// Relationship-insertion budgets per phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipBudget {
    /// Maximum relationships inserted during one simulation tick.
    #[serde(default = "default_max_per_simulation_tick")]
    pub max_per_simulation_tick: u32,

    /// Maximum relationships inserted during one growth phase.
    #[serde(default = "default_max_per_growth_phase")]
    pub max_per_growth_phase: u32,
}

impl Default for RelationshipBudget {
    fn default() -> Self {
        Self {
            max_per_simulation_tick: default_max_per_simulation_tick(),
            max_per_growth_phase: default_max_per_growth_phase(),
        }
    }
}

/// Aging thresholds for prune/consolidate.
///
/// These are the engine defaults the original hardcoded; domains override
/// them through configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingPolicy {
    /// Age beyond which a disconnected entity fades to forgotten.
    #[serde(default = "default_forgotten_after")]
    pub forgotten_after: u64,

    /// Incident-edge count below which an aged entity counts as
    /// disconnected.
    #[serde(default = "default_isolation_degree")]
    pub isolation_degree: usize,

    /// Age beyond which mortal entities face the mortality roll.
    #[serde(default = "default_mortal_after")]
    pub mortal_after: u64,

    /// Per-epoch death probability for mortal entities past the age
    /// threshold.
    #[serde(default = "default_mortality_chance")]
    pub mortality_chance: f64,

    /// Status string marking a living mortal entity.
    #[serde(default = "default_alive_status")]
    pub alive_status: String,

    /// Status string the engine assigns on death.
    #[serde(default = "default_dead_status")]
    pub dead_status: String,
}

impl Default for AgingPolicy {
    fn default() -> Self {
        Self {
            forgotten_after: default_forgotten_after(),
            isolation_degree: default_isolation_degree(),
            mortal_after: default_mortal_after(),
            mortality_chance: default_mortality_chance(),
            alive_status: default_alive_status(),
            dead_status: default_dead_status(),
        }
    }
}

/// Growth-rate alarm thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthAlarm {
    /// Average creations per tick above which the alarm fires.
    #[serde(default = "default_growth_max_per_tick")]
    pub max_per_tick: u32,

    /// Trailing window, in ticks, the average is computed over.
    #[serde(default = "default_growth_window")]
    pub window: u64,
}

impl Default for GrowthAlarm {
    fn default() -> Self {
        Self {
            max_per_tick: default_growth_max_per_tick(),
            window: default_growth_window(),
        }
    }
}

/// Relationship culling policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CullPolicy {
    /// Ticks between culling passes.
    #[serde(default = "default_cull_interval")]
    pub interval: u64,

    /// Strength below which a mutable, unprotected edge is culled.
    #[serde(default = "default_cull_threshold")]
    pub threshold: f64,

    /// Minimum age of *both* endpoints before an edge is eligible.
    #[serde(default = "default_cull_grace")]
    pub grace: u64,
}

impl Default for CullPolicy {
    fn default() -> Self {
        Self {
            interval: default_cull_interval(),
            threshold: default_cull_threshold(),
            grace: default_cull_grace(),
        }
    }
}

/// Relationship-formation cooldowns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownPolicy {
    /// Kind-specific cooldowns, in ticks.
    #[serde(default)]
    pub per_kind: BTreeMap<RelationshipKind, u64>,

    /// Fallback cooldown for kinds without an entry.
    #[serde(default = "default_cooldown_ticks")]
    pub default_ticks: u64,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            per_kind: BTreeMap::new(),
            default_ticks: default_cooldown_ticks(),
        }
    }
}

impl CooldownPolicy {
    /// Cooldown for the given relationship kind.
    pub fn ticks_for(&self, kind: &RelationshipKind) -> u64 {
        self.per_kind.get(kind).copied().unwrap_or(self.default_ticks)
    }
}

/// Enrichment scheduling policy: mode plus per-class caps.
///
/// Caps bound how many hook invocations of each class one run schedules.
/// [`EnrichmentMode::Off`] schedules nothing (counters still accumulate);
/// [`EnrichmentMode::Partial`] applies the caps; [`EnrichmentMode::Full`]
/// ignores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// How much enrichment work to schedule.
    #[serde(default)]
    pub mode: EnrichmentMode,

    /// Cap on entity-description enrichments (partial mode).
    #[serde(default = "default_max_descriptions")]
    pub max_descriptions: u32,

    /// Cap on relationship enrichments (partial mode).
    #[serde(default = "default_max_relationship_enrichments")]
    pub max_relationship_enrichments: u32,

    /// Cap on era narratives (partial mode).
    #[serde(default = "default_max_era_narratives")]
    pub max_era_narratives: u32,

    /// Cap on per-entity change narrations (partial mode).
    #[serde(default = "default_max_change_narratives")]
    pub max_change_narratives: u32,

    /// Cap on discovery narrations (partial mode).
    #[serde(default = "default_max_discovery_narratives")]
    pub max_discovery_narratives: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            mode: EnrichmentMode::Off,
            max_descriptions: default_max_descriptions(),
            max_relationship_enrichments: default_max_relationship_enrichments(),
            max_era_narratives: default_max_era_narratives(),
            max_change_narratives: default_max_change_narratives(),
            max_discovery_narratives: default_max_discovery_narratives(),
        }
    }
}

/// Mythic-imagery policy for the end-of-run hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Whether to queue mythic imagery at all.
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of mythic entities to queue imagery for.
    #[serde(default = "default_max_images")]
    pub max_images: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_images: default_max_images(),
        }
    }
}

const fn default_epochs_per_era() -> u64 {
    3
}

const fn default_ticks_per_epoch() -> u64 {
    5
}

const fn default_target_entities_per_kind() -> u64 {
    15
}

const fn default_max_ticks() -> u64 {
    120
}

const fn default_max_per_simulation_tick() -> u32 {
    50
}

const fn default_max_per_growth_phase() -> u32 {
    40
}

const fn default_forgotten_after() -> u64 {
    50
}

const fn default_isolation_degree() -> usize {
    2
}

const fn default_mortal_after() -> u64 {
    80
}

const fn default_mortality_chance() -> f64 {
    0.3
}

fn default_alive_status() -> String {
    String::from("alive")
}

fn default_dead_status() -> String {
    String::from("dead")
}

const fn default_growth_max_per_tick() -> u32 {
    30
}

const fn default_growth_window() -> u64 {
    20
}

const fn default_cull_interval() -> u64 {
    10
}

const fn default_cull_threshold() -> f64 {
    0.15
}

const fn default_cull_grace() -> u64 {
    20
}

const fn default_cooldown_ticks() -> u64 {
    8
}

const fn default_max_descriptions() -> u32 {
    10
}

const fn default_max_relationship_enrichments() -> u32 {
    5
}

const fn default_max_era_narratives() -> u32 {
    2
}

const fn default_max_change_narratives() -> u32 {
    10
}

const fn default_max_discovery_narratives() -> u32 {
    5
}

const fn default_max_images() -> u32 {
    4
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.ticks_per_epoch, 5);
        assert_eq!(config.aging.forgotten_after, 50);
        assert_eq!(config.aging.mortal_after, 80);
        assert_eq!(config.growth_alarm.max_per_tick, 30);
        assert_eq!(config.growth_alarm.window, 20);
        assert_eq!(config.relationship_budget.max_per_simulation_tick, 50);
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let yaml = r"
seed: 42
max_ticks: 30
relationship_budget:
  max_per_simulation_tick: 10
aging:
  mortal_after: 60
";
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.max_ticks, 30);
        assert_eq!(config.relationship_budget.max_per_simulation_tick, 10);
        assert_eq!(config.relationship_budget.max_per_growth_phase, 40);
        assert_eq!(config.aging.mortal_after, 60);
        assert_eq!(config.aging.forgotten_after, 50);
    }

    #[test]
    fn cooldown_policy_falls_back_to_default() {
        let mut policy = CooldownPolicy::default();
        policy
            .per_kind
            .insert(RelationshipKind::from("allied_with"), 12);
        assert_eq!(policy.ticks_for(&RelationshipKind::from("allied_with")), 12);
        assert_eq!(policy.ticks_for(&RelationshipKind::from("enemy_of")), 8);
    }

    #[test]
    fn planned_epochs_doubles_the_era_count() {
        let config = EngineConfig::default();
        assert_eq!(config.planned_epochs(3), 6);
        assert_eq!(config.planned_epochs(0), 0);
    }
}
