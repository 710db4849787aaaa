//! Configuration loading and typed config structures for Holdfast.
//!
//! The canonical configuration lives in `holdfast-config.yaml`. Every field
//! has a default, so an empty document (or no file at all) yields a working
//! configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use holdfast_cache::NeighborhoodShape;
use holdfast_hooks::FailurePolicy;
use serde::Deserialize;

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

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HoldfastConfig {
    /// Cache sizing and expiry.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Locality tracking.
    #[serde(default)]
    pub locality: LocalityConfig,

    /// Deferred save queue.
    #[serde(default)]
    pub saves: SaveConfig,

    /// Hook failure policies.
    #[serde(default)]
    pub hooks: HookConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Periodic driver (engine binary only).
    #[serde(default)]
    pub driver: DriverConfig,
}

impl HoldfastConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `HOLDFAST_LOG` overrides `logging.level` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.logging.apply_env_overrides();
        Ok(config)
    }
}

/// Cache sizing and expiry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Maximum cells held by the territory cache.
    #[serde(default = "default_territory_capacity")]
    pub territory_capacity: usize,

    /// Idle lifetime of entity, membership and balance entries, in milliseconds.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// How often the driver sweeps expired entries, in milliseconds.
    #[serde(default = "default_cache_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl CacheConfig {
    /// The key-space TTL as a [`Duration`].
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            territory_capacity: default_territory_capacity(),
            ttl_ms: default_ttl_ms(),
            sweep_interval_ms: default_cache_sweep_interval_ms(),
        }
    }
}

/// Locality tracking.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalityConfig {
    /// Neighborhood radius used by observer refreshes, in cells.
    #[serde(default = "default_radius")]
    pub radius: u32,

    /// Upper bound on any requested radius.
    #[serde(default = "default_max_radius")]
    pub max_radius: u32,

    /// Neighborhood shape.
    #[serde(default)]
    pub shape: NeighborhoodShape,

    /// How long a cell nobody is near stays tracked, in milliseconds.
    #[serde(default = "default_max_idle_ms")]
    pub max_idle_ms: u64,

    /// How often the driver runs the idle sweep, in milliseconds.
    #[serde(default = "default_locality_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl LocalityConfig {
    /// The idle limit as a [`Duration`].
    pub const fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }
}

impl Default for LocalityConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            max_radius: default_max_radius(),
            shape: NeighborhoodShape::default(),
            max_idle_ms: default_max_idle_ms(),
            sweep_interval_ms: default_locality_sweep_interval_ms(),
        }
    }
}

/// Deferred save queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SaveConfig {
    /// How often the driver drains the queue, in milliseconds.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: default_drain_interval_ms(),
        }
    }
}

/// Hook failure policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HookConfig {
    /// Policy for hooks without an explicit entry.
    #[serde(default)]
    pub default_failure_policy: FailurePolicy,

    /// Per-hook overrides keyed by hook name.
    #[serde(default)]
    pub failure_policies: BTreeMap<String, FailurePolicy>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    /// Override the level with `HOLDFAST_LOG` when it is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOLDFAST_LOG") {
            self.level = val;
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Periodic driver and synthetic load (engine binary only).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriverConfig {
    /// Interval between synthetic observer moves, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// World the synthetic observers walk in.
    #[serde(default = "default_world")]
    pub world: String,

    /// Number of synthetic wandering observers (0 disables the load).
    #[serde(default)]
    pub synthetic_observers: u32,

    /// Seed for the synthetic load.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Every N ticks one synthetic observer tries to claim its cell (0 disables).
    #[serde(default = "default_claim_every_ticks")]
    pub claim_every_ticks: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            world: default_world(),
            synthetic_observers: 0,
            seed: default_seed(),
            claim_every_ticks: default_claim_every_ticks(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_territory_capacity() -> usize {
    10_000
}

const fn default_ttl_ms() -> u64 {
    300_000
}

const fn default_cache_sweep_interval_ms() -> u64 {
    60_000
}

const fn default_radius() -> u32 {
    4
}

const fn default_max_radius() -> u32 {
    16
}

const fn default_max_idle_ms() -> u64 {
    600_000
}

const fn default_locality_sweep_interval_ms() -> u64 {
    120_000
}

const fn default_drain_interval_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_tick_interval_ms() -> u64 {
    250
}

fn default_world() -> String {
    "world".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_claim_every_ticks() -> u64 {
    20
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HoldfastConfig::default();
        assert_eq!(config.cache.territory_capacity, 10_000);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.locality.radius, 4);
        assert_eq!(config.locality.shape, NeighborhoodShape::Square);
        assert_eq!(config.saves.drain_interval_ms, 5_000);
        assert_eq!(config.hooks.default_failure_policy, FailurePolicy::FailClosed);
        assert_eq!(config.driver.synthetic_observers, 0);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
cache:
  territory_capacity: 256
  ttl_ms: 1000
  sweep_interval_ms: 500
locality:
  radius: 2
  max_radius: 6
  shape: diamond
  max_idle_ms: 9000
  sweep_interval_ms: 3000
saves:
  drain_interval_ms: 100
hooks:
  default_failure_policy: fail_closed
  failure_policies:
    territory.claim: fail_open
logging:
  json: true
driver:
  tick_interval_ms: 50
  world: overworld
  synthetic_observers: 8
  seed: 7
  claim_every_ticks: 0
";
        let config = HoldfastConfig::parse(yaml).unwrap();
        assert_eq!(config.cache.territory_capacity, 256);
        assert_eq!(config.locality.shape, NeighborhoodShape::Diamond);
        assert_eq!(config.locality.max_idle(), Duration::from_secs(9));
        assert_eq!(
            config.hooks.failure_policies.get("territory.claim"),
            Some(&FailurePolicy::FailOpen)
        );
        assert!(config.logging.json);
        assert_eq!(config.driver.world, "overworld");
        assert_eq!(config.driver.synthetic_observers, 8);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = HoldfastConfig::parse("cache:\n  ttl_ms: 10\n").unwrap();
        assert_eq!(config.cache.ttl_ms, 10);
        assert_eq!(config.cache.territory_capacity, 10_000);
        assert_eq!(config.locality, LocalityConfig::default());
    }

    #[test]
    fn parse_empty_yaml() {
        let config = HoldfastConfig::parse("").unwrap();
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let result = HoldfastConfig::parse("cache: [unterminated");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
