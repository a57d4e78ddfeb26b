//! Configuration management
//!
//! This module handles loading, validation, and management of the Maestro
//! configuration. Configuration is stored in TOML format at
//! ~/.maestro/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, log level
//! - **conductor**: Tick interval, metrics smoothing
//! - **plan**: Plan engine scheduling limits
//! - **trajectory**: Trajectory recorder settings
//! - **chiefs**: Built-in chief enablement and thresholds
//!
//! # Path Expansion
//!
//! The configuration system automatically expands `~` to the user's home
//! directory and creates the data directory if it doesn't exist.
//!
//! # Examples
//!
//! ```no_run
//! use maestro_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Tick interval: {}ms", config.conductor.tick_interval_ms);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Conductor settings
    #[serde(default)]
    pub conductor: ConductorConfig,

    /// Plan engine settings
    #[serde(default)]
    pub plan: PlanConfig,

    /// Trajectory recorder settings
    #[serde(default)]
    pub trajectory: TrajectoryConfig,

    /// Built-in chief settings
    #[serde(default)]
    pub chiefs: ChiefsConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Conductor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Interval between self-triggered ticks in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Smoothing factor for the cycle-duration moving average (0, 1]
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            ema_alpha: default_ema_alpha(),
        }
    }
}

/// Plan engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Maximum nodes scheduled per pass
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Seconds a node may stay running before it counts as stalled
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    /// Stall retries before a node is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seconds a terminal tree stays in the active set before compaction
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            stall_timeout_secs: default_stall_timeout_secs(),
            max_retries: default_max_retries(),
            retention_secs: default_retention_secs(),
        }
    }
}

/// Trajectory recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Ring-buffer capacity of the in-memory sink
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Persist trajectory steps to SQLite
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            persist: default_true(),
        }
    }
}

/// Built-in chief enablement and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChiefsConfig {
    /// Names of built-in chiefs to register on start
    #[serde(default = "default_enabled_chiefs")]
    pub enabled: Vec<String>,

    #[serde(default)]
    pub intake: IntakeConfig,

    #[serde(default)]
    pub lineage: LineageConfig,

    #[serde(default)]
    pub replay: ReplayConfig,

    #[serde(default)]
    pub balance: BalanceConfig,
}

impl Default for ChiefsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_chiefs(),
            intake: IntakeConfig::default(),
            lineage: LineageConfig::default(),
            replay: ReplayConfig::default(),
            balance: BalanceConfig::default(),
        }
    }
}

/// Work-intake chief thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Energy level below which the chief waits instead of activating
    #[serde(default = "default_energy_floor")]
    pub energy_floor: f64,

    /// Energy level at or above which the priority strategy is preferred
    #[serde(default = "default_strategy_energy")]
    pub strategy_energy: f64,

    /// Pending depth above which the energy-aware strategy is preferred
    #[serde(default = "default_energy_aware_depth")]
    pub energy_aware_depth: u64,

    /// Maximum items activated per turn
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u64,

    /// Active depth above which the chief rebalances instead of activating
    #[serde(default = "default_high_load")]
    pub high_load: u64,

    /// Idle ticks after which the chief checkpoints
    #[serde(default = "default_idle_checkpoint_ticks")]
    pub idle_checkpoint_ticks: u64,

    /// Backoff returned when the energy gate is closed, in milliseconds
    #[serde(default = "default_energy_backoff_ms")]
    pub energy_backoff_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            energy_floor: default_energy_floor(),
            strategy_energy: default_strategy_energy(),
            energy_aware_depth: default_energy_aware_depth(),
            batch_limit: default_batch_limit(),
            high_load: default_high_load(),
            idle_checkpoint_ticks: default_idle_checkpoint_ticks(),
            energy_backoff_ms: default_energy_backoff_ms(),
        }
    }
}

/// Lineage chief thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageConfig {
    /// Chain depth above which the chief consolidates
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: u64,

    /// Ticks without a checkpoint after which one is forced
    #[serde(default = "default_checkpoint_after_ticks")]
    pub checkpoint_after_ticks: u64,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: default_max_chain_depth(),
            checkpoint_after_ticks: default_checkpoint_after_ticks(),
        }
    }
}

/// Replay chief settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Work units one replay job processes before self-terminating
    #[serde(default = "default_replay_budget")]
    pub budget_steps: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            budget_steps: default_replay_budget(),
        }
    }
}

/// Balance chief thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Max/mean shard-load ratio above which the chief rebalances
    #[serde(default = "default_skew_threshold")]
    pub skew_threshold: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            skew_threshold: default_skew_threshold(),
        }
    }
}

// Default value functions

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.maestro")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_ema_alpha() -> f64 {
    0.2
}

fn default_parallelism() -> usize {
    4
}

fn default_stall_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_memory_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_enabled_chiefs() -> Vec<String> {
    vec![
        "intake".to_string(),
        "lineage".to_string(),
        "mission".to_string(),
        "replay".to_string(),
        "balance".to_string(),
    ]
}

fn default_energy_floor() -> f64 {
    0.3
}

fn default_strategy_energy() -> f64 {
    0.75
}

fn default_energy_aware_depth() -> u64 {
    50
}

fn default_batch_limit() -> u64 {
    25
}

fn default_high_load() -> u64 {
    100
}

fn default_idle_checkpoint_ticks() -> u64 {
    30
}

fn default_energy_backoff_ms() -> u64 {
    500
}

fn default_max_chain_depth() -> u64 {
    8
}

fn default_checkpoint_after_ticks() -> u64 {
    20
}

fn default_replay_budget() -> u64 {
    64
}

fn default_skew_threshold() -> f64 {
    2.0
}

impl Config {
    /// Default configuration file path: ~/.maestro/config.toml
    pub fn default_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(".maestro").join("config.toml"))
    }

    /// Load configuration from the default path, creating a default file
    /// if none exists
    pub fn load_or_create() -> Result<Self, EngineError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            tracing::info!("Created default configuration at {}", path.display());
            Ok(config)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&raw).map_err(|e| {
            EngineError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a specific path, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, raw).map_err(|e| {
            EngineError::Config(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Expanded data directory, with `~` resolved
    pub fn data_dir(&self) -> Result<PathBuf, EngineError> {
        expand_tilde(&self.core.data_dir)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), EngineError> {
        const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
        if !LEVELS.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}', expected one of {:?}",
                self.core.log_level, LEVELS
            )));
        }

        if self.conductor.tick_interval_ms < 10 {
            return Err(EngineError::Config(
                "tick_interval_ms must be at least 10".to_string(),
            ));
        }

        if !(self.conductor.ema_alpha > 0.0 && self.conductor.ema_alpha <= 1.0) {
            return Err(EngineError::Config(
                "ema_alpha must be in (0, 1]".to_string(),
            ));
        }

        if self.plan.parallelism == 0 {
            return Err(EngineError::Config(
                "plan.parallelism must be at least 1".to_string(),
            ));
        }

        if self.trajectory.memory_capacity == 0 {
            return Err(EngineError::Config(
                "trajectory.memory_capacity must be at least 1".to_string(),
            ));
        }

        if !(self.chiefs.intake.energy_floor >= 0.0 && self.chiefs.intake.energy_floor <= 1.0) {
            return Err(EngineError::Config(
                "chiefs.intake.energy_floor must be in [0, 1]".to_string(),
            ));
        }

        if self.chiefs.balance.skew_threshold < 1.0 {
            return Err(EngineError::Config(
                "chiefs.balance.skew_threshold must be at least 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory
fn expand_tilde(path: &Path) -> Result<PathBuf, EngineError> {
    let raw = path.to_string_lossy();
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else if raw == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.conductor.tick_interval_ms, 1000);
        assert_eq!(config.plan.parallelism, 4);
        assert_eq!(config.chiefs.enabled.len(), 5);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.conductor.tick_interval_ms = 250;
        config.plan.stall_timeout_secs = 45;
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.conductor.tick_interval_ms, 250);
        assert_eq!(loaded.plan.stall_timeout_secs, 45);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[conductor]\ntick_interval_ms = 100\n").unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.conductor.tick_interval_ms, 100);
        // Untouched sections fall back to defaults
        assert_eq!(loaded.plan.parallelism, 4);
        assert!((loaded.chiefs.intake.energy_floor - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.conductor.ema_alpha = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.core.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.plan.parallelism = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chiefs.balance.skew_threshold = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nope.toml");
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        let plain = PathBuf::from("/var/lib/maestro");
        assert_eq!(expand_tilde(&plain).unwrap(), plain);
    }
}
