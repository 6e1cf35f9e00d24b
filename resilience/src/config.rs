//! Engine configuration.
//!
//! Layered configuration in the 12-factor pattern:
//! 1. Defaults (from code)
//! 2. Config file (curio.toml)
//! 3. Environment variables (CURIO_* prefix, `__` separates nesting)
//!
//! In addition to file/env loading, [`EngineConfig::merge`] applies an
//! all-optional [`EngineConfigPatch`] so callers can adjust individual
//! sections at runtime without restating the rest.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration result type alias.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration loading/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),

    #[error("Failed to serialize defaults: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    Invalid(String),
}

/// Retry policy for a protected operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per call, counting the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Per-service circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open circuit rejects before a half-open trial, in
    /// milliseconds.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

/// Fallback execution toggle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Error-rate spike alerting over a sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Sliding window width, in milliseconds.
    #[serde(default = "default_alert_window_ms")]
    pub window_ms: u64,

    /// Error/attempt ratio above which the alert fires.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Minimum samples in the window before the alert may fire.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

/// Engine-lifetime retry throttle, layered on top of per-call backoff to
/// shed load during sustained error conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Factor applied to the shared delay multiplier on every retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Ceiling for any throttled delay, in milliseconds.
    #[serde(default = "default_throttle_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Concurrency protection for retry-wrapped operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// In-flight operations admitted before rejection.
    #[serde(default = "default_max_concurrent_retries")]
    pub max_concurrent_retries: usize,
}

/// Advisory graceful-shutdown thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cumulative error count that engages the shutdown flag.
    #[serde(default = "default_persistent_error_threshold")]
    pub persistent_error_threshold: u64,
}

/// Recovery-queue promotion parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// Cumulative attempts after which an item is dead-lettered.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

/// Health monitor sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Periodic sweep interval, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// A service with no activity for this long is marked inactive, in
    /// milliseconds.
    #[serde(default = "default_inactive_after_ms")]
    pub inactive_after_ms: u64,
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub fallback: FallbackConfig,
    pub alerting: AlertConfig,
    pub rate_limit: RateLimitConfig,
    pub resources: ResourceConfig,
    pub shutdown: ShutdownConfig,
    pub dead_letter: DeadLetterConfig,
    pub health: HealthConfig,
}

/// All-optional mirror of [`EngineConfig`] for merge-on-set updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfigPatch {
    pub retry: Option<RetryConfig>,
    pub breaker: Option<BreakerConfig>,
    pub fallback: Option<FallbackConfig>,
    pub alerting: Option<AlertConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub resources: Option<ResourceConfig>,
    pub shutdown: Option<ShutdownConfig>,
    pub dead_letter: Option<DeadLetterConfig>,
    pub health: Option<HealthConfig>,
}

impl EngineConfig {
    /// Apply a patch: sections present in the patch replace the current
    /// section, absent sections are left untouched.
    pub fn merge(&mut self, patch: EngineConfigPatch) {
        if let Some(retry) = patch.retry {
            self.retry = retry;
        }
        if let Some(breaker) = patch.breaker {
            self.breaker = breaker;
        }
        if let Some(fallback) = patch.fallback {
            self.fallback = fallback;
        }
        if let Some(alerting) = patch.alerting {
            self.alerting = alerting;
        }
        if let Some(rate_limit) = patch.rate_limit {
            self.rate_limit = rate_limit;
        }
        if let Some(resources) = patch.resources {
            self.resources = resources;
        }
        if let Some(shutdown) = patch.shutdown {
            self.shutdown = shutdown;
        }
        if let Some(dead_letter) = patch.dead_letter {
            self.dead_letter = dead_letter;
        }
        if let Some(health) = patch.health {
            self.health = health;
        }
    }

    /// Sanity-check quantitative fields.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.alerting.error_rate_threshold) {
            return Err(ConfigError::Invalid(
                "alerting.error_rate_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.rate_limit.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "rate_limit.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.resources.max_concurrent_retries == 0 {
            return Err(ConfigError::Invalid(
                "resources.max_concurrent_retries must be at least 1".to_string(),
            ));
        }
        if self.dead_letter.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dead_letter.max_retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    60_000
}
fn default_true() -> bool {
    true
}
fn default_alert_window_ms() -> u64 {
    60_000
}
fn default_error_rate_threshold() -> f64 {
    0.5
}
fn default_min_samples() -> usize {
    5
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_throttle_max_delay_ms() -> u64 {
    60_000
}
fn default_max_concurrent_retries() -> usize {
    10
}
fn default_persistent_error_threshold() -> u64 {
    100
}
fn default_max_retry_attempts() -> u32 {
    5
}
fn default_sweep_interval_ms() -> u64 {
    300_000
}
fn default_inactive_after_ms() -> u64 {
    1_800_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            window_ms: default_alert_window_ms(),
            error_rate_threshold: default_error_rate_threshold(),
            min_samples: default_min_samples(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_throttle_max_delay_ms(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_retries: default_max_concurrent_retries(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            persistent_error_threshold: default_persistent_error_threshold(),
        }
    }
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            inactive_after_ms: default_inactive_after_ms(),
        }
    }
}

/// Configuration loader with layered merging support.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path.
    #[must_use]
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Defaults (from `Default` implementations)
    /// 2. Config file, if provided
    /// 3. Environment variables (CURIO_ prefix)
    pub fn load(&self) -> Result<EngineConfig> {
        let mut builder = Config::builder();

        // Layer 1: defaults, serialized and loaded as the base source.
        let defaults_json = serde_json::to_string(&EngineConfig::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        // Layer 2: config file.
        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: environment variables.
        // Example: CURIO_RETRY__MAX_ATTEMPTS=5
        builder = builder.add_source(
            Environment::with_prefix("CURIO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let built = builder.build()?;
        let engine_config: EngineConfig = built.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Locate the default config file:
    /// 1. Current directory: ./curio.toml
    /// 2. XDG config: ~/.config/curio/config.toml
    /// 3. Home directory: ~/.curio.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./curio.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("curio").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".curio.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from default locations.
    pub fn load_default() -> Result<EngineConfig> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };
        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;

    #[test]
    fn default_config_matches_contract_numbers() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.reset_timeout_ms, 60_000);
        assert!(config.fallback.enabled);
        assert_eq!(config.alerting.window_ms, 60_000);
        assert_eq!(config.alerting.error_rate_threshold, 0.5);
        assert_eq!(config.alerting.min_samples, 5);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.resources.max_concurrent_retries, 10);
        assert_eq!(config.shutdown.persistent_error_threshold, 100);
        assert_eq!(config.dead_letter.max_retry_attempts, 5);
        assert_eq!(config.health.sweep_interval_ms, 300_000);
        assert_eq!(config.health.inactive_after_ms, 1_800_000);
    }

    #[test]
    fn merge_replaces_only_present_sections() {
        let mut config = EngineConfig::default();
        let patch = EngineConfigPatch {
            retry: Some(RetryConfig {
                max_attempts: 7,
                base_delay_ms: 50,
                max_delay_ms: 500,
            }),
            shutdown: Some(ShutdownConfig {
                enabled: false,
                persistent_error_threshold: 10,
            }),
            ..EngineConfigPatch::default()
        };
        config.merge(patch);
        assert_eq!(config.retry.max_attempts, 7);
        assert!(!config.shutdown.enabled);
        // Untouched sections keep their defaults.
        assert_eq!(config.breaker.failure_threshold, 5);
        assert!(config.fallback.enabled);
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let mut config = EngineConfig::default();
        config.alerting.error_rate_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    #[serial]
    fn load_with_toml_file() {
        let toml_content = r#"
[retry]
max_attempts = 4
base_delay_ms = 250

[breaker]
failure_threshold = 3

[rate_limit]
enabled = true
backoff_multiplier = 1.5
"#;
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let config_path = temp_dir.path().join("curio.toml");
        std::fs::write(&config_path, toml_content).expect("write config");

        let config = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .expect("load config");

        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 250);
        // Unset fields fall back to defaults.
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.backoff_multiplier, 1.5);
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        let toml_content = r#"
[retry]
max_attempts = 4
"#;
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let config_path = temp_dir.path().join("curio.toml");
        std::fs::write(&config_path, toml_content).expect("write config");

        unsafe {
            env::set_var("CURIO_RETRY__MAX_ATTEMPTS", "9");
        }

        let config = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .expect("load config");
        assert_eq!(config.retry.max_attempts, 9);

        unsafe {
            env::remove_var("CURIO_RETRY__MAX_ATTEMPTS");
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/curio.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
