//! TOML Configuration File Support
//!
//! Loads engine settings from `~/.config/promptsmith/promptsmith.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! API keys are never read from the file; they come from the provider
//! environment variables through [`crate::credentials::EnvCredentialStore`].
//!
//! # Example Configuration
//!
//! ```toml
//! [orchestrator]
//! call_timeout_ms = 60000
//! max_failover_attempts = 3
//! default_target_quality = 85
//! high_quality_threshold = 85
//!
//! [cache]
//! enhancement_ttl_secs = 86400
//! suggestions_ttl_secs = 1800
//!
//! [providers.openai]
//! model = "gpt-4-turbo-preview"
//! max_tokens = 4000
//!
//! [providers.groq]
//! base_url = "https://api.groq.com/openai"
//! temperature = 0.5
//!
//! [limits]
//! daily_usd = 50.0
//! monthly_usd = 1000.0
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{AdapterSettings, ProviderKind};
use crate::cache::CacheTtls;
use crate::cost::CostLimits;
use crate::orchestrator::OrchestratorConfig;

/// Environment variable overriding the per-call timeout (milliseconds)
pub const ENV_CALL_TIMEOUT_MS: &str = "PROMPTSMITH_CALL_TIMEOUT_MS";

/// Environment variable overriding the default target quality
pub const ENV_TARGET_QUALITY: &str = "PROMPTSMITH_TARGET_QUALITY";

/// Environment variable overriding the failover attempt count
pub const ENV_MAX_FAILOVER: &str = "PROMPTSMITH_MAX_FAILOVER";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Orchestrator section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorToml {
    /// Upper bound on a single provider call in milliseconds
    pub call_timeout_ms: Option<u64>,

    /// Attempts made by execute/stream failover
    pub max_failover_attempts: Option<usize>,

    /// Quality target when the caller does not pass one
    pub default_target_quality: Option<f64>,

    /// Quality above which Anthropic/OpenAI are preferred
    pub high_quality_threshold: Option<u8>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Enhancement results
    pub enhancement_ttl_secs: Option<u64>,

    /// Quality scores
    pub scoring_ttl_secs: Option<u64>,

    /// Completions
    pub completion_ttl_secs: Option<u64>,

    /// Follow-up suggestions
    pub suggestions_ttl_secs: Option<u64>,
}

/// One `[providers.<name>]` table
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Model identifier
    pub model: Option<String>,

    /// API root
    pub base_url: Option<String>,

    /// Response token cap
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 to 1.0)
    pub temperature: Option<f32>,

    /// Idle read timeout in seconds (each read, not the whole response)
    pub timeout_secs: Option<u64>,
}

/// Spending limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Daily USD limit
    pub daily_usd: Option<f64>,

    /// Monthly USD limit
    pub monthly_usd: Option<f64>,

    /// Per-user monthly USD limit
    pub per_user_usd: Option<f64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsmithToml {
    /// Orchestrator configuration section
    pub orchestrator: OrchestratorToml,

    /// Cache configuration section
    pub cache: CacheToml,

    /// Provider tables keyed by provider name
    pub providers: HashMap<String, ProviderToml>,

    /// Spending limits section
    pub limits: LimitsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration for the engine
///
/// Use [`load_config`] to load with proper priority handling, then
/// [`ConfigOverrides::apply`] for command-line values.
#[derive(Clone, Debug)]
pub struct PromptsmithConfig {
    /// Orchestrator tuning
    pub orchestrator: OrchestratorConfig,

    /// Cache TTLs by operation class
    pub cache_ttls: CacheTtls,

    /// Adapter settings for every provider kind
    pub providers: HashMap<ProviderKind, AdapterSettings>,

    /// Spending limits
    pub limits: CostLimits,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for PromptsmithConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            cache_ttls: CacheTtls::default(),
            providers: ProviderKind::DISCOVERY_ORDER
                .into_iter()
                .map(|kind| (kind, AdapterSettings::defaults_for(kind)))
                .collect(),
            limits: CostLimits::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl PromptsmithConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Settings for one provider, falling back to the built-in defaults
    #[must_use]
    pub fn provider(&self, kind: ProviderKind) -> AdapterSettings {
        self.providers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| AdapterSettings::defaults_for(kind))
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.call_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "call_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.orchestrator.max_failover_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_failover_attempts must be at least 1".to_string(),
            ));
        }
        let target = self.orchestrator.default_target_quality;
        if target.is_nan() || target <= 0.0 || target > 100.0 {
            return Err(ConfigError::ValidationError(format!(
                "default_target_quality must be above 0 and at most 100, got {target}"
            )));
        }
        if self.orchestrator.high_quality_threshold > 100 {
            return Err(ConfigError::ValidationError(format!(
                "high_quality_threshold must be at most 100, got {}",
                self.orchestrator.high_quality_threshold
            )));
        }
        for (kind, settings) in &self.providers {
            if !(0.0..=1.0).contains(&settings.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{kind}.temperature must be between 0.0 and 1.0, got {}",
                    settings.temperature
                )));
            }
            if settings.max_tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{kind}.max_tokens must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/promptsmith/promptsmith.toml` or
/// `~/.config/promptsmith/promptsmith.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("promptsmith").join("promptsmith.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resolved values fail validation. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<PromptsmithConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<PromptsmithConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment values through `env`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PromptsmithConfig, ConfigError> {
    let mut config = PromptsmithConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: PromptsmithToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(
    config: &mut PromptsmithConfig,
    toml: &PromptsmithToml,
) -> Result<(), ConfigError> {
    let orchestrator = &mut config.orchestrator;
    if let Some(ms) = toml.orchestrator.call_timeout_ms {
        orchestrator.call_timeout = Duration::from_millis(ms);
    }
    if let Some(attempts) = toml.orchestrator.max_failover_attempts {
        orchestrator.max_failover_attempts = attempts;
    }
    if let Some(target) = toml.orchestrator.default_target_quality {
        orchestrator.default_target_quality = target;
    }
    if let Some(threshold) = toml.orchestrator.high_quality_threshold {
        orchestrator.high_quality_threshold = threshold;
    }

    let ttls = &mut config.cache_ttls;
    for (value, slot) in [
        (toml.cache.enhancement_ttl_secs, &mut ttls.enhancement),
        (toml.cache.scoring_ttl_secs, &mut ttls.scoring),
        (toml.cache.completion_ttl_secs, &mut ttls.completion),
        (toml.cache.suggestions_ttl_secs, &mut ttls.suggestions),
    ] {
        if let Some(secs) = value {
            *slot = Duration::from_secs(secs);
        }
    }

    for (name, table) in &toml.providers {
        let kind: ProviderKind = name.parse().map_err(|e| {
            ConfigError::ValidationError(format!("[providers.{name}]: {e}"))
        })?;
        let settings = config
            .providers
            .entry(kind)
            .or_insert_with(|| AdapterSettings::defaults_for(kind));
        if let Some(ref model) = table.model {
            settings.model.clone_from(model);
        }
        if let Some(ref base_url) = table.base_url {
            settings.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(max_tokens) = table.max_tokens {
            settings.max_tokens = max_tokens;
        }
        if let Some(temperature) = table.temperature {
            settings.temperature = temperature;
        }
        if let Some(secs) = table.timeout_secs {
            settings.timeout = Duration::from_secs(secs);
        }
    }

    if let Some(daily) = toml.limits.daily_usd {
        config.limits.daily = daily;
    }
    if let Some(monthly) = toml.limits.monthly_usd {
        config.limits.monthly = monthly;
    }
    if let Some(per_user) = toml.limits.per_user_usd {
        config.limits.per_user = per_user;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
///
/// Unparseable values are ignored with a warning.
fn apply_env_config(config: &mut PromptsmithConfig, env: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
        let value = raw.trim().parse().ok();
        if value.is_none() {
            tracing::warn!(var = key, value = raw, "Ignoring unparseable environment value");
        }
        value
    }

    if let Some(raw) = env(ENV_CALL_TIMEOUT_MS) {
        if let Some(ms) = parsed::<u64>(ENV_CALL_TIMEOUT_MS, &raw) {
            config.orchestrator.call_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = env(ENV_TARGET_QUALITY) {
        if let Some(target) = parsed::<f64>(ENV_TARGET_QUALITY, &raw) {
            config.orchestrator.default_target_quality = target;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = env(ENV_MAX_FAILOVER) {
        if let Some(attempts) = parsed::<usize>(ENV_MAX_FAILOVER, &raw) {
            config.orchestrator.max_failover_attempts = attempts;
            config.source = ConfigSource::Env;
        }
    }

    for kind in ProviderKind::DISCOVERY_ORDER {
        if let Some(model) = env(kind.model_env_var()).filter(|m| !m.trim().is_empty()) {
            config
                .providers
                .entry(kind)
                .or_insert_with(|| AdapterSettings::defaults_for(kind))
                .model = model.trim().to_string();
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides,
/// then call [`PromptsmithConfig::validate`] again.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Call timeout override (milliseconds)
    pub call_timeout_ms: Option<u64>,

    /// Target quality override
    pub target_quality: Option<f64>,

    /// Failover attempts override
    pub max_failover_attempts: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set call timeout override
    #[must_use]
    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = Some(ms);
        self
    }

    /// Set target quality override
    #[must_use]
    pub fn with_target_quality(mut self, target: f64) -> Self {
        self.target_quality = Some(target);
        self
    }

    /// Set failover attempts override
    #[must_use]
    pub fn with_max_failover_attempts(mut self, attempts: usize) -> Self {
        self.max_failover_attempts = Some(attempts);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut PromptsmithConfig) {
        if self.call_timeout_ms.is_some()
            || self.target_quality.is_some()
            || self.max_failover_attempts.is_some()
        {
            config.source = ConfigSource::Cli;
        }
        if let Some(ms) = self.call_timeout_ms {
            config.orchestrator.call_timeout = Duration::from_millis(ms);
        }
        if let Some(target) = self.target_quality {
            config.orchestrator.default_target_quality = target;
        }
        if let Some(attempts) = self.max_failover_attempts {
            config.orchestrator.max_failover_attempts = attempts;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
