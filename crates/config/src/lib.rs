//! Configuration loading, validation, and management for agentweave.
//!
//! Loads configuration from `~/.agentweave/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use agentweave_core::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentweave/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider defaults, the lowest layer under definition and instance overrides
    #[serde(default = "default_provider_config")]
    pub provider: ProviderConfig,

    /// Conversation loop settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Storage and sync settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_provider_config() -> ProviderConfig {
    ProviderConfig {
        provider: Some("openai".into()),
        model: Some("gpt-4o".into()),
        temperature: Some(0.7),
        max_tokens: Some(4096),
        top_p: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on provider rounds within one turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Context-window duration of a successful tool result
    #[serde(default = "default_tool_result_duration")]
    pub tool_result_duration: u32,

    /// Context-window duration of a failed tool result
    #[serde(default = "default_tool_error_duration")]
    pub tool_error_duration: u32,
}

fn default_max_rounds() -> u32 {
    25
}
fn default_tool_result_duration() -> u32 {
    1
}
fn default_tool_error_duration() -> u32 {
    2
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            tool_result_duration: default_tool_result_duration(),
            tool_error_duration: default_tool_error_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Coalescing window for streaming updates, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_backend() -> String {
    "sqlite".into()
}
fn default_database_path() -> PathBuf {
    AppConfig::config_dir().join("agentweave.db")
}
fn default_debounce_ms() -> u64 {
    300
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_path: default_database_path(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const BACKENDS: [&str; 2] = ["sqlite", "memory"];
const MAX_DEBOUNCE_MS: u64 = 10_000;

impl AppConfig {
    /// Load configuration from the default path, then apply environment
    /// overrides.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (`AGENTWEAVE_PROVIDER`, `AGENTWEAVE_MODEL`, `AGENTWEAVE_DATABASE`)
    /// 2. Config file (`~/.agentweave/config.toml`)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("AGENTWEAVE_PROVIDER") {
            self.provider.provider = Some(provider);
        }
        if let Some(model) = lookup("AGENTWEAVE_MODEL") {
            self.provider.model = Some(model);
        }
        if let Some(database) = lookup("AGENTWEAVE_DATABASE") {
            self.persistence.database_path = PathBuf::from(database);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentweave")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.provider.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "provider.temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }

        if self.orchestrator.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_rounds must be at least 1".into(),
            ));
        }

        if self.persistence.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::ValidationError(format!(
                "persistence.debounce_ms must be at most {MAX_DEBOUNCE_MS}"
            )));
        }

        if !BACKENDS.contains(&self.persistence.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "persistence.backend must be one of {BACKENDS:?}, got '{}'",
                self.persistence.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_config(),
            orchestrator: OrchestratorConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.orchestrator.max_rounds, 25);
        assert_eq!(config.orchestrator.tool_result_duration, 1);
        assert_eq!(config.orchestrator.tool_error_duration, 2);
        assert_eq!(config.persistence.backend, "sqlite");
        assert_eq!(config.persistence.debounce_ms, 300);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.persistence.database_path, config.persistence.database_path);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[persistence]\nbackend = \"memory\"\n\n[logging]\njson = true\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.persistence.backend, "memory");
        assert_eq!(config.persistence.debounce_ms, 300);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.provider.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.provider.temperature = Some(3.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_rounds_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.max_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.persistence.backend = "postgres".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn oversized_debounce_rejected() {
        let mut config = AppConfig::default();
        config.persistence.debounce_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "orchestrator = 12").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(config.orchestrator.max_rounds, 25);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            "AGENTWEAVE_MODEL" => Some("local-llama".into()),
            "AGENTWEAVE_DATABASE" => Some("/tmp/x.db".into()),
            _ => None,
        });
        assert_eq!(config.provider.model.as_deref(), Some("local-llama"));
        assert_eq!(config.provider.provider.as_deref(), Some("openai"));
        assert_eq!(config.persistence.database_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn default_toml_generation() {
        let toml = AppConfig::default_toml();
        assert!(toml.contains("[orchestrator]"));
        assert!(toml.contains("max_rounds"));
        assert!(toml.contains("debounce_ms"));
    }
}
