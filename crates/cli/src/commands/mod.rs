//! Subcommand implementations and the wiring they share.

pub mod init;
pub mod inspect;
pub mod manage;

use agentweave_config::AppConfig;
use agentweave_core::store::AgentStore;
use agentweave_store::{InMemoryStore, MessageSync, SqliteStore};
use agentweave_tools::ToolSettings;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Load `path` if given, otherwise the default config with env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// Open the configured storage backend.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn AgentStore>, Box<dyn std::error::Error>> {
    match config.persistence.backend.as_str() {
        "memory" => {
            tracing::warn!("Using the in-memory backend, nothing will be kept");
            Ok(Arc::new(InMemoryStore::new()))
        }
        _ => {
            let path = &config.persistence.database_path;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let url = format!("sqlite://{}", path.display());
            let store = SqliteStore::new(&url)
                .await
                .map_err(|e| format!("Failed to open database {}: {e}", path.display()))?;
            Ok(Arc::new(store))
        }
    }
}

/// The persistence front the orchestrator and tools share.
pub async fn open_sync(config: &AppConfig) -> Result<MessageSync, Box<dyn std::error::Error>> {
    let store = open_store(config).await?;
    Ok(MessageSync::with_debounce(
        store,
        Duration::from_millis(config.persistence.debounce_ms),
    ))
}

pub fn tool_settings(config: &AppConfig) -> ToolSettings {
    ToolSettings {
        result_duration: config.orchestrator.tool_result_duration,
        error_duration: config.orchestrator.tool_error_duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[orchestrator]\ntool_result_duration = 3\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(tool_settings(&config).result_duration, 3);
        assert_eq!(tool_settings(&config).error_duration, 2);
    }

    #[test]
    fn invalid_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[persistence]\nbackend = \"postgres\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[tokio::test]
    async fn sqlite_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.persistence.database_path = dir.path().join("nested").join("agentweave.db");

        let store = open_store(&config).await.unwrap();
        assert_eq!(store.name(), "sqlite");
        assert!(config.persistence.database_path.exists());
    }
}
