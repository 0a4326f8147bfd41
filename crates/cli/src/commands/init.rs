//! `agentweave init`: write the default configuration.

use agentweave_config::AppConfig;
use std::path::Path;

use super::CliResult;

pub async fn run(path: Option<&Path>, force: bool) -> CliResult {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };

    if config_path.exists() && !force {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or re-run with --force.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created config at: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. agentweave import <definition.json>");
    println!("  2. agentweave create --definition <id>");
    Ok(())
}
