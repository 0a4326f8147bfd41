//! Commands that change stored definitions and instances.

use agentweave_config::AppConfig;
use agentweave_core::agent::{AgentDefinition, AgentInstance, InstancePatch};
use std::path::Path;
use tracing::info;

use super::{CliResult, open_store, open_sync};

/// `agentweave import`: store a definition read from JSON.
pub async fn import(config: &AppConfig, path: &Path) -> CliResult {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let definition: AgentDefinition = serde_json::from_str(&content)
        .map_err(|e| format!("Invalid agent definition in {}: {e}", path.display()))?;

    let duplicates = definition.framework.prompts.duplicate_ids();
    if !duplicates.is_empty() {
        eprintln!("Warning: duplicate prompt node ids: {}", duplicates.join(", "));
    }

    let store = open_store(config).await?;
    store.save_definition(&definition).await?;
    info!(definition_id = %definition.id, tools = definition.framework.tools.len(), "Imported definition");
    println!("Imported definition '{}' ({})", definition.name, definition.id);
    Ok(())
}

/// `agentweave create`: start a new instance of a definition.
pub async fn create(config: &AppConfig, definition_id: &str, name: Option<String>) -> CliResult {
    let store = open_store(config).await?;
    let definition = store
        .get_definition(definition_id)
        .await?
        .ok_or_else(|| format!("No agent definition '{definition_id}'"))?;

    let instance = AgentInstance::new(&definition, name);
    store.create_instance(&instance).await?;
    println!("{}", instance.id);
    Ok(())
}

/// `agentweave close`
pub async fn close(config: &AppConfig, instance_id: &str) -> CliResult {
    let sync = open_sync(config).await?;
    let patch = InstancePatch {
        closed: Some(true),
        ..InstancePatch::default()
    };
    match sync.update_instance(instance_id, &patch).await? {
        Some(_) => println!("Closed {instance_id}"),
        None => return Err(format!("No agent instance '{instance_id}'").into()),
    }
    Ok(())
}

/// `agentweave delete`
pub async fn delete(config: &AppConfig, instance_id: &str) -> CliResult {
    let store = open_store(config).await?;
    if !store.delete_instance(instance_id).await? {
        return Err(format!("No agent instance '{instance_id}'").into());
    }
    println!("Deleted {instance_id}");
    Ok(())
}
