//! Read-only commands: `list`, `history`, `prompt`.

use agentweave_agent::build_prompts;
use agentweave_config::AppConfig;
use agentweave_core::hook::AgentFrame;
use agentweave_core::message::AgentMessage;
use agentweave_tools::{InMemoryWiki, default_registry};
use std::sync::Arc;

use super::{CliResult, open_store, open_sync, tool_settings};

/// `agentweave list`
pub async fn list(config: &AppConfig, include_closed: bool) -> CliResult {
    let store = open_store(config).await?;
    let instances = store.list_instances(include_closed).await?;
    if instances.is_empty() {
        println!("No agent instances.");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<11} {:<20} MODIFIED", "ID", "NAME", "STATUS", "DEFINITION");
    for instance in instances {
        let status = if instance.closed {
            format!("{} (closed)", instance.status.as_str())
        } else {
            instance.status.as_str().to_string()
        };
        println!(
            "{:<38} {:<20} {:<11} {:<20} {}",
            instance.id,
            instance.name,
            status,
            instance.definition_id,
            instance.modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// `agentweave history`
pub async fn history(config: &AppConfig, instance_id: &str) -> CliResult {
    let store = open_store(config).await?;
    let record = store
        .get_instance(instance_id)
        .await?
        .ok_or_else(|| format!("No agent instance '{instance_id}'"))?;

    println!(
        "{} [{}] - {} messages",
        record.instance.name,
        record.instance.status.as_str(),
        record.messages.len()
    );
    for message in &record.messages {
        println!();
        println!("── {} ──", describe(message));
        println!("{}", message.content);
    }
    Ok(())
}

fn describe(message: &AgentMessage) -> String {
    let mut tags = vec![message.role.as_str().to_string()];
    if let Some(d) = message.duration {
        tags.push(format!("duration={d}"));
    }
    if let Some(tool) = &message.metadata.tool_id {
        tags.push(format!("tool={tool}"));
    }
    if message.metadata.contains_tool_call {
        tags.push("tool-call".into());
    }
    if message.metadata.is_error {
        tags.push("error".into());
    }
    if message.is_streaming() {
        tags.push("incomplete".into());
    }
    tags.push(message.modified.format("%H:%M:%S").to_string());
    tags.join(" · ")
}

/// `agentweave prompt`: the flattened prompt the next round would send.
pub async fn prompt(config: &AppConfig, instance_id: &str) -> CliResult {
    let sync = open_sync(config).await?;
    let store = sync.store().clone();
    let record = store
        .get_instance(instance_id)
        .await?
        .ok_or_else(|| format!("No agent instance '{instance_id}'"))?;
    let definition = store
        .get_definition(&record.instance.definition_id)
        .await?
        .ok_or_else(|| format!("No agent definition '{}'", record.instance.definition_id))?;

    let registry = default_registry(sync, Arc::new(InMemoryWiki::new()), tool_settings(config));
    let hooks = registry.build_hooks(&definition);
    let frame = AgentFrame {
        instance: record.instance,
        definition: Arc::new(definition),
        messages: record.messages,
    };

    let prompts = build_prompts(&hooks, &frame).await?;
    println!("{}", serde_json::to_string_pretty(&prompts)?);
    Ok(())
}
