//! In-memory store: useful for testing and ephemeral sessions.

use agentweave_core::agent::{AgentDefinition, AgentInstance, InstancePatch};
use agentweave_core::error::StoreError;
use agentweave_core::message::AgentMessage;
use agentweave_core::store::{AgentStore, InstanceRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    definitions: HashMap<String, AgentDefinition>,
    /// Kept in creation order
    instances: Vec<AgentInstance>,
    /// Kept in insertion order; upserts replace in place
    messages: Vec<AgentMessage>,
}

/// A store that keeps everything in process memory.
/// Nothing survives a restart.
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save_definition(&self, definition: &AgentDefinition) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn get_definition(&self, id: &str) -> Result<Option<AgentDefinition>, StoreError> {
        Ok(self.tables.read().await.definitions.get(id).cloned())
    }

    async fn create_instance(&self, instance: &AgentInstance) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.instances.iter().any(|i| i.id == instance.id) {
            return Err(StoreError::Storage(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        tables.instances.push(instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let tables = self.tables.read().await;
        let Some(instance) = tables.instances.iter().find(|i| i.id == id) else {
            return Ok(None);
        };

        let mut messages: Vec<AgentMessage> = tables
            .messages
            .iter()
            .filter(|m| m.agent_id == id)
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order
        messages.sort_by_key(|m| m.modified);

        Ok(Some(InstanceRecord {
            instance: instance.clone(),
            messages,
        }))
    }

    async fn update_instance(
        &self,
        id: &str,
        patch: &InstancePatch,
    ) -> Result<Option<AgentInstance>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.instances.iter_mut().find(|i| i.id == id).map(|instance| {
            instance.apply(patch);
            instance.clone()
        }))
    }

    async fn list_instances(&self, include_closed: bool) -> Result<Vec<AgentInstance>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .instances
            .iter()
            .filter(|i| include_closed || !i.closed)
            .cloned()
            .collect())
    }

    async fn delete_instance(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.instances.len();
        tables.instances.retain(|i| i.id != id);
        let removed = tables.instances.len() < before;
        if removed {
            tables.messages.retain(|m| m.agent_id != id);
        }
        Ok(removed)
    }

    async fn save_message(&self, message: &AgentMessage) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.instances.iter().any(|i| i.id == message.agent_id) {
            return Err(StoreError::Storage(format!(
                "message {} references unknown instance {}",
                message.id, message.agent_id
            )));
        }
        match tables.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => tables.messages.push(message.clone()),
        }
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<AgentMessage>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }
}
