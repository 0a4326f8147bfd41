//! AgentStore trait: durable storage of definitions, instances and messages.
//!
//! Implementations: SQLite (default) and in-memory (for testing).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentDefinition, AgentInstance, InstancePatch};
use crate::error::StoreError;
use crate::message::AgentMessage;

/// An instance together with its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance: AgentInstance,

    /// Sorted by `modified` ascending, ties in insertion order
    pub messages: Vec<AgentMessage>,
}

/// The persistence collaborator.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Insert or replace a definition.
    async fn save_definition(&self, definition: &AgentDefinition) -> Result<(), StoreError>;

    async fn get_definition(&self, id: &str) -> Result<Option<AgentDefinition>, StoreError>;

    async fn create_instance(&self, instance: &AgentInstance) -> Result<(), StoreError>;

    async fn get_instance(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError>;

    /// Apply a partial update; returns the updated instance, `None` if missing.
    async fn update_instance(
        &self,
        id: &str,
        patch: &InstancePatch,
    ) -> Result<Option<AgentInstance>, StoreError>;

    async fn list_instances(&self, include_closed: bool) -> Result<Vec<AgentInstance>, StoreError>;

    /// Delete an instance and all of its messages.
    async fn delete_instance(&self, id: &str) -> Result<bool, StoreError>;

    /// Idempotent upsert keyed by message id.
    async fn save_message(&self, message: &AgentMessage) -> Result<(), StoreError>;

    async fn get_message(&self, id: &str) -> Result<Option<AgentMessage>, StoreError>;
}
