//! `messagePersistence`: the always-on tool that writes the conversation
//! through [`MessageSync`].
//!
//! | hook                  | write                                          |
//! |-----------------------|------------------------------------------------|
//! | userMessageReceived   | `save_now`                                     |
//! | agentStatusChanged    | `update_instance`                              |
//! | responseUpdate        | first chunk `save_now`, later `save_debounced` |
//! | responseComplete      | `save_now` (message is complete)               |
//! | toolExecuted          | `save_now` every message not yet persisted     |

use agentweave_core::agent::InstancePatch;
use agentweave_core::error::{HookError, StoreError};
use agentweave_core::hook::{
    HookRegistry, ResponseContext, SeriesHandler, StatusContext, ToolExecutedContext,
    UserMessageContext,
};
use agentweave_core::message::AgentMessage;
use agentweave_store::MessageSync;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::framework::{RegisterTool, ToolSettings, ToolSpec};

pub const TOOL_ID: &str = "messagePersistence";

pub struct MessagePersistence {
    sync: MessageSync,
    spec: ToolSpec,
}

impl MessagePersistence {
    pub fn new(sync: MessageSync) -> Self {
        Self {
            sync,
            spec: ToolSpec {
                tool_id: TOOL_ID.into(),
                display_name: "Message persistence".into(),
                description: "Stores conversation messages and status changes".into(),
                config_schema: serde_json::json!({"type": "object"}),
                llm_tools: Vec::new(),
            },
        }
    }
}

impl RegisterTool for MessagePersistence {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn register(&self, hooks: &mut HookRegistry, _settings: &ToolSettings) {
        let sync = self.sync.clone();
        hooks
            .user_message_received
            .tap(TOOL_ID, Arc::new(SaveUserMessage { sync: sync.clone() }));
        hooks
            .agent_status_changed
            .tap(TOOL_ID, Arc::new(SaveStatus { sync: sync.clone() }));
        hooks.response_update.tap(
            TOOL_ID,
            Arc::new(SaveResponseUpdate {
                sync: sync.clone(),
                created: Mutex::new(HashSet::new()),
            }),
        );
        hooks
            .response_complete
            .tap(TOOL_ID, Arc::new(SaveResponseComplete { sync: sync.clone() }));
        hooks
            .tool_executed
            .tap(TOOL_ID, Arc::new(FlushToolMessages { sync }));
    }
}

/// Write `message` now and mark it persisted on success.
async fn persist(sync: &MessageSync, message: &mut AgentMessage) -> Result<(), StoreError> {
    let mut stored = message.clone();
    stored.metadata.is_persisted = true;
    sync.save_now(&stored).await?;
    message.metadata.is_persisted = true;
    Ok(())
}

struct SaveUserMessage {
    sync: MessageSync,
}

#[async_trait]
impl SeriesHandler<UserMessageContext> for SaveUserMessage {
    async fn call(&self, ctx: &mut UserMessageContext) -> Result<(), HookError> {
        persist(&self.sync, &mut ctx.message).await?;
        Ok(())
    }
}

struct SaveStatus {
    sync: MessageSync,
}

#[async_trait]
impl SeriesHandler<StatusContext> for SaveStatus {
    async fn call(&self, ctx: &mut StatusContext) -> Result<(), HookError> {
        self.sync
            .update_instance(&ctx.agent_id, &InstancePatch::status(ctx.status))
            .await?;
        debug!(agent_id = %ctx.agent_id, status = ctx.status.as_str(), "Status persisted");
        Ok(())
    }
}

struct SaveResponseUpdate {
    sync: MessageSync,
    /// Streaming messages already created in storage during this turn
    created: Mutex<HashSet<String>>,
}

#[async_trait]
impl SeriesHandler<ResponseContext> for SaveResponseUpdate {
    async fn call(&self, ctx: &mut ResponseContext) -> Result<(), HookError> {
        let request_id = ctx.response.request_id.clone();
        let Some(message) = ctx.frame.response_message_mut(&request_id) else {
            return Ok(());
        };

        let first = self.created.lock().await.insert(message.id.clone());
        if first {
            persist(&self.sync, message).await?;
        } else {
            self.sync.save_debounced(message).await;
        }
        Ok(())
    }
}

struct SaveResponseComplete {
    sync: MessageSync,
}

#[async_trait]
impl SeriesHandler<ResponseContext> for SaveResponseComplete {
    async fn call(&self, ctx: &mut ResponseContext) -> Result<(), HookError> {
        let request_id = ctx.response.request_id.clone();
        if let Some(message) = ctx.frame.response_message_mut(&request_id) {
            persist(&self.sync, message).await?;
        }
        Ok(())
    }
}

struct FlushToolMessages {
    sync: MessageSync,
}

#[async_trait]
impl SeriesHandler<ToolExecutedContext> for FlushToolMessages {
    async fn call(&self, ctx: &mut ToolExecutedContext) -> Result<(), HookError> {
        let mut first_error = None;
        let mut flushed = 0;
        for message in ctx.messages.iter_mut().filter(|m| !m.metadata.is_persisted) {
            match persist(&self.sync, message).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!(agent_id = %ctx.agent_id, tool = %ctx.tool_name, flushed, "Flushed tool messages");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
