//! `workspacesList`: tells the model which wiki workspaces exist.

use agentweave_core::error::HookError;
use agentweave_core::hook::PromptContext;
use agentweave_core::prompt::PromptNode;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::framework::{PromptPosition, ToolHandler, ToolSpec, inject_content};
use crate::wiki::WikiBackend;

pub const TOOL_ID: &str = "workspacesList";

/// `workspacesListParam` in a tool configuration.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacesListConfig {
    /// Where the list is injected into the prompt
    pub target: PromptPosition,
}

pub struct WorkspacesListTool {
    wiki: Arc<dyn WikiBackend>,
}

impl WorkspacesListTool {
    pub fn new(wiki: Arc<dyn WikiBackend>) -> Self {
        Self { wiki }
    }
}

#[async_trait]
impl ToolHandler for WorkspacesListTool {
    type Config = WorkspacesListConfig;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            tool_id: TOOL_ID.into(),
            display_name: "Wiki workspaces".into(),
            description: "Lists the available wiki workspaces in the prompt".into(),
            config_schema: serde_json::to_value(schemars::schema_for!(WorkspacesListConfig))
                .unwrap_or_default(),
            llm_tools: Vec::new(),
        }
    }

    async fn on_process_prompts(
        &self,
        config: &WorkspacesListConfig,
        ctx: &mut PromptContext,
    ) -> Result<(), HookError> {
        let workspaces = match self.wiki.workspaces().await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(agent_id = %ctx.agent_id, "Could not list wiki workspaces: {e}");
                return Ok(());
            }
        };
        if workspaces.is_empty() {
            return Ok(());
        }

        let mut text = String::from("Available wiki workspaces:");
        for ws in &workspaces {
            if ws.description.is_empty() {
                text.push_str(&format!("\n- {}", ws.name));
            } else {
                text.push_str(&format!("\n- {}: {}", ws.name, ws.description));
            }
        }
        let node = PromptNode::new(format!("{}-workspaces", ctx.tool_config.id), text)
            .with_caption("Wiki workspaces");
        inject_content(&mut ctx.prompts, &config.target, node);
        Ok(())
    }
}
