//! `wikiSearch`: lets the model search a wiki workspace.
//!
//! The model calls `wiki-search` with a workspace name and a filter; the
//! matching entries come back as a tool result in the next round.

use agentweave_core::error::HookError;
use agentweave_core::hook::PromptContext;
use agentweave_core::tool::{LlmToolSchema, ToolOutput};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

use crate::framework::{
    PromptPosition, ToolHandler, ToolInvocation, ToolSpec, inject_tool_list,
};
use crate::wiki::{WikiBackend, WikiEntry};

pub const TOOL_ID: &str = "wikiSearch";
pub const LLM_TOOL_NAME: &str = "wiki-search";

/// `wikiSearchParam` in a tool configuration.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WikiSearchConfig {
    /// Where the tool description is injected into the prompt
    #[serde(default)]
    pub tool_list_position: Option<PromptPosition>,

    /// Rounds a successful result stays in context
    #[serde(default)]
    pub tool_result_duration: Option<u32>,

    /// Rounds a failed result stays in context
    #[serde(default)]
    pub tool_error_duration: Option<u32>,
}

/// Parameters of a `wiki-search` call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WikiSearchParams {
    /// Name of the wiki workspace to search
    pub workspace_name: String,

    /// Search terms; every term must match the title, text or a tag
    #[serde(default)]
    pub filter: String,
}

pub struct WikiSearchTool {
    wiki: Arc<dyn WikiBackend>,
}

impl WikiSearchTool {
    pub fn new(wiki: Arc<dyn WikiBackend>) -> Self {
        Self { wiki }
    }
}

#[async_trait]
impl ToolHandler for WikiSearchTool {
    type Config = WikiSearchConfig;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            tool_id: TOOL_ID.into(),
            display_name: "Wiki search".into(),
            description: "Search entries of a wiki workspace".into(),
            config_schema: serde_json::to_value(schemars::schema_for!(WikiSearchConfig))
                .unwrap_or_default(),
            llm_tools: vec![LlmToolSchema {
                name: LLM_TOOL_NAME.into(),
                description: "Search a wiki workspace. Returns the title and text of every \
                              matching entry."
                    .into(),
                parameters: serde_json::to_value(schemars::schema_for!(WikiSearchParams))
                    .unwrap_or_default(),
            }],
        }
    }

    async fn on_process_prompts(
        &self,
        config: &WikiSearchConfig,
        ctx: &mut PromptContext,
    ) -> Result<(), HookError> {
        if let Some(position) = &config.tool_list_position {
            let node_id = format!("{}-tool-list", ctx.tool_config.id);
            inject_tool_list(&mut ctx.prompts, &node_id, position, &self.spec().llm_tools);
        }
        Ok(())
    }

    async fn on_response_complete(
        &self,
        config: &WikiSearchConfig,
        invocation: &mut ToolInvocation<'_>,
    ) -> Result<(), HookError> {
        if let Some(d) = config.tool_result_duration {
            invocation.set_result_duration(d);
        }
        if let Some(d) = config.tool_error_duration {
            invocation.set_error_duration(d);
        }

        let wiki = self.wiki.clone();
        invocation
            .execute(LLM_TOOL_NAME, |params: WikiSearchParams| async move {
                let entries = wiki.search(&params.workspace_name, &params.filter).await?;
                Ok(ToolOutput::ok(render_entries(&params, &entries)))
            })
            .await?;
        Ok(())
    }
}

fn render_entries(params: &WikiSearchParams, entries: &[WikiEntry]) -> String {
    if entries.is_empty() {
        return format!(
            "No entries in workspace '{}' match '{}'.",
            params.workspace_name, params.filter
        );
    }
    let mut out = format!(
        "Found {} entries in workspace '{}':",
        entries.len(),
        params.workspace_name
    );
    for entry in entries {
        out.push_str(&format!("\n\n### {}\n{}", entry.title, entry.text));
    }
    out
}
