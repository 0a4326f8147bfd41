//! The tool definition framework.
//!
//! A tool is a [`ToolSpec`] plus a [`ToolHandler`]. Wrapping the handler in a
//! [`DefinedTool`] turns its optional callbacks into hook registrations with
//! the gating every tool needs:
//!
//! - `on_process_prompts` runs only for the tool's own configuration entry,
//!   and only when that entry carries a non-empty parameter object that
//!   deserializes into the handler's `Config`.
//! - `on_response_complete` runs only for a finished, non-empty response of
//!   an agent whose definition enables the tool, and only when the response
//!   contains a `<tool_use>` marker naming one of the tool's LLM schemas.
//! - `on_post_process` runs only for agents whose definition enables the tool.
//!
//! Executors never write messages themselves: [`ToolInvocation::execute`]
//! formats the result, updates the history and hands control back to the
//! model.

use agentweave_core::agent::ToolConfig;
use agentweave_core::error::{HookError, ToolError};
use agentweave_core::hook::{
    HookRegistry, PostProcessContext, PromptContext, ResponseContext, SeriesHandler,
    ToolExecutedContext, WaterfallHandler, YieldTarget,
};
use agentweave_core::message::AgentMessage;
use agentweave_core::prompt::{InjectPosition, PromptNode, PromptTree};
use agentweave_core::provider::ChunkStatus;
use agentweave_core::tool::{LlmToolSchema, ToolCallRequest, ToolOutput};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::tool_call;

/// Static description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Matches `ToolConfig::tool_id` in agent definitions
    pub tool_id: String,

    pub display_name: String,

    pub description: String,

    /// JSON Schema of the `${toolId}Param` object
    pub config_schema: serde_json::Value,

    /// Functions the model may call through `<tool_use>` markers
    #[serde(default)]
    pub llm_tools: Vec<LlmToolSchema>,
}

/// Where a tool injects a prompt node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptPosition {
    /// Id of the existing node the injection is relative to
    pub target_id: String,

    #[serde(default = "default_position")]
    #[schemars(with = "String")]
    pub position: InjectPosition,
}

fn default_position() -> InjectPosition {
    InjectPosition::After
}

/// Result durations applied when a definition does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSettings {
    pub result_duration: u32,
    pub error_duration: u32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            result_duration: 1,
            error_duration: 2,
        }
    }
}

/// Behaviour of a tool. Every callback is optional.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// The tool's parameter object, deserialized from `${toolId}Param`.
    type Config: DeserializeOwned + Send + Sync + 'static;

    fn spec(&self) -> ToolSpec;

    async fn on_process_prompts(
        &self,
        _config: &Self::Config,
        _ctx: &mut PromptContext,
    ) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_response_complete(
        &self,
        _config: &Self::Config,
        _invocation: &mut ToolInvocation<'_>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_post_process(
        &self,
        _config: &Self::Config,
        _ctx: &mut PostProcessContext,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Object-safe registration surface used by the registry.
pub trait RegisterTool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// Tap this tool's handlers into a per-turn registry.
    fn register(&self, hooks: &mut HookRegistry, settings: &ToolSettings);
}

/// Adapts a [`ToolHandler`] into hook registrations.
pub struct DefinedTool<H: ToolHandler> {
    handler: Arc<H>,
    spec: ToolSpec,
}

impl<H: ToolHandler> DefinedTool<H> {
    pub fn new(handler: H) -> Self {
        let spec = handler.spec();
        Self {
            handler: Arc::new(handler),
            spec,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H: ToolHandler> RegisterTool for DefinedTool<H> {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn register(&self, hooks: &mut HookRegistry, settings: &ToolSettings) {
        let tap = Arc::new(ToolTap {
            handler: self.handler.clone(),
            spec: self.spec.clone(),
            settings: *settings,
        });
        let name = self.spec.tool_id.clone();
        hooks.process_prompts.tap(name.clone(), tap.clone());
        hooks.response_complete.tap(name.clone(), tap.clone());
        hooks.post_process.tap(name, tap);
    }
}

/// Deserialize a tool's parameter object. A missing object reads as `{}`.
pub fn load_config<C: DeserializeOwned>(config: &ToolConfig) -> Result<C, ToolError> {
    let value = config
        .param()
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
    serde_json::from_value(value).map_err(|e| ToolError::InvalidConfig {
        tool_id: config.tool_id.clone(),
        reason: e.to_string(),
    })
}

struct ToolTap<H> {
    handler: Arc<H>,
    spec: ToolSpec,
    settings: ToolSettings,
}

#[async_trait]
impl<H: ToolHandler> WaterfallHandler<PromptContext> for ToolTap<H> {
    async fn call(&self, mut ctx: PromptContext) -> Result<PromptContext, HookError> {
        if ctx.tool_config.tool_id != self.spec.tool_id || ctx.tool_config.param().is_none() {
            return Ok(ctx);
        }
        let config: H::Config = match load_config(&ctx.tool_config) {
            Ok(config) => config,
            Err(e) => {
                warn!(tool = %self.spec.tool_id, agent_id = %ctx.agent_id, "Skipping prompt processing: {e}");
                return Ok(ctx);
            }
        };
        self.handler.on_process_prompts(&config, &mut ctx).await?;
        Ok(ctx)
    }
}

#[async_trait]
impl<H: ToolHandler> WaterfallHandler<PostProcessContext> for ToolTap<H> {
    async fn call(&self, mut ctx: PostProcessContext) -> Result<PostProcessContext, HookError> {
        let Some(tool_config) = ctx.definition.tool_config(&self.spec.tool_id).cloned() else {
            return Ok(ctx);
        };
        let config: H::Config = match load_config(&tool_config) {
            Ok(config) => config,
            Err(e) => {
                warn!(tool = %self.spec.tool_id, "Skipping post-processing: {e}");
                return Ok(ctx);
            }
        };
        self.handler.on_post_process(&config, &mut ctx).await?;
        Ok(ctx)
    }
}

#[async_trait]
impl<H: ToolHandler> SeriesHandler<ResponseContext> for ToolTap<H> {
    async fn call(&self, ctx: &mut ResponseContext) -> Result<(), HookError> {
        if ctx.response.status != ChunkStatus::Done || ctx.response.content.trim().is_empty() {
            return Ok(());
        }
        let Some(tool_config) = ctx.frame.definition.tool_config(&self.spec.tool_id).cloned()
        else {
            return Ok(());
        };

        let names: Vec<&str> = self.spec.llm_tools.iter().map(|t| t.name.as_str()).collect();
        let Some(call) = tool_call::find_tool_call(&ctx.response.content, &names) else {
            return Ok(());
        };

        let config: H::Config = match load_config(&tool_config) {
            Ok(config) => config,
            Err(e) => {
                warn!(tool = %self.spec.tool_id, "Skipping tool call: {e}");
                return Ok(());
            }
        };

        debug!(
            tool = %self.spec.tool_id,
            call = %call.name,
            agent_id = %ctx.frame.agent_id(),
            "Tool call detected"
        );
        let mut invocation = ToolInvocation::new(ctx, call, &self.spec.tool_id, self.settings);
        self.handler.on_response_complete(&config, &mut invocation).await
    }
}

/// One detected tool call, bound to the response that made it.
pub struct ToolInvocation<'a> {
    ctx: &'a mut ResponseContext,
    call: ToolCallRequest,
    tool_id: String,
    result_duration: u32,
    error_duration: u32,
    executed: bool,
}

impl<'a> ToolInvocation<'a> {
    pub fn new(
        ctx: &'a mut ResponseContext,
        call: ToolCallRequest,
        tool_id: &str,
        settings: ToolSettings,
    ) -> Self {
        Self {
            ctx,
            call,
            tool_id: tool_id.to_string(),
            result_duration: settings.result_duration,
            error_duration: settings.error_duration,
            executed: false,
        }
    }

    pub fn call(&self) -> &ToolCallRequest {
        &self.call
    }

    pub fn context(&mut self) -> &mut ResponseContext {
        self.ctx
    }

    /// Override how many rounds a successful result stays in context.
    pub fn set_result_duration(&mut self, rounds: u32) {
        self.result_duration = rounds;
    }

    /// Override how many rounds a failed result stays in context.
    pub fn set_error_duration(&mut self, rounds: u32) {
        self.error_duration = rounds;
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    /// Run `executor` if the detected call is for the schema `name`.
    ///
    /// Returns `false` when the call names a different schema or a call was
    /// already executed. Failures (unreadable or invalid parameters,
    /// executor errors, outputs with `success == false`) become error-flagged
    /// result messages; they never abort the turn.
    ///
    /// A running executor is dropped as soon as the turn is cancelled. The
    /// call then leaves the history untouched and does not yield, so the
    /// orchestrator ends the turn at its next cancellation check.
    pub async fn execute<P, F, Fut>(&mut self, name: &str, executor: F) -> Result<bool, HookError>
    where
        P: DeserializeOwned + Send,
        F: FnOnce(P) -> Fut + Send,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
    {
        if self.executed || self.call.name != name {
            return Ok(false);
        }
        self.executed = true;

        let params = match &self.call.parse_error {
            Some(reason) => Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: reason.clone(),
            }),
            None => serde_json::from_value::<P>(self.call.parameters.clone()).map_err(|e| {
                ToolError::InvalidArguments {
                    tool: name.to_string(),
                    reason: e.to_string(),
                }
            }),
        };

        let outcome = match params {
            Err(e) => Err(e.to_string()),
            Ok(params) => {
                let cancel = self.ctx.cancel.clone();
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(
                            tool = %name,
                            agent_id = %self.ctx.frame.agent_id(),
                            "Tool call abandoned, turn cancelled"
                        );
                        return Ok(true);
                    }
                    result = executor(params) => result,
                };
                match result {
                    Ok(output) if output.success => Ok(output),
                    Ok(output) => Err(output
                        .error
                        .unwrap_or_else(|| format!("{name} reported failure"))),
                    Err(e) => Err(e.to_string()),
                }
            }
        };

        let success = outcome.is_ok();
        let duration = if success {
            self.result_duration
        } else {
            self.error_duration
        };
        let content = format_result(name, &self.call.parameters, &outcome);

        let ctx = &mut *self.ctx;
        let agent_id = ctx.frame.agent_id().to_string();
        let request_id = ctx.response.request_id.clone();

        let responded = ctx.frame.response_message_mut(&request_id).is_some();
        let assistant = if responded {
            ctx.frame.response_message_mut(&request_id)
        } else {
            ctx.frame.latest_assistant_mut()
        };
        if let Some(message) = assistant {
            message.metadata.contains_tool_call = true;
            message.duration = Some(duration);
            message.touch();
        }

        let mut result = AgentMessage::tool_result(&agent_id, &self.tool_id, content, duration);
        result.metadata.is_error = !success;
        ctx.frame.messages.push(result);
        ctx.actions.yield_next_round_to = Some(YieldTarget::SelfAgent);

        match &outcome {
            Ok(_) => info!(tool = %name, agent_id = %agent_id, "Tool executed"),
            Err(e) => warn!(tool = %name, agent_id = %agent_id, "Tool failed: {e}"),
        }

        let hooks = ctx.hooks.clone();
        let mut executed = ToolExecutedContext {
            agent_id,
            tool_id: self.tool_id.clone(),
            tool_name: name.to_string(),
            success,
            messages: std::mem::take(&mut ctx.frame.messages),
        };
        hooks.tool_executed.call(&mut executed).await;
        ctx.frame.messages = executed.messages;

        Ok(true)
    }
}

/// The `<functions_result>` block stored as a tool message.
pub fn format_result(
    name: &str,
    parameters: &serde_json::Value,
    outcome: &Result<ToolOutput, String>,
) -> String {
    let body = match outcome {
        Ok(output) => {
            let data = match &output.data {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => String::new(),
            };
            format!("Result: {data}")
        }
        Err(error) => format!("Error: {error}"),
    };
    format!("<functions_result>\nTool: {name}\nParameters: {parameters}\n{body}\n</functions_result>")
}

// ── Prompt injection helpers ─────────────────────────────────────────────

/// Insert a node describing `tools` relative to `target_id`.
///
/// A missing target logs a warning and leaves the tree unchanged.
pub fn inject_tool_list(
    tree: &mut PromptTree,
    node_id: &str,
    target: &PromptPosition,
    tools: &[LlmToolSchema],
) -> bool {
    if tools.is_empty() {
        return false;
    }
    let node = PromptNode::new(node_id, describe_tools(tools)).with_caption("Tools");
    inject_content(tree, target, node)
}

/// Insert an arbitrary node relative to `target.target_id`.
pub fn inject_content(tree: &mut PromptTree, target: &PromptPosition, node: PromptNode) -> bool {
    let node_id = node.id.clone();
    let inserted = tree.insert(&target.target_id, target.position, node);
    if inserted {
        debug!(node = %node_id, target = %target.target_id, "Injected prompt node");
    } else {
        warn!(
            node = %node_id,
            target = %target.target_id,
            "Injection target not found, prompt left unchanged"
        );
    }
    inserted
}

fn describe_tools(tools: &[LlmToolSchema]) -> String {
    let mut text = String::from(
        "You can call the following tools. To call one, reply with \
         <tool_use name=\"TOOL_NAME\">{JSON parameters}</tool_use> and wait for the result.",
    );
    for tool in tools {
        text.push_str(&format!(
            "\n\n## {}\n{}\nParameters schema: {}",
            tool.name, tool.description, tool.parameters
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_block_formats() {
        let ok = format_result(
            "wiki-search",
            &json!({"workspaceName": "w"}),
            &Ok(ToolOutput::ok("Found 2 entries")),
        );
        assert!(ok.starts_with("<functions_result>"));
        assert!(ok.contains("Tool: wiki-search"));
        assert!(ok.contains("Parameters: {\"workspaceName\":\"w\"}"));
        assert!(ok.contains("Result: Found 2 entries"));
        assert!(ok.ends_with("</functions_result>"));

        let err = format_result("wiki-search", &json!({}), &Err("no workspace".into()));
        assert!(err.contains("Error: no workspace"));
    }

    #[test]
    fn injection_into_missing_target_is_noop() {
        let mut tree = PromptTree::new(vec![PromptNode::new("root", "Base")]);
        let before = tree.clone();
        let target = PromptPosition {
            target_id: "missing".into(),
            position: InjectPosition::After,
        };
        assert!(!inject_content(&mut tree, &target, PromptNode::new("x", "X")));
        assert_eq!(tree, before);
    }

    #[test]
    fn tool_list_injected_as_child() {
        let mut tree = PromptTree::new(vec![PromptNode::new("root", "Base")]);
        let target = PromptPosition {
            target_id: "root".into(),
            position: InjectPosition::Child,
        };
        let tools = vec![LlmToolSchema {
            name: "wiki-search".into(),
            description: "Search".into(),
            parameters: json!({"type": "object"}),
        }];
        assert!(inject_tool_list(&mut tree, "tools", &target, &tools));
        let node = tree.find("tools").unwrap();
        assert!(node.text.contains("## wiki-search"));
        assert!(node.text.contains("<tool_use"));
        assert_eq!(tree.nodes[0].children[0].id, "tools");
    }

    #[test]
    fn position_defaults_to_after() {
        let p: PromptPosition = serde_json::from_value(json!({"targetId": "root"})).unwrap();
        assert_eq!(p.position, InjectPosition::After);
    }

    #[test]
    fn load_config_reads_param_or_empty_object() {
        #[derive(Deserialize)]
        struct Cfg {
            #[serde(default)]
            n: u32,
        }
        let with = ToolConfig::new("t", "demo", json!({"n": 3}));
        assert_eq!(load_config::<Cfg>(&with).unwrap().n, 3);

        let without = ToolConfig::new("t", "demo", json!({}));
        assert_eq!(load_config::<Cfg>(&without).unwrap().n, 0);

        let bad = ToolConfig::new("t", "demo", json!({"n": "three"}));
        assert!(matches!(
            load_config::<Cfg>(&bad),
            Err(ToolError::InvalidConfig { .. })
        ));
    }
}
