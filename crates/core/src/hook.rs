//! The hook registry: typed extension points for tools.
//!
//! Two dispatch kinds exist:
//!
//! - **Waterfall** hooks fold an owned context through every handler in
//!   registration order. Each handler sees the previous handler's output;
//!   the first failure aborts the phase.
//! - **Series** hooks hand the same `&mut` context to every handler in
//!   registration order. Handlers contribute side effects (persistence, UI
//!   sync) and may set fields on the context; a failing handler is logged
//!   and the remaining handlers still run.
//!
//! A registry is built for a single turn and never shared between turns.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agent::{AgentDefinition, AgentInstance, AgentStatus, ToolConfig};
use crate::cancel::CancelFlag;
use crate::error::HookError;
use crate::message::{AgentMessage, MessageRole};
use crate::prompt::PromptTree;
use crate::provider::{PromptMessage, ProviderChunk};

/// The eight extension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookName {
    ProcessPrompts,
    FinalizePrompts,
    PostProcess,
    UserMessageReceived,
    AgentStatusChanged,
    ToolExecuted,
    ResponseUpdate,
    ResponseComplete,
}

/// How a hook dispatches to its handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Waterfall,
    Series,
}

impl HookName {
    pub const ALL: [HookName; 8] = [
        HookName::ProcessPrompts,
        HookName::FinalizePrompts,
        HookName::PostProcess,
        HookName::UserMessageReceived,
        HookName::AgentStatusChanged,
        HookName::ToolExecuted,
        HookName::ResponseUpdate,
        HookName::ResponseComplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessPrompts => "processPrompts",
            Self::FinalizePrompts => "finalizePrompts",
            Self::PostProcess => "postProcess",
            Self::UserMessageReceived => "userMessageReceived",
            Self::AgentStatusChanged => "agentStatusChanged",
            Self::ToolExecuted => "toolExecuted",
            Self::ResponseUpdate => "responseUpdate",
            Self::ResponseComplete => "responseComplete",
        }
    }

    pub fn kind(&self) -> HookKind {
        match self {
            Self::ProcessPrompts | Self::FinalizePrompts | Self::PostProcess => HookKind::Waterfall,
            _ => HookKind::Series,
        }
    }
}

// ── Handler traits ────────────────────────────────────────────────────────

/// A handler on a waterfall hook: consumes the context and returns the next one.
#[async_trait]
pub trait WaterfallHandler<C: Send + 'static>: Send + Sync {
    async fn call(&self, ctx: C) -> Result<C, HookError>;
}

/// A handler on a series hook: mutates the shared context in place.
#[async_trait]
pub trait SeriesHandler<C: Send + 'static>: Send + Sync {
    async fn call(&self, ctx: &mut C) -> Result<(), HookError>;
}

struct Tap<H: ?Sized> {
    name: String,
    handler: Arc<H>,
}

/// A sequential, context-transforming hook.
pub struct WaterfallHook<C: Send + 'static> {
    name: HookName,
    taps: Vec<Tap<dyn WaterfallHandler<C>>>,
}

impl<C: Send + 'static> WaterfallHook<C> {
    pub fn new(name: HookName) -> Self {
        Self { name, taps: Vec::new() }
    }

    /// Append a handler; registration order is execution order.
    pub fn tap(&mut self, name: impl Into<String>, handler: Arc<dyn WaterfallHandler<C>>) {
        self.taps.push(Tap {
            name: name.into(),
            handler,
        });
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.taps.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Fold `ctx` through every handler.
    pub async fn call(&self, mut ctx: C) -> Result<C, HookError> {
        for tap in &self.taps {
            ctx = match tap.handler.call(ctx).await {
                Ok(next) => next,
                Err(e) => {
                    warn!(
                        hook = self.name.as_str(),
                        handler = %tap.name,
                        error = %e,
                        "Waterfall handler failed, aborting phase"
                    );
                    return Err(e);
                }
            };
        }
        Ok(ctx)
    }
}

/// A sequential notification hook.
pub struct SeriesHook<C: Send + 'static> {
    name: HookName,
    taps: Vec<Tap<dyn SeriesHandler<C>>>,
}

impl<C: Send + 'static> SeriesHook<C> {
    pub fn new(name: HookName) -> Self {
        Self { name, taps: Vec::new() }
    }

    /// Append a handler; registration order is execution order.
    pub fn tap(&mut self, name: impl Into<String>, handler: Arc<dyn SeriesHandler<C>>) {
        self.taps.push(Tap {
            name: name.into(),
            handler,
        });
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.taps.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Run every handler. Returns how many of them failed.
    pub async fn call(&self, ctx: &mut C) -> usize {
        let mut failures = 0;
        for tap in &self.taps {
            if let Err(e) = tap.handler.call(ctx).await {
                failures += 1;
                warn!(
                    hook = self.name.as_str(),
                    handler = %tap.name,
                    error = %e,
                    "Series handler failed"
                );
            }
        }
        if failures > 0 {
            debug!(hook = self.name.as_str(), failures, "Series hook finished with failures");
        }
        failures
    }
}

// ── Contexts ──────────────────────────────────────────────────────────────

/// The conversation state a turn works on.
#[derive(Debug, Clone)]
pub struct AgentFrame {
    pub instance: AgentInstance,
    pub definition: Arc<AgentDefinition>,
    pub messages: Vec<AgentMessage>,
}

impl AgentFrame {
    pub fn agent_id(&self) -> &str {
        &self.instance.id
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut AgentMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// The streaming assistant message produced by `request_id`, if any.
    pub fn response_message_mut(&mut self, request_id: &str) -> Option<&mut AgentMessage> {
        self.messages.iter_mut().rev().find(|m| {
            m.role == MessageRole::Assistant && m.metadata.request_id.as_deref() == Some(request_id)
        })
    }

    /// The most recent assistant message.
    pub fn latest_assistant_mut(&mut self) -> Option<&mut AgentMessage> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }
}

/// Who acts next once a round completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldTarget {
    Human,
    /// Start another round without waiting for new human input
    SelfAgent,
}

/// Requests a tool can make of the control loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnActions {
    pub yield_next_round_to: Option<YieldTarget>,
    pub new_user_message: Option<String>,
}

/// `processPrompts`: one invocation per configured tool.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub agent_id: String,
    pub definition: Arc<AgentDefinition>,
    /// The tool configuration this invocation is for
    pub tool_config: ToolConfig,
    pub prompts: PromptTree,
    pub messages: Arc<Vec<AgentMessage>>,
}

/// `finalizePrompts`: the flattened provider prompt.
#[derive(Debug, Clone)]
pub struct FinalizeContext {
    pub agent_id: String,
    pub definition: Arc<AgentDefinition>,
    pub prompts: Vec<PromptMessage>,
}

/// `postProcess`: the final response text before completion handlers see it.
#[derive(Debug, Clone)]
pub struct PostProcessContext {
    pub agent_id: String,
    pub definition: Arc<AgentDefinition>,
    pub request_id: String,
    pub response: String,
}

/// `userMessageReceived`.
#[derive(Debug, Clone)]
pub struct UserMessageContext {
    pub message: AgentMessage,
}

/// `agentStatusChanged`.
#[derive(Debug, Clone)]
pub struct StatusContext {
    pub agent_id: String,
    pub previous: AgentStatus,
    pub status: AgentStatus,
}

/// `toolExecuted`: fired by the tool framework after a result was appended.
#[derive(Debug, Clone)]
pub struct ToolExecutedContext {
    pub agent_id: String,
    pub tool_id: String,
    pub tool_name: String,
    pub success: bool,
    /// The full history; handlers flush whatever is not yet persisted
    pub messages: Vec<AgentMessage>,
}

/// `responseUpdate` / `responseComplete`.
pub struct ResponseContext {
    pub frame: AgentFrame,
    pub response: ProviderChunk,
    pub actions: TurnActions,
    /// The registry of the running turn, for handlers that fire other hooks
    pub hooks: Arc<HookRegistry>,
    pub cancel: Arc<CancelFlag>,
}

// ── Registry ──────────────────────────────────────────────────────────────

/// All hooks of one turn.
pub struct HookRegistry {
    pub process_prompts: WaterfallHook<PromptContext>,
    pub finalize_prompts: WaterfallHook<FinalizeContext>,
    pub post_process: WaterfallHook<PostProcessContext>,
    pub user_message_received: SeriesHook<UserMessageContext>,
    pub agent_status_changed: SeriesHook<StatusContext>,
    pub tool_executed: SeriesHook<ToolExecutedContext>,
    pub response_update: SeriesHook<ResponseContext>,
    pub response_complete: SeriesHook<ResponseContext>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            process_prompts: WaterfallHook::new(HookName::ProcessPrompts),
            finalize_prompts: WaterfallHook::new(HookName::FinalizePrompts),
            post_process: WaterfallHook::new(HookName::PostProcess),
            user_message_received: SeriesHook::new(HookName::UserMessageReceived),
            agent_status_changed: SeriesHook::new(HookName::AgentStatusChanged),
            tool_executed: SeriesHook::new(HookName::ToolExecuted),
            response_update: SeriesHook::new(HookName::ResponseUpdate),
            response_complete: SeriesHook::new(HookName::ResponseComplete),
        }
    }

    /// Names of the handlers registered on a hook, in execution order.
    pub fn handler_names(&self, hook: HookName) -> Vec<&str> {
        match hook {
            HookName::ProcessPrompts => self.process_prompts.handler_names(),
            HookName::FinalizePrompts => self.finalize_prompts.handler_names(),
            HookName::PostProcess => self.post_process.handler_names(),
            HookName::UserMessageReceived => self.user_message_received.handler_names(),
            HookName::AgentStatusChanged => self.agent_status_changed.handler_names(),
            HookName::ToolExecuted => self.tool_executed.handler_names(),
            HookName::ResponseUpdate => self.response_update.handler_names(),
            HookName::ResponseComplete => self.response_complete.handler_names(),
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for hook in HookName::ALL {
            map.entry(&hook.as_str(), &self.handler_names(hook));
        }
        map.finish()
    }
}
