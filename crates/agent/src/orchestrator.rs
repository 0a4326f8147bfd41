//! The conversation orchestrator.
//!
//! A turn moves an instance through `idle → working → {completed | canceled
//! | failed}`:
//!
//! 1. **Ingest** the newest user message (`userMessageReceived`), mark it
//!    processed, announce `working`
//! 2. **Build** the prompt from the definition's tree and the history
//! 3. **Stream** the provider response (`responseUpdate` per chunk)
//! 4. **Complete** it (`postProcess`, then `responseComplete`, where tools
//!    run)
//! 5. **Loop** while a tool yielded back to the agent or queued a user
//!    message, otherwise hand control back to the human
//!
//! Everything that reaches storage goes through hook handlers; the
//! orchestrator itself writes only the bookkeeping it owns (the processed
//! flag and error messages).

use agentweave_config::AppConfig;
use agentweave_core::agent::{AgentStatus, ProviderConfig};
use agentweave_core::cancel::CancelFlag;
use agentweave_core::error::{Error, ProviderError, Result};
use agentweave_core::hook::{
    AgentFrame, PostProcessContext, ResponseContext, StatusContext, TurnActions,
    UserMessageContext, YieldTarget,
};
use agentweave_core::message::AgentMessage;
use agentweave_core::provider::{ChunkStatus, GenerationMeta, Provider, ProviderChunk};
use agentweave_core::message::MessageRole;
use agentweave_store::MessageSync;
use agentweave_tools::ToolRegistry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::prompt::build_prompts;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Canceled,
    Failed { message: String },
}

impl TurnOutcome {
    pub fn status(&self) -> AgentStatus {
        match self {
            Self::Completed => AgentStatus::Completed,
            Self::Canceled => AgentStatus::Canceled,
            Self::Failed { .. } => AgentStatus::Failed,
        }
    }
}

/// How a round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RoundOutcome {
    Continue,
    Completed,
    Canceled,
    Failed(String),
}

type ActiveTurns = Arc<Mutex<HashMap<String, Arc<CancelFlag>>>>;

/// Removes the instance from the active set when the turn ends, however it ends.
struct TurnGuard {
    active: ActiveTurns,
    instance_id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.instance_id);
    }
}

/// Drives conversation turns for agent instances.
pub struct AgentOrchestrator {
    /// Persistence front; reads history and writes orchestrator bookkeeping
    sync: MessageSync,

    /// The LLM backend
    provider: Arc<dyn Provider>,

    /// Builds the per-turn hook registry
    tools: Arc<ToolRegistry>,

    /// Lowest provider-config layer
    defaults: ProviderConfig,

    /// Safety limit on provider rounds per turn
    max_rounds: u32,

    /// Cancellation flags of running turns, by instance id
    active: ActiveTurns,
}

impl AgentOrchestrator {
    pub fn new(sync: MessageSync, provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            sync,
            provider,
            tools,
            defaults: ProviderConfig::default(),
            max_rounds: 25,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take provider defaults and the round limit from application config.
    pub fn from_config(
        config: &AppConfig,
        sync: MessageSync,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self::new(sync, provider, tools)
            .with_provider_defaults(config.provider.clone())
            .with_max_rounds(config.orchestrator.max_rounds)
    }

    pub fn with_provider_defaults(mut self, defaults: ProviderConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the maximum number of provider rounds in one turn.
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn sync(&self) -> &MessageSync {
        &self.sync
    }

    /// Whether a turn is running for `instance_id`.
    pub fn is_running(&self, instance_id: &str) -> bool {
        self.lock_active().contains_key(instance_id)
    }

    /// Request cancellation of the running turn.
    ///
    /// Returns `true` only for the call that actually requested it; repeated
    /// calls and calls for idle instances are no-ops.
    pub fn cancel(&self, instance_id: &str) -> bool {
        let flag = self.lock_active().get(instance_id).cloned();
        match flag {
            Some(flag) => {
                let first = flag.cancel();
                if first {
                    info!(agent_id = %instance_id, "Cancellation requested");
                }
                first
            }
            None => false,
        }
    }

    /// Append a user message and run a turn on it.
    pub async fn send_message(
        &self,
        instance_id: &str,
        text: impl Into<String>,
        file: Option<PathBuf>,
    ) -> Result<TurnOutcome> {
        let (_guard, cancel) = self.begin_turn(instance_id)?;
        let mut frame = self.load_frame(instance_id).await?;

        let mut message = AgentMessage::user(instance_id, text);
        if let Some(file) = file {
            message = message.with_file(file);
        }
        frame.messages.push(message);
        self.run_turn(frame, cancel).await
    }

    /// Run a turn on stored history, e.g. after a restart.
    ///
    /// A no-op returning `Completed` unless the newest message is an
    /// unprocessed user message.
    pub async fn resume(&self, instance_id: &str) -> Result<TurnOutcome> {
        let (_guard, cancel) = self.begin_turn(instance_id)?;
        let frame = self.load_frame(instance_id).await?;
        self.run_turn(frame, cancel).await
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CancelFlag>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_turn(&self, instance_id: &str) -> Result<(TurnGuard, Arc<CancelFlag>)> {
        let mut active = self.lock_active();
        if active.contains_key(instance_id) {
            return Err(Error::Busy(instance_id.to_string()));
        }
        let cancel = Arc::new(CancelFlag::new());
        active.insert(instance_id.to_string(), cancel.clone());
        Ok((
            TurnGuard {
                active: self.active.clone(),
                instance_id: instance_id.to_string(),
            },
            cancel,
        ))
    }

    async fn load_frame(&self, instance_id: &str) -> Result<AgentFrame> {
        let store = self.sync.store();
        let record = store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "agent instance",
                id: instance_id.to_string(),
            })?;
        if record.instance.closed {
            return Err(Error::Closed(instance_id.to_string()));
        }
        let definition = store
            .get_definition(&record.instance.definition_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "agent definition",
                id: record.instance.definition_id.clone(),
            })?;

        Ok(AgentFrame {
            instance: record.instance,
            definition: Arc::new(definition),
            messages: record.messages,
        })
    }

    async fn run_turn(&self, frame: AgentFrame, cancel: Arc<CancelFlag>) -> Result<TurnOutcome> {
        let pending_user = frame
            .messages
            .last()
            .is_some_and(|m| m.role == MessageRole::User && !m.metadata.processed);
        if !pending_user {
            debug!(agent_id = %frame.agent_id(), "No unprocessed user message, nothing to do");
            return Ok(TurnOutcome::Completed);
        }

        let hooks = Arc::new(self.tools.build_hooks(&frame.definition));
        let config = ProviderConfig::layered(
            &self.defaults,
            frame.definition.provider_config.as_ref(),
            frame.instance.provider_config.as_ref(),
        );
        let mut ctx = ResponseContext {
            response: ProviderChunk::update("", ""),
            frame,
            actions: TurnActions::default(),
            hooks,
            cancel,
        };

        info!(
            agent_id = %ctx.frame.agent_id(),
            definition_id = %ctx.frame.definition.id,
            messages = ctx.frame.messages.len(),
            "Starting turn"
        );

        self.receive_user_message(&mut ctx).await;
        self.set_status(&mut ctx, AgentStatus::Working).await;

        let mut in_flight: Option<String> = None;
        let mut round = 0;
        let outcome = loop {
            if ctx.cancel.is_cancelled() {
                break RoundOutcome::Canceled;
            }
            round += 1;
            if round > self.max_rounds {
                warn!(
                    agent_id = %ctx.frame.agent_id(),
                    rounds = self.max_rounds,
                    "Max rounds reached, ending turn"
                );
                break RoundOutcome::Completed;
            }
            match self.run_round(&mut ctx, &config, round, &mut in_flight).await {
                RoundOutcome::Continue => continue,
                other => break other,
            }
        };

        // Finally: abort the provider request cancellation interrupted
        if let Some(request_id) = in_flight.take() {
            if let Err(e) = self.provider.cancel(&request_id).await {
                warn!(request_id = %request_id, "Provider cancel failed: {e}");
            }
        }
        if let Err(e) = self.sync.flush().await {
            warn!(agent_id = %ctx.frame.agent_id(), "Flushing pending writes failed: {e}");
        }

        let outcome = match outcome {
            RoundOutcome::Completed | RoundOutcome::Continue => TurnOutcome::Completed,
            RoundOutcome::Canceled => TurnOutcome::Canceled,
            RoundOutcome::Failed(message) => TurnOutcome::Failed { message },
        };
        self.set_status(&mut ctx, outcome.status()).await;
        info!(
            agent_id = %ctx.frame.agent_id(),
            status = outcome.status().as_str(),
            rounds = round,
            "Turn finished"
        );
        Ok(outcome)
    }

    async fn run_round(
        &self,
        ctx: &mut ResponseContext,
        config: &ProviderConfig,
        round: u32,
        in_flight: &mut Option<String>,
    ) -> RoundOutcome {
        ctx.actions = TurnActions::default();

        let prompts = match build_prompts(&ctx.hooks, &ctx.frame).await {
            Ok(prompts) => prompts,
            Err(e) => return self.fail(ctx, format!("Prompt assembly failed: {e}")).await,
        };
        if ctx.cancel.is_cancelled() {
            return RoundOutcome::Canceled;
        }

        let request_id = Uuid::new_v4().to_string();
        let meta = GenerationMeta {
            agent_id: ctx.frame.agent_id().to_string(),
            definition_id: ctx.frame.definition.id.clone(),
            request_id: request_id.clone(),
            round,
        };
        debug!(
            agent_id = %meta.agent_id,
            request_id = %request_id,
            round,
            prompts = prompts.len(),
            "Calling provider"
        );

        let mut rx = match self.provider.generate(prompts, config.clone(), meta).await {
            Ok(rx) => rx,
            Err(e) => return self.fail(ctx, format!("Provider error: {e}")).await,
        };
        *in_flight = Some(request_id.clone());

        loop {
            let cancel = ctx.cancel.clone();
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RoundOutcome::Canceled,
                chunk = rx.recv() => chunk,
            };

            let Some(mut chunk) = received else {
                *in_flight = None;
                let error = ProviderError::StreamInterrupted(
                    "stream ended without a final response".into(),
                );
                return self.fail(ctx, error.to_string()).await;
            };
            if chunk.request_id != request_id {
                debug!(expected = %request_id, got = %chunk.request_id, "Chunk request id mismatch");
                chunk.request_id = request_id.clone();
            }

            match chunk.status {
                ChunkStatus::Update => {
                    apply_chunk(&mut ctx.frame, &chunk, false);
                    ctx.response = chunk;
                    let hooks = ctx.hooks.clone();
                    hooks.response_update.call(ctx).await;
                }
                ChunkStatus::Done => {
                    *in_flight = None;
                    return self.complete_response(ctx, chunk).await;
                }
                ChunkStatus::Error => {
                    *in_flight = None;
                    let detail = chunk
                        .error_detail
                        .map(|d| format!("{}: {}", d.name, d.message))
                        .unwrap_or_else(|| "unknown provider error".into());
                    return self.fail(ctx, format!("Provider error: {detail}")).await;
                }
            }
        }
    }

    async fn complete_response(&self, ctx: &mut ResponseContext, mut chunk: ProviderChunk) -> RoundOutcome {
        let hooks = ctx.hooks.clone();

        let post = PostProcessContext {
            agent_id: ctx.frame.agent_id().to_string(),
            definition: ctx.frame.definition.clone(),
            request_id: chunk.request_id.clone(),
            response: chunk.content.clone(),
        };
        match hooks.post_process.call(post).await {
            Ok(post) => chunk.content = post.response,
            Err(e) => warn!(
                agent_id = %ctx.frame.agent_id(),
                "Post-processing failed, keeping the raw response: {e}"
            ),
        }

        apply_chunk(&mut ctx.frame, &chunk, true);
        ctx.response = chunk;
        hooks.response_complete.call(ctx).await;
        if ctx.cancel.is_cancelled() {
            return RoundOutcome::Canceled;
        }

        if let Some(text) = ctx.actions.new_user_message.take() {
            debug!(agent_id = %ctx.frame.agent_id(), "Tool queued a user message");
            ctx.frame
                .messages
                .push(AgentMessage::user(ctx.frame.agent_id(), text));
            self.receive_user_message(ctx).await;
            return RoundOutcome::Continue;
        }
        if ctx.actions.yield_next_round_to == Some(YieldTarget::SelfAgent) {
            return RoundOutcome::Continue;
        }
        RoundOutcome::Completed
    }

    /// Fire `userMessageReceived` for the newest message and mark it processed.
    async fn receive_user_message(&self, ctx: &mut ResponseContext) {
        let Some(index) = ctx.frame.messages.len().checked_sub(1) else {
            return;
        };
        let mut event = UserMessageContext {
            message: ctx.frame.messages[index].clone(),
        };
        let hooks = ctx.hooks.clone();
        hooks.user_message_received.call(&mut event).await;

        let mut message = event.message;
        message.metadata.processed = true;
        self.save(&mut message).await;
        ctx.frame.messages[index] = message;
    }

    async fn set_status(&self, ctx: &mut ResponseContext, status: AgentStatus) {
        let mut event = StatusContext {
            agent_id: ctx.frame.agent_id().to_string(),
            previous: ctx.frame.instance.status,
            status,
        };
        let hooks = ctx.hooks.clone();
        hooks.agent_status_changed.call(&mut event).await;
        ctx.frame.instance.status = status;
    }

    /// Flush tool results, record the error, end the turn as failed.
    async fn fail(&self, ctx: &mut ResponseContext, reason: String) -> RoundOutcome {
        warn!(agent_id = %ctx.frame.agent_id(), "Turn failed: {reason}");

        let mut unsaved: Vec<usize> = Vec::new();
        for (i, m) in ctx.frame.messages.iter().enumerate() {
            if m.metadata.is_tool_result && !m.metadata.is_persisted {
                unsaved.push(i);
            }
        }
        for i in unsaved {
            let mut message = ctx.frame.messages[i].clone();
            self.save(&mut message).await;
            ctx.frame.messages[i] = message;
        }

        let mut error = AgentMessage::error(ctx.frame.agent_id(), reason.clone());
        self.save(&mut error).await;
        ctx.frame.messages.push(error);
        RoundOutcome::Failed(reason)
    }

    /// Immediate write of orchestrator-owned changes; failures are logged.
    async fn save(&self, message: &mut AgentMessage) {
        let mut stored = message.clone();
        stored.metadata.is_persisted = true;
        match self.sync.save_now(&stored).await {
            Ok(()) => message.metadata.is_persisted = true,
            Err(e) => warn!(message_id = %message.id, "Failed to save message: {e}"),
        }
    }
}

/// Create or update the assistant message a chunk belongs to.
fn apply_chunk(frame: &mut AgentFrame, chunk: &ProviderChunk, complete: bool) {
    match frame.response_message_mut(&chunk.request_id) {
        Some(message) => {
            message.content = chunk.content.clone();
            message.metadata.is_complete = complete;
            message.touch();
        }
        None => {
            let mut message = AgentMessage::assistant(frame.agent_id(), chunk.content.clone());
            message.metadata.request_id = Some(chunk.request_id.clone());
            message.metadata.is_complete = complete;
            frame.messages.push(message);
        }
    }
}
