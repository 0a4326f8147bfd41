//! End-to-end conversation flows: orchestrator, built-in tools and
//! persistence wired together the way the CLI wires them.

use agentweave_agent::{AgentOrchestrator, TurnOutcome, build_prompts, filter_window};
use agentweave_core::agent::{
    AgentDefinition, AgentInstance, AgentStatus, InstancePatch, ProviderConfig, ToolConfig,
};
use agentweave_core::error::{HookError, ProviderError, StoreError, ToolError};
use agentweave_core::hook::{
    AgentFrame, HookRegistry, PostProcessContext, ResponseContext, SeriesHandler, WaterfallHandler,
};
use agentweave_core::message::{AgentMessage, MessageRole};
use agentweave_core::prompt::{PromptNode, PromptTree};
use agentweave_core::provider::{GenerationMeta, PromptMessage, Provider, ProviderChunk};
use agentweave_core::store::{AgentStore, InstanceRecord};
use agentweave_store::{InMemoryStore, MessageSync};
use agentweave_tools::{
    InMemoryWiki, RegisterTool, ToolRegistry, ToolSettings, ToolSpec, WikiBackend, WikiEntry,
    WikiWorkspace, default_registry,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

// ── Scripted provider ───────────────────────────────────────────────────

enum Script {
    /// Stream the text in two chunks, then finish
    Reply(String),
    /// Send one update and keep the stream open
    Hang,
    /// Send an error chunk
    Fail(String),
}

#[derive(Default)]
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
    cancels: Mutex<Vec<String>>,
    open: Mutex<Vec<mpsc::Sender<ProviderChunk>>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    fn round_prompts(&self, round: usize) -> Vec<PromptMessage> {
        self.prompts.lock().unwrap()[round].clone()
    }

    fn rounds(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompts: Vec<PromptMessage>,
        _config: ProviderConfig,
        meta: GenerationMeta,
    ) -> Result<mpsc::Receiver<ProviderChunk>, ProviderError> {
        self.prompts.lock().unwrap().push(prompts);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected provider round");

        let id = meta.request_id;
        let (tx, rx) = mpsc::channel(8);
        match script {
            Script::Reply(text) => {
                let half: String = text.chars().take(text.chars().count() / 2).collect();
                tx.try_send(ProviderChunk::update(&id, half)).unwrap();
                tx.try_send(ProviderChunk::done(&id, text)).unwrap();
            }
            Script::Hang => {
                tx.try_send(ProviderChunk::update(&id, "Thinking")).unwrap();
                self.open.lock().unwrap().push(tx);
            }
            Script::Fail(message) => {
                tx.try_send(ProviderChunk::error(&id, "ServerError", message)).unwrap();
            }
        }
        Ok(rx)
    }

    async fn cancel(&self, request_id: &str) -> Result<(), ProviderError> {
        self.cancels.lock().unwrap().push(request_id.to_string());
        self.open.lock().unwrap().clear();
        Ok(())
    }
}

// ── Counting store ──────────────────────────────────────────────────────

/// Delegates to an [`InMemoryStore`] and counts message writes per id.
struct CountingStore {
    inner: Arc<InMemoryStore>,
    saves: Mutex<HashMap<String, usize>>,
}

impl CountingStore {
    fn new(inner: Arc<InMemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            saves: Mutex::new(HashMap::new()),
        })
    }

    fn saves_of(&self, message_id: &str) -> usize {
        self.saves.lock().unwrap().get(message_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl AgentStore for CountingStore {
    fn name(&self) -> &str {
        "counting"
    }

    async fn save_definition(&self, definition: &AgentDefinition) -> Result<(), StoreError> {
        self.inner.save_definition(definition).await
    }

    async fn get_definition(&self, id: &str) -> Result<Option<AgentDefinition>, StoreError> {
        self.inner.get_definition(id).await
    }

    async fn create_instance(&self, instance: &AgentInstance) -> Result<(), StoreError> {
        self.inner.create_instance(instance).await
    }

    async fn get_instance(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        self.inner.get_instance(id).await
    }

    async fn update_instance(
        &self,
        id: &str,
        patch: &InstancePatch,
    ) -> Result<Option<AgentInstance>, StoreError> {
        self.inner.update_instance(id, patch).await
    }

    async fn list_instances(&self, include_closed: bool) -> Result<Vec<AgentInstance>, StoreError> {
        self.inner.list_instances(include_closed).await
    }

    async fn delete_instance(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete_instance(id).await
    }

    async fn save_message(&self, message: &AgentMessage) -> Result<(), StoreError> {
        *self.saves.lock().unwrap().entry(message.id.clone()).or_default() += 1;
        self.inner.save_message(message).await
    }

    async fn get_message(&self, id: &str) -> Result<Option<AgentMessage>, StoreError> {
        self.inner.get_message(id).await
    }
}

// ── Stalled wiki ────────────────────────────────────────────────────────

/// A wiki whose search never returns. `started` fires when a search begins.
struct StalledWiki {
    started: Arc<Notify>,
}

#[async_trait]
impl WikiBackend for StalledWiki {
    async fn workspaces(&self) -> Result<Vec<WikiWorkspace>, ToolError> {
        Ok(Vec::new())
    }

    async fn search(&self, _workspace: &str, _filter: &str) -> Result<Vec<WikiEntry>, ToolError> {
        self.started.notify_one();
        std::future::pending().await
    }
}

// ── Fixture ─────────────────────────────────────────────────────────────

struct Fixture {
    orchestrator: Arc<AgentOrchestrator>,
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemoryStore>,
    writes: Arc<CountingStore>,
    registry: Arc<ToolRegistry>,
    instance_id: String,
}

#[derive(Default)]
struct Options {
    /// Configured ahead of the wiki search tool
    leading_tools: Vec<ToolConfig>,
    register: Option<Box<dyn FnOnce(&mut ToolRegistry)>>,
    /// Replaces the seeded in-memory wiki
    wiki: Option<Arc<dyn WikiBackend>>,
}

fn definition(leading_tools: Vec<ToolConfig>) -> AgentDefinition {
    let mut def = AgentDefinition::new("wiki-helper", "Wiki helper");
    def.framework.prompts = PromptTree::new(vec![
        PromptNode::new("system", "You answer questions from the team wiki.")
            .with_child(PromptNode::new("tools", "")),
    ]);
    def.framework.tools = leading_tools;
    def.framework.tools.push(ToolConfig::new(
        "search",
        "wikiSearch",
        json!({ "toolListPosition": { "targetId": "tools", "position": "child" } }),
    ));
    def
}

async fn seeded_wiki() -> Arc<dyn WikiBackend> {
    let wiki = Arc::new(InMemoryWiki::new());
    wiki.add_workspace("wiki", "Team wiki").await;
    wiki.add_entry("wiki", WikiEntry::new("Index", "Start page of the wiki.")).await;
    wiki
}

async fn fixture_with(scripts: Vec<Script>, options: Options) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let def = definition(options.leading_tools);
    store.save_definition(&def).await.unwrap();
    let instance = AgentInstance::new(&def, Some("chat".into()));
    store.create_instance(&instance).await.unwrap();

    let wiki = match options.wiki {
        Some(wiki) => wiki,
        None => seeded_wiki().await,
    };

    let writes = CountingStore::new(store.clone());
    let sync = MessageSync::new(writes.clone());
    let mut registry = default_registry(sync.clone(), wiki, ToolSettings::default());
    if let Some(register) = options.register {
        register(&mut registry);
    }
    let registry = Arc::new(registry);

    let provider = ScriptedProvider::new(scripts);
    let orchestrator = Arc::new(AgentOrchestrator::new(sync, provider.clone(), registry.clone()));
    Fixture {
        orchestrator,
        provider,
        store,
        writes,
        registry,
        instance_id: instance.id,
    }
}

async fn fixture(scripts: Vec<Script>) -> Fixture {
    fixture_with(scripts, Options::default()).await
}

impl Fixture {
    async fn history(&self) -> Vec<AgentMessage> {
        self.store
            .get_instance(&self.instance_id)
            .await
            .unwrap()
            .unwrap()
            .messages
    }

    async fn status(&self) -> AgentStatus {
        self.store
            .get_instance(&self.instance_id)
            .await
            .unwrap()
            .unwrap()
            .instance
            .status
    }
}

const SEARCH_CALL: &str =
    "Let me look that up.\n<tool_use name=\"wiki-search\">{\"workspaceName\": \"wiki\", \"filter\": \"Index\"}</tool_use>";

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn wiki_search_round_trip() {
    let f = fixture(vec![
        Script::Reply(SEARCH_CALL.into()),
        Script::Reply("The Index page is the start page of the wiki.".into()),
    ])
    .await;

    let outcome = f
        .orchestrator
        .send_message(&f.instance_id, "search wiki for Index", None)
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(f.provider.rounds(), 2);
    assert_eq!(f.status().await, AgentStatus::Completed);

    let history = f.history().await;
    let roles: Vec<_> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Assistant, MessageRole::Tool, MessageRole::Assistant]
    );
    assert!(history.iter().all(|m| m.metadata.is_persisted));
    assert!(history[0].metadata.processed);
    assert!(history[1].metadata.contains_tool_call);
    assert_eq!(history[1].duration, Some(1));
    assert_eq!(history[2].duration, Some(1));
    assert!(history[2].metadata.is_tool_result);
    assert!(history[2].content.contains("<functions_result>"));
    assert!(history[2].content.contains("Start page of the wiki."));
    assert_eq!(history[3].duration, None);
    assert!(history[3].metadata.is_complete);

    // round 1 carries the tool description inside the system turn
    let first = f.provider.round_prompts(0);
    assert!(first[0].content.text().contains("wiki-search"));

    // round 2 sees the result but the call itself has aged out
    let second = f.provider.round_prompts(1);
    let texts: Vec<String> = second.iter().map(|p| p.content.text()).collect();
    assert!(texts.iter().any(|t| t.contains("<functions_result>")));
    assert!(!texts.iter().any(|t| t.contains("Let me look that up.")));

    // the next round drops both pieces of scaffolding
    let visible: Vec<_> = filter_window(&history).into_iter().map(|m| m.role).collect();
    assert_eq!(visible, vec![MessageRole::User, MessageRole::Assistant]);
}

#[tokio::test]
async fn cancellation_is_idempotent() {
    let f = fixture(vec![Script::Hang]).await;

    let turn = {
        let orchestrator = f.orchestrator.clone();
        let id = f.instance_id.clone();
        tokio::spawn(async move { orchestrator.send_message(&id, "hello", None).await })
    };
    while f.provider.rounds() == 0 {
        tokio::task::yield_now().await;
    }

    assert!(f.orchestrator.cancel(&f.instance_id));
    assert!(!f.orchestrator.cancel(&f.instance_id));

    let outcome = turn.await.unwrap().unwrap();
    assert_eq!(outcome, TurnOutcome::Canceled);
    assert_eq!(f.provider.cancels().len(), 1);
    assert_eq!(f.status().await, AgentStatus::Canceled);
    assert!(!f.orchestrator.is_running(&f.instance_id));
    assert!(!f.orchestrator.cancel(&f.instance_id));
}

#[tokio::test]
async fn cancel_interrupts_running_tool() {
    let started = Arc::new(Notify::new());
    let f = fixture_with(
        vec![Script::Reply(SEARCH_CALL.into())],
        Options {
            wiki: Some(Arc::new(StalledWiki {
                started: started.clone(),
            })),
            ..Options::default()
        },
    )
    .await;

    let turn = {
        let orchestrator = f.orchestrator.clone();
        let id = f.instance_id.clone();
        tokio::spawn(async move { orchestrator.send_message(&id, "search wiki for Index", None).await })
    };
    started.notified().await;
    assert!(f.orchestrator.cancel(&f.instance_id));

    let outcome = tokio::time::timeout(Duration::from_secs(2), turn)
        .await
        .expect("turn kept running after cancel")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Canceled);
    assert_eq!(f.provider.rounds(), 1);
    assert_eq!(f.status().await, AgentStatus::Canceled);

    let history = f.history().await;
    assert!(history.iter().all(|m| m.role != MessageRole::Tool));
    assert!(!f.orchestrator.is_running(&f.instance_id));
}

#[tokio::test]
async fn tool_result_is_written_once() {
    let f = fixture(vec![
        Script::Reply(SEARCH_CALL.into()),
        Script::Reply("The Index page is the start page of the wiki.".into()),
    ])
    .await;

    let outcome = f
        .orchestrator
        .send_message(&f.instance_id, "search wiki for Index", None)
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);

    let history = f.history().await;
    let tool = history.iter().find(|m| m.role == MessageRole::Tool).unwrap();
    assert_eq!(f.writes.saves_of(&tool.id), 1);
}

#[tokio::test]
async fn provider_error_after_tool_keeps_tool_result() {
    let f = fixture(vec![
        Script::Reply(SEARCH_CALL.into()),
        Script::Fail("upstream unavailable".into()),
    ])
    .await;

    let outcome = f
        .orchestrator
        .send_message(&f.instance_id, "search wiki for Index", None)
        .await
        .unwrap();
    match outcome {
        TurnOutcome::Failed { message } => assert!(message.contains("upstream unavailable")),
        other => panic!("expected failure, got {other:?}"),
    }

    let history = f.history().await;
    let tool = history.iter().find(|m| m.role == MessageRole::Tool).unwrap();
    assert!(tool.metadata.is_persisted);
    let last = history.last().unwrap();
    assert_eq!(last.role, MessageRole::Error);
    assert!(last.content.contains("upstream unavailable"));
    assert_eq!(f.status().await, AgentStatus::Failed);
}

#[tokio::test]
async fn failing_search_is_reported_to_the_model() {
    let f = fixture(vec![
        Script::Reply(
            "<tool_use name=\"wiki-search\">{\"workspaceName\": \"missing\"}</tool_use>".into(),
        ),
        Script::Reply("That workspace does not exist.".into()),
    ])
    .await;

    let outcome = f
        .orchestrator
        .send_message(&f.instance_id, "search the missing workspace", None)
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);

    let history = f.history().await;
    let tool = history.iter().find(|m| m.role == MessageRole::Tool).unwrap();
    assert!(tool.metadata.is_error);
    assert_eq!(tool.duration, Some(2));
    assert!(tool.content.contains("Error:"));
    assert_eq!(history[1].duration, Some(2));
}

#[tokio::test]
async fn malformed_tool_call_is_reported_to_the_model() {
    let f = fixture(vec![
        Script::Reply("<tool_use name=\"wiki-search\">{workspaceName: wiki}</tool_use>".into()),
        Script::Reply("I sent a malformed request, sorry.".into()),
    ])
    .await;

    let outcome = f
        .orchestrator
        .send_message(&f.instance_id, "search wiki for Index", None)
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(f.provider.rounds(), 2);

    let history = f.history().await;
    assert!(history[1].metadata.contains_tool_call);
    let tool = history.iter().find(|m| m.role == MessageRole::Tool).unwrap();
    assert!(tool.metadata.is_error);
    assert_eq!(tool.duration, Some(2));
    assert!(tool.content.contains("Invalid parameters for wiki-search"));

    // the error is shown to the model in the next round
    let second = f.provider.round_prompts(1);
    assert!(second.iter().any(|p| p.content.text().contains("Invalid parameters")));
}

// ── Error isolation ─────────────────────────────────────────────────────

struct Broken;

#[async_trait]
impl SeriesHandler<ResponseContext> for Broken {
    async fn call(&self, _ctx: &mut ResponseContext) -> Result<(), HookError> {
        Err(HookError::HandlerFailed {
            hook: "responseUpdate",
            handler: "broken".into(),
            reason: "always fails".into(),
        })
    }
}

#[async_trait]
impl WaterfallHandler<PostProcessContext> for Broken {
    async fn call(&self, _ctx: PostProcessContext) -> Result<PostProcessContext, HookError> {
        Err(HookError::HandlerFailed {
            hook: "postProcess",
            handler: "broken".into(),
            reason: "always fails".into(),
        })
    }
}

struct BrokenTool {
    spec: ToolSpec,
}

impl RegisterTool for BrokenTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn register(&self, hooks: &mut HookRegistry, _settings: &ToolSettings) {
        hooks.response_update.tap("broken", Arc::new(Broken));
        hooks.response_complete.tap("broken", Arc::new(Broken));
        hooks.post_process.tap("broken", Arc::new(Broken));
    }
}

#[tokio::test]
async fn failing_handlers_do_not_stop_the_turn() {
    let broken = BrokenTool {
        spec: ToolSpec {
            tool_id: "broken".into(),
            display_name: "Broken".into(),
            description: "Fails on every hook".into(),
            config_schema: json!({}),
            llm_tools: Vec::new(),
        },
    };
    let f = fixture_with(
        vec![
            Script::Reply(SEARCH_CALL.into()),
            Script::Reply("Plain answer.".into()),
        ],
        Options {
            leading_tools: vec![ToolConfig::new("b", "broken", json!({}))],
            register: Some(Box::new(move |registry: &mut ToolRegistry| registry.register(broken))),
            ..Options::default()
        },
    )
    .await;

    let outcome = f
        .orchestrator
        .send_message(&f.instance_id, "search wiki for Index", None)
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(f.provider.rounds(), 2);

    // the broken handlers run first, the search still runs after them
    let history = f.history().await;
    let roles: Vec<_> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Assistant, MessageRole::Tool, MessageRole::Assistant]
    );
    assert!(!history[2].metadata.is_error);
    assert_eq!(history[3].content, "Plain answer.");
    assert!(history.iter().all(|m| m.metadata.is_persisted));
}

#[tokio::test]
async fn prompt_assembly_is_deterministic() {
    let f = fixture(Vec::new()).await;
    let record = f.store.get_instance(&f.instance_id).await.unwrap().unwrap();
    let def = f.store.get_definition("wiki-helper").await.unwrap().unwrap();
    let hooks = f.registry.build_hooks(&def);
    let frame = AgentFrame {
        instance: record.instance,
        definition: Arc::new(def),
        messages: vec![AgentMessage::user(&f.instance_id, "hello")],
    };

    let first = build_prompts(&hooks, &frame).await.unwrap();
    let second = build_prompts(&hooks, &frame).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert!(first[0].content.text().starts_with("You answer questions from the team wiki."));
    assert_eq!(first[1].content.text(), "hello");
}
