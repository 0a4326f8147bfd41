//! Tools for agentweave.
//!
//! Tools extend a conversation through hooks: they inject prompt content,
//! react to tool-call markers in model responses, and persist messages. The
//! [`framework`] module turns a declarative tool into hook registrations;
//! [`ToolRegistry`] builds the per-turn hook registry from an agent
//! definition.

pub mod framework;
pub mod message_persistence;
pub mod registry;
pub mod tool_call;
pub mod wiki;
pub mod wiki_search;
pub mod workspaces_list;

use agentweave_store::MessageSync;
use std::sync::Arc;

pub use framework::{
    DefinedTool, PromptPosition, RegisterTool, ToolHandler, ToolInvocation, ToolSettings, ToolSpec,
    inject_content, inject_tool_list,
};
pub use message_persistence::MessagePersistence;
pub use registry::ToolRegistry;
pub use wiki::{InMemoryWiki, WikiBackend, WikiEntry, WikiWorkspace};
pub use wiki_search::WikiSearchTool;
pub use workspaces_list::WorkspacesListTool;

/// Create a registry with every built-in tool.
///
/// Persistence is always on; the wiki tools are enabled per definition.
pub fn default_registry(
    sync: MessageSync,
    wiki: Arc<dyn WikiBackend>,
    settings: ToolSettings,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new(settings);
    registry.register_always_on(MessagePersistence::new(sync));
    registry.register(DefinedTool::new(WikiSearchTool::new(wiki.clone())));
    registry.register(DefinedTool::new(WorkspacesListTool::new(wiki)));
    registry
}
