//! # agentweave core
//!
//! Domain types, the hook registry, and the collaborator traits of the
//! agentweave conversation orchestrator. This crate has **no framework
//! dependencies**: it defines the domain model the other crates implement
//! against.
//!
//! Every collaborator (provider, store) is a trait here; implementations
//! live in their respective crates.

pub mod agent;
pub mod cancel;
pub mod error;
pub mod hook;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{
    AgentDefinition, AgentInstance, AgentStatus, FrameworkConfig, InstancePatch, ProviderConfig,
    ToolConfig,
};
pub use cancel::CancelFlag;
pub use error::{Error, HookError, ProviderError, Result, StoreError, ToolError};
pub use hook::{
    AgentFrame, HookName, HookRegistry, ResponseContext, SeriesHandler, TurnActions,
    WaterfallHandler, YieldTarget,
};
pub use message::{AgentMessage, MessageMetadata, MessageRole};
pub use prompt::{InjectPosition, PromptNode, PromptRole, PromptTree};
pub use provider::{ChunkStatus, GenerationMeta, PromptContent, PromptMessage, Provider, ProviderChunk};
pub use store::{AgentStore, InstanceRecord};
pub use tool::{LlmToolSchema, ToolCallRequest, ToolOutput};
