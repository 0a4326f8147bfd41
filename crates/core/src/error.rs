//! Error types for the agentweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all agentweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Hook dispatch errors ---
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    // --- Lookups ---
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // --- Concurrency ---
    #[error("Agent instance {0} already has a turn in progress")]
    Busy(String),

    #[error("Agent instance {0} is closed")]
    Closed(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool configuration for {tool_id}: {reason}")]
    InvalidConfig { tool_id: String, reason: String },

    #[error("Invalid parameters for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum HookError {
    #[error("Handler '{handler}' on hook '{hook}' failed: {reason}")]
    HandlerFailed {
        hook: &'static str,
        handler: String,
        reason: String,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
