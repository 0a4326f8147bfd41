//! Provider trait: the streaming contract the orchestrator needs from an LLM backend.
//!
//! The orchestrator only depends on `generate` yielding a stream of
//! [`ProviderChunk`]s terminated by a `done` or `error` chunk, and on being
//! able to cancel an in-flight request by id. Vendor adapters live outside
//! this workspace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agent::ProviderConfig;
use crate::error::ProviderError;
use crate::prompt::PromptRole;

/// One part of a multimodal turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Image {
        mime_type: String,
        /// Base64-encoded bytes
        data: String,
    },
    Text {
        text: String,
    },
}

/// Content of a provider-facing turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl PromptContent {
    /// The text portion of the content.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A flattened, provider-ready turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: PromptContent,
}

impl PromptMessage {
    pub fn text(role: PromptRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: PromptContent::Text(text.into()),
        }
    }
}

/// Stream chunk status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    /// Partial output, more chunks follow
    Update,
    /// Final chunk of a successful response
    Done,
    /// Terminal failure
    Error,
}

/// Details attached to an `error` chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A single chunk of a streaming response.
///
/// `content` is the accumulated response text so far, not a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderChunk {
    pub status: ChunkStatus,

    #[serde(default)]
    pub content: String,

    pub request_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

impl ProviderChunk {
    pub fn update(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            status: ChunkStatus::Update,
            content: content.into(),
            request_id: request_id.into(),
            error_detail: None,
        }
    }

    pub fn done(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            status: ChunkStatus::Done,
            content: content.into(),
            request_id: request_id.into(),
            error_detail: None,
        }
    }

    pub fn error(request_id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ChunkStatus::Error,
            content: String::new(),
            request_id: request_id.into(),
            error_detail: Some(ErrorDetail {
                name: name.into(),
                message: message.into(),
                code: None,
            }),
        }
    }
}

/// Per-call metadata handed to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMeta {
    pub agent_id: String,
    pub definition_id: String,
    /// Id the provider must echo on every chunk and accept in `cancel`
    pub request_id: String,
    /// 1-based round within the current turn
    pub round: u32,
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Start generating a response for the flattened prompt.
    ///
    /// The returned receiver must end with a `done` or `error` chunk.
    async fn generate(
        &self,
        prompts: Vec<PromptMessage>,
        config: ProviderConfig,
        meta: GenerationMeta,
    ) -> std::result::Result<mpsc::Receiver<ProviderChunk>, ProviderError>;

    /// Abort an in-flight request.
    async fn cancel(&self, request_id: &str) -> std::result::Result<(), ProviderError>;
}
