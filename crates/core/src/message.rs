//! Conversation message types.
//!
//! An [`AgentMessage`] is one turn of an agent instance's history. Messages
//! are created by the orchestrator or the tool framework, toggled between
//! persisted/unpersisted while a turn runs, and only ever removed together
//! with their owning instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Default content type for plain text turns.
pub const TEXT_PLAIN: &str = "text/plain";

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
    /// A provider or orchestrator failure shown to the user
    Error,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Flags attached to a message.
///
/// The named fields are the ones the orchestrator and tool framework act on;
/// anything else a tool wants to remember lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// A user message that has already started a turn.
    #[serde(default, skip_serializing_if = "is_false")]
    pub processed: bool,

    /// Storage holds the current version of this message.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_persisted: bool,

    /// A streaming assistant message that received its final chunk.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_complete: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_tool_result: bool,

    /// The assistant turn contained a tool invocation marker.
    #[serde(default, skip_serializing_if = "is_false")]
    pub contains_tool_call: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,

    /// Provider request that produced this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Attached file (image) sent alongside a user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A single turn in an agent instance's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    /// Unique message ID
    pub id: String,

    /// Owning agent instance
    pub agent_id: String,

    pub role: MessageRole,

    pub content: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Further rounds this message stays in the provider context.
    /// `None` never expires, `Some(0)` is already expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,

    #[serde(default)]
    pub metadata: MessageMetadata,

    pub created: DateTime<Utc>,

    pub modified: DateTime<Utc>,
}

fn default_content_type() -> String {
    TEXT_PLAIN.into()
}

impl AgentMessage {
    /// Create a message with a fresh id and timestamps.
    pub fn new(agent_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            role,
            content: content.into(),
            content_type: default_content_type(),
            duration: None,
            metadata: MessageMetadata::default(),
            created: now,
            modified: now,
        }
    }

    /// Create a new user message.
    pub fn user(agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(agent_id, MessageRole::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(agent_id, MessageRole::Assistant, content)
    }

    /// Create a tool result message.
    pub fn tool_result(
        agent_id: impl Into<String>,
        tool_id: impl Into<String>,
        content: impl Into<String>,
        duration: u32,
    ) -> Self {
        let mut msg = Self::new(agent_id, MessageRole::Tool, content);
        msg.duration = Some(duration);
        msg.metadata.is_tool_result = true;
        msg.metadata.tool_id = Some(tool_id.into());
        msg
    }

    /// Create an error message (never sent to the provider).
    pub fn error(agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(agent_id, MessageRole::Error, content);
        msg.metadata.is_error = true;
        msg
    }

    /// Attach a file to this message.
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.metadata.file = Some(file.into());
        self
    }

    /// Bump the modification timestamp and mark storage as stale.
    pub fn touch(&mut self) {
        self.modified = Utc::now();
        self.metadata.is_persisted = false;
    }

    /// A streaming assistant message that has not received its final chunk.
    pub fn is_streaming(&self) -> bool {
        self.role == MessageRole::Assistant && !self.metadata.is_complete
    }
}
