//! Agent definitions, live instances and their provider settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prompt::PromptTree;

/// Lifecycle state of an agent instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// No turn has run yet
    #[default]
    Idle,
    /// A turn is in progress
    Working,
    Completed,
    Canceled,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "working" => Some(Self::Working),
            "completed" => Some(Self::Completed),
            "canceled" => Some(Self::Canceled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

/// Partial provider settings. Layers are merged field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl ProviderConfig {
    /// Return `self` with every field set in `over` replaced.
    pub fn merged_with(&self, over: &ProviderConfig) -> ProviderConfig {
        ProviderConfig {
            provider: over.provider.clone().or_else(|| self.provider.clone()),
            model: over.model.clone().or_else(|| self.model.clone()),
            temperature: over.temperature.or(self.temperature),
            max_tokens: over.max_tokens.or(self.max_tokens),
            top_p: over.top_p.or(self.top_p),
        }
    }

    /// Merge defaults ← definition override ← instance override.
    pub fn layered(
        defaults: &ProviderConfig,
        definition: Option<&ProviderConfig>,
        instance: Option<&ProviderConfig>,
    ) -> ProviderConfig {
        let mut merged = defaults.clone();
        if let Some(layer) = definition {
            merged = merged.merged_with(layer);
        }
        if let Some(layer) = instance {
            merged = merged.merged_with(layer);
        }
        merged
    }
}

/// One configured tool inside a definition's framework configuration.
///
/// The tool's own parameters live under the key `"{toolId}Param"`, e.g.
/// `wikiSearchParam` for the `wikiSearch` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub id: String,

    pub tool_id: String,

    /// Editor flag marking the tool's parameters as locked for instances.
    ///
    /// Stored and round-tripped with the definition but never consulted at
    /// run time: instances carry no tool parameter overrides, so every turn
    /// uses the definition's parameters as written.
    #[serde(default)]
    pub forbid_overrides: bool,

    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ToolConfig {
    pub fn new(id: impl Into<String>, tool_id: impl Into<String>, param: serde_json::Value) -> Self {
        let tool_id = tool_id.into();
        let mut params = serde_json::Map::new();
        params.insert(param_key(&tool_id), param);
        Self {
            id: id.into(),
            tool_id,
            forbid_overrides: false,
            params,
        }
    }

    /// The tool-specific parameter object, if present and non-empty.
    pub fn param(&self) -> Option<&serde_json::Value> {
        self.params
            .get(&param_key(&self.tool_id))
            .filter(|value| match value {
                serde_json::Value::Null => false,
                serde_json::Value::Object(map) => !map.is_empty(),
                _ => true,
            })
    }
}

fn param_key(tool_id: &str) -> String {
    format!("{tool_id}Param")
}

/// The prompt template and tool list an agent is built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkConfig {
    #[serde(default)]
    pub prompts: PromptTree,

    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

/// Immutable template an agent instance is created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,

    pub name: String,

    /// Which turn handler drives instances of this definition
    #[serde(default = "default_handler")]
    pub handler_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<ProviderConfig>,

    #[serde(default)]
    pub framework: FrameworkConfig,
}

fn default_handler() -> String {
    "basicPromptConcat".into()
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            handler_id: default_handler(),
            provider_config: None,
            framework: FrameworkConfig::default(),
        }
    }

    /// The configuration for a tool, if the definition enables it.
    pub fn tool_config(&self, tool_id: &str) -> Option<&ToolConfig> {
        self.framework.tools.iter().find(|t| t.tool_id == tool_id)
    }
}

/// A live conversation created from an [`AgentDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInstance {
    pub id: String,

    pub definition_id: String,

    pub name: String,

    #[serde(default)]
    pub status: AgentStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<ProviderConfig>,

    #[serde(default)]
    pub closed: bool,

    pub created: DateTime<Utc>,

    pub modified: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(definition: &AgentDefinition, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            definition_id: definition.id.clone(),
            name: name.unwrap_or_else(|| definition.name.clone()),
            status: AgentStatus::Idle,
            provider_config: None,
            closed: false,
            created: now,
            modified: now,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &InstancePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(closed) = patch.closed {
            self.closed = closed;
        }
        if let Some(config) = &patch.provider_config {
            self.provider_config = Some(config.clone());
        }
        self.modified = Utc::now();
    }
}

/// A partial update to an agent instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<ProviderConfig>,
}

impl InstancePatch {
    pub fn status(status: AgentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}
