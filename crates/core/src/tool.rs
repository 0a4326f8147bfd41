//! Tool-facing value types shared by the framework and the orchestrator.

use serde::{Deserialize, Serialize};

/// What a tool executor returns.
///
/// Executors never write messages themselves; the framework turns this
/// value into a consistently formatted result message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn ok(data: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// An LLM-callable function a tool exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolSchema {
    /// Name the model uses in the invocation marker (e.g. `wiki-search`)
    pub name: String,

    pub description: String,

    /// JSON Schema of the parameters
    pub parameters: serde_json::Value,
}

/// A tool invocation found in a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,

    pub parameters: serde_json::Value,

    /// The marker text as it appeared in the response
    pub raw: String,

    /// Why the marker body could not be read as JSON. A call with a parse
    /// error still runs through the framework and reports the error to the
    /// model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}
