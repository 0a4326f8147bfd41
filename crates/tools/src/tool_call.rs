//! Parsing of tool invocation markers in model responses.
//!
//! A model calls a tool by embedding
//! `<tool_use name="wiki-search">{"workspaceName": "notes"}</tool_use>`
//! anywhere in its response. The body must be a JSON value; an empty body is
//! read as `{}`.

use agentweave_core::tool::ToolCallRequest;
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| {
            Regex::new(r#"(?s)<tool_use\s+name\s*=\s*["']([^"']+)["']\s*>(.*?)</tool_use>"#).ok()
        })
        .as_ref()
}

/// All tool calls in `response`, in order of appearance.
///
/// A marker whose body is not valid JSON still yields a call: its
/// `parameters` hold the raw body as a string and `parse_error` says why it
/// could not be read, so the model can be told about the mistake.
pub fn parse_tool_calls(response: &str) -> Vec<ToolCallRequest> {
    let Some(marker) = marker() else {
        return Vec::new();
    };
    marker
        .captures_iter(response)
        .filter_map(|caps| {
            let raw = caps.get(0)?.as_str().to_string();
            let name = caps.get(1)?.as_str().trim().to_string();
            let body = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            let (parameters, parse_error) = if body.is_empty() {
                (serde_json::Value::Object(serde_json::Map::new()), None)
            } else {
                match serde_json::from_str(body) {
                    Ok(value) => (value, None),
                    Err(e) => {
                        debug!(tool = %name, "tool_use marker body is not valid JSON: {e}");
                        (serde_json::Value::String(body.to_string()), Some(e.to_string()))
                    }
                }
            };
            Some(ToolCallRequest {
                name,
                parameters,
                raw,
                parse_error,
            })
        })
        .collect()
}

/// The first call in `response` whose name is one of `names`.
pub fn find_tool_call(response: &str, names: &[&str]) -> Option<ToolCallRequest> {
    parse_tool_calls(response)
        .into_iter()
        .find(|call| names.contains(&call.name.as_str()))
}

/// Render a call marker, as a model would write it.
pub fn format_tool_call(name: &str, parameters: &serde_json::Value) -> String {
    format!("<tool_use name=\"{name}\">{parameters}</tool_use>")
}
