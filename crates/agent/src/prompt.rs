//! Prompt concatenation: turns a definition's prompt tree and the live
//! history into the flat message list a provider receives.
//!
//! 1. Clone the template tree.
//! 2. Run `processPrompts` once per configured tool, in configuration order.
//! 3. Flatten: every enabled top-level node becomes one turn.
//! 4. Append the history that is still inside the context window.
//! 5. Attach the latest user message's file as an image part.
//! 6. Run `finalizePrompts` on the flat list.

use agentweave_core::error::HookError;
use agentweave_core::hook::{AgentFrame, FinalizeContext, HookRegistry, PromptContext};
use agentweave_core::message::{AgentMessage, MessageRole};
use agentweave_core::prompt::{PromptRole, PromptTree};
use agentweave_core::provider::{ContentPart, PromptContent, PromptMessage};
use base64::Engine;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::filter_window;

/// Build the provider prompt for the next round of `frame`.
pub async fn build_prompts(
    hooks: &HookRegistry,
    frame: &AgentFrame,
) -> Result<Vec<PromptMessage>, HookError> {
    let tree = process_tree(hooks, frame).await?;

    let mut prompts = flatten_tree(&tree);
    let system_turns = prompts.len();
    append_history(&mut prompts, &frame.messages).await;
    debug!(
        agent_id = %frame.agent_id(),
        system_turns,
        history_turns = prompts.len() - system_turns,
        "Prompt assembled"
    );

    let finalized = hooks
        .finalize_prompts
        .call(FinalizeContext {
            agent_id: frame.agent_id().to_string(),
            definition: frame.definition.clone(),
            prompts,
        })
        .await?;
    Ok(finalized.prompts)
}

/// The template tree after every configured tool had its turn.
pub async fn process_tree(hooks: &HookRegistry, frame: &AgentFrame) -> Result<PromptTree, HookError> {
    let definition = &frame.definition;
    let mut tree = definition.framework.prompts.clone();
    let messages = Arc::new(frame.messages.clone());

    for tool_config in &definition.framework.tools {
        let ctx = PromptContext {
            agent_id: frame.agent_id().to_string(),
            definition: definition.clone(),
            tool_config: tool_config.clone(),
            prompts: tree,
            messages: messages.clone(),
        };
        tree = hooks.process_prompts.call(ctx).await?.prompts;
    }

    let duplicates = tree.duplicate_ids();
    if !duplicates.is_empty() {
        warn!(agent_id = %frame.agent_id(), ?duplicates, "Prompt tree has duplicate node ids");
    }
    Ok(tree)
}

/// One turn per enabled top-level node; empty turns are dropped.
pub fn flatten_tree(tree: &PromptTree) -> Vec<PromptMessage> {
    tree.nodes
        .iter()
        .filter(|node| node.enabled)
        .filter_map(|node| {
            let mut parts = Vec::new();
            node.collect_text(&mut parts);
            if parts.is_empty() {
                return None;
            }
            Some(PromptMessage::text(
                node.role.unwrap_or_default(),
                parts.join("\n"),
            ))
        })
        .collect()
}

fn prompt_role(message: &AgentMessage) -> Option<PromptRole> {
    match message.role {
        MessageRole::User | MessageRole::Tool => Some(PromptRole::User),
        MessageRole::Assistant if message.is_streaming() => None,
        MessageRole::Assistant => Some(PromptRole::Assistant),
        MessageRole::Error => None,
    }
}

/// Append windowed history, attaching the latest user message's file.
pub async fn append_history(prompts: &mut Vec<PromptMessage>, messages: &[AgentMessage]) {
    let mut last_user: Option<(usize, &AgentMessage)> = None;

    for message in filter_window(messages) {
        let Some(role) = prompt_role(message) else {
            continue;
        };
        if message.role == MessageRole::User {
            last_user = Some((prompts.len(), message));
        }
        prompts.push(PromptMessage::text(role, message.content.clone()));
    }

    let Some((index, message)) = last_user else {
        return;
    };
    let Some(file) = &message.metadata.file else {
        return;
    };
    match read_image(file).await {
        Ok(image) => {
            prompts[index].content = PromptContent::Parts(vec![
                image,
                ContentPart::Text {
                    text: message.content.clone(),
                },
            ]);
        }
        Err(e) => warn!(
            message_id = %message.id,
            file = %file.display(),
            "Could not attach file, sending text only: {e}"
        ),
    }
}

async fn read_image(path: &Path) -> std::io::Result<ContentPart> {
    let bytes = tokio::fs::read(path).await?;
    Ok(ContentPart::Image {
        mime_type: mime_for(path).to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Media type by file extension.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
