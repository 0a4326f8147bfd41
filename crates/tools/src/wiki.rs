//! Wiki backends searched by the wiki tools.

use agentweave_core::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// A named collection of wiki entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiWorkspace {
    pub name: String,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiEntry {
    pub title: String,

    pub text: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl WikiEntry {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Every whitespace-separated term occurs in the title, text or a tag
    /// (case-insensitive). An empty filter matches everything.
    pub fn matches(&self, filter: &str) -> bool {
        let title = self.title.to_lowercase();
        let text = self.text.to_lowercase();
        filter.split_whitespace().all(|term| {
            let term = term.to_lowercase();
            title.contains(&term)
                || text.contains(&term)
                || self.tags.iter().any(|t| t.to_lowercase() == term)
        })
    }
}

/// Source of wiki content.
#[async_trait]
pub trait WikiBackend: Send + Sync {
    async fn workspaces(&self) -> Result<Vec<WikiWorkspace>, ToolError>;

    /// Entries of `workspace` matching `filter`.
    /// Fails with [`ToolError::NotFound`] for an unknown workspace.
    async fn search(&self, workspace: &str, filter: &str) -> Result<Vec<WikiEntry>, ToolError>;
}

#[derive(Default)]
struct Workspace {
    description: String,
    entries: Vec<WikiEntry>,
}

/// A wiki held in process memory.
#[derive(Default)]
pub struct InMemoryWiki {
    workspaces: RwLock<BTreeMap<String, Workspace>>,
}

impl InMemoryWiki {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_workspace(&self, name: impl Into<String>, description: impl Into<String>) {
        self.workspaces
            .write()
            .await
            .entry(name.into())
            .or_default()
            .description = description.into();
    }

    /// Add an entry, creating the workspace if needed.
    pub async fn add_entry(&self, workspace: impl Into<String>, entry: WikiEntry) {
        self.workspaces
            .write()
            .await
            .entry(workspace.into())
            .or_default()
            .entries
            .push(entry);
    }
}

#[async_trait]
impl WikiBackend for InMemoryWiki {
    async fn workspaces(&self) -> Result<Vec<WikiWorkspace>, ToolError> {
        Ok(self
            .workspaces
            .read()
            .await
            .iter()
            .map(|(name, ws)| WikiWorkspace {
                name: name.clone(),
                description: ws.description.clone(),
            })
            .collect())
    }

    async fn search(&self, workspace: &str, filter: &str) -> Result<Vec<WikiEntry>, ToolError> {
        let workspaces = self.workspaces.read().await;
        let ws = workspaces
            .get(workspace)
            .ok_or_else(|| ToolError::NotFound(format!("wiki workspace '{workspace}'")))?;
        Ok(ws
            .entries
            .iter()
            .filter(|e| e.matches(filter))
            .cloned()
            .collect())
    }
}
