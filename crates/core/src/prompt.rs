//! The prompt tree: hierarchical, addressable prompt segments.
//!
//! An agent definition carries a tree template. Every turn clones it, lets
//! tools inject nodes next to (or under) a node addressed by id, and then
//! flattens the result into provider turns.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Role of a provider-facing turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    #[default]
    System,
    User,
    Assistant,
}

/// Where an injected node goes relative to its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectPosition {
    Before,
    #[default]
    After,
    Child,
}

/// One segment of the prompt tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptNode {
    pub id: String,

    /// Human-readable label (editors show it, providers never see it)
    #[serde(default)]
    pub caption: String,

    #[serde(default)]
    pub text: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Role of the turn produced by a top-level node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<PromptRole>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PromptNode>,
}

fn default_true() -> bool {
    true
}

impl PromptNode {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            caption: String::new(),
            text: text.into(),
            enabled: true,
            role: None,
            children: Vec::new(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }

    pub fn with_role(mut self, role: PromptRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_child(mut self, child: PromptNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Depth-first text of this node and its enabled descendants.
    ///
    /// Disabled nodes contribute nothing, including their subtree.
    pub fn collect_text(&self, out: &mut Vec<String>) {
        if !self.enabled {
            return;
        }
        let text = self.text.trim();
        if !text.is_empty() {
            out.push(text.to_string());
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }
}

/// An ordered forest of prompt nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTree {
    pub nodes: Vec<PromptNode>,
}

impl PromptTree {
    pub fn new(nodes: Vec<PromptNode>) -> Self {
        Self { nodes }
    }

    /// Find a node anywhere in the tree.
    pub fn find(&self, id: &str) -> Option<&PromptNode> {
        fn walk<'a>(nodes: &'a [PromptNode], id: &str) -> Option<&'a PromptNode> {
            for node in nodes {
                if node.id == id {
                    return Some(node);
                }
                if let Some(found) = walk(&node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.nodes, id)
    }

    /// Find a node anywhere in the tree, mutably.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut PromptNode> {
        fn walk<'a>(nodes: &'a mut [PromptNode], id: &str) -> Option<&'a mut PromptNode> {
            for node in nodes {
                if node.id == id {
                    return Some(node);
                }
                if let Some(found) = walk(&mut node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&mut self.nodes, id)
    }

    /// Insert `node` relative to the node with id `target_id`.
    ///
    /// Returns `false` (and leaves the tree unchanged) if the target does
    /// not exist.
    pub fn insert(&mut self, target_id: &str, position: InjectPosition, node: PromptNode) -> bool {
        let mut slot = Some(node);
        insert_into(&mut self.nodes, target_id, position, &mut slot)
    }

    /// Ids that appear more than once.
    pub fn duplicate_ids(&self) -> Vec<String> {
        fn walk(nodes: &[PromptNode], seen: &mut HashSet<String>, dups: &mut Vec<String>) {
            for node in nodes {
                if !seen.insert(node.id.clone()) && !dups.contains(&node.id) {
                    dups.push(node.id.clone());
                }
                walk(&node.children, seen, dups);
            }
        }
        let mut seen = HashSet::new();
        let mut dups = Vec::new();
        walk(&self.nodes, &mut seen, &mut dups);
        dups
    }
}

fn insert_into(
    nodes: &mut Vec<PromptNode>,
    target_id: &str,
    position: InjectPosition,
    slot: &mut Option<PromptNode>,
) -> bool {
    if let Some(idx) = nodes.iter().position(|n| n.id == target_id) {
        let Some(node) = slot.take() else {
            return false;
        };
        match position {
            InjectPosition::Before => nodes.insert(idx, node),
            InjectPosition::After => nodes.insert(idx + 1, node),
            InjectPosition::Child => nodes[idx].children.push(node),
        }
        return true;
    }
    nodes
        .iter_mut()
        .any(|n| insert_into(&mut n.children, target_id, position, slot))
}
