//! The registration service.
//!
//! Built once at startup; builds a fresh [`HookRegistry`] for every turn from
//! the agent definition's tool configuration.

use agentweave_core::agent::AgentDefinition;
use agentweave_core::hook::HookRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::framework::{RegisterTool, ToolSettings, ToolSpec};

pub struct ToolRegistry {
    /// Tools a definition can enable, by tool id
    tools: HashMap<String, Arc<dyn RegisterTool>>,
    /// Tools registered into every turn, before configured tools
    always_on: Vec<Arc<dyn RegisterTool>>,
    settings: ToolSettings,
}

impl ToolRegistry {
    pub fn new(settings: ToolSettings) -> Self {
        Self {
            tools: HashMap::new(),
            always_on: Vec::new(),
            settings,
        }
    }

    /// Register a tool that definitions enable through their tool list.
    pub fn register(&mut self, tool: impl RegisterTool + 'static) {
        let id = tool.spec().tool_id.clone();
        if self.tools.insert(id.clone(), Arc::new(tool)).is_some() {
            warn!(tool = %id, "Tool registered twice, keeping the later one");
        }
    }

    /// Register a tool that takes part in every turn.
    pub fn register_always_on(&mut self, tool: impl RegisterTool + 'static) {
        self.always_on.push(Arc::new(tool));
    }

    pub fn get(&self, tool_id: &str) -> Option<&Arc<dyn RegisterTool>> {
        self.tools.get(tool_id)
    }

    /// Specs of every enable-able tool, sorted by id.
    pub fn specs(&self) -> Vec<&ToolSpec> {
        let mut specs: Vec<&ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
        specs
    }

    pub fn settings(&self) -> ToolSettings {
        self.settings
    }

    /// A fresh registry for one turn of an agent built from `definition`.
    ///
    /// Always-on tools come first, then configured tools in configuration
    /// order. A tool configured more than once is registered once. Unknown
    /// tool ids are logged and ignored.
    pub fn build_hooks(&self, definition: &AgentDefinition) -> HookRegistry {
        let mut hooks = HookRegistry::new();
        for tool in &self.always_on {
            tool.register(&mut hooks, &self.settings);
        }

        let mut seen = HashSet::new();
        for config in &definition.framework.tools {
            if !seen.insert(config.tool_id.as_str()) {
                continue;
            }
            match self.tools.get(&config.tool_id) {
                Some(tool) => tool.register(&mut hooks, &self.settings),
                None => warn!(
                    tool = %config.tool_id,
                    definition_id = %definition.id,
                    "Unknown tool in agent definition, ignoring"
                ),
            }
        }

        debug!(
            definition_id = %definition.id,
            tools = seen.len(),
            always_on = self.always_on.len(),
            "Built hook registry"
        );
        hooks
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolSettings::default())
    }
}
