//! Tool runner - registry of tools and the per-phase tool sets

use std::collections::HashMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use crate::config::Config;
use super::Tool;
use super::intents::LookupIntentsTool;
use super::weather::WeatherTool;
use super::execute::ExecuteIntentTool;

/// Tool definition sent to the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Registry of the tools a session can offer
pub struct ToolRunner {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRunner {
    /// Create an empty tool runner
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a tool runner with the built-in tools
    pub fn new_with_defaults(config: &Config) -> Self {
        let mut runner = Self::new();

        runner.register(LookupIntentsTool);
        runner.register(WeatherTool::new(&config.weather));
        runner.register(ExecuteIntentTool);

        runner
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Look up a tool for dispatch
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions for the named tools, in the given order.
    ///
    /// Names with no registered tool are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| match self.tools.get(name) {
                Some(tool) => Some(tool.to_definition()),
                None => {
                    warn!("Tool set names unregistered tool: {}", name);
                    None
                }
            })
            .collect()
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new()
    }
}
