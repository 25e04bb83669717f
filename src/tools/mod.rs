//! Tools module - actions the model can ask the client to run
//!
//! Each tool takes exactly one string argument, named by [`Tool::argument`],
//! and returns a presentable string. The [`ToolRole`] decides how a result
//! moves the conversation along.

mod runner;
mod intents;
mod weather;
mod execute;

pub use runner::{ToolRunner, ToolDefinition};
pub use intents::LookupIntentsTool;
pub use weather::WeatherTool;
pub use execute::ExecuteIntentTool;

use async_trait::async_trait;
use serde_json::Value;
use crate::Result;

/// How a tool result feeds back into the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRole {
    /// Finds which dialogs/intents apply; narrows the active tool set
    Discovery,
    /// Answers a concrete question (e.g. weather for a city)
    Lookup,
    /// Generic intent execution, answered in the assistant's voice
    Fallback,
}

/// Tool trait - interface for all session tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// The single required argument extracted from the call
    fn argument(&self) -> &str;

    fn role(&self) -> ToolRole;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                self.argument(): {
                    "type": "string",
                    "description": self.argument_description()
                }
            },
            "required": [self.argument()]
        })
    }

    fn argument_description(&self) -> &str {
        ""
    }

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value) -> Result<String>;

    /// Convert to tool definition for the session
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Dummy tool for testing
pub struct DummyTool {
    pub name: String,
    pub argument: String,
    pub role: ToolRole,
    pub result: std::result::Result<String, String>,
}

impl DummyTool {
    pub fn new(name: &str, argument: &str, role: ToolRole, result: &str) -> Self {
        Self {
            name: name.to_string(),
            argument: argument.to_string(),
            role,
            result: Ok(result.to_string()),
        }
    }

    pub fn failing(name: &str, argument: &str, role: ToolRole) -> Self {
        Self {
            name: name.to_string(),
            argument: argument.to_string(),
            role,
            result: Err("upstream unavailable".to_string()),
        }
    }
}

#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str { &self.name }
    fn description(&self) -> &str { "Dummy tool for testing" }
    fn argument(&self) -> &str { &self.argument }
    fn role(&self) -> ToolRole { self.role }

    async fn execute(&self, _params: Value) -> Result<String> {
        match &self.result {
            Ok(result) => Ok(result.clone()),
            Err(e) => Err(crate::error::Error::Tool(e.clone())),
        }
    }
}
