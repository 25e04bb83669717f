//! Generic intent execution tool

use async_trait::async_trait;
use serde_json::Value;
use crate::Result;
use crate::error::Error;
use super::{Tool, ToolRole};

/// Execute a resolved intent
pub struct ExecuteIntentTool;

#[async_trait]
impl Tool for ExecuteIntentTool {
    fn name(&self) -> &str { "execute_intent" }
    fn description(&self) -> &str { "Execute the intent resolved for the user's request when no specific tool applies" }
    fn argument(&self) -> &str { "intent" }
    fn argument_description(&self) -> &str { "Name of the intent to execute" }
    fn role(&self) -> ToolRole { ToolRole::Fallback }

    async fn execute(&self, params: Value) -> Result<String> {
        let intent = params.get("intent")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Tool("Missing 'intent' parameter".to_string()))?;

        Ok(format!("Executed intent: {}.", intent))
    }
}
