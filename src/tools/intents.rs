//! Dialog/intent lookup tool

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use crate::Result;
use crate::session::DialogLookup;
use super::{Tool, ToolRole};

/// Dialogs the client knows how to serve
const KNOWN_DIALOGS: &[&str] = &["weather", "showBanner", "dialog"];

/// Look up which dialogs/intents apply to a query.
///
/// Returns the lookup serialized as `{"dialogNames": [...]}`, or an empty
/// string when nothing matched.
pub struct LookupIntentsTool;

impl LookupIntentsTool {
    fn lookup(&self, query: &str) -> DialogLookup {
        if query.trim().is_empty() {
            return DialogLookup::default();
        }
        DialogLookup {
            dialog_names: KNOWN_DIALOGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Tool for LookupIntentsTool {
    fn name(&self) -> &str { "lookup_intents" }
    fn description(&self) -> &str { "Find the dialogs and intents available for a user query" }
    fn argument(&self) -> &str { "query" }
    fn argument_description(&self) -> &str { "The user's query, verbatim" }
    fn role(&self) -> ToolRole { ToolRole::Discovery }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = params.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let lookup = self.lookup(query);
        debug!("Intent lookup for {:?}: {:?}", query, lookup.dialog_names);

        if lookup.is_empty() {
            return Ok(String::new());
        }
        Ok(serde_json::to_string(&lookup)?)
    }
}
