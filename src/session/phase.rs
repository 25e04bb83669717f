//! Conversation phase and the instructions derived from it.

use std::fmt;

use super::context::ConversationContext;

/// Stage of the turn-processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversationPhase {
    #[default]
    Initial,
    Processing,
    Complete,
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationPhase::Initial => f.write_str("initial"),
            ConversationPhase::Processing => f.write_str("processing"),
            ConversationPhase::Complete => f.write_str("complete"),
        }
    }
}

/// Which of the configured tool sets a phase exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSetKind {
    /// Discovery action plus the generic fallback.
    Initial,
    /// Full helper set. Independent of which dialog names a lookup returned.
    Helper,
}

impl ConversationPhase {
    pub fn tool_set(self) -> ToolSetKind {
        match self {
            ConversationPhase::Initial => ToolSetKind::Initial,
            ConversationPhase::Processing | ConversationPhase::Complete => ToolSetKind::Helper,
        }
    }
}

const INITIAL_INSTRUCTIONS: &str = "You are a helpful assistant that can handle multiple types of queries:
1. For any query, first use lookup_intents to understand available intents
2. Based on the intents, determine the appropriate function to use
3. Use the function that matches the intent
4. For any other queries, use execute_intent with the appropriate intent";

const COMPLETE_INSTRUCTIONS: &str = "The execution is complete. Return to the initial state and:
1. Handle new queries appropriately
2. Reset context for the next interaction";

/// Instruction text for a phase and context.
///
/// `helper_tools` are the names in the helper set, listed when a dialog lookup
/// result is present.
pub fn instructions_for(
    phase: ConversationPhase,
    ctx: &ConversationContext,
    helper_tools: &[String],
) -> String {
    match phase {
        ConversationPhase::Initial => INITIAL_INSTRUCTIONS.to_string(),
        ConversationPhase::Processing => match &ctx.dialog {
            Some(dialog) => {
                let dialog_json = serde_json::to_string(dialog).unwrap_or_default();
                let routes = helper_tools
                    .iter()
                    .map(|name| {
                        let scope = if name == "lookup_weather" { "weather-related" } else { "other" };
                        format!("- For {} queries, use {} function", scope, name)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "You have received the following dialog intents: {}\n\n\
                     Based on the available intents, determine the appropriate function to use:\n\
                     {}\n\n\
                     Please provide a natural response based on the available intents.",
                    dialog_json, routes
                )
            }
            None => {
                let query_type = ctx
                    .query_type
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| "general".to_string());
                format!(
                    "You are processing a {} query.\n\
                     1. First analyze the dialog intents to understand what is available\n\
                     2. Use the function that matches the intent\n\
                     3. For any other queries, use execute_intent with the appropriate intent\n\
                     4. Format the response in a natural, conversational way",
                    query_type
                )
            }
        },
        ConversationPhase::Complete => COMPLETE_INSTRUCTIONS.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::context::{DialogLookup, QueryType};

    fn helpers() -> Vec<String> {
        vec!["lookup_weather".to_string(), "execute_intent".to_string()]
    }

    #[test]
    fn test_instructions_are_deterministic() {
        let ctx = ConversationContext {
            query_type: Some(QueryType::Weather),
            subject: Some("Paris".to_string()),
            ..Default::default()
        };
        for phase in [ConversationPhase::Initial, ConversationPhase::Processing, ConversationPhase::Complete] {
            assert_eq!(
                instructions_for(phase, &ctx, &helpers()),
                instructions_for(phase, &ctx.clone(), &helpers())
            );
        }
    }

    #[test]
    fn test_processing_mentions_query_type() {
        let ctx = ConversationContext {
            query_type: Some(QueryType::Weather),
            ..Default::default()
        };
        let text = instructions_for(ConversationPhase::Processing, &ctx, &helpers());
        assert!(text.starts_with("You are processing a weather query."));
    }

    #[test]
    fn test_dialog_instructions_list_helper_routes() {
        let ctx = ConversationContext {
            query_type: Some(QueryType::Dialog),
            dialog: Some(DialogLookup { dialog_names: vec!["weather".to_string()] }),
            ..Default::default()
        };
        let text = instructions_for(ConversationPhase::Processing, &ctx, &helpers());
        assert!(text.contains(r#"{"dialogNames":["weather"]}"#));
        assert!(text.contains("- For weather-related queries, use lookup_weather function"));
        assert!(text.contains("- For other queries, use execute_intent function"));
    }

    #[test]
    fn test_tool_set_per_phase() {
        assert_eq!(ConversationPhase::Initial.tool_set(), ToolSetKind::Initial);
        assert_eq!(ConversationPhase::Processing.tool_set(), ToolSetKind::Helper);
        assert_eq!(ConversationPhase::Complete.tool_set(), ToolSetKind::Helper);
    }
}
