//! Conversation context carried between turns.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of the query currently being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Weather,
    Dialog,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Weather => f.write_str("weather"),
            QueryType::Dialog => f.write_str("dialog"),
        }
    }
}

/// Result of a dialog/intent lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogLookup {
    #[serde(default)]
    pub dialog_names: Vec<String>,
}

impl DialogLookup {
    pub fn is_empty(&self) -> bool {
        self.dialog_names.is_empty()
    }
}

/// Mutable record of what the conversation is currently about.
///
/// Fields are only ever cleared together, via [`ConversationContext::clear`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationContext {
    /// Last queried subject (a city for weather lookups).
    pub subject: Option<String>,
    /// Last chosen dialog/intent.
    pub intent: Option<String>,
    pub query_type: Option<QueryType>,
    /// Last non-empty dialog lookup result.
    pub dialog: Option<DialogLookup>,
}

impl ConversationContext {
    /// Reset every field as a unit.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_resets_all_fields() {
        let mut ctx = ConversationContext {
            subject: Some("Paris".to_string()),
            intent: Some("showBanner".to_string()),
            query_type: Some(QueryType::Weather),
            dialog: Some(DialogLookup { dialog_names: vec!["weather".to_string()] }),
        };
        assert!(!ctx.is_empty());

        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_dialog_lookup_wire_shape() {
        let lookup: DialogLookup = serde_json::from_str(r#"{"dialogNames": ["weather", "dialog"]}"#).unwrap();
        assert_eq!(lookup.dialog_names, vec!["weather", "dialog"]);
        assert_eq!(
            serde_json::to_string(&lookup).unwrap(),
            r#"{"dialogNames":["weather","dialog"]}"#
        );
    }
}
