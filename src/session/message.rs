//! Conversation items submitted to the realtime session

use serde::{Deserialize, Serialize};

/// Role of a conversation item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Wire content type of a conversation item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Plain text from the user or the system
    InputText,
    /// Base64 PCM16 audio
    InputAudio,
    /// Assistant-authored text
    Text,
}

/// An immutable unit of dialog content
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationItem {
    role: Role,
    kind: ContentKind,
    content: String,
}

impl ConversationItem {
    pub fn new(role: Role, kind: ContentKind, content: impl Into<String>) -> Self {
        Self {
            role,
            kind,
            content: content.into(),
        }
    }

    /// User text typed at the prompt
    pub fn user_text(content: impl Into<String>) -> Self {
        Self::new(Role::User, ContentKind::InputText, content)
    }

    /// User speech, already base64 encoded
    pub fn user_audio(base64_audio: impl Into<String>) -> Self {
        Self::new(Role::User, ContentKind::InputAudio, base64_audio)
    }

    /// System note injected by the client (tool results, errors)
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, ContentKind::InputText, content)
    }

    /// Assistant-authored text
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, ContentKind::Text, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}
