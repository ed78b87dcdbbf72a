//! Message types
//!
//! Defines chat turn structures and roles.

use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the user
    User,
    /// Message from the AI assistant
    Assistant,
    /// System prompt
    System,
    /// Any role the prompt format has no prefix for
    #[serde(other)]
    Other,
}

impl Role {
    /// Line prefix used when flattening a conversation into a prompt
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            Role::User => Some("User"),
            Role::Assistant => Some("Assistant"),
            Role::System => Some("System"),
            Role::Other => None,
        }
    }
}

/// A single chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// The role of the message sender
    pub role: Role,
    /// The content of the message
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
