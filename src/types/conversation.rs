use std::fmt;

use serde::{Deserialize, Serialize};

/// Who authored a turn of the conversation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person typing into the chat.
    User,

    /// The hosted agent.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the chat transcript.
///
/// Assistant turns grow fragment by fragment while their stream is open and
/// are never mutated once the stream closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    /// The author of the turn.
    pub role: Role,

    /// The text of the turn.
    pub content: String,
}

impl ConversationTurn {
    /// Create a new turn.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an empty assistant turn, ready to receive fragments.
    pub fn assistant() -> Self {
        Self::new(Role::Assistant, String::new())
    }
}

/// The opaque identifier the agent issues to correlate turns into one dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHandle(String);

impl ConversationHandle {
    /// Wrap a server-issued conversation identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
