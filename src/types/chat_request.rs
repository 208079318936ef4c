use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ConversationHandle;

/// How the agent should deliver its answer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Deliver the answer as a server-sent-events stream.
    Streaming,
}

/// The body of a `chat-messages` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// Values for the agent's input variables; always empty for the site chat.
    pub inputs: Map<String, Value>,

    /// The free-text question.
    pub query: String,

    /// Requested delivery mode.
    pub response_mode: ResponseMode,

    /// The conversation to continue; serialized as `null` for a new one.
    pub conversation_id: Option<ConversationHandle>,

    /// The end-user identifier the agent associates with the conversation.
    pub user: String,
}

impl ChatRequest {
    /// Create a streaming request.
    pub fn streaming(
        query: impl Into<String>,
        conversation_id: Option<ConversationHandle>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            inputs: Map::new(),
            query: query.into(),
            response_mode: ResponseMode::Streaming,
            conversation_id,
            user: user.into(),
        }
    }
}
