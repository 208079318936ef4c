use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One parsed `data:` record of the agent's event stream.
///
/// Only the fields the reassembler acts on are modelled; everything else the
/// agent sends (metadata, timestamps, task ids) is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamFrame {
    /// The event name, e.g. `message`, `agent_message`, `message_end`, `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// An incremental fragment of the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    /// The conversation this record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// The id of the assistant message being streamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Error description on `error` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error code on `error` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP-style status on `error` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl StreamFrame {
    /// A frame carrying only an answer fragment.
    pub fn answer(fragment: impl Into<String>) -> Self {
        Self {
            answer: Some(fragment.into()),
            ..Self::default()
        }
    }

    /// A frame carrying only a conversation id.
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// The answer fragment, if the record carries a non-empty one.
    pub fn fragment(&self) -> Option<&str> {
        self.answer.as_deref().filter(|answer| !answer.is_empty())
    }

    /// The conversation id, if the record carries a non-empty one.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref().filter(|id| !id.is_empty())
    }

    /// True for records that report a failure inside the stream.
    pub fn is_error(&self) -> bool {
        self.event.as_deref() == Some("error")
    }

    /// Convert an `error` record into the matching crate error.
    pub fn to_error(&self) -> Error {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| "agent reported an error in the stream".to_string());
        Error::api(self.status.unwrap_or(500), self.code.clone(), message)
    }
}
