//! The in-memory record of one chat session.
//!
//! A [`Transcript`] owns the conversation turns and the conversation handle.
//! It is the only place stream frames are folded into visible text.

use serde::{Deserialize, Serialize};

use crate::types::{ConversationHandle, ConversationTurn, Role, StreamFrame};

/// Conversation turns plus the handle the agent assigned to them.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
    handle: Option<ConversationHandle>,
    open: bool,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a user turn.
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn::user(text));
    }

    /// Finalizes the open assistant turn, if any.
    pub fn close_assistant_turn(&mut self) {
        self.open = false;
    }

    /// Returns true while an assistant turn is receiving fragments.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Folds one frame into the transcript.
    ///
    /// The first conversation id seen is adopted; later ones are ignored. An
    /// answer fragment is appended to the open assistant turn, opening one if
    /// necessary. Returns the appended fragment.
    pub fn apply_frame<'a>(&mut self, frame: &'a StreamFrame) -> Option<&'a str> {
        if let Some(id) = frame.conversation_id() {
            self.adopt_handle(id);
        }
        let fragment = frame.fragment()?;
        if !self.open {
            self.turns.push(ConversationTurn::assistant());
            self.open = true;
        }
        if let Some(turn) = self.turns.last_mut() {
            turn.content.push_str(fragment);
        }
        Some(fragment)
    }

    /// Records `id` as the conversation handle unless one is already set.
    ///
    /// Returns true if the handle was adopted.
    pub fn adopt_handle(&mut self, id: &str) -> bool {
        if self.handle.is_some() {
            return false;
        }
        tracing::debug!(conversation_id = id, "adopted conversation handle");
        self.handle = Some(ConversationHandle::new(id));
        true
    }

    /// The conversation handle, once the agent has assigned one.
    pub fn conversation_handle(&self) -> Option<&ConversationHandle> {
        self.handle.as_ref()
    }

    /// All turns in order.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The most recent turn.
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// The most recent assistant turn.
    pub fn last_assistant(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|turn| turn.role == Role::Assistant)
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns true if there are no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Forgets all turns and the conversation handle.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.handle = None;
        self.open = false;
    }

    /// A serializable snapshot of the transcript.
    pub fn to_file(&self) -> TranscriptFile {
        TranscriptFile {
            version: 1,
            conversation_id: self.handle.clone(),
            turns: self.turns.clone(),
        }
    }
}

/// On-disk form of a transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptFile {
    /// Format version.
    pub version: u8,
    /// The conversation handle, if one was assigned.
    pub conversation_id: Option<ConversationHandle>,
    /// All turns in order.
    pub turns: Vec<ConversationTurn>,
}
