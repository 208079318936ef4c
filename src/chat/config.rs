//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use std::path::PathBuf;

use arrrg_derive::CommandLine;

use crate::client::DEFAULT_USER;
use crate::sse::{DEFAULT_MAX_CONSECUTIVE_INVALID, StreamPolicy};

/// Command-line arguments for the mstech-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Agent API endpoint.
    #[arrrg(optional, "Agent API base URL (default: https://api.dify.ai/v1/)", "URL")]
    pub base_url: Option<String>,

    /// End-user identifier sent with each request.
    #[arrrg(optional, "User identifier sent to the agent (default: mstech-user)", "USER")]
    pub user: Option<String>,

    /// Consecutive unparsable records tolerated per answer.
    #[arrrg(optional, "Abort after N consecutive bad records, 0 = never (default: 8)", "N")]
    pub max_invalid_records: Option<u32>,

    /// Transcript auto-save path.
    #[arrrg(optional, "Save the transcript here after every answer", "PATH")]
    pub transcript: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Agent endpoint; `None` uses the client default.
    pub base_url: Option<String>,

    /// End-user identifier sent with each request.
    pub user: String,

    /// Consecutive unparsable records tolerated per answer; zero disables the bound.
    pub max_invalid_records: usize,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Path to persist transcripts automatically after each completed answer.
    pub transcript_path: Option<PathBuf>,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    pub fn new() -> Self {
        Self {
            base_url: None,
            user: DEFAULT_USER.to_string(),
            max_invalid_records: DEFAULT_MAX_CONSECUTIVE_INVALID,
            use_color: true,
            transcript_path: None,
        }
    }

    /// Sets the agent endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the end-user identifier.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the consecutive unparsable record bound.
    pub fn with_max_invalid_records(mut self, max: usize) -> Self {
        self.max_invalid_records = max;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the transcript auto-save path.
    pub fn with_transcript_path(mut self, path: Option<PathBuf>) -> Self {
        self.transcript_path = path;
        self
    }

    /// The stream policy implied by this configuration.
    pub fn stream_policy(&self) -> StreamPolicy {
        StreamPolicy::new(self.max_invalid_records)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let defaults = ChatConfig::new();
        ChatConfig {
            base_url: args.base_url,
            user: args.user.unwrap_or(defaults.user),
            max_invalid_records: args
                .max_invalid_records
                .map(|max| max as usize)
                .unwrap_or(defaults.max_invalid_records),
            use_color: !args.no_color,
            transcript_path: args.transcript.map(PathBuf::from),
        }
    }
}
