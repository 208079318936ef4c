//! Chat application module for conversations with the site's assistant.
//!
//! This module provides a streaming REPL chat interface built on top of the
//! [`Dify`](crate::Dify) client. It supports:
//!
//! - Streaming answers rendered fragment by fragment
//! - A conversation handle carried across turns
//! - Cancelling an answer mid-stream
//! - Slash commands for session control
//!
//! # Architecture
//!
//! - `config`: CLI argument parsing and configuration
//! - `session`: the exchange state machine and agent interaction
//! - `transcript`: turns and the conversation handle
//! - `commands`: Slash command parsing
//! - `render`: output surfaces

mod commands;
mod config;
mod render;
mod session;
mod transcript;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use render::{PlainTextRenderer, Renderer};
pub use session::{ChatSession, ExchangeOutcome, ExchangeState, SessionStats};
pub use transcript::{Transcript, TranscriptFile};
