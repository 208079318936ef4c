//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which owns the transcript,
//! the conversation handle and the exchange state machine, and drives one
//! streaming exchange at a time.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::StreamExt;
use serde_json::to_writer_pretty;
use tokio_util::sync::CancellationToken;

use crate::chat::config::ChatConfig;
use crate::chat::render::Renderer;
use crate::chat::transcript::Transcript;
use crate::client::Dify;
use crate::error::{Error, Result};
use crate::observability::{CHAT_EXCHANGE_DURATION, CHAT_EXCHANGE_FAILURES, CHAT_EXCHANGES};
use crate::types::ConversationHandle;

/// Where the current exchange is.
///
/// `Idle → Sending → Streaming → {Completed | Failed} → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    /// Ready for the next submission.
    #[default]
    Idle,
    /// The request is in flight; no usable response yet.
    Sending,
    /// A 2xx response with a body arrived; fragments are being applied.
    Streaming,
    /// The stream ended normally.
    Completed,
    /// The exchange failed or was cancelled.
    Failed,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Idle => "idle",
            ExchangeState::Sending => "sending",
            ExchangeState::Streaming => "streaming",
            ExchangeState::Completed => "completed",
            ExchangeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The answer streamed to completion.
    Completed {
        /// Fragments applied to the transcript.
        fragments: usize,
    },
    /// The exchange failed; any partial answer stays in the transcript.
    Failed {
        /// Fragments applied before the failure.
        fragments: usize,
        /// The underlying error, for logs and `/stats`.
        reason: String,
    },
    /// The exchange was cancelled by the user.
    Cancelled {
        /// Fragments applied before cancellation.
        fragments: usize,
    },
}

impl ExchangeOutcome {
    /// Returns true if the answer streamed to completion.
    pub fn is_completed(&self) -> bool {
        matches!(self, ExchangeOutcome::Completed { .. })
    }

    /// Fragments applied during the exchange.
    pub fn fragments(&self) -> usize {
        match self {
            ExchangeOutcome::Completed { fragments }
            | ExchangeOutcome::Failed { fragments, .. }
            | ExchangeOutcome::Cancelled { fragments } => *fragments,
        }
    }
}

/// Aggregated stats for a chat session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// The endpoint requests are sent to.
    pub base_url: String,
    /// The end-user identifier sent with each request.
    pub user: String,
    /// The conversation handle, if one was assigned.
    pub conversation_id: Option<String>,
    /// Number of turns in the transcript.
    pub turn_count: usize,
    /// Exchanges started.
    pub exchanges: u64,
    /// Exchanges that failed.
    pub failed_exchanges: u64,
    /// Exchanges cancelled by the user.
    pub cancelled_exchanges: u64,
    /// Fragments received across all exchanges.
    pub fragments: u64,
    /// The auto-save transcript path, if set.
    pub transcript_path: Option<PathBuf>,
    /// How the most recent exchange ended.
    pub last_exchange: Option<ExchangeOutcome>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    exchanges: u64,
    failed: u64,
    cancelled: u64,
    fragments: u64,
}

/// A chat session that manages conversation state and agent interactions.
pub struct ChatSession {
    client: Dify,
    config: ChatConfig,
    transcript: Transcript,
    state: ExchangeState,
    last_exchange: Option<ExchangeOutcome>,
    counts: Counts,
}

impl ChatSession {
    /// Creates a new chat session with the given client and configuration.
    pub fn new(client: Dify, config: ChatConfig) -> Self {
        Self {
            client,
            config,
            transcript: Transcript::new(),
            state: ExchangeState::Idle,
            last_exchange: None,
            counts: Counts::default(),
        }
    }

    /// Creates a session whose client is built from the configuration.
    ///
    /// The API key comes from the environment.
    pub fn from_config(config: ChatConfig) -> Result<Self> {
        let client = Dify::with_options(None, config.base_url.clone(), None)?
            .with_user(config.user.clone())
            .with_stream_policy(config.stream_policy());
        Ok(Self::new(client, config))
    }

    /// Sends a user message and streams the answer.
    ///
    /// The user turn is recorded, the request is sent, and each fragment is
    /// appended to the assistant turn and handed to the renderer as it
    /// arrives. Whatever happens, the assistant turn is closed and the
    /// session returns to [`ExchangeState::Idle`] before this returns.
    ///
    /// Failures are reported to the renderer exactly once and returned as
    /// [`ExchangeOutcome::Failed`]; cancelling `cancel` yields
    /// [`ExchangeOutcome::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if an exchange is already in progress. The
    /// transcript is not touched in that case.
    pub async fn send_streaming(
        &mut self,
        user_input: &str,
        renderer: &mut dyn Renderer,
        cancel: CancellationToken,
    ) -> Result<ExchangeOutcome> {
        if self.state != ExchangeState::Idle || self.transcript.is_open() {
            return Err(Error::busy("an answer is still streaming"));
        }

        CHAT_EXCHANGES.click();
        self.counts.exchanges += 1;
        let started = Instant::now();

        let mut exchange = Exchange::begin(&mut self.state, &mut self.transcript);
        exchange.transcript.push_user(user_input);

        let mut fragments = 0;
        let result = run_exchange(
            &self.client,
            &mut exchange,
            user_input,
            renderer,
            &cancel,
            &mut fragments,
        )
        .await;

        let outcome = match result {
            Ok(()) => {
                exchange.enter(ExchangeState::Completed);
                renderer.finish_response();
                ExchangeOutcome::Completed { fragments }
            }
            Err(err) if err.is_abort() => {
                exchange.enter(ExchangeState::Failed);
                tracing::debug!(fragments, "exchange cancelled");
                renderer.print_interrupted();
                ExchangeOutcome::Cancelled { fragments }
            }
            Err(err) => {
                exchange.enter(ExchangeState::Failed);
                CHAT_EXCHANGE_FAILURES.click();
                tracing::warn!(error = %err, fragments, "exchange failed");
                renderer.print_error(notification_for(&err));
                ExchangeOutcome::Failed {
                    fragments,
                    reason: err.to_string(),
                }
            }
        };
        drop(exchange);

        CHAT_EXCHANGE_DURATION.add(started.elapsed().as_secs_f64());
        self.counts.fragments += fragments as u64;
        match &outcome {
            ExchangeOutcome::Completed { .. } => {
                if let Err(err) = self.auto_save_transcript() {
                    tracing::warn!(error = %err, "transcript auto-save failed");
                    renderer.print_info(&format!("Transcript not saved: {err}"));
                }
            }
            ExchangeOutcome::Failed { .. } => self.counts.failed += 1,
            ExchangeOutcome::Cancelled { .. } => self.counts.cancelled += 1,
        }
        self.last_exchange = Some(outcome.clone());
        Ok(outcome)
    }

    /// Starts over: forgets the transcript and the conversation handle.
    pub fn reset(&mut self) {
        self.transcript.reset();
        self.last_exchange = None;
    }

    /// The current exchange state.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Returns true while an exchange is in flight.
    pub fn is_loading(&self) -> bool {
        self.state != ExchangeState::Idle
    }

    /// The transcript so far.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The conversation handle, once the agent has assigned one.
    pub fn conversation_handle(&self) -> Option<&ConversationHandle> {
        self.transcript.conversation_handle()
    }

    /// How the most recent exchange ended.
    pub fn last_exchange(&self) -> Option<&ExchangeOutcome> {
        self.last_exchange.as_ref()
    }

    /// The active configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Returns the configured transcript path, if any.
    pub fn transcript_path(&self) -> Option<&Path> {
        self.config.transcript_path.as_deref()
    }

    /// Saves the transcript to the specified path.
    pub fn save_transcript_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())
            .map_err(|err| Error::io("failed to create transcript file", err))?;
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, &self.transcript.to_file()).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            base_url: self.client.base_url().to_string(),
            user: self.client.user().to_string(),
            conversation_id: self.conversation_handle().map(|h| h.to_string()),
            turn_count: self.transcript.len(),
            exchanges: self.counts.exchanges,
            failed_exchanges: self.counts.failed,
            cancelled_exchanges: self.counts.cancelled,
            fragments: self.counts.fragments,
            transcript_path: self.config.transcript_path.clone(),
            last_exchange: self.last_exchange.clone(),
        }
    }

    fn auto_save_transcript(&self) -> Result<()> {
        if let Some(path) = &self.config.transcript_path {
            self.save_transcript_to(path)
        } else {
            Ok(())
        }
    }
}

/// Guard over one exchange.
///
/// Dropping it closes the assistant turn and puts the session back to
/// `Idle`, on every path including early returns and cancelled futures.
struct Exchange<'a> {
    state: &'a mut ExchangeState,
    transcript: &'a mut Transcript,
}

impl<'a> Exchange<'a> {
    fn begin(state: &'a mut ExchangeState, transcript: &'a mut Transcript) -> Self {
        let mut exchange = Self { state, transcript };
        exchange.enter(ExchangeState::Sending);
        exchange
    }

    fn enter(&mut self, next: ExchangeState) {
        tracing::debug!(from = %self.state, to = %next, "exchange state");
        *self.state = next;
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        self.transcript.close_assistant_turn();
        *self.state = ExchangeState::Idle;
    }
}

async fn run_exchange(
    client: &Dify,
    exchange: &mut Exchange<'_>,
    query: &str,
    renderer: &mut dyn Renderer,
    cancel: &CancellationToken,
    fragments: &mut usize,
) -> Result<()> {
    let handle = exchange.transcript.conversation_handle().cloned();
    let mut frames = client.stream_chat(query, handle.as_ref(), cancel).await?;
    exchange.enter(ExchangeState::Streaming);

    while let Some(frame) = frames.next().await {
        let frame = frame?;
        if let Some(fragment) = exchange.transcript.apply_frame(&frame) {
            renderer.print_text(fragment);
            *fragments += 1;
        }
    }
    Ok(())
}

/// The user-facing message for a failed exchange.
fn notification_for(err: &Error) -> &'static str {
    match err {
        Error::Connection { .. } | Error::Timeout { .. } | Error::HttpClient { .. } => {
            "Could not reach the assistant. Please try again."
        }
        Error::Streaming { .. } => {
            "The answer was interrupted. Please try again."
        }
        _ => "The assistant is unavailable right now. Please try again.",
    }
}
