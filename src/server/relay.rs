//! Re-emits an agent answer stream to a browser as server-sent events.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::sse::FrameStream;
use crate::types::StreamFrame;

/// What the browser sees for each upstream frame.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RelayFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl RelayFrame {
    /// The browser-facing part of `frame`, or `None` if it carries nothing.
    pub fn from_frame(frame: &StreamFrame) -> Option<Self> {
        let answer = frame.fragment().map(String::from);
        let conversation_id = frame.conversation_id().map(String::from);
        if answer.is_none() && conversation_id.is_none() {
            return None;
        }
        Some(Self {
            answer,
            conversation_id,
        })
    }
}

fn frame_event(frame: &RelayFrame) -> Event {
    Event::default().data(json!(frame).to_string())
}

fn error_event(err: &Error) -> Event {
    let message = if err.is_abort() {
        "answer cancelled"
    } else {
        "The assistant stopped responding. Please try again."
    };
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

/// Turns `frames` into SSE events.
///
/// The first error ends the stream with a single `error` event. `cancel` is
/// cancelled when the returned stream is dropped, which is how a browser
/// disconnect reaches the upstream request.
pub fn relay_events(
    frames: FrameStream,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    let guard = cancel.drop_guard();
    stream::unfold(Some((frames, guard)), |state| async move {
        let (mut frames, guard) = state?;
        match frames.next().await {
            Some(Ok(frame)) => {
                let event = RelayFrame::from_frame(&frame).map(|f| frame_event(&f));
                Some((event, Some((frames, guard))))
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "relayed answer failed");
                Some((Some(error_event(&err)), None))
            }
            None => None,
        }
    })
    .filter_map(|event| async move { event.map(Ok) })
}

/// Wraps relayed events in an SSE response with keep-alive comments.
pub(crate) fn relay_response(
    frames: FrameStream,
    cancel: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    Sse::new(relay_events(frames, cancel)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
