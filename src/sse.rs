//! Server-Sent Events (SSE) processing for the agent's streaming answers.
//!
//! The agent delivers its reply as `data: <json>` records separated by blank
//! lines. HTTP chunk boundaries bear no relation to record boundaries: a
//! record, or a single multi-byte character, may arrive split across chunks.
//! [`SseCodec`] therefore keeps one persistent byte buffer for the whole
//! stream and only releases records once their terminating blank line has
//! been seen. [`process_sse`] turns the released records into
//! [`StreamFrame`]s.

use std::error;
use std::pin::Pin;

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_RECORDS, STREAM_SKIPPED_RECORDS};
use crate::{Error, Result, StreamFrame};

/// Consecutive unparsable records tolerated before the stream is declared broken.
pub const DEFAULT_MAX_CONSECUTIVE_INVALID: usize = 8;

/// Largest record, in bytes, buffered while waiting for its delimiter.
pub const DEFAULT_MAX_RECORD_LEN: usize = 1 << 20;

/// A boxed stream of parsed frames, as returned by the chat client.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame>> + Send>>;

/// How tolerant the reassembler is of garbage on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPolicy {
    /// Abort after this many unparsable records in a row; zero disables the bound.
    pub max_consecutive_invalid: usize,
    /// Abort once this many bytes are buffered without a delimiter; zero disables the bound.
    pub max_record_len: usize,
}

impl StreamPolicy {
    /// A policy that aborts after `max` consecutive unparsable records.
    pub fn new(max_consecutive_invalid: usize) -> Self {
        Self {
            max_consecutive_invalid,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }

    /// Sets the largest record the reassembler will buffer.
    pub fn with_max_record_len(mut self, max_record_len: usize) -> Self {
        self.max_record_len = max_record_len;
        self
    }
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONSECUTIVE_INVALID)
    }
}

/// The fields of one SSE record that matter here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseRecord {
    /// Value of the last `event:` line, if any.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`; `None` when the record had none.
    pub data: Option<String>,
}

impl SseRecord {
    /// Parse the text of one complete record (without its terminating blank line).
    pub fn parse(text: &str) -> Self {
        let mut record = SseRecord::default();
        for line in text.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => match record.data.as_mut() {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => record.data = Some(value.to_string()),
                },
                "event" => record.event = Some(value.to_string()),
                _ => {}
            }
        }
        record
    }
}

/// A [`Decoder`] that splits a byte stream into raw SSE records.
///
/// Records are delimited by `\n\n` or `\r\n\r\n`. Bytes after the last
/// delimiter stay in the caller's buffer until more input arrives. Each call
/// only scans the bytes added since the previous one, so a record that
/// trickles in over many chunks is scanned once.
#[derive(Debug, Clone)]
pub struct SseCodec {
    /// Offset into the buffer up to which no delimiter starts.
    next_index: usize,
    max_record_len: usize,
}

impl SseCodec {
    /// Create a codec that buffers at most [`DEFAULT_MAX_RECORD_LEN`] bytes per record.
    pub fn new() -> Self {
        Self::with_max_record_len(DEFAULT_MAX_RECORD_LEN)
    }

    /// Create a codec with a record size limit; zero means unbounded.
    pub fn with_max_record_len(max_record_len: usize) -> Self {
        Self {
            next_index: 0,
            max_record_len,
        }
    }
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the first record delimiter, returning its offset and length.
fn find_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

impl Decoder for SseCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        // Back up far enough to catch a `\r\n\r\n` cut by the last chunk.
        let start = self.next_index.saturating_sub(3).min(src.len());
        match find_delimiter(&src[start..]) {
            Some((offset, delimiter)) => {
                self.next_index = 0;
                let record = src.split_to(start + offset).freeze();
                src.advance(delimiter);
                Ok(Some(record))
            }
            None if self.max_record_len > 0 && src.len() > self.max_record_len => {
                Err(Error::streaming(
                    format!(
                        "stream record exceeds {} bytes without a delimiter",
                        self.max_record_len
                    ),
                    None,
                ))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(record) = self.decode(src)? {
            return Ok(Some(record));
        }
        self.next_index = 0;
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        // The server closed without a final blank line.
        Ok(Some(src.split().freeze()))
    }
}

/// What to do with one raw record.
enum Step {
    Frame(StreamFrame),
    Skip,
    Fail(Error),
}

struct Reassembly<S> {
    stream: Pin<Box<S>>,
    codec: SseCodec,
    buffer: BytesMut,
    policy: StreamPolicy,
    cancel: CancellationToken,
    invalid_run: usize,
    eof: bool,
    finished: bool,
}

impl<S> Reassembly<S> {
    fn interpret(&mut self, raw: Bytes) -> Step {
        let text = match std::str::from_utf8(&raw) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "skipping stream record with invalid UTF-8");
                return self.invalid();
            }
        };
        let record = SseRecord::parse(text);
        let Some(data) = record.data else {
            // pings and comments
            return Step::Skip;
        };
        match serde_json::from_str::<StreamFrame>(&data) {
            Ok(mut frame) => {
                self.invalid_run = 0;
                if frame.event.is_none() {
                    frame.event = record.event;
                }
                if frame.is_error() {
                    return Step::Fail(frame.to_error());
                }
                STREAM_RECORDS.click();
                Step::Frame(frame)
            }
            Err(err) => {
                tracing::warn!(error = %err, record = %data, "skipping unparsable stream record");
                self.invalid()
            }
        }
    }

    fn invalid(&mut self) -> Step {
        STREAM_SKIPPED_RECORDS.click();
        self.invalid_run += 1;
        let max = self.policy.max_consecutive_invalid;
        if max > 0 && self.invalid_run >= max {
            Step::Fail(Error::streaming(
                format!("stream looks corrupted: {max} consecutive unparsable records"),
                None,
            ))
        } else {
            Step::Skip
        }
    }

    fn fail(mut self, err: Error) -> Option<(Result<StreamFrame>, Self)> {
        STREAM_ERRORS.click();
        self.finished = true;
        Some((Err(err), self))
    }
}

/// Process a stream of bytes into a stream of parsed frames.
///
/// Unparsable records are logged and skipped, subject to `policy`. An
/// `error` record, a transport failure, or cancellation of `cancel` yields
/// one `Err` and ends the stream.
pub fn process_sse<S, E>(
    byte_stream: S,
    policy: StreamPolicy,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamFrame>>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: error::Error + Send + Sync + 'static,
{
    let state = Reassembly {
        stream: Box::pin(byte_stream),
        codec: SseCodec::with_max_record_len(policy.max_record_len),
        buffer: BytesMut::new(),
        policy,
        cancel,
        invalid_run: 0,
        eof: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            // First check if we have a complete record in the buffer
            let next = if state.eof {
                state.codec.decode_eof(&mut state.buffer)
            } else {
                state.codec.decode(&mut state.buffer)
            };
            match next {
                Ok(Some(raw)) => match state.interpret(raw) {
                    Step::Frame(frame) => return Some((Ok(frame), state)),
                    Step::Skip => continue,
                    Step::Fail(err) => return state.fail(err),
                },
                Ok(None) if state.eof => return None,
                Ok(None) => {}
                Err(err) => return state.fail(err),
            }

            // Read more data
            let chunk = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => None,
                chunk = state.stream.next() => Some(chunk),
            };
            let Some(chunk) = chunk else {
                return state.fail(Error::abort("stream cancelled by the client"));
            };
            match chunk {
                Some(Ok(bytes)) => {
                    STREAM_BYTES.count(bytes.len() as u64);
                    state.buffer.extend_from_slice(&bytes);
                }
                Some(Err(err)) => {
                    return state.fail(Error::streaming(
                        format!("Error in HTTP stream: {err}"),
                        Some(Box::new(err)),
                    ));
                }
                None => state.eof = true,
            }
        }
    })
}
