//! A stand-in for the agent's `chat-messages` endpoint.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use mstech::chat::Renderer;

/// One canned answer.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub chunks: Vec<Vec<u8>>,
    pub error_body: String,
    /// Keep the connection open after the last chunk.
    pub stall: bool,
}

impl Reply {
    pub fn sse<S: AsRef<str>>(chunks: &[S]) -> Self {
        Self::bytes(chunks.iter().map(|c| c.as_ref().as_bytes().to_vec()).collect())
    }

    pub fn bytes(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::OK,
            chunks,
            error_body: String::new(),
            stall: false,
        }
    }

    pub fn status(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            chunks: Vec::new(),
            error_body: body.to_string(),
            stall: false,
        }
    }

    pub fn empty() -> Self {
        Self::status(StatusCode::OK, "")
    }

    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Default)]
pub struct MockAgent {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockAgent {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn chat_messages(
    State(mock): State<Arc<MockAgent>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.requests.lock().unwrap().push(Recorded { headers, body });
    let reply = mock
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Reply::sse::<&str>(&[]));

    if reply.chunks.is_empty() && !reply.stall {
        return (reply.status, reply.error_body).into_response();
    }

    let chunks = stream::iter(reply.chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, Infallible>(Bytes::from(chunk))
    });
    let body = if reply.stall {
        Body::from_stream(chunks.chain(stream::pending()))
    } else {
        Body::from_stream(chunks)
    };
    Response::builder()
        .status(reply.status)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap()
}

/// Serves `mock` on an ephemeral port and returns its `/v1` base URL.
pub async fn spawn_agent(mock: Arc<MockAgent>) -> String {
    let app = Router::new()
        .route("/v1/chat-messages", post(chat_messages))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

/// Collects everything the session reports.
#[derive(Default)]
pub struct RecordingRenderer {
    pub text: String,
    pub errors: Vec<String>,
    pub info: Vec<String>,
    pub finished: usize,
    pub interrupted: usize,
    /// Cancelled as soon as the first fragment is printed.
    pub cancel_on_text: Option<CancellationToken>,
}

impl Renderer for RecordingRenderer {
    fn print_text(&mut self, text: &str) {
        self.text.push_str(text);
        if let Some(cancel) = &self.cancel_on_text {
            cancel.cancel();
        }
    }

    fn print_error(&mut self, error: &str) {
        self.errors.push(error.to_string());
    }

    fn print_info(&mut self, info: &str) {
        self.info.push(info.to_string());
    }

    fn finish_response(&mut self) {
        self.finished += 1;
    }

    fn print_interrupted(&mut self) {
        self.interrupted += 1;
    }
}
