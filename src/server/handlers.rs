//! HTTP request handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::AppState;
use super::relay::relay_response;
use crate::error::Error;
use crate::types::{ContactForm, ConversationHandle, EmailReceipt};

/// Create the API router
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/contact", post(submit_contact))
        .route("/api/chat", post(relay_chat))
        .with_state(state)
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

// ============================================================
// Contact form
// ============================================================

async fn submit_contact(
    State(state): State<AppState>,
    payload: Result<Json<ContactForm>, JsonRejection>,
) -> Result<Json<EmailReceipt>, AppError> {
    let Json(form) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    match state.contact.submit(form).await {
        Ok(receipt) => Ok(Json(receipt)),
        Err(Error::Validation { message, .. }) => Err(AppError::BadRequest(message)),
        Err(_) => Err(AppError::Internal("Failed to send message".to_string())),
    }
}

// ============================================================
// Chat relay
// ============================================================

async fn relay_chat(
    State(state): State<AppState>,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let Some(client) = state.chat.clone() else {
        return Err(AppError::Unavailable("Chat is not configured".to_string()));
    };
    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::BadRequest("query is required".to_string()));
    }
    let handle = request
        .conversation_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ConversationHandle::new);

    let cancel = CancellationToken::new();
    let frames = client
        .stream_chat(query, handle.as_ref(), &cancel)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "chat relay request failed");
            AppError::Upstream("The assistant is unavailable right now".to_string())
        })?;
    Ok(relay_response(frames, cancel).into_response())
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unavailable(String),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;

    use super::*;
    use crate::contact::{ContactConfig, ContactService, Mailer};
    use crate::types::EmailParams;

    #[derive(Default)]
    struct FakeMailer {
        sent: Mutex<Vec<EmailParams>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, email: EmailParams) -> crate::Result<EmailReceipt> {
            self.sent.lock().unwrap().push(email);
            if self.fail {
                Err(Error::connection("resend unreachable", None))
            } else {
                Ok(EmailReceipt {
                    id: "re_42".to_string(),
                })
            }
        }
    }

    fn app(mailer: Arc<FakeMailer>) -> Router {
        let contact = ContactService::new(mailer, ContactConfig::new("sales@example.com"));
        create_api_router(AppState::new(contact, None))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn contact_success_returns_receipt() {
        let mailer = Arc::new(FakeMailer::default());
        let response = app(mailer.clone())
            .oneshot(post_json(
                "/api/contact",
                r#"{"name":"Ada","email":"ada@example.com","message":"Hello"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], "re_42");
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn contact_validation_failure_is_400() {
        let mailer = Arc::new(FakeMailer::default());
        let response = app(mailer.clone())
            .oneshot(post_json("/api/contact", r#"{"name":"Ada","message":"Hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "email is required");
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn contact_malformed_json_is_400() {
        let response = app(Arc::new(FakeMailer::default()))
            .oneshot(post_json("/api/contact", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn contact_mailer_failure_is_500() {
        let mailer = Arc::new(FakeMailer {
            fail: true,
            ..FakeMailer::default()
        });
        let response = app(mailer)
            .oneshot(post_json(
                "/api/contact",
                r#"{"name":"Ada","email":"ada@example.com","message":"Hello"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Failed to send message");
    }

    #[tokio::test]
    async fn chat_without_agent_is_503() {
        let response = app(Arc::new(FakeMailer::default()))
            .oneshot(post_json("/api/chat", r#"{"query":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn base_path_prefixes_routes() {
        let contact = ContactService::new(
            Arc::new(FakeMailer::default()),
            ContactConfig::new("sales@example.com"),
        );
        let router = super::super::create_router(AppState::new(contact, None), "/mstech/");
        let response = router
            .clone()
            .oneshot(post_json("/mstech/api/chat", r#"{"query":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let response = router
            .oneshot(post_json("/api/chat", r#"{"query":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
