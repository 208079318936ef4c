use std::env;
use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS};
use crate::sse::{FrameStream, StreamPolicy, process_sse};
use crate::types::{ChatRequest, ConversationHandle};

const DEFAULT_API_URL: &str = "https://api.dify.ai/v1/";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The end-user identifier sent with every chat request unless overridden.
pub const DEFAULT_USER: &str = "mstech-user";

/// Environment variable holding the agent's API token.
pub const API_KEY_ENV: &str = "DIFY_API_KEY";

/// Client for a hosted conversational agent's `chat-messages` API.
///
/// No overall request timeout is applied because answers stream for as long
/// as the agent keeps talking; only establishing the connection is bounded.
#[derive(Clone)]
pub struct Dify {
    api_key: String,
    client: ReqwestClient,
    base_url: Url,
    connect_timeout: Duration,
    user: String,
    policy: StreamPolicy,
}

impl fmt::Debug for Dify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dify")
            .field("base_url", &self.base_url.as_str())
            .field("connect_timeout", &self.connect_timeout)
            .field("user", &self.user)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Dify {
    /// Create a new client.
    ///
    /// The API key can be provided directly or read from the DIFY_API_KEY
    /// environment variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new client with a custom endpoint or connect timeout.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_ENV).map_err(|_| {
                Error::authentication(format!(
                    "API key not provided and {API_KEY_ENV} environment variable not set"
                ))
            })?,
        };
        if api_key.trim().is_empty() {
            return Err(Error::authentication("API key is empty"));
        }

        let base_url = parse_base_url(base_url.as_deref().unwrap_or(DEFAULT_API_URL))?;
        let connect_timeout = connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            api_key,
            client,
            base_url,
            connect_timeout,
            user: DEFAULT_USER.to_string(),
            policy: StreamPolicy::default(),
        })
    }

    /// Sets the end-user identifier sent with each request.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets how tolerant stream reassembly is of unparsable records.
    pub fn with_stream_policy(mut self, policy: StreamPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The endpoint requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The end-user identifier sent with each request.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The stream reassembly policy.
    pub fn stream_policy(&self) -> StreamPolicy {
        self.policy
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::authentication("API key contains invalid header characters"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status = response.status();
        let status_code = status.as_u16();

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        // Dify reports failures as {"code": ..., "message": ..., "status": ...}
        #[derive(Deserialize)]
        struct ErrorResponse {
            code: Option<String>,
            message: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };

        let parsed_error = serde_json::from_str::<ErrorResponse>(&error_body).ok();
        let error_type = parsed_error.as_ref().and_then(|e| e.code.clone());
        let error_message = parsed_error
            .and_then(|e| e.message)
            .unwrap_or_else(|| match error_body.trim() {
                "" => status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
                body => body.to_string(),
            });

        match status_code {
            400 => Error::bad_request(error_message, error_type),
            401 => Error::authentication(error_message),
            429 => Error::rate_limit(error_message, retry_after),
            500 => Error::internal_server(error_message),
            502..=504 => Error::service_unavailable(error_message, retry_after),
            _ => Error::api(status_code, error_type, error_message),
        }
    }

    fn transport_error(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(format!("Request timed out: {e}"), None)
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    /// Send a query to the agent and get a streaming response.
    ///
    /// `conversation_id` continues an earlier dialogue; pass `None` to start a
    /// new one. Cancelling `cancel` aborts the request if it is still pending
    /// and ends the returned stream otherwise.
    ///
    /// # Errors
    ///
    /// Fails without producing a stream on transport errors, non-2xx
    /// responses, responses that declare an empty body, and cancellation
    /// before the response head arrives.
    pub async fn stream_chat(
        &self,
        query: &str,
        conversation_id: Option<&ConversationHandle>,
        cancel: &CancellationToken,
    ) -> Result<FrameStream> {
        let url = self.base_url.join("chat-messages")?;
        let request = ChatRequest::streaming(query, conversation_id.cloned(), &self.user);
        let headers = self.default_headers()?;

        CLIENT_REQUESTS.click();
        let started = Instant::now();
        tracing::debug!(
            url = %url,
            continued = conversation_id.is_some(),
            "sending chat request"
        );

        let pending = self.client.post(url).headers(headers).json(&request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = pending => Some(response),
        };
        let response = match response {
            Some(Ok(response)) => response,
            Some(Err(e)) => {
                CLIENT_REQUEST_ERRORS.click();
                return Err(Self::transport_error(e));
            }
            None => {
                CLIENT_REQUEST_ERRORS.click();
                return Err(Error::abort("chat request cancelled before a response arrived"));
            }
        };
        CLIENT_REQUEST_DURATION.add(started.elapsed().as_secs_f64());

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            let err = Self::process_error_response(response).await;
            tracing::debug!(error = %err, "chat request rejected");
            return Err(err);
        }

        if response.content_length() == Some(0) {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Error::missing_body(
                "agent answered without a response body",
            ));
        }

        // Get the byte stream from the response
        let stream = response.bytes_stream();

        Ok(Box::pin(process_sse(stream, self.policy, cancel.clone())))
    }
}

/// Parse a base URL, making sure relative joins keep its last path segment.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    let url = Url::parse(&raw)?;
    if url.cannot_be_a_base() {
        return Err(Error::url(format!("{raw} cannot be used as a base URL"), None));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Dify::new(Some("test-key".to_string())).unwrap();
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.base_url.as_str(), DEFAULT_API_URL);
        assert_eq!(client.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(client.user(), DEFAULT_USER);
        assert_eq!(client.stream_policy(), StreamPolicy::default());

        let client = Dify::with_options(
            Some("test-key".to_string()),
            Some("https://agent.example.com/v1".to_string()),
            Some(Duration::from_secs(3)),
        )
        .unwrap()
        .with_user("visitor-7")
        .with_stream_policy(StreamPolicy::new(2));
        assert_eq!(client.base_url.as_str(), "https://agent.example.com/v1/");
        assert_eq!(client.connect_timeout, Duration::from_secs(3));
        assert_eq!(client.user(), "visitor-7");
        assert_eq!(client.stream_policy(), StreamPolicy::new(2));
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = Dify::new(Some("  ".to_string())).unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = Dify::with_options(Some("k".to_string()), Some("not a url".to_string()), None)
            .unwrap_err();
        assert!(matches!(err, Error::Url { .. }));
    }

    #[test]
    fn base_url_join_keeps_version_segment() {
        let base = parse_base_url("https://api.dify.ai/v1").unwrap();
        assert_eq!(
            base.join("chat-messages").unwrap().as_str(),
            "https://api.dify.ai/v1/chat-messages"
        );
    }

    #[test]
    fn headers_carry_bearer_token() {
        let client = Dify::new(Some("app-123".to_string())).unwrap();
        let headers = client.default_headers().unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer app-123");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::ACCEPT], "text/event-stream");
    }

    #[test]
    fn debug_output_hides_the_key() {
        let client = Dify::new(Some("secret-token".to_string())).unwrap();
        assert!(!format!("{client:?}").contains("secret-token"));
    }

    #[tokio::test]
    async fn cancelled_before_sending() {
        // Unroutable address; the pre-cancelled token wins the race.
        let client = Dify::with_options(
            Some("k".to_string()),
            Some("http://10.255.255.1/v1/".to_string()),
            None,
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.stream_chat("hi", None, &cancel).await.err().unwrap();
        assert!(err.is_abort());
    }
}
