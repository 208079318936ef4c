//! Contact form delivery.
//!
//! A [`ContactService`] validates a submitted [`ContactForm`] and sends one
//! email per accepted submission through a [`Mailer`]. [`Resend`] is the
//! production mailer.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{CONTACT_FAILURES, CONTACT_REJECTED, CONTACT_SUBMISSIONS};
use crate::types::{ContactForm, EmailParams, EmailReceipt};

const DEFAULT_RESEND_URL: &str = "https://api.resend.com/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable holding the Resend API key.
pub const RESEND_API_KEY_ENV: &str = "RESEND_API_KEY";

/// Environment variable naming the recipient of contact emails.
pub const CONTACT_TO_ENV: &str = "MSTECH_CONTACT_TO";

/// Environment variable naming the sender of contact emails.
pub const CONTACT_FROM_ENV: &str = "MSTECH_CONTACT_FROM";

/// Sender used when none is configured.
pub const DEFAULT_FROM: &str = "MSTech <onboarding@resend.dev>";

/// Something that can deliver one email.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send `email`, returning the provider's receipt.
    async fn send(&self, email: EmailParams) -> Result<EmailReceipt>;
}

#[async_trait]
impl<T: Mailer + ?Sized> Mailer for Arc<T> {
    async fn send(&self, email: EmailParams) -> Result<EmailReceipt> {
        (**self).send(email).await
    }
}

/// Client for the Resend transactional email API.
#[derive(Clone)]
pub struct Resend {
    api_key: String,
    client: ReqwestClient,
    base_url: Url,
}

impl fmt::Debug for Resend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resend")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl Resend {
    /// Create a new client.
    ///
    /// The API key can be provided directly or read from the RESEND_API_KEY
    /// environment variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_base_url(api_key, None)
    }

    /// Create a new client that talks to a custom endpoint.
    pub fn with_base_url(api_key: Option<String>, base_url: Option<String>) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(RESEND_API_KEY_ENV).map_err(|_| {
                Error::authentication(format!(
                    "API key not provided and {RESEND_API_KEY_ENV} environment variable not set"
                ))
            })?,
        };
        if api_key.trim().is_empty() {
            return Err(Error::authentication("API key is empty"));
        }

        let mut raw = base_url.unwrap_or_else(|| DEFAULT_RESEND_URL.to_string());
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)?;

        let client = ReqwestClient::builder()
            .timeout(DEFAULT_TIMEOUT)
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
        })
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::authentication("API key contains invalid header characters"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        // Resend reports failures as {"statusCode": ..., "name": ..., "message": ...}
        #[derive(Deserialize)]
        struct ErrorResponse {
            name: Option<String>,
            message: Option<String>,
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => Error::api(
                status_code,
                parsed.name,
                parsed.message.unwrap_or_else(|| "email rejected".to_string()),
            ),
            Err(_) => Error::api(status_code, None, body),
        }
    }
}

#[async_trait]
impl Mailer for Resend {
    async fn send(&self, email: EmailParams) -> Result<EmailReceipt> {
        let url = self.base_url.join("emails")?;
        let response = self
            .client
            .post(url)
            .headers(self.default_headers()?)
            .json(&email)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("Email request timed out: {e}"), None)
                } else {
                    Error::connection(format!("Email request failed: {e}"), Some(Box::new(e)))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        response.json::<EmailReceipt>().await.map_err(|e| {
            Error::serialization("failed to parse email receipt", Some(Box::new(e)))
        })
    }
}

/// Where contact emails go and who they come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactConfig {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
}

impl ContactConfig {
    /// Creates a configuration that delivers to `to` from the default sender.
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            from: DEFAULT_FROM.to_string(),
            to: vec![to.into()],
        }
    }

    /// Sets the sender address.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Reads the configuration from `MSTECH_CONTACT_TO` and `MSTECH_CONTACT_FROM`.
    ///
    /// The recipient variable may list several addresses separated by commas.
    pub fn from_env() -> Result<Self> {
        let to = env::var(CONTACT_TO_ENV).map_err(|_| {
            Error::validation(
                format!("{CONTACT_TO_ENV} environment variable not set"),
                Some("to".to_string()),
            )
        })?;
        let mut config = Self::from_recipients(&to)?;
        if let Ok(from) = env::var(CONTACT_FROM_ENV)
            && !from.trim().is_empty()
        {
            config.from = from.trim().to_string();
        }
        Ok(config)
    }

    /// Builds a configuration from a comma-separated recipient list.
    pub fn from_recipients(list: &str) -> Result<Self> {
        let to: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if to.is_empty() {
            return Err(Error::validation(
                "at least one contact recipient is required",
                Some("to".to_string()),
            ));
        }
        Ok(Self {
            from: DEFAULT_FROM.to_string(),
            to,
        })
    }

    /// The email that delivers `form`.
    pub fn email_for(&self, form: &ContactForm) -> EmailParams {
        EmailParams {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: format!("New Contact Form Submission from {}", form.name),
            text: format!(
                "Name: {}\nEmail: {}\nMessage: {}",
                form.name, form.email, form.message
            ),
            reply_to: Some(form.email.clone()),
        }
    }
}

/// Validates contact submissions and mails the accepted ones.
pub struct ContactService {
    mailer: Arc<dyn Mailer>,
    config: ContactConfig,
}

impl ContactService {
    /// Creates a service that sends through `mailer`.
    pub fn new(mailer: Arc<dyn Mailer>, config: ContactConfig) -> Self {
        Self { mailer, config }
    }

    /// The delivery configuration.
    pub fn config(&self) -> &ContactConfig {
        &self.config
    }

    /// Validates `form` and sends exactly one email for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] without sending anything if the form is
    /// incomplete or malformed, and the mailer's error if delivery fails.
    pub async fn submit(&self, form: ContactForm) -> Result<EmailReceipt> {
        CONTACT_SUBMISSIONS.click();
        let form = form.trimmed();
        if let Err(err) = form.validate() {
            CONTACT_REJECTED.click();
            tracing::info!(error = %err, "contact submission rejected");
            return Err(err);
        }

        let email = self.config.email_for(&form);
        match self.mailer.send(email).await {
            Ok(receipt) => {
                tracing::info!(id = %receipt.id, "contact email sent");
                Ok(receipt)
            }
            Err(err) => {
                CONTACT_FAILURES.click();
                tracing::error!(error = %err, "contact email failed");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for ContactService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FakeMailer {
        sent: Mutex<Vec<EmailParams>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, email: EmailParams) -> Result<EmailReceipt> {
            self.sent.lock().unwrap().push(email);
            if self.fail {
                Err(Error::api(422, Some("validation_error".to_string()), "bad sender"))
            } else {
                Ok(EmailReceipt {
                    id: "email-1".to_string(),
                })
            }
        }
    }

    fn form() -> ContactForm {
        ContactForm::new("Ada", "ada@example.com", "Please call me back.")
    }

    #[tokio::test]
    async fn accepted_form_sends_one_email() {
        let mailer = Arc::new(FakeMailer::default());
        let service = ContactService::new(mailer.clone(), ContactConfig::new("sales@example.com"));
        let receipt = service.submit(form()).await.unwrap();
        assert_eq!(receipt.id, "email-1");

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, DEFAULT_FROM);
        assert_eq!(sent[0].to, vec!["sales@example.com".to_string()]);
        assert_eq!(sent[0].subject, "New Contact Form Submission from Ada");
        assert_eq!(
            sent[0].text,
            "Name: Ada\nEmail: ada@example.com\nMessage: Please call me back."
        );
        assert_eq!(sent[0].reply_to.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn invalid_form_sends_nothing() {
        let mailer = Arc::new(FakeMailer::default());
        let service = ContactService::new(mailer.clone(), ContactConfig::new("sales@example.com"));
        let err = service
            .submit(ContactForm::new("Ada", "not-an-email", "hi"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mailer_failure_is_returned() {
        let mailer = Arc::new(FakeMailer {
            fail: true,
            ..FakeMailer::default()
        });
        let service = ContactService::new(mailer.clone(), ContactConfig::new("sales@example.com"));
        let err = service.submit(form()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(422));
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn recipients_are_split_on_commas() {
        let config = ContactConfig::from_recipients("a@example.com, b@example.com,")
            .unwrap()
            .with_from("Site <site@example.com>");
        assert_eq!(config.to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(config.from, "Site <site@example.com>");
        assert!(ContactConfig::from_recipients(" , ").unwrap_err().is_validation());
    }

    #[test]
    fn resend_requires_a_key() {
        assert!(Resend::new(Some(String::new())).unwrap_err().is_authentication());
        let resend = Resend::new(Some("re_123".to_string())).unwrap();
        assert_eq!(resend.base_url.as_str(), DEFAULT_RESEND_URL);
        assert!(!format!("{resend:?}").contains("re_123"));
    }
}
