//! HTTP service for the marketing site.
//!
//! Exposes the contact form and a streaming chat relay that keeps the
//! agent's API token on the server:
//!
//! - `POST {base}/api/contact`
//! - `POST {base}/api/chat`

mod handlers;
mod relay;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrrg_derive::CommandLine;
use axum::Router;

use crate::client::Dify;
use crate::contact::{ContactConfig, ContactService};
use crate::error::{Error, Result};

pub use handlers::{ErrorResponse, RelayRequest, create_api_router};
pub use relay::{RelayFrame, relay_events};

/// Base path the routes are mounted under unless configured otherwise.
pub const DEFAULT_BASE_PATH: &str = "/mstech";

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8000;

/// Host the server binds unless configured otherwise.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Period between biometrics readings when a metrics file is configured.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Contact form delivery.
    pub contact: Arc<ContactService>,
    /// The agent client; `None` disables the chat relay.
    pub chat: Option<Arc<Dify>>,
}

impl AppState {
    /// Creates state with the given contact service and optional agent client.
    pub fn new(contact: ContactService, chat: Option<Dify>) -> Self {
        Self {
            contact: Arc::new(contact),
            chat: chat.map(Arc::new),
        }
    }
}

/// Command-line arguments for the mstech-server tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ServerArgs {
    #[arrrg(optional, "Address to bind (default: 127.0.0.1)", "HOST")]
    pub host: Option<String>,

    #[arrrg(optional, "Port to listen on (default: 8000)", "PORT")]
    pub port: Option<u16>,

    #[arrrg(optional, "Path prefix for all routes (default: /mstech)", "PATH")]
    pub base_path: Option<String>,

    #[arrrg(optional, "Agent API base URL (default: https://api.dify.ai/v1/)", "URL")]
    pub dify_base_url: Option<String>,

    #[arrrg(optional, "Comma-separated contact recipients (default: $MSTECH_CONTACT_TO)", "ADDR")]
    pub contact_to: Option<String>,

    #[arrrg(optional, "Contact sender (default: $MSTECH_CONTACT_FROM)", "ADDR")]
    pub contact_from: Option<String>,

    #[arrrg(optional, "Append biometrics readings to this file", "PATH")]
    pub metrics_file: Option<String>,

    #[arrrg(optional, "Seconds between biometrics readings (default: 60)", "SECS")]
    pub metrics_interval: Option<u64>,
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Normalized: empty, or a leading slash and no trailing slash.
    pub base_path: String,
    pub dify_base_url: Option<String>,
    pub contact_to: Option<String>,
    pub contact_from: Option<String>,
    /// Where biometrics are emitted; `None` disables emission.
    pub metrics_file: Option<PathBuf>,
    pub metrics_interval: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            base_path: DEFAULT_BASE_PATH.to_string(),
            dify_base_url: None,
            contact_to: None,
            contact_from: None,
            metrics_file: None,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
        }
    }

    /// The socket address to bind.
    ///
    /// The host may be an IPv4 or IPv6 literal, optionally bracketed, or
    /// `localhost`.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let host = self.host.trim();
        let ip = if host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            let bare = host
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .unwrap_or(host);
            bare.parse::<IpAddr>().map_err(|_| {
                Error::validation(
                    format!("{host} is not a valid listen address"),
                    Some("host".to_string()),
                )
            })?
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Contact delivery settings; flags take precedence over the environment.
    pub fn contact_config(&self) -> Result<ContactConfig> {
        let config = match &self.contact_to {
            Some(list) => ContactConfig::from_recipients(list)?,
            None => ContactConfig::from_env()?,
        };
        Ok(match &self.contact_from {
            Some(from) => config.with_from(from.clone()),
            None => config,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        let defaults = ServerConfig::new();
        ServerConfig {
            host: args.host.unwrap_or(defaults.host),
            port: args.port.unwrap_or(defaults.port),
            base_path: normalize_base_path(args.base_path.as_deref().unwrap_or(DEFAULT_BASE_PATH)),
            dify_base_url: args.dify_base_url,
            contact_to: args.contact_to,
            contact_from: args.contact_from,
            metrics_file: args.metrics_file.map(PathBuf::from),
            metrics_interval: args
                .metrics_interval
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.metrics_interval),
        }
    }
}

/// Normalizes a route prefix to `""` or `/segment[/segment...]`.
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Create the application router, mounted under `base_path`.
pub fn create_router(state: AppState, base_path: &str) -> Router {
    let api = create_api_router(state);
    let base_path = normalize_base_path(base_path);
    if base_path.is_empty() {
        api
    } else {
        Router::new().nest(&base_path, api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_paths_are_normalized() {
        assert_eq!(normalize_base_path("/mstech"), "/mstech");
        assert_eq!(normalize_base_path("mstech/"), "/mstech");
        assert_eq!(normalize_base_path(" /a/b/ "), "/a/b");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path(""), "");
    }

    #[test]
    fn config_from_args_defaults() {
        let config = ServerConfig::from(ServerArgs::default());
        assert_eq!(config, ServerConfig::new());
        assert_eq!(
            config.bind_addr().unwrap(),
            "127.0.0.1:8000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn config_from_args_custom() {
        let args = ServerArgs {
            host: Some("0.0.0.0".to_string()),
            port: Some(9090),
            base_path: Some("/".to_string()),
            dify_base_url: Some("http://localhost:5001/v1".to_string()),
            contact_to: Some("a@example.com,b@example.com".to_string()),
            contact_from: Some("Site <site@example.com>".to_string()),
            metrics_file: Some("/var/tmp/mstech.metrics".to_string()),
            metrics_interval: Some(5),
        };
        let config = ServerConfig::from(args);
        assert_eq!(config.base_path, "");
        assert_eq!(config.port, 9090);
        assert_eq!(config.metrics_file, Some(PathBuf::from("/var/tmp/mstech.metrics")));
        assert_eq!(config.metrics_interval, Duration::from_secs(5));
        let contact = config.contact_config().unwrap();
        assert_eq!(contact.to.len(), 2);
        assert_eq!(contact.from, "Site <site@example.com>");
    }

    #[test]
    fn bad_host_is_rejected() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            ..ServerConfig::new()
        };
        assert!(config.bind_addr().unwrap_err().is_validation());
    }

    #[test]
    fn named_and_ipv6_hosts_bind() {
        let bind = |host: &str| {
            ServerConfig {
                host: host.to_string(),
                port: 8000,
                ..ServerConfig::new()
            }
            .bind_addr()
            .unwrap()
        };
        assert_eq!(bind("localhost"), "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(bind("::1"), "[::1]:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(bind("[::1]"), "[::1]:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(bind("::"), "[::]:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(bind("0.0.0.0"), "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn zero_metrics_interval_keeps_default() {
        let config = ServerConfig::from(ServerArgs {
            metrics_interval: Some(0),
            ..ServerArgs::default()
        });
        assert_eq!(config.metrics_interval, DEFAULT_METRICS_INTERVAL);
        assert!(config.metrics_file.is_none());
    }
}
