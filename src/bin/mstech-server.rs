//! HTTP service backing the MSTech site's contact form and chat widget.
//!
//! # Usage
//!
//! ```bash
//! RESEND_API_KEY=re_... MSTECH_CONTACT_TO=sales@example.com \
//! DIFY_API_KEY=app-... mstech-server --port 8000 --base-path /mstech \
//!     --metrics-file /var/tmp/mstech.metrics
//! ```

use std::sync::Arc;

use arrrg::CommandLine;
use biometrics::Collector;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mstech::server::{AppState, ServerArgs, ServerConfig, create_router};
use mstech::{ContactService, Dify, Resend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mstech=info,tower_http=info")),
        )
        .init();

    let (args, _) = ServerArgs::from_command_line_relaxed("mstech-server [OPTIONS]");
    let config = ServerConfig::from(args);

    let collector = Collector::new();
    mstech::register_biometrics(&collector);
    if let Some(path) = config.metrics_file.clone() {
        let mut ticks = tokio::time::interval(config.metrics_interval);
        tokio::spawn(async move {
            loop {
                ticks.tick().await;
                if let Err(err) = mstech::emit_biometrics(&collector, &path) {
                    tracing::warn!(error = %err, path = %path.display(), "could not emit biometrics");
                }
            }
        });
    }

    let mailer = Resend::new(None)?;
    let contact = ContactService::new(Arc::new(mailer), config.contact_config()?);

    let chat = match Dify::with_options(None, config.dify_base_url.clone(), None) {
        Ok(client) => Some(client),
        Err(err) => {
            tracing::warn!(error = %err, "chat relay disabled");
            None
        }
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(contact, chat), &config.base_path)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = config.bind_addr()?;
    tracing::info!(%addr, base_path = %config.base_path, "mstech-server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
