//! chatgate: OpenID Connect gatekeeper for a chat webhook.
//!
//! Entry point. Initializes tracing, loads configuration from the
//! environment, connects the session store, starts provider discovery in the
//! background, builds the router and serves until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatgate::config::{AppConfig, DEFAULT_LOG_FILTER, DEFAULT_LOG_FORMAT, OIDC_HTTP_TIMEOUT_SECS};
use chatgate::oidc::{HttpDiscovery, ProviderDiscovery};
use chatgate::session::{MemorySessionStore, RedisSessionStore, SessionStore};
use chatgate::{create_router, server, AppState};

/// chatgate: sign-in gate and webhook proxy for a chat UI
#[derive(Parser, Debug)]
#[command(name = "chatgate", version, about)]
struct Args {
    /// Log level filter (e.g., "chatgate=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log output format: "text" or "json"
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let log_format = args
        .log_format
        .or_else(|| std::env::var("LOG_FORMAT").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if log_format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = AppConfig::from_env()?;
    tracing::info!(
        environment = ?config.environment,
        base_url = %config.http.base_url,
        oidc = config.oidc.is_some(),
        group_required = config.allowed_group.is_some(),
        "Loaded configuration"
    );

    let store: Arc<dyn SessionStore> = match &config.session.redis_url {
        Some(url) => Arc::new(RedisSessionStore::connect(url).await?),
        None => {
            tracing::warn!("REDIS_URL not set, sessions are kept in memory");
            Arc::new(MemorySessionStore::new())
        }
    };

    let discovery: Option<Arc<dyn ProviderDiscovery>> = match &config.oidc {
        Some(settings) => {
            let http_client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(Duration::from_secs(OIDC_HTTP_TIMEOUT_SECS))
                .build()?;
            Some(Arc::new(HttpDiscovery::new(settings, http_client)))
        }
        None => None,
    };

    let addr = config.http.socket_addr();
    let state = AppState::new(config, store, discovery)?;

    // Warm the provider handle; a failure here is retried on first login
    if let Some(oidc) = state.oidc.clone() {
        tokio::spawn(async move {
            if let Err(e) = oidc.provider().await {
                tracing::warn!(error = %e, "Provider discovery failed at startup");
            }
        });
    }

    let app = create_router(state);
    server::serve(app, addr).await?;

    Ok(())
}
