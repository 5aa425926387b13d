//! Email Verification API Server
//!
//! HTTP front for the verify_core pipeline: estimates whether an address
//! accepts mail without delivering any, while per-domain coordinators keep
//! concurrent probes against any single mail exchanger bounded.

use axum::Router;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verify_core::{MemoryBlocklistStore, Verifier};

mod api_handler;
mod config;
mod routes;

use config::AppConfig;

/// Shared application state
pub struct AppState {
    pub verifier: Verifier,
    pub blocklist_store: MemoryBlocklistStore,
    pub config: Arc<AppConfig>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = load_config()?;

    // Initialize tracing/logging
    init_tracing(&config)?;

    info!(
        "Starting Email Verification API v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Seed the disposable blocklist from the embedded snapshot
    let blocklist_store = MemoryBlocklistStore::from_list_txt(include_str!("../../../list.txt"))
        .map_err(|e| format!("Failed to seed blocklist store: {e}"))?;
    info!(
        "Blocklist ready with {} disposable domains",
        blocklist_store.len()
    );

    // Best-effort: pull a fresher list when one is configured. The embedded
    // snapshot keeps serving if the fetch fails.
    if let Some(url) = &config.verification.disposable_list_url {
        match verify_core::blocklist::refresh_store_from_url(&blocklist_store, url).await {
            Ok(count) => info!("Blocklist refreshed from {} ({} domains)", url, count),
            Err(e) => tracing::warn!("Blocklist refresh from {} failed: {}", url, e),
        }
    }

    // Wire the verification pipeline
    let verifier = Verifier::with_store(config.verification.to_core(), blocklist_store.clone())
        .map_err(|e| format!("Failed to initialize verifier: {e}"))?;

    // Create shared application state
    let app_state = AppState {
        verifier,
        blocklist_store,
        config: Arc::new(config.clone()),
    };

    // Build the router
    let app = create_router(app_state);

    // Start the server
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check available at http://{}/health", addr);
    info!("Metrics available at http://{}/metrics", addr);
    info!("Verification API: POST http://{}/v1/verify", addr);

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    routes::build_routes(Arc::new(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(tower_http::cors::Any),
        )
        .layer(CompressionLayer::new())
}

/// Load application configuration from environment and files
fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    // Start with a base configuration using defaults
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    // Try to load config file if it exists (optional)
    if std::path::Path::new("Config.toml").exists() {
        figment = figment.merge(Toml::file("Config.toml"));
    }

    // Override with environment variables
    figment = figment.merge(Env::prefixed("VERIFIER_").split("__"));

    let config: AppConfig = figment.extract()?;

    Ok(config)
}

/// Initialize tracing and logging
fn init_tracing(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_level.clone().into());

    if config.observability.json_logs {
        // JSON format for production
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        // Human-readable format for development
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
