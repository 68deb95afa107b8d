//! calcframe API server implementation
//!
//! HTTP REST API server using Axum for evaluating formula sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::handlers;
use crate::types::EngineOptions;

/// API Server configuration
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Options for sessions that carry none of their own
    pub options: EngineOptions,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            options: EngineOptions::default(),
        }
    }
}

/// Shared application state
#[derive(Clone, Debug)]
pub struct AppState {
    pub version: String,
    pub options: EngineOptions,
}

impl AppState {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            options,
        }
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/version", get(handlers::version))
        // Formula endpoints
        .route("/api/v1/evaluate", post(handlers::evaluate))
        .route("/api/v1/validate", post(handlers::validate))
        .route("/api/v1/translate", post(handlers::translate))
        // State and middleware
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run the API server
pub async fn run_api_server(config: ApiConfig) -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calcframe=info,tower_http=info".into()),
        )
        .init();

    let app = router(Arc::new(AppState::new(config.options.clone())));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("🧮 calcframe API Server starting on http://{}", addr);
    info!("   Endpoints: /api/v1/evaluate, /api/v1/validate, /api/v1/translate");
    info!("   Health: /health, Version: /version");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("calcframe API Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server...");
}
