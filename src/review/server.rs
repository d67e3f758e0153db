use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::critique::{GeminiClient, ModelClient};
use super::db::{DbHandle, ReviewDb};
use super::sandbox::provider_from_config;
use super::service::ReviewService;
use crate::config::ReviewConfig;

/// Build the application router. Dev mode adds a permissive CORS layer for
/// browser clients served from another origin.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Model client for the configured provider, or `None` when critique is
/// disabled or no API key is set.
pub fn build_critic(config: &ReviewConfig) -> Result<Option<Arc<dyn ModelClient>>> {
    if !config.review.ai_critique {
        return Ok(None);
    }
    match config.model.api_key() {
        Some(key) => {
            let client: Arc<dyn ModelClient> = Arc::new(GeminiClient::new(&config.model, key)?);
            Ok(Some(client))
        }
        None => {
            tracing::warn!("AI critique enabled but no model API key configured; submissions will be rejected");
            Ok(None)
        }
    }
}

/// Wire a [`ReviewService`] from configuration.
pub fn build_service(config: &ReviewConfig, db: Option<DbHandle>) -> Result<ReviewService> {
    let provider = provider_from_config(&config.sandbox);
    let critic = build_critic(config)?;
    Ok(ReviewService::new(provider, config.review.clone())
        .with_critic(critic)
        .with_db(db))
}

/// Start the review server and run until Ctrl-C.
pub async fn start_server(config: ReviewConfig, dev_mode: bool) -> Result<()> {
    let db = ReviewDb::new(&config.database.path).with_context(|| {
        format!(
            "Failed to initialize review database at {}",
            config.database.path.display()
        )
    })?;
    let service = build_service(&config, Some(DbHandle::new(db)))?;
    let state = Arc::new(AppState { service });
    let app = build_router(state, dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        backend = %config.sandbox.backend,
        ai_critique = config.review.ai_critique,
        "review server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
