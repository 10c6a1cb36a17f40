// src/main.rs
mod config;
mod database;
mod dtos;
mod error;
mod handlers;
mod import;
mod middleware;
mod models;
mod notify;
mod routes;
mod state;
mod store;

#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::HeaderValue, routing::get};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::store::{CatalogStore, MemoryStore, PgStore, WebhookStore};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return;
        }
    };

    let (catalog, webhooks): (Arc<dyn CatalogStore>, Arc<dyn WebhookStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = match database::create_pool(url).await {
                    Ok(pool) => pool,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create database pool");
                        return;
                    }
                };
                if let Err(e) = database::ensure_schema(&pool).await {
                    tracing::error!(error = %e, "Failed to prepare database schema");
                    return;
                }
                let store = Arc::new(PgStore::new(pool));
                let catalog: Arc<dyn CatalogStore> = store.clone();
                let webhooks: Arc<dyn WebhookStore> = store;
                (catalog, webhooks)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory store; data is lost on exit");
                let store = Arc::new(MemoryStore::new());
                let catalog: Arc<dyn CatalogStore> = store.clone();
                let webhooks: Arc<dyn WebhookStore> = store;
                (catalog, webhooks)
            }
        };

    if let Err(e) = tokio::fs::create_dir_all(&config.upload_dir).await {
        tracing::error!(dir = %config.upload_dir.display(), error = %e, "Failed to create upload directory");
        return;
    }

    let host = config.host;
    let base_port = config.port;
    let cors_origin = config.cors_origin.clone();
    let retention = config.task_retention;

    // Create application state
    let app_state = match state::AppState::new(catalog, webhooks, config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            return;
        }
    };

    // Finished tasks are forgotten after the retention window
    let registry = app_state.imports.registry().clone();
    let upload_limiter = app_state.upload_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(600));
        loop {
            ticker.tick().await;
            let pruned = registry.prune_finished(retention);
            if pruned > 0 {
                tracing::debug!(pruned, remaining = registry.len(), "Pruned finished import tasks");
            }
            if let Some(limiter) = &upload_limiter {
                limiter.shrink();
            }
        }
    });

    let cors = match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new().allow_origin(origin),
        Err(_) => {
            tracing::warn!(%cors_origin, "Invalid CORS_ORIGIN, allowing any origin");
            CorsLayer::new().allow_origin(Any)
        }
    }
    .allow_methods(Any)
    .allow_headers(Any);

    let app = routes::create_router(&app_state)
        .route("/", get(|| async { "Catalog Importer API" }))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(app_state);

    // Try base_port..base_port+20 to avoid crash when address is in use
    let listener = {
        let mut bound = None;
        for offset in 0u16..=20 {
            let port = base_port.saturating_add(offset);
            let addr = SocketAddr::from((host, port));
            match TcpListener::bind(addr).await {
                Ok(l) => { bound = Some((l, addr)); break; }
                Err(e) => {
                    if offset == 0 { tracing::warn!(%addr, error=%e, "Port in use, trying next"); }
                }
            }
        }
        match bound {
            Some((l, addr)) => {
                tracing::info!("Server running on {}", addr);
                l
            }
            None => {
                tracing::error!("Failed to bind to any port starting at {} on {}", base_port, host);
                return;
            }
        }
    };

    // Peer addresses key the upload rate limit
    if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error=%e, "Server error");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn health_check() -> &'static str {
    "OK"
}
