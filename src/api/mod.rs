//! bgpvault HTTP API.
//!
//! HTTP surface for the archive server, built with Axum.
//!
//! # Endpoints
//!
//! - `GET /archive/help` - welcome text and the list of served archives
//! - `GET /archive/mrt/:collector/:kind` - raw MRT records for a time range,
//!   or continuous-pull session traffic (`continuous=begin`,
//!   `continuous={id}`)
//! - `GET /archive/mrt/:collector/:kind/conf` - archive metadata
//!   (`?range`, `?files`)
//! - `GET /archive/mrt/:collector/:kind/stats` - per-second statistics as
//!   one JSON document
//!
//! Replies stream straight from the query engines' reply channels; the
//! server never buffers a whole range in memory.

pub mod error;
pub mod routes;

pub use error::{ApiError, ApiResult};

use axum::{routing::get, Router};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::archive::ArchiveHandle;
use crate::config::ServerConfig;

/// Shared application state for all handlers: the registry of running
/// archives, keyed by `collector/kind`.
#[derive(Default)]
pub struct AppState {
    archives: HashMap<String, ArchiveHandle>,
}

impl AppState {
    pub fn new() -> Self {
        AppState::default()
    }

    /// Register a running archive under its collector and kind.
    pub fn register(&mut self, handle: ArchiveHandle) {
        let key = format!("{}/{}", handle.collector, handle.discriminator);
        self.archives.insert(key, handle);
    }

    /// Look up an archive; unknown names are a routing-level 404.
    pub fn archive(&self, collector: &str, kind: &str) -> ApiResult<&ArchiveHandle> {
        self.archives
            .get(&format!("{collector}/{kind}"))
            .ok_or_else(|| ApiError::NotFound(format!("{collector}/{kind}")))
    }

    /// All registered archives in stable (key) order.
    pub fn archives(&self) -> Vec<&ArchiveHandle> {
        let mut keys: Vec<_> = self.archives.keys().collect();
        keys.sort();
        keys.iter().map(|k| &self.archives[*k]).collect()
    }
}

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/archive/help", get(routes::help))
        .route("/archive/mrt/:collector/:kind", get(routes::raw_query))
        .route("/archive/mrt/:collector/:kind/conf", get(routes::conf))
        .route(
            "/archive/mrt/:collector/:kind/stats",
            get(routes::stats_query),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Start the API server
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<(), std::io::Error> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("bgpvault API listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("bgpvault API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
