//! HTTP server for the hierarchy lookup API

use super::handler::{hierarchy_handler, status_handler};
use crate::config::OrgtreeConfig;
use crate::hierarchy::HierarchyService;
use crate::store::DocumentStore;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared handler state
pub struct AppState {
    pub service: HierarchyService,
    pub source_index: String,
    pub target_index: String,
}

impl AppState {
    pub fn from_config(store: Arc<dyn DocumentStore>, config: &OrgtreeConfig) -> Self {
        Self {
            service: HierarchyService::from_config(store, config),
            source_index: config.source_index.clone(),
            target_index: config.target_index.clone(),
        }
    }
}

/// API routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/employees/:id/hierarchy", get(hierarchy_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP server exposing hierarchy lookups
pub struct HttpServer {
    state: Arc<AppState>,
    address: String,
    port: u16,
}

impl HttpServer {
    pub fn new(state: AppState, address: impl Into<String>, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            address: address.into(),
            port,
        }
    }

    /// Serve until the process is stopped
    pub async fn start(&self) -> std::io::Result<()> {
        let app = router(Arc::clone(&self.state));
        let addr = format!("{}:{}", self.address, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("Hierarchy API listening on http://{}", addr);

        axum::serve(listener, app).await
    }
}
