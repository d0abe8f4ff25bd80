//! HTTP handlers for the hierarchy API

use super::server::AppState;
use crate::hierarchy::HierarchyError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// `GET /api/employees/:id/hierarchy`
pub async fn hierarchy_handler(
    State(state): State<Arc<AppState>>,
    Path(employee_id): Path<String>,
) -> Response {
    match state.service.get_hierarchy(&employee_id).await {
        Ok(view) => Json(json!({ "success": true, "data": view })).into_response(),
        Err(HierarchyError::NotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("Employee not found: {}", id) })),
        )
            .into_response(),
        Err(e) => {
            warn!("Hierarchy lookup for {} failed: {}", employee_id, e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Handler for system status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.service.ping().await;
    if let Err(e) = &store {
        warn!("Store ping failed: {}", e);
    }
    Json(json!({
        "status": if store.is_ok() { "healthy" } else { "degraded" },
        "version": crate::VERSION,
        "store": {
            "reachable": store.is_ok(),
        },
        "indices": {
            "source": state.source_index,
            "target": state.target_index,
        }
    }))
}
