//! API Router
//!
//! Combines the routes of every module into one router.

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::shared::state::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Configure all API routes from all modules
pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        // ===== Sign-in =====
        .merge(crate::auth::configure_auth_routes())
        // ===== Data import =====
        .merge(crate::import::configure_import_routes())
        // ===== KPI catalog & cascade =====
        .merge(crate::kpi::configure_kpi_routes())
        // ===== Organisation =====
        .merge(crate::org::configure_org_routes())
        // ===== Permission matrix =====
        .merge(crate::permissions::configure_permissions_routes())
        // ===== AI insights =====
        .merge(crate::insights::configure_insights_routes())
        // ===== Submissions & portfolio =====
        .merge(crate::approvals::configure_approvals_routes())
}
