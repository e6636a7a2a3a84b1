pub mod generate;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CurrentUser;
use crate::kpi::{load_catalog, KpiSnapshot};
use crate::permissions::{load_effective_user, matrix::ROUTE_INSIGHTS};
use crate::shared::state::AppState;
use crate::store::StoreError;

pub use generate::{generate_insights, generate_summary, Insight, InsightIcon};

pub const INSIGHTS_FAILED_MESSAGE: &str = "Failed to generate insights. Please try again.";
pub const SUMMARY_FAILED_MESSAGE: &str = "Failed to generate summary. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum InsightsError {
    #[error("Insight generation failed: {0}")]
    InsightsFailed(String),
    #[error("Summary generation failed: {0}")]
    SummaryFailed(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for InsightsError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl IntoResponse for InsightsError {
    fn into_response(self) -> axum::response::Response {
        // model failure details stay in the log
        let (status, message) = match &self {
            Self::InsightsFailed(_) => (StatusCode::BAD_GATEWAY, INSIGHTS_FAILED_MESSAGE.to_string()),
            Self::SummaryFailed(_) => (StatusCode::BAD_GATEWAY, SUMMARY_FAILED_MESSAGE.to_string()),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::Store(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub snapshot: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct InsightsResponse {
    pub insights: Vec<Insight>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
}

/// Uses the snapshot from the request body, or the live catalog when absent.
async fn resolve_snapshot(
    state: &AppState,
    user: &CurrentUser,
    body: Option<Json<GenerateRequest>>,
) -> Result<Value, InsightsError> {
    let access = load_effective_user(state.store.as_ref(), &user.uid).await?;
    if !access.can_access(ROUTE_INSIGHTS) {
        return Err(InsightsError::Forbidden(format!(
            "{} has no access to {ROUTE_INSIGHTS}",
            user.uid
        )));
    }

    if let Some(snapshot) = body.and_then(|Json(req)| req.snapshot) {
        return Ok(snapshot);
    }
    let catalog = load_catalog(state.store.as_ref()).await?;
    serde_json::to_value(KpiSnapshot::from_catalog(&catalog))
        .map_err(|e| InsightsError::Store(StoreError::from(e).to_string()))
}

fn model_timeout(state: &AppState) -> Duration {
    Duration::from_secs(state.config.llm.timeout_secs)
}

pub async fn create_insights(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    body: Option<Json<GenerateRequest>>,
) -> Result<Json<InsightsResponse>, InsightsError> {
    let snapshot = resolve_snapshot(&state, &user, body).await?;
    let insights =
        generate_insights(state.llm_provider.as_ref(), &snapshot, model_timeout(&state)).await?;
    info!("Generated {} insights for {}", insights.len(), user.uid);
    Ok(Json(InsightsResponse { insights }))
}

pub async fn create_summary(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    body: Option<Json<GenerateRequest>>,
) -> Result<Json<SummaryResponse>, InsightsError> {
    let snapshot = resolve_snapshot(&state, &user, body).await?;
    let summary =
        generate_summary(state.llm_provider.as_ref(), &snapshot, model_timeout(&state)).await?;
    info!("Generated executive summary for {}", user.uid);
    Ok(Json(SummaryResponse { summary }))
}

pub fn configure_insights_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/insights", post(create_insights))
        .route("/api/insights/summary", post(create_summary))
}
