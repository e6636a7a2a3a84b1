pub mod cascade;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::approvals::IndividualKpi;
use crate::auth::CurrentUser;
use crate::org::Employee;
use crate::permissions::{require_role, GuardError, Role};
use crate::shared::state::AppState;
use crate::store::{self, Collection, DocumentStore, StoreError};

pub use cascade::{
    build_cascade, group_by_perspective, CascadeView, KpiSnapshot, PerspectiveGroup,
    UNCATEGORIZED,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpi {
    pub id: String,
    #[serde(default)]
    pub perspective: Option<String>,
    #[serde(default)]
    pub strategic_objective: String,
    #[serde(default)]
    pub measure: String,
    /// Free text; spreadsheets often hand numbers here.
    #[serde(default, deserialize_with = "crate::shared::utils::text_or_number")]
    pub target: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achievement: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum KpiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for KpiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<GuardError> for KpiError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Forbidden(msg) => Self::Forbidden(msg),
            GuardError::Store(e) => Self::Store(e.to_string()),
        }
    }
}

impl IntoResponse for KpiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Store(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKpiRequest {
    pub id: Option<String>,
    pub perspective: Option<String>,
    #[serde(default)]
    pub strategic_objective: String,
    pub measure: String,
    #[serde(default, deserialize_with = "crate::shared::utils::text_or_number")]
    pub target: String,
    #[serde(default)]
    pub unit: String,
    pub achievement: Option<f64>,
}

pub async fn load_catalog(store: &dyn DocumentStore) -> Result<Vec<Kpi>, StoreError> {
    store::fetch_all(store, Collection::KpiCatalog).await
}

pub async fn list_kpis(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<Vec<Kpi>>, KpiError> {
    Ok(Json(load_catalog(state.store.as_ref()).await?))
}

pub async fn get_kpi(
    State(state): State<Arc<AppState>>,
    Path(kpi_id): Path<String>,
    _user: CurrentUser,
) -> Result<Json<Kpi>, KpiError> {
    store::fetch::<Kpi>(state.store.as_ref(), Collection::KpiCatalog, &kpi_id)
        .await?
        .map(Json)
        .ok_or_else(|| KpiError::NotFound(format!("KPI {kpi_id} not found")))
}

pub async fn create_kpi(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateKpiRequest>,
) -> Result<Json<Kpi>, KpiError> {
    if req.measure.trim().is_empty() {
        return Err(KpiError::Validation("KPI measure is required".to_string()));
    }
    let id = req
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let kpi = Kpi {
        id: id.clone(),
        perspective: req.perspective.filter(|p| !p.trim().is_empty()),
        strategic_objective: req.strategic_objective,
        measure: req.measure.trim().to_string(),
        target: req.target,
        unit: req.unit,
        achievement: req.achievement,
        created_at: None,
        updated_at: None,
    };
    let saved = store::save(state.store.as_ref(), Collection::KpiCatalog, &id, &kpi, false).await?;
    info!("KPI {} created by {}", saved.id, user.uid);
    Ok(Json(saved))
}

/// Merges `changes` into the stored KPI. The merged document must still read
/// as a [`Kpi`] before anything is written.
pub async fn apply_kpi_update(
    store: &dyn DocumentStore,
    kpi_id: &str,
    changes: Value,
) -> Result<Kpi, KpiError> {
    if !changes.is_object() {
        return Err(KpiError::Validation("Update must be a JSON object".to_string()));
    }
    let existing = store
        .get(Collection::KpiCatalog, kpi_id)
        .await?
        .ok_or_else(|| KpiError::NotFound(format!("KPI {kpi_id} not found")))?;
    let merged = store::prepare_document(Some(&existing), kpi_id, changes, true, Utc::now())?;
    let kpi: Kpi = serde_json::from_value(merged.clone())
        .map_err(|e| KpiError::Validation(format!("Invalid KPI update: {e}")))?;
    store.set(Collection::KpiCatalog, kpi_id, merged, false).await?;
    Ok(kpi)
}

pub async fn update_kpi(
    State(state): State<Arc<AppState>>,
    Path(kpi_id): Path<String>,
    user: CurrentUser,
    Json(changes): Json<Value>,
) -> Result<Json<Kpi>, KpiError> {
    let kpi = apply_kpi_update(state.store.as_ref(), &kpi_id, changes).await?;
    info!("KPI {kpi_id} updated by {}", user.uid);
    Ok(Json(kpi))
}

pub async fn delete_kpi(
    State(state): State<Arc<AppState>>,
    Path(kpi_id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Value>, KpiError> {
    require_role(state.store.as_ref(), &user, &[Role::Admin]).await?;
    if !state.store.delete(Collection::KpiCatalog, &kpi_id).await? {
        return Err(KpiError::NotFound(format!("KPI {kpi_id} not found")));
    }
    info!("KPI {kpi_id} deleted by {}", user.uid);
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn get_perspectives(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<Vec<PerspectiveGroup>>, KpiError> {
    let catalog = load_catalog(state.store.as_ref()).await?;
    Ok(Json(group_by_perspective(&catalog)))
}

pub async fn get_cascade(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<CascadeView>, KpiError> {
    let store = state.store.as_ref();
    let catalog = load_catalog(store).await?;
    let employees: Vec<Employee> = store::fetch_all(store, Collection::Employees).await?;
    let assignments: Vec<IndividualKpi> = store::fetch_all(store, Collection::IndividualKpis).await?;
    Ok(Json(build_cascade(&catalog, &employees, &assignments)))
}

pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<KpiSnapshot>, KpiError> {
    let catalog = load_catalog(state.store.as_ref()).await?;
    Ok(Json(KpiSnapshot::from_catalog(&catalog)))
}

pub fn configure_kpi_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/kpis", get(list_kpis).post(create_kpi))
        .route("/api/kpis/perspectives", get(get_perspectives))
        .route("/api/kpis/cascade", get(get_cascade))
        .route("/api/kpis/snapshot", get(get_snapshot))
        .route("/api/kpis/:id", get(get_kpi).put(update_kpi).delete(delete_kpi))
}
