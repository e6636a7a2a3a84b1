use axum::{
    extract::{Path, State},
    Json,
};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::ApprovalsError;
use crate::auth::CurrentUser;
use crate::shared::state::AppState;
use crate::store::{self, Collection, DocumentStore, StoreError};

/// Lifecycle of an individual KPI. Any status may be written at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    #[default]
    Draft,
    Agreed,
    InProgress,
    ManagerReview,
    UpperManagerApproval,
    EmployeeAcknowledged,
    Closed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTarget {
    pub label: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssignmentKind {
    /// A corporate KPI handed down with a personal target.
    #[serde(rename_all = "camelCase")]
    Cascaded {
        kpi_id: String,
        #[serde(default)]
        target: String,
    },
    /// A task the employee commits to, measured against its own targets.
    Committed {
        task: String,
        #[serde(default)]
        targets: Vec<NamedTarget>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualKpi {
    pub id: String,
    pub employee_id: String,
    #[serde(default)]
    pub status: AssignmentStatus,
    #[serde(flatten)]
    pub kind: AssignmentKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentRequest {
    pub employee_id: Option<String>,
    pub status: Option<AssignmentStatus>,
    #[serde(flatten)]
    pub kind: AssignmentKind,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AssignmentStatus,
}

fn validate_kind(kind: &AssignmentKind) -> Result<(), ApprovalsError> {
    match kind {
        AssignmentKind::Cascaded { kpi_id, .. } if kpi_id.trim().is_empty() => Err(
            ApprovalsError::Validation("Cascaded KPI needs a kpiId".to_string()),
        ),
        AssignmentKind::Committed { task, .. } if task.trim().is_empty() => Err(
            ApprovalsError::Validation("Committed KPI needs a task".to_string()),
        ),
        _ => Ok(()),
    }
}

pub async fn load_portfolio(
    store: &dyn DocumentStore,
    employee_id: &str,
) -> Result<Vec<IndividualKpi>, StoreError> {
    let all: Vec<IndividualKpi> = store::fetch_all(store, Collection::IndividualKpis).await?;
    Ok(all.into_iter().filter(|k| k.employee_id == employee_id).collect())
}

pub async fn get_portfolio(
    State(state): State<Arc<AppState>>,
    Path(employee_id): Path<String>,
    _user: CurrentUser,
) -> Result<Json<Vec<IndividualKpi>>, ApprovalsError> {
    Ok(Json(load_portfolio(state.store.as_ref(), &employee_id).await?))
}

pub async fn create_assignment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateAssignmentRequest>,
) -> Result<Json<IndividualKpi>, ApprovalsError> {
    validate_kind(&req.kind)?;
    if let AssignmentKind::Cascaded { kpi_id, .. } = &req.kind {
        if state.store.get(Collection::KpiCatalog, kpi_id).await?.is_none() {
            return Err(ApprovalsError::Validation(format!("Unknown KPI: {kpi_id}")));
        }
    }

    let assignment = IndividualKpi {
        id: Uuid::new_v4().to_string(),
        employee_id: req.employee_id.unwrap_or_else(|| user.uid.clone()),
        status: req.status.unwrap_or_default(),
        kind: req.kind,
    };
    let saved = store::save(
        state.store.as_ref(),
        Collection::IndividualKpis,
        &assignment.id,
        &assignment,
        false,
    )
    .await?;
    info!("Individual KPI {} added for {}", saved.id, saved.employee_id);
    Ok(Json(saved))
}

pub async fn update_assignment_status(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
    user: CurrentUser,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<IndividualKpi>, ApprovalsError> {
    if state.store.get(Collection::IndividualKpis, &item_id).await?.is_none() {
        return Err(ApprovalsError::NotFound(format!("Individual KPI {item_id} not found")));
    }
    let stored = state
        .store
        .set(
            Collection::IndividualKpis,
            &item_id,
            serde_json::json!({ "status": req.status }),
            true,
        )
        .await?;
    let item: IndividualKpi = serde_json::from_value(stored).map_err(StoreError::from)?;
    info!("Individual KPI {item_id} set to {:?} by {}", req.status, user.uid);
    Ok(Json(item))
}

pub async fn delete_assignment(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
    _user: CurrentUser,
) -> Result<Json<Value>, ApprovalsError> {
    if !state.store.delete(Collection::IndividualKpis, &item_id).await? {
        return Err(ApprovalsError::NotFound(format!("Individual KPI {item_id} not found")));
    }
    Ok(Json(serde_json::json!({ "success": true })))
}
