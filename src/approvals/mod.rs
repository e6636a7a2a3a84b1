pub mod portfolio;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::permissions::{require_role, GuardError, REVIEWER_ROLES};
use crate::shared::state::AppState;
use crate::store::{self, Collection, DocumentStore, StoreError};

pub use portfolio::{AssignmentKind, AssignmentStatus, IndividualKpi, NamedTarget};

#[derive(Debug, thiserror::Error)]
pub enum ApprovalsError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for ApprovalsError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<GuardError> for ApprovalsError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Forbidden(msg) => Self::Forbidden(msg),
            GuardError::Store(e) => Self::Store(e.to_string()),
        }
    }
}

impl IntoResponse for ApprovalsError {
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

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub kpi_id: String,
    pub employee_id: String,
    pub actual_value: f64,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub status: SubmissionStatus,
    pub submitted_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub kpi_id: String,
    pub actual_value: f64,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmissionQuery {
    pub status: Option<SubmissionStatus>,
    pub employee_id: Option<String>,
}

impl SubmissionQuery {
    fn matches(&self, submission: &Submission) -> bool {
        self.status.map_or(true, |s| submission.status == s)
            && self
                .employee_id
                .as_deref()
                .map_or(true, |id| submission.employee_id == id)
    }
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Submission>, ApprovalsError> {
    if !req.actual_value.is_finite() {
        return Err(ApprovalsError::Validation("Actual value must be a number".to_string()));
    }
    if state.store.get(Collection::KpiCatalog, &req.kpi_id).await?.is_none() {
        return Err(ApprovalsError::Validation(format!("Unknown KPI: {}", req.kpi_id)));
    }

    let submission = Submission {
        id: Uuid::new_v4().to_string(),
        kpi_id: req.kpi_id,
        employee_id: user.uid.clone(),
        actual_value: req.actual_value,
        note: req.note,
        status: SubmissionStatus::Pending,
        submitted_at: store::timestamp(Utc::now()),
        reviewed_by: None,
        reviewed_at: None,
    };
    let saved = store::save(
        state.store.as_ref(),
        Collection::KpiSubmissions,
        &submission.id,
        &submission,
        false,
    )
    .await?;
    info!("Submission {} for KPI {} from {}", saved.id, saved.kpi_id, saved.employee_id);
    Ok(Json(saved))
}

pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmissionQuery>,
    _user: CurrentUser,
) -> Result<Json<Vec<Submission>>, ApprovalsError> {
    let all: Vec<Submission> = store::fetch_all(state.store.as_ref(), Collection::KpiSubmissions).await?;
    Ok(Json(all.into_iter().filter(|s| query.matches(s)).collect()))
}

/// Overwrites the status whatever it was before; the last reviewer wins.
pub async fn review_submission(
    store: &dyn DocumentStore,
    submission_id: &str,
    reviewer: &str,
    status: SubmissionStatus,
) -> Result<Submission, ApprovalsError> {
    if store.get(Collection::KpiSubmissions, submission_id).await?.is_none() {
        return Err(ApprovalsError::NotFound(format!(
            "Submission {submission_id} not found"
        )));
    }
    let changes = serde_json::json!({
        "status": status,
        "reviewedBy": reviewer,
        "reviewedAt": store::timestamp(Utc::now()),
    });
    let stored = store
        .set(Collection::KpiSubmissions, submission_id, changes, true)
        .await?;
    Ok(serde_json::from_value(stored).map_err(StoreError::from)?)
}

pub async fn approve_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Submission>, ApprovalsError> {
    require_role(state.store.as_ref(), &user, &REVIEWER_ROLES).await?;
    let submission = review_submission(
        state.store.as_ref(),
        &submission_id,
        &user.uid,
        SubmissionStatus::Approved,
    )
    .await?;
    info!("Submission {submission_id} approved by {}", user.uid);
    Ok(Json(submission))
}

pub async fn reject_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Submission>, ApprovalsError> {
    require_role(state.store.as_ref(), &user, &REVIEWER_ROLES).await?;
    let submission = review_submission(
        state.store.as_ref(),
        &submission_id,
        &user.uid,
        SubmissionStatus::Rejected,
    )
    .await?;
    info!("Submission {submission_id} rejected by {}", user.uid);
    Ok(Json(submission))
}

pub fn configure_approvals_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/submissions", get(list_submissions).post(submit))
        .route("/api/submissions/:id/approve", post(approve_submission))
        .route("/api/submissions/:id/reject", post(reject_submission))
        .route("/api/portfolio", post(portfolio::create_assignment))
        .route("/api/portfolio/:employee_id", get(portfolio::get_portfolio))
        .route(
            "/api/portfolio/items/:id",
            axum::routing::delete(portfolio::delete_assignment),
        )
        .route(
            "/api/portfolio/items/:id/status",
            put(portfolio::update_assignment_status),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn submission(id: &str, employee_id: &str, status: SubmissionStatus) -> Submission {
        Submission {
            id: id.to_string(),
            kpi_id: "K1".to_string(),
            employee_id: employee_id.to_string(),
            actual_value: 42.0,
            note: String::new(),
            status,
            submitted_at: "2024-03-01T00:00:00.000Z".to_string(),
            reviewed_by: None,
            reviewed_at: None,
        }
    }

    #[test]
    fn test_query_filters_combine() {
        let query = SubmissionQuery {
            status: Some(SubmissionStatus::Pending),
            employee_id: Some("E1".to_string()),
        };
        assert!(query.matches(&submission("S1", "E1", SubmissionStatus::Pending)));
        assert!(!query.matches(&submission("S2", "E2", SubmissionStatus::Pending)));
        assert!(!query.matches(&submission("S3", "E1", SubmissionStatus::Approved)));
        assert!(SubmissionQuery::default().matches(&submission("S4", "E9", SubmissionStatus::Rejected)));
    }

    #[tokio::test]
    async fn test_review_overwrites_any_previous_status() {
        let store = MemoryStore::new();
        let original = submission("S1", "E1", SubmissionStatus::Pending);
        store::save(&store, Collection::KpiSubmissions, "S1", &original, false)
            .await
            .unwrap();

        let rejected = review_submission(&store, "S1", "M1", SubmissionStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(rejected.status, SubmissionStatus::Rejected);

        let approved = review_submission(&store, "S1", "M2", SubmissionStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.status, SubmissionStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("M2"));
        assert_eq!(approved.actual_value, 42.0);
        assert!(approved.reviewed_at.is_some());
    }

    #[tokio::test]
    async fn test_review_of_missing_submission() {
        let store = MemoryStore::new();
        let err = review_submission(&store, "nope", "M1", SubmissionStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalsError::NotFound(_)));
    }
}
