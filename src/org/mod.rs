use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::permissions::{require_role, GuardError, Role};
use crate::auth::normalize_email;
use crate::shared::state::AppState;
use crate::shared::utils::{optional_text_or_number, text_or_number};
use crate::store::{self, Collection, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    #[serde(deserialize_with = "text_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub name: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub department: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub position: String,
    /// Manager name or id, whichever the source used.
    #[serde(
        default,
        deserialize_with = "optional_text_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub manager: Option<String>,
    /// Work email. Sign-up with this address binds the login to `id`.
    #[serde(
        default,
        deserialize_with = "optional_text_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub email: Option<String>,
}

/// Department, position or role record. Fields beyond `id` and `name` are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum OrgError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for OrgError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<GuardError> for OrgError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Forbidden(msg) => Self::Forbidden(msg),
            GuardError::Store(e) => Self::Store(e.to_string()),
        }
    }
}

impl IntoResponse for OrgError {
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
pub struct CreateEmployeeRequest {
    pub id: Option<String>,
    pub name: String,
    pub department: String,
    pub position: String,
    pub manager: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn org_collection(name: &str) -> Result<Collection, OrgError> {
    match name.parse::<Collection>() {
        Ok(c @ (Collection::Departments | Collection::Positions | Collection::Roles)) => Ok(c),
        _ => Err(OrgError::NotFound(format!("Unknown org collection: {name}"))),
    }
}

pub async fn list_employees(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<Vec<Employee>>, OrgError> {
    let employees = store::fetch_all(state.store.as_ref(), Collection::Employees).await?;
    Ok(Json(employees))
}

pub async fn get_employee(
    State(state): State<Arc<AppState>>,
    Path(employee_id): Path<String>,
    _user: CurrentUser,
) -> Result<Json<Employee>, OrgError> {
    store::fetch::<Employee>(state.store.as_ref(), Collection::Employees, &employee_id)
        .await?
        .map(Json)
        .ok_or_else(|| OrgError::NotFound(format!("Employee {employee_id} not found")))
}

pub async fn create_employee(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateEmployeeRequest>,
) -> Result<Json<Employee>, OrgError> {
    require_role(state.store.as_ref(), &user, &[Role::Admin]).await?;
    if req.name.trim().is_empty() {
        return Err(OrgError::Validation("Employee name is required".to_string()));
    }

    let id = req
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if state.store.get(Collection::Employees, &id).await?.is_some() {
        return Err(OrgError::Validation(format!("Employee {id} already exists")));
    }

    let employee = Employee {
        id: id.clone(),
        name: req.name.trim().to_string(),
        department: req.department,
        position: req.position,
        manager: req.manager.filter(|m| !m.trim().is_empty()),
        email: req
            .email
            .map(|e| normalize_email(&e))
            .filter(|e| !e.is_empty()),
    };
    let saved = store::save(state.store.as_ref(), Collection::Employees, &id, &employee, false).await?;
    info!("Added employee {} ({})", saved.name, saved.id);
    Ok(Json(saved))
}

/// Removes the employee and, in the background, its permission record.
/// Individual KPI assignments are left in place.
pub async fn delete_employee(
    State(state): State<Arc<AppState>>,
    Path(employee_id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Value>, OrgError> {
    require_role(state.store.as_ref(), &user, &[Role::Admin]).await?;
    if !state.store.delete(Collection::Employees, &employee_id).await? {
        return Err(OrgError::NotFound(format!("Employee {employee_id} not found")));
    }
    store::spawn_delete(
        state.store.clone(),
        state.store_errors.clone(),
        Collection::Users,
        employee_id.clone(),
    );
    info!("Deleted employee {employee_id}");
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn list_org_records(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    _user: CurrentUser,
) -> Result<Json<Vec<OrgRecord>>, OrgError> {
    let collection = org_collection(&collection)?;
    let records = store::fetch_all(state.store.as_ref(), collection).await?;
    Ok(Json(records))
}

pub fn configure_org_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/org/employees", get(list_employees).post(create_employee))
        .route("/api/org/employees/:id", get(get_employee).delete(delete_employee))
        .route("/api/org/records/:collection", get(list_org_records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_org_collection_accepts_only_org_lists() {
        assert_eq!(org_collection("departments").unwrap(), Collection::Departments);
        assert_eq!(org_collection("roles").unwrap(), Collection::Roles);
        assert!(org_collection("users").is_err());
        assert!(org_collection("kpi_catalog").is_err());
    }

    #[test]
    fn test_org_record_keeps_extra_fields() {
        let record: OrgRecord =
            serde_json::from_value(json!({"id": "D1", "name": "Finance", "head": "E001"})).unwrap();
        assert_eq!(record.name, "Finance");
        assert_eq!(record.extra["head"], "E001");
    }

    #[test]
    fn test_employee_without_manager_omits_field() {
        let employee: Employee = serde_json::from_value(json!({"id": "E1", "name": "A"})).unwrap();
        assert_eq!(employee.department, "");
        let doc = serde_json::to_value(&employee).unwrap();
        assert!(doc.get("manager").is_none());
    }

    #[test]
    fn test_employee_reads_numeric_cells() {
        let employee: Employee = serde_json::from_value(json!({
            "id": 1001,
            "name": "สมหญิง",
            "department": 7,
            "position": "Rep",
            "manager": 1000
        }))
        .unwrap();
        assert_eq!(employee.id, "1001");
        assert_eq!(employee.department, "7");
        assert_eq!(employee.manager.as_deref(), Some("1000"));
        assert_eq!(employee.email, None);
    }

    #[tokio::test]
    async fn test_imported_employee_with_numeric_manager_stays_listed() {
        use crate::import::records_for;
        use crate::shared::test_utils::create_test_state;
        use crate::store::DocumentStore;

        let (state, store) = create_test_state("ok");
        let rows = json!([{
            "รหัส": 1001,
            "ชื่อ-นามสกุล": "สมหญิง",
            "แผนก": "Sales",
            "ตำแหน่ง": "Rep",
            "ผู้บังคับบัญชา": 1000
        }]);
        let records = records_for(Collection::Employees, &rows).unwrap();
        store
            .batch_set(Collection::Employees, vec![("1001".to_string(), records[0].clone())])
            .await
            .unwrap();
        // a row written before remapping kept its numbers
        store
            .set(Collection::Employees, "1002", json!({"name": "B", "manager": 1001}), false)
            .await
            .unwrap();

        let user = CurrentUser {
            uid: "1001".to_string(),
            email: None,
            anonymous: false,
        };
        let Json(listed) = list_employees(State(state.clone()), user.clone()).await.unwrap();
        assert_eq!(listed.len(), 2);
        let Json(one) = get_employee(State(state), Path("1001".to_string()), user).await.unwrap();
        assert_eq!(one.manager.as_deref(), Some("1000"));
        assert_eq!(listed[1].manager.as_deref(), Some("1001"));
    }
}
