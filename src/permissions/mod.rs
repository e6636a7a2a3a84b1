pub mod matrix;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{login_uid, normalize_email, provisioned_uid, AuthService, CurrentUser};
use crate::org::Employee;
use crate::shared::state::AppState;
use crate::store::{self, events, Collection, DocumentStore, StoreError, StoreErrorEvent};

pub use matrix::{
    default_matrix, default_menu_access, effective_user, AppUser, MenuAccess, Role, MENU_ROUTES,
};

pub const REVIEWER_ROLES: [Role; 4] = [Role::Admin, Role::Vp, Role::Avp, Role::Manager];

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionsError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for PermissionsError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<GuardError> for PermissionsError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Forbidden(msg) => Self::Forbidden(msg),
            GuardError::Store(e) => Self::Store(e.to_string()),
        }
    }
}

impl IntoResponse for PermissionsError {
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

pub async fn load_users(store: &dyn DocumentStore) -> Result<HashMap<String, AppUser>, StoreError> {
    let users: Vec<AppUser> = store::fetch_all(store, Collection::Users).await?;
    Ok(users.into_iter().map(|u| (u.id.clone(), u)).collect())
}

pub async fn load_effective_user(store: &dyn DocumentStore, uid: &str) -> Result<AppUser, StoreError> {
    let stored: Option<AppUser> = store::fetch(store, Collection::Users, uid).await?;
    Ok(stored.unwrap_or_else(|| AppUser::new(uid, Role::Employee)))
}

/// Resolves the caller's permission record and checks its role.
pub async fn require_role(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    allowed: &[Role],
) -> Result<AppUser, GuardError> {
    let app_user = load_effective_user(store, &user.uid).await?;
    if app_user.has_role(allowed) {
        Ok(app_user)
    } else {
        let names: Vec<&str> = allowed.iter().map(Role::as_str).collect();
        Err(GuardError::Forbidden(format!(
            "role {} cannot perform this action (requires {})",
            app_user.role,
            names.join(" or ")
        )))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistReport {
    pub saved: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Best-effort save: each user is written on its own, users without a login
/// record are skipped, and write failures go to the store error channel.
pub async fn persist_users(
    store: &dyn DocumentStore,
    auth: &AuthService,
    errors: &tokio::sync::broadcast::Sender<StoreErrorEvent>,
    users: Vec<AppUser>,
) -> PersistReport {
    let mut report = PersistReport::default();
    for user in users {
        match auth.has_login(&user.id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Skipping permissions for {}: no login record", user.id);
                report.skipped.push(user.id);
                continue;
            }
            Err(e) => {
                events::report_failure(errors, Collection::Logins, user.id.clone(), "read", e.to_string());
                report.failed.push(user.id);
                continue;
            }
        }
        let doc = match serde_json::to_value(&user) {
            Ok(doc) => doc,
            Err(e) => {
                events::report_failure(errors, Collection::Users, user.id.clone(), "write", e.to_string());
                report.failed.push(user.id);
                continue;
            }
        };
        match store.set(Collection::Users, &user.id, doc, true).await {
            Ok(_) => report.saved.push(user.id),
            Err(e) => {
                events::report_failure(errors, Collection::Users, user.id.clone(), "write", e.to_string());
                report.failed.push(user.id);
            }
        }
    }
    info!(
        "Persisted permissions: {} saved, {} skipped, {} failed",
        report.saved.len(),
        report.skipped.len(),
        report.failed.len()
    );
    report
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRow {
    pub employee: Employee,
    pub user: AppUser,
    pub has_login: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResult {
    pub user: AppUser,
    pub persisted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SetAccessRequest {
    pub route: String,
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct SavePermissionsRequest {
    pub users: Vec<AppUser>,
}

pub async fn get_defaults() -> Json<BTreeMap<String, MenuAccess>> {
    Json(default_matrix())
}

pub async fn get_my_permissions(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<AppUser>, PermissionsError> {
    Ok(Json(load_effective_user(state.store.as_ref(), &user.uid).await?))
}

pub async fn list_permission_rows(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<PermissionRow>>, PermissionsError> {
    require_role(state.store.as_ref(), &user, &[Role::Admin]).await?;

    let employees: Vec<Employee> = store::fetch_all(state.store.as_ref(), Collection::Employees).await?;
    let users = load_users(state.store.as_ref()).await?;

    let mut rows = Vec::with_capacity(employees.len());
    for employee in employees {
        let has_login = state.auth.has_login(&employee.id).await?;
        let user = effective_user(&employee.id, &users);
        rows.push(PermissionRow {
            employee,
            user,
            has_login,
        });
    }
    Ok(Json(rows))
}

pub async fn get_user_permissions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    user: CurrentUser,
) -> Result<Json<AppUser>, PermissionsError> {
    require_role(state.store.as_ref(), &user, &[Role::Admin]).await?;
    Ok(Json(load_effective_user(state.store.as_ref(), &user_id).await?))
}

async fn apply_edit(
    state: &AppState,
    caller: &CurrentUser,
    user_id: &str,
    edit: impl FnOnce(&mut AppUser),
) -> Result<EditResult, PermissionsError> {
    require_role(state.store.as_ref(), caller, &[Role::Admin]).await?;

    let mut target = load_effective_user(state.store.as_ref(), user_id).await?;
    edit(&mut target);

    let report = persist_users(
        state.store.as_ref(),
        &state.auth,
        &state.store_errors,
        vec![target.clone()],
    )
    .await;
    if !report.failed.is_empty() {
        return Err(PermissionsError::Store(format!(
            "Failed to save permissions for {user_id}"
        )));
    }
    let persisted = !report.saved.is_empty();
    if persisted {
        if let Some(stored) = store::fetch::<AppUser>(state.store.as_ref(), Collection::Users, user_id).await? {
            target = stored;
        }
    }
    Ok(EditResult {
        user: target,
        persisted,
    })
}

pub async fn change_user_role(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    user: CurrentUser,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<Json<EditResult>, PermissionsError> {
    let result = apply_edit(&state, &user, &user_id, |target| target.change_role(req.role)).await?;
    info!("Role of {user_id} set to {} by {}", req.role, user.uid);
    Ok(Json(result))
}

pub async fn set_user_access(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    user: CurrentUser,
    Json(req): Json<SetAccessRequest>,
) -> Result<Json<EditResult>, PermissionsError> {
    if !req.route.starts_with('/') {
        return Err(PermissionsError::Validation(format!(
            "Route must start with '/': {}",
            req.route
        )));
    }
    let result = apply_edit(&state, &user, &user_id, |target| {
        target.set_access(&req.route, req.allowed)
    })
    .await?;
    Ok(Json(result))
}

pub async fn save_permissions(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<SavePermissionsRequest>,
) -> Result<Json<PersistReport>, PermissionsError> {
    require_role(state.store.as_ref(), &user, &[Role::Admin]).await?;
    let report = persist_users(state.store.as_ref(), &state.auth, &state.store_errors, req.users).await;
    Ok(Json(report))
}

/// Makes sure whoever signs in as `email` is an Admin. The record goes to the
/// uid of the login, permission record or employee already tied to the email,
/// or to a fresh uid that sign-up will then bind to. An existing permission
/// record is left alone.
pub async fn bootstrap_admin(store: &dyn DocumentStore, email: &str) -> Result<bool, StoreError> {
    let email = normalize_email(email);
    let uid = match login_uid(store, &email).await? {
        Some(uid) => uid,
        None => provisioned_uid(store, &email)
            .await?
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    };
    if store.get(Collection::Users, &uid).await?.is_some() {
        return Ok(false);
    }

    let mut admin = AppUser::new(uid.clone(), Role::Admin);
    admin.email = Some(email.clone());
    store::save(store, Collection::Users, &uid, &admin, false).await?;
    info!("Bootstrapped admin permissions for {uid} <{email}>");
    Ok(true)
}

pub fn configure_permissions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/permissions/defaults", get(get_defaults))
        .route("/api/permissions/me", get(get_my_permissions))
        .route("/api/permissions/users", get(list_permission_rows))
        .route("/api/permissions/users/:id", get(get_user_permissions))
        .route("/api/permissions/users/:id/role", put(change_user_role))
        .route("/api/permissions/users/:id/access", put(set_user_access))
        .route("/api/permissions/save", post(save_permissions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::sync::broadcast;

    const ADMIN_EMAIL: &str = "admin@example.com";

    fn caller(uid: &str) -> CurrentUser {
        CurrentUser {
            uid: uid.to_string(),
            email: None,
            anonymous: false,
        }
    }

    #[tokio::test]
    async fn test_require_role_uses_employee_fallback() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthService::new(store.clone());
        assert!(bootstrap_admin(store.as_ref(), ADMIN_EMAIL).await.unwrap());

        let admin = auth.sign_up(ADMIN_EMAIL, "secret1", None).await.unwrap().user;
        let user = require_role(store.as_ref(), &admin, &[Role::Admin]).await.unwrap();
        assert_eq!(user.role, Role::Admin);

        let err = require_role(store.as_ref(), &caller("E9"), &[Role::Admin])
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_uid_cannot_be_claimed_by_another_email() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthService::new(store.clone());
        bootstrap_admin(store.as_ref(), ADMIN_EMAIL).await.unwrap();
        let admin_uid = provisioned_uid(store.as_ref(), ADMIN_EMAIL).await.unwrap().unwrap();

        let claim = auth
            .sign_up("attacker@evil.test", "secret1", Some(admin_uid.clone()))
            .await;
        assert!(matches!(claim, Err(crate::auth::AuthError::Forbidden(_))));

        let attacker = auth.sign_up("attacker@evil.test", "secret1", None).await.unwrap().user;
        assert_ne!(attacker.uid, admin_uid);
        let effective = load_effective_user(store.as_ref(), &attacker.uid).await.unwrap();
        assert_eq!(effective.role, Role::Employee);
    }

    #[tokio::test]
    async fn test_bootstrap_admin_follows_existing_login_and_employee() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthService::new(store.clone());
        let early = auth.sign_up(ADMIN_EMAIL, "secret1", None).await.unwrap().user;
        assert!(bootstrap_admin(store.as_ref(), "Admin@Example.com").await.unwrap());
        assert_eq!(load_effective_user(store.as_ref(), &early.uid).await.unwrap().role, Role::Admin);
        assert!(!bootstrap_admin(store.as_ref(), ADMIN_EMAIL).await.unwrap());

        store
            .set(Collection::Employees, "E7", serde_json::json!({"name": "Vee", "email": "vee@example.com"}), false)
            .await
            .unwrap();
        assert!(bootstrap_admin(store.as_ref(), "vee@example.com").await.unwrap());
        let vee = load_effective_user(store.as_ref(), "E7").await.unwrap();
        assert_eq!(vee.role, Role::Admin);
        assert_eq!(vee.email.as_deref(), Some("vee@example.com"));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_keeps_existing_record() {
        let store = MemoryStore::new();
        store
            .set(Collection::Employees, "E1", serde_json::json!({"name": "A", "email": "e1@example.com"}), false)
            .await
            .unwrap();
        store::save(&store, Collection::Users, "E1", &AppUser::new("E1", Role::Manager), false)
            .await
            .unwrap();
        assert!(!bootstrap_admin(&store, "e1@example.com").await.unwrap());
        let user = load_effective_user(&store, "E1").await.unwrap();
        assert_eq!(user.role, Role::Manager);
    }

    #[tokio::test]
    async fn test_persist_skips_users_without_login() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthService::new(store.clone());
        store
            .set(Collection::Employees, "E1", serde_json::json!({"name": "A", "email": "e1@example.com"}), false)
            .await
            .unwrap();
        auth.sign_up("e1@example.com", "secret1", Some("E1".to_string()))
            .await
            .unwrap();
        let (tx, _rx) = broadcast::channel(8);

        let report = persist_users(
            store.as_ref(),
            &auth,
            &tx,
            vec![AppUser::new("E1", Role::Manager), AppUser::new("E2", Role::Vp)],
        )
        .await;

        assert_eq!(report.saved, vec!["E1".to_string()]);
        assert_eq!(report.skipped, vec!["E2".to_string()]);
        assert!(report.failed.is_empty());
        assert!(store.get(Collection::Users, "E1").await.unwrap().is_some());
        assert!(store.get(Collection::Users, "E2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_users_indexes_by_id() {
        let store = MemoryStore::new();
        store::save(&store, Collection::Users, "E1", &AppUser::new("E1", Role::Avp), false)
            .await
            .unwrap();
        let users = load_users(&store).await.unwrap();
        assert_eq!(users["E1"].role, Role::Avp);
        assert_eq!(effective_user("E2", &users).role, Role::Employee);
    }
}
