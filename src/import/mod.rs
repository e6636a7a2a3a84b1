pub mod remap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::auth::CurrentUser;
use crate::permissions::{require_role, GuardError, Role};
use crate::shared::state::AppState;
use crate::store::{Collection, StoreError};

pub use remap::remap_employee_record;

/// Collections a JSON file may be imported into.
pub const IMPORTABLE: [Collection; 5] = [
    Collection::KpiCatalog,
    Collection::Departments,
    Collection::Positions,
    Collection::Roles,
    Collection::Employees,
];

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Expected an array under \"{expected}\" but found {}", describe_found(.found))]
    MissingArray { expected: String, found: Vec<String> },
    #[error("Collection {0} cannot be imported")]
    NotImportable(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Store error: {0}")]
    Store(String),
}

fn describe_found(found: &[String]) -> String {
    if found.is_empty() {
        "no keys".to_string()
    } else {
        format!("keys: {}", found.join(", "))
    }
}

impl From<StoreError> for ImportError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<GuardError> for ImportError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Forbidden(msg) => Self::Forbidden(msg),
            GuardError::Store(e) => Self::Store(e.to_string()),
        }
    }
}

impl IntoResponse for ImportError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::InvalidJson(_) | Self::MissingArray { .. } | Self::NotImportable(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn parse_payload(text: &str) -> Result<Value, ImportError> {
    serde_json::from_str(text).map_err(|e| ImportError::InvalidJson(e.to_string()))
}

/// The only shape check an import gets: `payload[key]` must be an array.
pub fn extract_array(payload: &Value, key: &str) -> Result<Vec<Value>, ImportError> {
    match payload.get(key) {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(ImportError::MissingArray {
            expected: key.to_string(),
            found: payload
                .as_object()
                .map(|fields| fields.keys().cloned().collect())
                .unwrap_or_default(),
        }),
    }
}

/// Pulls the records for `collection` out of an import payload. Employee
/// files may also be a bare array of spreadsheet rows.
pub fn records_for(collection: Collection, payload: &Value) -> Result<Vec<Value>, ImportError> {
    if collection != Collection::Employees {
        return extract_array(payload, collection.as_str());
    }
    let rows = match payload {
        Value::Array(rows) => rows.clone(),
        other => extract_array(other, collection.as_str())?,
    };
    Ok(rows.iter().map(remap_employee_record).collect())
}

fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Splits records into `(id, doc)` batch entries. Records without a usable
/// id are dropped and counted.
pub fn partition_by_id(collection: Collection, records: Vec<Value>) -> (Vec<(String, Value)>, usize) {
    let mut entries = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for (index, record) in records.into_iter().enumerate() {
        match record_id(&record) {
            Some(id) if record.is_object() => entries.push((id, record)),
            _ => {
                warn!("Skipping {collection} record #{index}: missing id");
                skipped += 1;
            }
        }
    }
    (entries, skipped)
}

/// Per-user scratch copies of imported data that never reach the store.
#[derive(Debug, Default)]
pub struct ImportSessions {
    inner: RwLock<HashMap<String, HashMap<Collection, Vec<Value>>>>,
}

impl ImportSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the user's buffer for `collection`.
    pub async fn put(&self, uid: &str, collection: Collection, records: Vec<Value>) {
        let mut sessions = self.inner.write().await;
        sessions
            .entry(uid.to_string())
            .or_default()
            .insert(collection, records);
    }

    pub async fn get(&self, uid: &str, collection: Collection) -> Vec<Value> {
        let sessions = self.inner.read().await;
        sessions
            .get(uid)
            .and_then(|buffers| buffers.get(&collection))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear(&self, uid: &str) -> bool {
        self.inner.write().await.remove(uid).is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportTarget {
    #[default]
    Session,
    Store,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub target: ImportTarget,
    pub payload: Option<Value>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub collection: Collection,
    pub target: ImportTarget,
    pub written: usize,
    pub skipped: usize,
}

pub async fn import_collection(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    user: CurrentUser,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportReport>, ImportError> {
    let collection = collection
        .parse::<Collection>()
        .ok()
        .filter(|c| IMPORTABLE.contains(c))
        .ok_or_else(|| ImportError::NotImportable(collection.clone()))?;

    let payload = match (req.payload, req.text) {
        (Some(payload), _) => payload,
        (None, Some(text)) => parse_payload(&text)?,
        (None, None) => return Err(ImportError::InvalidJson("empty import".to_string())),
    };
    let records = records_for(collection, &payload)?;
    let (entries, skipped) = partition_by_id(collection, records);

    let written = entries.len();
    match req.target {
        ImportTarget::Session => {
            let docs = entries.into_iter().map(|(_, doc)| doc).collect();
            state.import_sessions.put(&user.uid, collection, docs).await;
        }
        ImportTarget::Store => {
            require_role(state.store.as_ref(), &user, &[Role::Admin]).await?;
            state.store.batch_set(collection, entries).await?;
        }
    }

    info!(
        "Imported {written} {collection} records into {:?} for {} ({skipped} skipped)",
        req.target, user.uid
    );
    Ok(Json(ImportReport {
        collection,
        target: req.target,
        written,
        skipped,
    }))
}

pub async fn get_session_collection(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    user: CurrentUser,
) -> Result<Json<Vec<Value>>, ImportError> {
    let collection = collection
        .parse::<Collection>()
        .map_err(|_| ImportError::NotImportable(collection.clone()))?;
    Ok(Json(state.import_sessions.get(&user.uid, collection).await))
}

pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Json<Value> {
    let cleared = state.import_sessions.clear(&user.uid).await;
    Json(serde_json::json!({ "cleared": cleared }))
}

pub fn configure_import_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/import/:collection", post(import_collection))
        .route("/api/import/session/:collection", get(get_session_collection))
        .route("/api/import/session", delete(clear_session))
}
