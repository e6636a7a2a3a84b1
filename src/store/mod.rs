pub mod events;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub use events::{spawn_delete, spawn_error_listener, StoreErrorEvent};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgDocumentStore;

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    KpiCatalog,
    Departments,
    Positions,
    Roles,
    Employees,
    Users,
    IndividualKpis,
    KpiSubmissions,
    /// Email/password logins keyed by normalized email. Never served or imported.
    Logins,
}

impl Collection {
    pub const ALL: [Collection; 9] = [
        Self::KpiCatalog,
        Self::Departments,
        Self::Positions,
        Self::Roles,
        Self::Employees,
        Self::Users,
        Self::IndividualKpis,
        Self::KpiSubmissions,
        Self::Logins,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KpiCatalog => "kpi_catalog",
            Self::Departments => "departments",
            Self::Positions => "positions",
            Self::Roles => "roles",
            Self::Employees => "employees",
            Self::Users => "users",
            Self::IndividualKpis => "individual_kpis",
            Self::KpiSubmissions => "kpi_submissions",
            Self::Logins => "logins",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| StoreError::UnknownCollection(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: Collection, id: String },
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Schema-less document storage keyed by collection and string id.
///
/// Every write stamps `createdAt` on first insert and `updatedAt` on every
/// write. `merge` overlays top-level fields onto the stored document instead
/// of replacing it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        doc: Value,
        merge: bool,
    ) -> Result<Value, StoreError>;

    /// Merges all documents in as one batch. Either every document lands or none do.
    async fn batch_set(
        &self,
        collection: Collection,
        docs: Vec<(String, Value)>,
    ) -> Result<usize, StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError>;
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn prepare_document(
    existing: Option<&Value>,
    id: &str,
    incoming: Value,
    merge: bool,
    now: DateTime<Utc>,
) -> Result<Value, StoreError> {
    let Value::Object(incoming) = incoming else {
        return Err(StoreError::Serialization(
            "document must be a JSON object".to_string(),
        ));
    };

    let existing_fields = existing.and_then(Value::as_object);
    let mut doc: Map<String, Value> = match existing_fields {
        Some(fields) if merge => fields.clone(),
        _ => Map::new(),
    };
    for (key, value) in incoming {
        doc.insert(key, value);
    }

    let created_at = existing_fields
        .and_then(|fields| fields.get(CREATED_AT))
        .cloned()
        .unwrap_or_else(|| Value::String(timestamp(now)));
    doc.insert("id".to_string(), Value::String(id.to_string()));
    doc.insert(CREATED_AT.to_string(), created_at);
    doc.insert(UPDATED_AT.to_string(), Value::String(timestamp(now)));

    Ok(Value::Object(doc))
}

pub async fn fetch<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(collection, id).await? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

/// Loads every document of a collection, skipping the ones that do not fit `T`.
pub async fn fetch_all<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
) -> Result<Vec<T>, StoreError> {
    let docs = store.list(collection).await?;
    let mut items = Vec::with_capacity(docs.len());
    for doc in docs {
        let id = doc.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<T>(doc) {
            Ok(item) => items.push(item),
            Err(e) => warn!("Skipping malformed {collection} document {id}: {e}"),
        }
    }
    Ok(items)
}

pub async fn save<T: Serialize + DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
    id: &str,
    value: &T,
    merge: bool,
) -> Result<T, StoreError> {
    let doc = serde_json::to_value(value)?;
    let stored = store.set(collection, id, doc, merge).await?;
    Ok(serde_json::from_value(stored)?)
}
