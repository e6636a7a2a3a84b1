use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{prepare_document, Collection, DocumentStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .await
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(&collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        doc: Value,
        merge: bool,
    ) -> Result<Value, StoreError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();
        let prepared = prepare_document(docs.get(id), id, doc, merge, Utc::now())?;
        docs.insert(id.to_string(), prepared.clone());
        Ok(prepared)
    }

    async fn batch_set(
        &self,
        collection: Collection,
        docs: Vec<(String, Value)>,
    ) -> Result<usize, StoreError> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection).or_default();
        let now = Utc::now();

        // Prepare everything first so a bad document leaves the collection untouched.
        let mut prepared = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            let merged = prepare_document(stored.get(&id), &id, doc, true, now)?;
            prepared.push((id, merged));
        }
        let count = prepared.len();
        stored.extend(prepared);
        Ok(count)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(&collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }
}
