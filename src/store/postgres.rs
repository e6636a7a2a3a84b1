use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::PgConnection;
use log::info;
use serde_json::Value;

use super::schema::documents;
use super::{prepare_document, Collection, DocumentStore, StoreError};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

const CREATE_DOCUMENTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS documents (
    collection VARCHAR NOT NULL,
    id VARCHAR NOT NULL,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (collection, id)
)";

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = documents)]
pub struct DocumentRecord {
    pub collection: String,
    pub id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn create_pool(database_url: &str, pool_size: u32) -> Result<DbPool, StoreError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| StoreError::Backend(e.to_string()))
}

/// Document store over a single Postgres JSONB table.
pub struct PgDocumentStore {
    pool: DbPool,
}

impl PgDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = checkout(&self.pool)?;
        diesel::sql_query(CREATE_DOCUMENTS_TABLE).execute(&mut conn)?;
        info!("Document table ready");
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = checkout(&pool)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

fn checkout(
    pool: &DbPool,
) -> Result<PooledConnection<ConnectionManager<PgConnection>>, StoreError> {
    pool.get().map_err(|e| StoreError::Backend(e.to_string()))
}

fn upsert(
    conn: &mut PgConnection,
    collection: Collection,
    id: &str,
    doc: Value,
    merge: bool,
) -> Result<Value, StoreError> {
    let existing: Option<Value> = documents::table
        .find((collection.as_str(), id))
        .select(documents::data)
        .for_update()
        .first(conn)
        .optional()?;

    let now = Utc::now();
    let prepared = prepare_document(existing.as_ref(), id, doc, merge, now)?;
    let record = DocumentRecord {
        collection: collection.as_str().to_string(),
        id: id.to_string(),
        data: prepared.clone(),
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(documents::table)
        .values(&record)
        .on_conflict((documents::collection, documents::id))
        .do_update()
        .set((
            documents::data.eq(&prepared),
            documents::updated_at.eq(now),
        ))
        .execute(conn)?;

    Ok(prepared)
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            documents::table
                .find((collection.as_str(), id))
                .select(documents::data)
                .first::<Value>(conn)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        self.with_conn(move |conn| {
            documents::table
                .filter(documents::collection.eq(collection.as_str()))
                .order(documents::id.asc())
                .select(documents::data)
                .load::<Value>(conn)
                .map_err(StoreError::from)
        })
        .await
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        doc: Value,
        merge: bool,
    ) -> Result<Value, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| upsert(conn, collection, &id, doc, merge))
        })
        .await
    }

    async fn batch_set(
        &self,
        collection: Collection,
        docs: Vec<(String, Value)>,
    ) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let count = docs.len();
                for (id, doc) in docs {
                    upsert(conn, collection, &id, doc, true)?;
                }
                Ok(count)
            })
        })
        .await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(documents::table.find((collection.as_str(), id)))
                .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }
}
