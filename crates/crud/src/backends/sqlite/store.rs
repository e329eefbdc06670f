//! SQLite record store.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{RecordStore, StoreTransaction, key_text};
use crate::error::{BackendError, CrudError, CrudResult, QueryError};
use crate::model::{ModelSchema, Record};
use crate::query::sql::SqlCompiler;
use crate::query::{CompiledQuery, EagerLoad, SqlDialect, SqlStatement, TrashedMode, WriteBuilder};
use crate::types::{PageRequest, Paginated};

use super::rows;
use super::transaction::SqliteTransaction;

pub(crate) const BACKEND_NAME: &str = "sqlite";

/// SQLite record store.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteStoreConfig,
    is_memory: bool,
}

impl Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Maximum number of connections in the pool. In-memory databases always
    /// use a single connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }
}

impl SqliteStore {
    /// Creates a new in-memory SQLite store.
    pub fn in_memory() -> CrudResult<Self> {
        Self::with_config(":memory:", SqliteStoreConfig::default())
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> CrudResult<Self> {
        Self::with_config(path, SqliteStoreConfig::default())
    }

    /// Creates a store with custom configuration.
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteStoreConfig) -> CrudResult<Self> {
        let is_memory = path.as_ref().to_string_lossy() == ":memory:";

        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let foreign_keys = config.enable_foreign_keys;
        let wal = config.enable_wal && !is_memory;
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if foreign_keys {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            }
            if wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok(())
        });

        // Every connection to ":memory:" is its own database
        let builder = if is_memory {
            Pool::builder()
                .max_size(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            Pool::builder().max_size(config.max_connections)
        };

        let pool = builder
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| {
                CrudError::Backend(BackendError::ConnectionFailed {
                    backend_name: BACKEND_NAME.to_string(),
                    message: e.to_string(),
                })
            })?;

        tracing::debug!(is_memory, "opened sqlite record store");
        Ok(Self {
            pool,
            config,
            is_memory,
        })
    }

    /// Runs one or more statements outside any transaction, e.g. to create
    /// tables.
    pub fn execute_batch(&self, sql: &str) -> CrudResult<()> {
        let conn = self.connection()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    fn connection(&self) -> CrudResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            CrudError::Backend(BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: e.to_string(),
            })
        })
    }
}

/// Rejects statements compiled for another engine or dialect.
pub(crate) fn sqlite_statement(query: &CompiledQuery) -> CrudResult<&SqlStatement> {
    match query {
        CompiledQuery::Sql(stmt) if stmt.dialect == SqlDialect::Sqlite => Ok(stmt),
        CompiledQuery::Sql(_) => Err(QueryError::UnsupportedQuery {
            backend: BACKEND_NAME.to_string(),
            kind: "postgres sql".to_string(),
        }
        .into()),
        other => Err(QueryError::UnsupportedQuery {
            backend: BACKEND_NAME.to_string(),
            kind: other.kind().to_string(),
        }
        .into()),
    }
}

/// Looks up one record by key within a soft-delete scope.
pub(crate) fn find_record(
    conn: &Connection,
    model: &ModelSchema,
    id: &Value,
    trashed: TrashedMode,
) -> CrudResult<Option<Record>> {
    let mut query = model.new_query();
    if let Some(condition) = model.trashed_condition(trashed) {
        query = query.filter(condition);
    }
    let query = query.where_eq(model.primary_key.clone(), id.clone());
    let stmt = SqlCompiler::new(SqlDialect::Sqlite, model, BACKEND_NAME).compile(&query)?;

    let mut found = rows::query_rows(conn, &stmt.paged_select(1, 0), &stmt.json_columns)?;
    Ok(found.pop().map(Record::from_storage))
}

/// Loads to-one relations for a fetched page with one query per relation.
fn load_eager(conn: &Connection, records: &mut [Record], eager: &[EagerLoad]) -> CrudResult<()> {
    let builder = WriteBuilder::new(SqlDialect::Sqlite);
    for load in eager {
        let mut keys: Vec<Value> = Vec::new();
        for record in records.iter() {
            if let Some(key) = record.get(&load.parent_key).filter(|k| !k.is_null())
                && !keys.contains(key)
            {
                keys.push(key.clone());
            }
        }

        let mut related: HashMap<String, Value> = HashMap::new();
        if !keys.is_empty() {
            let fragment =
                builder.select_in(&load.relation.related_table, &load.related_column, &keys);
            for row in rows::query_rows(conn, &fragment, &[])? {
                if let Some(key) = row.get(&load.related_column) {
                    related
                        .entry(key_text(key))
                        .or_insert_with(|| Value::Object(row.clone()));
                }
            }
        }

        for record in records.iter_mut() {
            let value = record
                .get(&load.parent_key)
                .and_then(|key| related.get(&key_text(key)))
                .cloned()
                .unwrap_or(Value::Null);
            record.set_relation(load.relation.name.clone(), value);
        }
    }
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn paginate(
        &self,
        _model: &ModelSchema,
        query: &CompiledQuery,
        page: PageRequest,
    ) -> CrudResult<Paginated<Record>> {
        let stmt = sqlite_statement(query)?;
        let conn = self.connection()?;

        let total = rows::count(&conn, &stmt.count)?;
        let fragment = stmt.paged_select(page.limit(), page.offset());
        tracing::debug!(sql = %fragment.sql, params = fragment.params.len(), "running listing query");

        let mut records: Vec<Record> = rows::query_rows(&conn, &fragment, &stmt.json_columns)?
            .into_iter()
            .map(Record::from_storage)
            .collect();
        load_eager(&conn, &mut records, &stmt.eager)?;

        Ok(Paginated::new(records, total, page))
    }

    async fn find(
        &self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>> {
        let conn = self.connection()?;
        find_record(&conn, model, id, trashed)
    }

    async fn begin(&self) -> CrudResult<Box<dyn StoreTransaction>> {
        let conn = self.connection()?;
        Ok(Box::new(SqliteTransaction::new(Arc::new(Mutex::new(conn)))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionInfo, RelationDef};
    use crate::query::SortDirection;
    use serde_json::json;

    fn setup() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE categories (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE posts (
                     id INTEGER PRIMARY KEY,
                     title TEXT,
                     category_id INTEGER,
                     deleted_at TEXT
                 );
                 INSERT INTO categories (id, name) VALUES (1, 'News'), (2, 'Tech');
                 INSERT INTO posts (id, title, category_id, deleted_at) VALUES
                     (1, 'First', 1, NULL),
                     (2, 'Second', 2, NULL),
                     (3, 'Third', NULL, '2024-01-01T00:00:00Z');",
            )
            .unwrap();
        store
    }

    fn posts() -> ModelSchema {
        ModelSchema::new("Post", "posts", ConnectionInfo::sqlite())
            .with_soft_deletes()
            .with_relation(RelationDef::belongs_to("category", "categories", "category_id"))
    }

    #[tokio::test]
    async fn test_paginate_with_eager_load() {
        let store = setup();
        let model = posts();
        let query = model
            .new_query()
            .filter(model.trashed_condition(TrashedMode::Exclude).unwrap())
            .with("category")
            .order_by("id", SortDirection::Asc);
        let stmt = SqlCompiler::new(SqlDialect::Sqlite, &model, BACKEND_NAME)
            .compile(&query)
            .unwrap();

        let page = store
            .paginate(&model, &CompiledQuery::Sql(stmt), PageRequest::new(1, 10))
            .await
            .unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(page.data[0].get("title"), Some(&json!("First")));
        assert_eq!(page.data[1].relation("category").unwrap()["name"], json!("Tech"));
    }

    #[tokio::test]
    async fn test_find_respects_trashed_scope() {
        let store = setup();
        let model = posts();
        assert!(store.find(&model, &json!(3), TrashedMode::Exclude).await.unwrap().is_none());
        assert!(store.find(&model, &json!(3), TrashedMode::With).await.unwrap().is_some());
    }

    #[test]
    fn test_in_memory_uses_single_connection() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_memory());
        assert_eq!(store.pool.max_size(), 1);
    }
}
