//! Transaction support for the SQLite record store.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::{Map, Value};

use crate::core::{StoreTransaction, SyncChanges};
use crate::error::{CrudError, CrudResult, QueryError, TransactionError};
use crate::model::{ModelSchema, Record, RelationDef, RelationKind};
use crate::query::{SqlDialect, TrashedMode, WriteBuilder};

use super::rows;
use super::store::{BACKEND_NAME, find_record};

/// A SQLite write transaction.
pub struct SqliteTransaction {
    /// The connection used for this transaction.
    conn: Arc<Mutex<PooledConnection<SqliteConnectionManager>>>,
    /// Whether the transaction is still active.
    active: bool,
}

impl std::fmt::Debug for SqliteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTransaction")
            .field("active", &self.active)
            .finish()
    }
}

impl SqliteTransaction {
    /// Starts a transaction on the connection.
    pub(crate) fn new(conn: Arc<Mutex<PooledConnection<SqliteConnectionManager>>>) -> CrudResult<Self> {
        conn.lock().execute("BEGIN IMMEDIATE", []).map_err(|e| {
            CrudError::Transaction(TransactionError::RolledBack {
                reason: format!("Failed to begin transaction: {}", e),
            })
        })?;

        Ok(Self { conn, active: true })
    }

    fn ensure_active(&self) -> CrudResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(CrudError::Transaction(TransactionError::InvalidTransaction))
        }
    }

    fn builder() -> WriteBuilder {
        WriteBuilder::new(SqlDialect::Sqlite)
    }
}

fn record_key(model: &ModelSchema, record: &Record) -> CrudResult<Value> {
    record.key(&model.primary_key).cloned().ok_or_else(|| {
        QueryError::InvalidParameter {
            parameter: model.primary_key.clone(),
            message: format!("{} must be saved before syncing relations", model.name),
        }
        .into()
    })
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn find(
        &mut self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>> {
        self.ensure_active()?;
        let conn = self.conn.lock();
        find_record(&conn, model, id, trashed)
    }

    async fn save(&mut self, model: &ModelSchema, record: &mut Record) -> CrudResult<()> {
        self.ensure_active()?;
        let conn = self.conn.lock();

        if !record.exists() {
            let attributes: Map<String, Value> = record
                .attributes()
                .iter()
                .filter(|(k, v)| !(*k == &model.primary_key && v.is_null()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let insert = Self::builder().insert(&model.table, &attributes, Some(model.primary_key.as_str()));
            rows::execute(&conn, &insert)?;
            if record.key(&model.primary_key).is_none() {
                record.set(model.primary_key.clone(), Value::from(conn.last_insert_rowid()));
            }
            tracing::debug!(table = %model.table, "inserted row");
        } else {
            let mut dirty = record.dirty();
            dirty.remove(&model.primary_key);
            if !dirty.is_empty() {
                let key = record_key(model, record)?;
                let update = Self::builder().update(&model.table, &model.primary_key, &key, &dirty);
                rows::execute(&conn, &update)?;
                tracing::debug!(table = %model.table, columns = dirty.len(), "updated row");
            }
        }

        record.sync_original();
        Ok(())
    }

    async fn sync_relation(
        &mut self,
        model: &ModelSchema,
        record: &mut Record,
        relation: &RelationDef,
        keys: &[Value],
    ) -> CrudResult<SyncChanges> {
        self.ensure_active()?;
        let id = record_key(model, record)?;
        let builder = Self::builder();
        let conn = self.conn.lock();

        match (relation.kind, &relation.pivot) {
            (RelationKind::BelongsToMany, Some(pivot)) => {
                let current = rows::query_column(
                    &conn,
                    &builder.pluck(&pivot.table, &pivot.related_pivot_key, &pivot.foreign_pivot_key, &id),
                )?;
                let changes = SyncChanges::diff(&current, keys);
                for key in &changes.detached {
                    rows::execute(&conn, &builder.detach(pivot, &id, key))?;
                }
                for key in &changes.attached {
                    rows::execute(&conn, &builder.attach(pivot, &id, key))?;
                }
                Ok(changes)
            }
            (RelationKind::HasMany, _) => {
                let current = rows::query_column(
                    &conn,
                    &builder.pluck(&relation.related_table, &relation.related_key, &relation.foreign_key, &id),
                )?;
                let changes = SyncChanges::diff(&current, keys);
                for key in &changes.detached {
                    let fragment = builder.set_column(
                        &relation.related_table,
                        &relation.foreign_key,
                        &Value::Null,
                        &relation.related_key,
                        key,
                    );
                    rows::execute(&conn, &fragment)?;
                }
                for key in &changes.attached {
                    let fragment = builder.set_column(
                        &relation.related_table,
                        &relation.foreign_key,
                        &id,
                        &relation.related_key,
                        key,
                    );
                    rows::execute(&conn, &fragment)?;
                }
                Ok(changes)
            }
            _ => Err(QueryError::UnsupportedCondition {
                backend: BACKEND_NAME.to_string(),
                condition: format!("sync of {:?} relation '{}'", relation.kind, relation.name),
            }
            .into()),
        }
    }

    async fn commit(mut self: Box<Self>) -> CrudResult<()> {
        self.ensure_active()?;

        let conn = self.conn.lock();
        conn.execute("COMMIT", []).map_err(|e| {
            CrudError::Transaction(TransactionError::RolledBack {
                reason: format!("Commit failed: {}", e),
            })
        })?;
        drop(conn);

        self.active = false;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> CrudResult<()> {
        self.ensure_active()?;

        let conn = self.conn.lock();
        conn.execute("ROLLBACK", []).map_err(|e| {
            CrudError::Transaction(TransactionError::RolledBack {
                reason: format!("Rollback failed: {}", e),
            })
        })?;
        drop(conn);

        self.active = false;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        // If transaction wasn't explicitly committed or rolled back, roll it back
        if self.active {
            tracing::warn!("sqlite transaction dropped while active; rolling back");
            let conn = self.conn.lock();
            let _ = conn.execute("ROLLBACK", []);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::SqliteStore;
    use crate::core::RecordStore;
    use crate::model::ConnectionInfo;
    use serde_json::json;

    fn setup() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT);
                 CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE post_tag (post_id INTEGER, tag_id INTEGER);
                 CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER, body TEXT);
                 INSERT INTO tags (id, name) VALUES (1, 'a'), (2, 'b'), (3, 'c');
                 INSERT INTO comments (id, post_id, body) VALUES (10, NULL, 'x'), (11, NULL, 'y');",
            )
            .unwrap();
        store
    }

    fn posts() -> ModelSchema {
        ModelSchema::new("Post", "posts", ConnectionInfo::sqlite())
            .with_relation(RelationDef::belongs_to_many(
                "tags", "tags", "post_tag", "post_id", "tag_id",
            ))
            .with_relation(RelationDef::has_many("comments", "comments", "post_id"))
    }

    #[tokio::test]
    async fn test_insert_assigns_rowid_then_update_writes_dirty() {
        let store = setup();
        let model = posts();

        let mut tx = store.begin().await.unwrap();
        let mut record = Record::new();
        record.set("title", json!("Hello"));
        tx.save(&model, &mut record).await.unwrap();
        assert_eq!(record.key("id"), Some(&json!(1)));

        record.set("title", json!("Changed"));
        tx.save(&model, &mut record).await.unwrap();
        tx.commit().await.unwrap();

        let found = store.find(&model, &json!(1), TrashedMode::Exclude).await.unwrap().unwrap();
        assert_eq!(found.get("title"), Some(&json!("Changed")));
    }

    #[tokio::test]
    async fn test_sync_pivot_and_has_many() {
        let store = setup();
        let model = posts();
        let tags = model.relation("tags").unwrap().clone();
        let comments = model.relation("comments").unwrap().clone();

        let mut tx = store.begin().await.unwrap();
        let mut record = Record::new();
        record.set("title", json!("Hello"));
        tx.save(&model, &mut record).await.unwrap();

        let first = tx.sync_relation(&model, &mut record, &tags, &[json!(1), json!(2)]).await.unwrap();
        assert_eq!(first.attached, vec![json!(1), json!(2)]);
        let second = tx.sync_relation(&model, &mut record, &tags, &[json!(2), json!(3)]).await.unwrap();
        assert_eq!(second.attached, vec![json!(3)]);
        assert_eq!(second.detached, vec![json!(1)]);

        let linked = tx.sync_relation(&model, &mut record, &comments, &[json!(10)]).await.unwrap();
        assert_eq!(linked.attached, vec![json!(10)]);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = setup();
        let model = posts();

        let mut tx = store.begin().await.unwrap();
        let mut record = Record::new();
        record.set("title", json!("Gone"));
        tx.save(&model, &mut record).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.find(&model, &json!(1), TrashedMode::Exclude).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let store = setup();
        let model = posts();
        {
            let mut tx = store.begin().await.unwrap();
            let mut record = Record::new();
            record.set("title", json!("Dropped"));
            tx.save(&model, &mut record).await.unwrap();
        }
        assert!(store.find(&model, &json!(1), TrashedMode::Exclude).await.unwrap().is_none());
    }
}
