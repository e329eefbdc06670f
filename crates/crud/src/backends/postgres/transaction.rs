//! Transaction support for the PostgreSQL record store.

use async_trait::async_trait;
use deadpool_postgres::Client;
use serde_json::{Map, Value};

use crate::core::{StoreTransaction, SyncChanges};
use crate::error::{CrudError, CrudResult, QueryError, TransactionError};
use crate::model::{ModelSchema, Record, RelationDef, RelationKind};
use crate::query::{SqlDialect, TrashedMode, WriteBuilder};

use super::store::{BACKEND_NAME, execute, find_record, query_rows};

/// A PostgreSQL write transaction.
///
/// Wraps a pooled client with an open transaction. A transaction dropped
/// while active detaches its connection from the pool and closes it, which
/// makes the server roll back.
pub struct PostgresTransaction {
    /// Option so we can take it during commit/rollback.
    client: Option<Client>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction")
            .field("active", &self.client.is_some())
            .finish()
    }
}

impl PostgresTransaction {
    pub(crate) async fn new(client: Client) -> CrudResult<Self> {
        client.batch_execute("BEGIN").await.map_err(|e| {
            CrudError::Transaction(TransactionError::RolledBack {
                reason: format!("Failed to begin transaction: {}", e),
            })
        })?;

        Ok(Self {
            client: Some(client),
        })
    }

    fn client(&self) -> CrudResult<&Client> {
        self.client
            .as_ref()
            .ok_or(CrudError::Transaction(TransactionError::InvalidTransaction))
    }

    fn builder() -> WriteBuilder {
        WriteBuilder::new(SqlDialect::Postgres)
    }

    async fn finish(&mut self, statement: &str) -> CrudResult<()> {
        let client = self
            .client
            .take()
            .ok_or(CrudError::Transaction(TransactionError::InvalidTransaction))?;
        client.batch_execute(statement).await.map_err(|e| {
            CrudError::Transaction(TransactionError::RolledBack {
                reason: format!("{} failed: {}", statement, e),
            })
        })
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
impl StoreTransaction for PostgresTransaction {
    async fn find(
        &mut self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>> {
        find_record(&**self.client()?, model, id, trashed).await
    }

    async fn save(&mut self, model: &ModelSchema, record: &mut Record) -> CrudResult<()> {
        let client = self.client()?;

        if !record.exists() {
            let attributes: Map<String, Value> = record
                .attributes()
                .iter()
                .filter(|(k, v)| !(*k == &model.primary_key && v.is_null()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let insert =
                Self::builder().insert(&model.table, &attributes, Some(model.primary_key.as_str()));
            let mut returned = query_rows(&**client, &insert).await?;
            if record.key(&model.primary_key).is_none()
                && let Some(key) = returned.pop().and_then(|mut row| row.remove(&model.primary_key))
            {
                record.set(model.primary_key.clone(), key);
            }
            tracing::debug!(table = %model.table, "inserted row");
        } else {
            let mut dirty = record.dirty();
            dirty.remove(&model.primary_key);
            if !dirty.is_empty() {
                let key = record_key(model, record)?;
                let update = Self::builder().update(&model.table, &model.primary_key, &key, &dirty);
                execute(&**client, &update).await?;
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
        let id = record_key(model, record)?;
        let builder = Self::builder();
        let client = &**self.client()?;

        let (current_sql, related_key_column) = match (relation.kind, &relation.pivot) {
            (RelationKind::BelongsToMany, Some(pivot)) => (
                builder.pluck(&pivot.table, &pivot.related_pivot_key, &pivot.foreign_pivot_key, &id),
                pivot.related_pivot_key.as_str(),
            ),
            (RelationKind::HasMany, _) => (
                builder.pluck(&relation.related_table, &relation.related_key, &relation.foreign_key, &id),
                relation.related_key.as_str(),
            ),
            _ => {
                return Err(QueryError::UnsupportedCondition {
                    backend: BACKEND_NAME.to_string(),
                    condition: format!("sync of {:?} relation '{}'", relation.kind, relation.name),
                }
                .into());
            }
        };

        let current: Vec<Value> = query_rows(client, &current_sql)
            .await?
            .into_iter()
            .filter_map(|mut row| row.remove(related_key_column))
            .collect();
        let changes = SyncChanges::diff(&current, keys);

        for key in &changes.detached {
            let fragment = match &relation.pivot {
                Some(pivot) => builder.detach(pivot, &id, key),
                None => builder.set_column(
                    &relation.related_table,
                    &relation.foreign_key,
                    &Value::Null,
                    &relation.related_key,
                    key,
                ),
            };
            execute(client, &fragment).await?;
        }
        for key in &changes.attached {
            let fragment = match &relation.pivot {
                Some(pivot) => builder.attach(pivot, &id, key),
                None => builder.set_column(
                    &relation.related_table,
                    &relation.foreign_key,
                    &id,
                    &relation.related_key,
                    key,
                ),
            };
            execute(client, &fragment).await?;
        }
        Ok(changes)
    }

    async fn commit(mut self: Box<Self>) -> CrudResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> CrudResult<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::warn!("postgres transaction dropped without commit or rollback; closing connection");
            drop(Client::take(client));
        }
    }
}
