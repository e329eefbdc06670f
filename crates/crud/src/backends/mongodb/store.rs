//! MongoDB record store.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{RecordStore, StoreTransaction};
use crate::error::{BackendError, CrudError, CrudResult, QueryError};
use crate::model::{ModelSchema, Record};
use crate::query::document::DocumentCompiler;
use crate::query::{CompiledQuery, DocumentQuery, TrashedMode};
use crate::types::{PageRequest, Paginated};

use super::convert::{key_filter, listing_pipeline, to_bson, to_document, to_map};
use super::transaction::MongoTransaction;

pub(crate) const BACKEND_NAME: &str = "mongodb";

/// Configuration for the MongoDB record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    /// Connection string.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database name.
    #[serde(default = "default_database")]
    pub database: String,

    /// Application name reported to the server.
    #[serde(default)]
    pub app_name: Option<String>,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "helios".to_string()
}

fn default_max_pool_size() -> u32 {
    10
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: default_database(),
            app_name: None,
            max_pool_size: default_max_pool_size(),
        }
    }
}

impl MongoConfig {
    /// Builds a configuration from defaults overridden by `CRUD_MONGO_*`
    /// variables: `URI`, `DATABASE`, `APP_NAME` and `MAX_POOL_SIZE`.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(format!("CRUD_MONGO_{}", key)).ok();
        let defaults = Self::default();
        Self {
            uri: var("URI").unwrap_or(defaults.uri),
            database: var("DATABASE").unwrap_or(defaults.database),
            app_name: var("APP_NAME"),
            max_pool_size: var("MAX_POOL_SIZE")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.max_pool_size),
        }
    }
}

/// MongoDB record store.
///
/// Runs compiled [`DocumentQuery`]s as aggregation pipelines. Its
/// transactions have the same weaker guarantee as the in-memory document
/// store: each write applies on its own and rollback cannot undo it.
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
    config: MongoConfig,
}

impl Debug for MongoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStore")
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl MongoStore {
    /// Creates a store and verifies connectivity.
    pub async fn new(config: MongoConfig) -> CrudResult<Self> {
        let mut options = ClientOptions::parse(&config.uri).await.map_err(connection_error)?;
        options.app_name = config.app_name.clone();
        options.max_pool_size = Some(config.max_pool_size);
        let client = Client::with_options(options).map_err(connection_error)?;
        let database = client.database(&config.database);

        // Verify connectivity
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(connection_error)?;

        tracing::debug!(database = %config.database, "opened mongodb record store");
        Ok(Self { database, config })
    }

    /// Creates a store from environment variables, see
    /// [`MongoConfig::from_env`].
    pub async fn from_env() -> CrudResult<Self> {
        Self::new(MongoConfig::from_env()).await
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Inserts documents directly, assigning an `_id` where missing.
    /// Returns the ids in input order.
    pub async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> CrudResult<Vec<Value>> {
        let mut ids = Vec::with_capacity(documents.len());
        let mut batch = Vec::with_capacity(documents.len());
        for document in documents {
            let Value::Object(mut document) = document else {
                return Err(QueryError::InvalidParameter {
                    parameter: collection.to_string(),
                    message: "documents must be JSON objects".to_string(),
                }
                .into());
            };
            let id = document
                .get("_id")
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(new_id);
            document.insert("_id".to_string(), id.clone());
            batch.push(to_document(document)?);
            ids.push(id);
        }
        if !batch.is_empty() {
            collection_of(&self.database, collection).insert_many(batch).await?;
        }
        Ok(ids)
    }

    async fn run(&self, query: &DocumentQuery, page: PageRequest) -> CrudResult<Paginated<Record>> {
        let collection = collection_of(&self.database, &query.collection);
        let filter = to_document(match &query.filter {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        })?;
        let total = collection.count_documents(filter).await?;

        let pipeline = listing_pipeline(query, page)?;
        let documents: Vec<Document> = collection.aggregate(pipeline).await?.try_collect().await?;

        let data = documents
            .into_iter()
            .map(|document| {
                let mut attributes = to_map(document);
                query.apply_aliases(&mut attributes);
                let joined: Vec<(String, Value)> = query
                    .lookups
                    .iter()
                    .map(|lookup| {
                        let value = attributes.remove(&lookup.as_field).unwrap_or(Value::Null);
                        (lookup.as_field.clone(), value)
                    })
                    .collect();
                let mut record = Record::from_storage(attributes);
                for (name, value) in joined {
                    record.set_relation(name, value);
                }
                record
            })
            .collect();

        Ok(Paginated::new(data, total, page))
    }
}

pub(crate) fn new_id() -> Value {
    Value::String(uuid::Uuid::new_v4().to_string())
}

pub(crate) fn collection_of(database: &Database, name: &str) -> Collection<Document> {
    database.collection::<Document>(name)
}

fn connection_error(err: mongodb::error::Error) -> CrudError {
    CrudError::Backend(BackendError::ConnectionFailed {
        backend_name: BACKEND_NAME.to_string(),
        message: err.to_string(),
    })
}

/// Filter for one record by key within a soft-delete scope.
pub(crate) fn find_filter(model: &ModelSchema, id: &Value, trashed: TrashedMode) -> CrudResult<Document> {
    let key = key_filter(&model.primary_key, id)?;
    let Some(condition) = model.trashed_condition(trashed) else {
        return Ok(key);
    };
    let scoped = DocumentCompiler::new(model).compile(&model.new_query().filter(condition))?;
    let scope = to_bson(scoped.filter)?;
    Ok(doc! { "$and": [key, scope] })
}

/// Looks up one record by key within a soft-delete scope.
pub(crate) async fn find_record(
    database: &Database,
    model: &ModelSchema,
    id: &Value,
    trashed: TrashedMode,
) -> CrudResult<Option<Record>> {
    let filter = find_filter(model, id, trashed)?;
    let found = collection_of(database, &model.table).find_one(filter).await?;
    Ok(found.map(|document| Record::from_storage(to_map(document))))
}

#[async_trait]
impl RecordStore for MongoStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn paginate(
        &self,
        _model: &ModelSchema,
        query: &CompiledQuery,
        page: PageRequest,
    ) -> CrudResult<Paginated<Record>> {
        let CompiledQuery::Document(document) = query else {
            return Err(QueryError::UnsupportedQuery {
                backend: BACKEND_NAME.to_string(),
                kind: query.kind().to_string(),
            }
            .into());
        };
        tracing::debug!(collection = %document.collection, filter = %document.filter, "running document query");
        self.run(document, page).await
    }

    async fn find(
        &self,
        model: &ModelSchema,
        id: &Value,
        trashed: TrashedMode,
    ) -> CrudResult<Option<Record>> {
        find_record(&self.database, model, id, trashed).await
    }

    async fn begin(&self) -> CrudResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MongoTransaction::new(self.database.clone())))
    }
}
