//! Error types for the listing and write pipelines.
//!
//! Errors are grouped by the layer that produced them: record lookups,
//! query construction, transactions, the storage backend, and registered
//! hooks. Security filtering never produces an error; dropped input keys
//! are silent by contract.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for every pipeline operation.
#[derive(Error, Debug)]
pub enum CrudError {
    /// Record state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Query building and filter parsing errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Transaction errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Errors raised by registered hooks
    #[error(transparent)]
    Hook(#[from] HookError),
}

impl CrudError {
    /// Creates a not-found error for the given record type and key.
    pub fn not_found(model: impl Into<String>, id: impl std::fmt::Display) -> Self {
        CrudError::Resource(ResourceError::NotFound {
            model: model.into(),
            id: id.to_string(),
        })
    }

    /// Returns `true` if this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CrudError::Resource(ResourceError::NotFound { .. }))
    }

    /// Maps the error onto the HTTP status class a controller should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            CrudError::Resource(ResourceError::NotFound { .. }) => 404,
            CrudError::Resource(ResourceError::AlreadyExists { .. }) => 409,
            CrudError::Query(_) => 400,
            CrudError::Transaction(_) | CrudError::Backend(_) | CrudError::Hook(_) => 500,
        }
    }
}

/// Errors related to record state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested record was not found (or is outside the trashed scope).
    #[error("record not found: {model}/{id}")]
    NotFound { model: String, id: String },

    /// A record with the given key already exists.
    #[error("record already exists: {model}/{id}")]
    AlreadyExists { model: String, id: String },
}

/// Errors raised while building or compiling a query.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A listing parameter could not be parsed.
    #[error("invalid listing parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A date filter bound could not be parsed.
    #[error("invalid date '{value}' for column {column}")]
    InvalidDate { column: String, value: String },

    /// A relation referenced by a field is not declared on the record type.
    #[error("relation '{relation}' is not declared on {model}")]
    UnknownRelation { model: String, relation: String },

    /// A condition produced for one engine reached another engine's compiler.
    #[error("{backend} cannot compile condition: {condition}")]
    UnsupportedCondition { backend: String, condition: String },

    /// A compiled query was handed to a store for a different engine.
    #[error("{backend} cannot execute a {kind} query")]
    UnsupportedQuery { backend: String, kind: String },
}

/// Errors related to transactions.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// Transaction was rolled back.
    #[error("transaction rolled back: {reason}")]
    RolledBack { reason: String },

    /// Transaction is no longer valid (already committed or rolled back).
    #[error("transaction no longer valid")]
    InvalidTransaction,
}

/// Errors originating from the storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Errors raised from inside a registered hook.
///
/// Hooks may return any [`CrudError`]; this variant exists for hook authors
/// that need to abort with a message of their own.
#[derive(Error, Debug)]
pub enum HookError {
    /// The hook aborted the pipeline.
    #[error("hook {event} failed: {message}")]
    Failed { event: String, message: String },
}

/// Result type alias for pipeline operations.
pub type CrudResult<T> = Result<T, CrudError>;

impl From<serde_json::Error> for CrudError {
    fn from(err: serde_json::Error) -> Self {
        CrudError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for CrudError {
    fn from(err: rusqlite::Error) -> Self {
        CrudError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for CrudError {
    fn from(_err: r2d2::Error) -> Self {
        CrudError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for CrudError {
    fn from(err: tokio_postgres::Error) -> Self {
        CrudError::Backend(BackendError::Internal {
            backend_name: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for CrudError {
    fn from(err: mongodb::error::Error) -> Self {
        CrudError::Backend(BackendError::Internal {
            backend_name: "mongodb".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::bson::extjson::de::Error> for CrudError {
    fn from(err: mongodb::bson::extjson::de::Error) -> Self {
        CrudError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}
