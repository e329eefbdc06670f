//! Adapter selection.

use std::sync::Arc;

use crate::model::ConnectionInfo;

use super::{DocumentAdapter, PostgresAdapter, SqliteAdapter, StorageAdapter};

/// Ordered list of adapters, resolved first-match.
///
/// The default registry holds the document, PostgreSQL and SQLite adapters
/// in that order. A connection no adapter supports resolves to the SQLite
/// adapter and logs a warning.
///
/// ```
/// use helios_crud::adapter::AdapterRegistry;
/// use helios_crud::model::ConnectionInfo;
///
/// let registry = AdapterRegistry::default();
/// assert_eq!(registry.resolve(&ConnectionInfo::postgres()).driver_name(), "pgsql");
/// assert_eq!(registry.resolve(&ConnectionInfo::new("x", "oracle")).driver_name(), "sqlite");
/// ```
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn StorageAdapter>>,
    fallback: Arc<dyn StorageAdapter>,
}

impl AdapterRegistry {
    /// Creates a registry with no adapters; everything resolves to the
    /// fallback.
    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
            fallback: Arc::new(SqliteAdapter::new()),
        }
    }

    /// Appends an adapter after the registered ones.
    pub fn register(mut self, adapter: impl StorageAdapter + 'static) -> Self {
        self.adapters.push(Arc::new(adapter));
        self
    }

    /// Driver names in resolution order.
    pub fn drivers(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.driver_name()).collect()
    }

    /// Picks the first adapter supporting the connection.
    pub fn resolve(&self, connection: &ConnectionInfo) -> Arc<dyn StorageAdapter> {
        if let Some(adapter) = self.adapters.iter().find(|a| a.supports(connection)) {
            return Arc::clone(adapter);
        }
        tracing::warn!(
            connection = %connection.name,
            driver = %connection.driver,
            fallback = self.fallback.driver_name(),
            "no storage adapter supports connection, using relational fallback"
        );
        Arc::clone(&self.fallback)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::empty()
            .register(DocumentAdapter::new())
            .register(PostgresAdapter::new())
            .register(SqliteAdapter::new())
    }
}
