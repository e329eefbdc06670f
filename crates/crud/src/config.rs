//! Pipeline configuration.
//!
//! [`CrudConfig`] carries the knobs shared by the listing and write
//! services. It deserializes with serde defaults so a partial config file is
//! enough, and [`CrudConfig::from_env`] applies environment overrides.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CRUD_DEFAULT_PAGE_SIZE` | 10 | Page size when the request has no `result` |
//! | `CRUD_MAX_PAGE_SIZE` | 100 | Upper bound for a requested page size |
//! | `CRUD_CREATED_AT_COLUMN` | created_at | Column used by the default sort |

use serde::{Deserialize, Serialize};

/// Configuration shared by the listing and write pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrudConfig {
    /// Page size used when the listing request carries no `result` parameter.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Largest page size a request may ask for.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Creation timestamp column, used by the default sort.
    #[serde(default = "default_created_at_column")]
    pub created_at_column: String,

    /// Modification timestamp column.
    #[serde(default = "default_updated_at_column")]
    pub updated_at_column: String,
}

fn default_page_size() -> u32 {
    10
}

fn default_max_page_size() -> u32 {
    100
}

fn default_created_at_column() -> String {
    "created_at".to_string()
}

fn default_updated_at_column() -> String {
    "updated_at".to_string()
}

impl Default for CrudConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            created_at_column: default_created_at_column(),
            updated_at_column: default_updated_at_column(),
        }
    }
}

impl CrudConfig {
    /// Builds a configuration from defaults overridden by `CRUD_*` variables.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("CRUD_DEFAULT_PAGE_SIZE") {
            match value.parse() {
                Ok(size) => self.default_page_size = size,
                Err(_) => tracing::warn!(value = %value, "ignoring invalid CRUD_DEFAULT_PAGE_SIZE"),
            }
        }
        if let Some(value) = lookup("CRUD_MAX_PAGE_SIZE") {
            match value.parse() {
                Ok(size) => self.max_page_size = size,
                Err(_) => tracing::warn!(value = %value, "ignoring invalid CRUD_MAX_PAGE_SIZE"),
            }
        }
        if let Some(value) = lookup("CRUD_CREATED_AT_COLUMN") {
            self.created_at_column = value;
        }
        self
    }

    /// Sets the default page size.
    pub fn with_default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size;
        self
    }

    /// Sets the maximum page size.
    pub fn with_max_page_size(mut self, size: u32) -> Self {
        self.max_page_size = size;
        self
    }

    /// Resolves the effective page size for a request.
    ///
    /// Absent or zero sizes fall back to the default; larger sizes are capped.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(0) | None => self.default_page_size,
            Some(size) => size.min(self.max_page_size.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CrudConfig::default();
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.created_at_column, "created_at");
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: CrudConfig = serde_json::from_str(r#"{"default_page_size": 25}"#).unwrap();
        assert_eq!(config.default_page_size, 25);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.updated_at_column, "updated_at");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CRUD_DEFAULT_PAGE_SIZE", "15"),
            ("CRUD_MAX_PAGE_SIZE", "not-a-number"),
            ("CRUD_CREATED_AT_COLUMN", "inserted_at"),
        ]
        .into_iter()
        .collect();

        let config = CrudConfig::default().with_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.default_page_size, 15);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.created_at_column, "inserted_at");
    }

    #[test]
    fn test_page_size_resolution() {
        let config = CrudConfig::default();
        assert_eq!(config.page_size(None), 10);
        assert_eq!(config.page_size(Some(0)), 10);
        assert_eq!(config.page_size(Some(25)), 25);
        assert_eq!(config.page_size(Some(500)), 100);
    }
}
