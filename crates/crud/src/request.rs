//! Listing request parameters.
//!
//! | Parameter | Shape | Meaning |
//! |-----------|-------|---------|
//! | `search` | string | free-text term, ORed across searchable fields |
//! | `filters` | JSON object | field name to scalar or array, per filter type |
//! | `sorter` | JSON `{field, order}` | `order` is `ascend` or `descend` |
//! | `result` | integer | page size |
//! | `page` | integer | 1-based page number |
//! | `trashed` | `only` / `with` | soft-delete scope |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CrudResult, QueryError};
use crate::query::{SortDirection, TrashedMode};

/// Requested ordering.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sorter {
    /// Field to order by.
    #[serde(default)]
    pub field: String,
    /// `ascend` or `descend`.
    #[serde(default)]
    pub order: String,
}

impl Sorter {
    /// Creates a sorter.
    pub fn new(field: impl Into<String>, order: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: order.into(),
        }
    }

    /// `ascend` sorts ascending; anything else sorts descending.
    pub fn direction(&self) -> SortDirection {
        if self.order == "ascend" {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }
}

/// A parsed listing request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListingRequest {
    /// Free-text search term.
    #[serde(default)]
    pub search: Option<String>,
    /// Raw filter values keyed by field name.
    #[serde(default)]
    pub filters: Map<String, Value>,
    /// Requested ordering.
    #[serde(default)]
    pub sorter: Option<Sorter>,
    /// Requested page size.
    #[serde(default)]
    pub result: Option<u32>,
    /// Requested page, 1-based.
    #[serde(default)]
    pub page: Option<u32>,
    /// Soft-delete scope.
    #[serde(default)]
    pub trashed: TrashedMode,
}

impl ListingRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses query-string pairs. Unknown parameters are ignored; empty
    /// values count as absent.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> CrudResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "search" => request.search = Some(value.to_string()),
                "filters" => {
                    request.filters = match serde_json::from_str(value) {
                        Ok(Value::Object(map)) => map,
                        Ok(Value::Null) => Map::new(),
                        _ => return Err(invalid("filters", "expected a JSON object")),
                    };
                }
                "sorter" => {
                    let sorter: Sorter = serde_json::from_str(value)
                        .map_err(|e| invalid("sorter", &e.to_string()))?;
                    request.sorter = (!sorter.field.is_empty()).then_some(sorter);
                }
                "result" => request.result = Some(parse_positive("result", value)?),
                "page" => request.page = Some(parse_positive("page", value)?),
                "trashed" => request.trashed = parse_trashed(value),
                other => tracing::trace!(parameter = other, "ignoring unknown listing parameter"),
            }
        }
        Ok(request)
    }

    /// Sets the search term.
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Adds one filter value.
    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }

    /// Sets the ordering.
    pub fn with_sorter(mut self, field: impl Into<String>, order: impl Into<String>) -> Self {
        self.sorter = Some(Sorter::new(field, order));
        self
    }

    /// Sets the page size.
    pub fn with_result(mut self, result: u32) -> Self {
        self.result = Some(result);
        self
    }

    /// Sets the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets the soft-delete scope.
    pub fn with_trashed(mut self, trashed: TrashedMode) -> Self {
        self.trashed = trashed;
        self
    }

    /// The search term, if it has any non-blank content.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

fn invalid(parameter: &str, message: &str) -> crate::error::CrudError {
    QueryError::InvalidParameter {
        parameter: parameter.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn parse_positive(parameter: &str, value: &str) -> CrudResult<u32> {
    value
        .parse::<u32>()
        .map_err(|_| invalid(parameter, "expected a non-negative integer"))
}

fn parse_trashed(value: &str) -> TrashedMode {
    match value {
        "only" | "true" | "1" => TrashedMode::Only,
        "with" | "all" => TrashedMode::With,
        _ => TrashedMode::Exclude,
    }
}
