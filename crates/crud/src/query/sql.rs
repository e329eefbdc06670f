//! SQL compilation of listing queries.
//!
//! Translates a [`ListQuery`] into a `SELECT` and a matching `COUNT`
//! statement for one [`SqlDialect`]. Bound values stay JSON until the
//! executing store converts them into driver parameters.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CrudResult, QueryError};
use crate::model::{ModelSchema, PivotTable, RelationDef, RelationKind};

use super::{Condition, ListQuery, Operator, Selection};

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    pub params: Vec<Value>,
}

impl SqlFragment {
    /// Creates a new SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    /// SQLite: `?N` placeholders, `json_group_array`, `LIKE`.
    Sqlite,
    /// PostgreSQL: `$N` placeholders, `json_agg`, `ILIKE`.
    Postgres,
}

impl SqlDialect {
    /// Renders the placeholder for the `n`th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::Sqlite => format!("?{}", n),
            SqlDialect::Postgres => format!("${}", n),
        }
    }

    fn like_operator(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "LIKE",
            SqlDialect::Postgres => "ILIKE",
        }
    }

    fn json_array_agg(&self, expr: &str) -> String {
        match self {
            SqlDialect::Sqlite => format!("json_group_array({})", expr),
            SqlDialect::Postgres => format!("COALESCE(json_agg({}), '[]'::json)", expr),
        }
    }

    fn text_cast(&self, expr: &str) -> String {
        match self {
            SqlDialect::Sqlite => format!("CAST({} AS TEXT)", expr),
            SqlDialect::Postgres => format!("CAST({} AS text)", expr),
        }
    }
}

/// A to-one relation loaded with a follow-up query after the page is fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EagerLoad {
    /// The relation being loaded.
    pub relation: RelationDef,
    /// Column on the parent rows holding the key to match.
    pub parent_key: String,
    /// Column on the related rows matched against `parent_key`.
    pub related_column: String,
}

/// A compiled listing statement pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlStatement {
    /// Dialect the statement was compiled for.
    pub dialect: SqlDialect,
    /// Row query without LIMIT/OFFSET.
    pub select: SqlFragment,
    /// Total count query over the same conditions.
    pub count: SqlFragment,
    /// Output columns holding JSON text that must be decoded.
    pub json_columns: Vec<String>,
    /// To-one relations to load after the page is fetched.
    pub eager: Vec<EagerLoad>,
}

impl SqlStatement {
    /// Appends LIMIT/OFFSET to the row query, numbering placeholders after
    /// the existing parameters.
    pub fn paged_select(&self, limit: u64, offset: u64) -> SqlFragment {
        let mut fragment = self.select.clone();
        let n = fragment.params.len();
        fragment.sql = format!(
            "{} LIMIT {} OFFSET {}",
            fragment.sql,
            self.dialect.placeholder(n + 1),
            self.dialect.placeholder(n + 2)
        );
        fragment.params.push(Value::from(limit));
        fragment.params.push(Value::from(offset));
        fragment
    }
}

/// Quotes an identifier, treating dots as qualification separators.
pub fn quote_ident(ident: &str) -> String {
    ident
        .split('.')
        .map(|part| {
            if part == "*" {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Escapes `%`, `_` and `\` for use inside a LIKE pattern with `ESCAPE '\'`.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Compiles listing queries for one record type and dialect.
pub struct SqlCompiler<'a> {
    dialect: SqlDialect,
    model: &'a ModelSchema,
    backend_name: &'static str,
}

impl<'a> SqlCompiler<'a> {
    /// Creates a compiler.
    pub fn new(dialect: SqlDialect, model: &'a ModelSchema, backend_name: &'static str) -> Self {
        Self {
            dialect,
            model,
            backend_name,
        }
    }

    /// Compiles the query into a select/count statement pair.
    pub fn compile(&self, query: &ListQuery) -> CrudResult<SqlStatement> {
        let mut params = Vec::new();
        let mut json_columns = Vec::new();

        let mut projections = Vec::new();
        for selection in query.columns() {
            match selection {
                Selection::Column(column) => projections.push(self.column(column)),
                Selection::RelationKeys { relation, alias } => {
                    projections.push(self.relation_keys(relation, alias)?);
                    json_columns.push(alias.clone());
                }
            }
        }
        if projections.is_empty() {
            projections.push(format!("{}.*", quote_ident(&self.model.table)));
        }

        let mut where_parts = Vec::new();
        for condition in query.conditions() {
            where_parts.push(self.condition(condition, &mut params)?);
        }
        let where_sql = if where_parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_parts.join(" AND "))
        };

        let order_sql = if query.orders().is_empty() {
            String::new()
        } else {
            let terms: Vec<String> = query
                .orders()
                .iter()
                .map(|o| format!("{} {}", self.column(&o.column), o.direction.as_sql()))
                .collect();
            format!(" ORDER BY {}", terms.join(", "))
        };

        let from = quote_ident(&self.model.table);
        let select = SqlFragment::with_params(
            format!(
                "SELECT {} FROM {}{}{}",
                projections.join(", "),
                from,
                where_sql,
                order_sql
            ),
            params.clone(),
        );
        let count = SqlFragment::with_params(
            format!("SELECT COUNT(*) FROM {}{}", from, where_sql),
            params,
        );

        let mut eager = Vec::new();
        for name in query.eager() {
            eager.push(self.eager_load(name)?);
        }

        Ok(SqlStatement {
            dialect: self.dialect,
            select,
            count,
            json_columns,
            eager,
        })
    }

    fn column(&self, column: &str) -> String {
        if column.contains('.') {
            quote_ident(column)
        } else {
            quote_ident(&self.model.qualify(column))
        }
    }

    fn relation(&self, name: &str) -> CrudResult<&'a RelationDef> {
        self.model.relation(name).ok_or_else(|| {
            QueryError::UnknownRelation {
                model: self.model.name.clone(),
                relation: name.to_string(),
            }
            .into()
        })
    }

    fn relation_keys(&self, relation: &str, alias: &str) -> CrudResult<String> {
        let def = self.relation(relation)?;
        let parent_key = quote_ident(&self.model.qualify(&self.model.primary_key));
        let sub = match (def.kind, &def.pivot) {
            (RelationKind::BelongsToMany, Some(pivot)) => format!(
                "SELECT {} FROM {} WHERE {} = {}",
                self.dialect
                    .json_array_agg(&quote_ident(&format!("{}.{}", pivot.table, pivot.related_pivot_key))),
                quote_ident(&pivot.table),
                quote_ident(&format!("{}.{}", pivot.table, pivot.foreign_pivot_key)),
                parent_key
            ),
            (RelationKind::HasMany, _) => format!(
                "SELECT {} FROM {} WHERE {} = {}",
                self.dialect
                    .json_array_agg(&quote_ident(&format!("{}.{}", def.related_table, def.related_key))),
                quote_ident(&def.related_table),
                quote_ident(&format!("{}.{}", def.related_table, def.foreign_key)),
                parent_key
            ),
            _ => {
                return Err(self.unsupported(format!(
                    "key aggregation over {:?} relation '{}'",
                    def.kind, def.name
                )));
            }
        };
        Ok(format!("({}) AS {}", sub, quote_ident(alias)))
    }

    fn eager_load(&self, name: &str) -> CrudResult<EagerLoad> {
        let def = self.relation(name)?;
        match def.kind {
            RelationKind::BelongsTo => Ok(EagerLoad {
                relation: def.clone(),
                parent_key: def.foreign_key.clone(),
                related_column: def.related_key.clone(),
            }),
            RelationKind::HasOne => Ok(EagerLoad {
                relation: def.clone(),
                parent_key: self.model.primary_key.clone(),
                related_column: def.foreign_key.clone(),
            }),
            _ => Err(self.unsupported(format!("eager load of to-many relation '{}'", name))),
        }
    }

    fn condition(&self, condition: &Condition, params: &mut Vec<Value>) -> CrudResult<String> {
        let sql = match condition {
            Condition::In { column, values } => {
                if values.is_empty() {
                    "1 = 0".to_string()
                } else {
                    let placeholders: Vec<String> =
                        values.iter().map(|v| self.bind(params, v.clone())).collect();
                    format!("{} IN ({})", self.column(column), placeholders.join(", "))
                }
            }
            Condition::Between { column, min, max } => {
                let lo = self.bind(params, min.clone());
                let hi = self.bind(params, max.clone());
                format!("{} BETWEEN {} AND {}", self.column(column), lo, hi)
            }
            Condition::Contains { column, term } => {
                let pattern = self.bind(params, Value::String(format!("%{}%", escape_like(term))));
                format!(
                    "{} {} {} ESCAPE '\\'",
                    self.dialect.text_cast(&self.column(column)),
                    self.dialect.like_operator(),
                    pattern
                )
            }
            Condition::Compare { column, op, value } => {
                let placeholder = self.bind(params, value.clone());
                let op = match op {
                    Operator::Eq => "=",
                    Operator::Ne => "<>",
                    Operator::Gt => ">",
                    Operator::Gte => ">=",
                    Operator::Lt => "<",
                    Operator::Lte => "<=",
                };
                format!("{} {} {}", self.column(column), op, placeholder)
            }
            Condition::Null { column, negated } => {
                let not = if *negated { " NOT" } else { "" };
                format!("{} IS{} NULL", self.column(column), not)
            }
            Condition::RelationIn {
                relation,
                key,
                values,
            } => self.relation_in(relation, key, values, params)?,
            Condition::Any(conditions) => {
                if conditions.is_empty() {
                    "1 = 0".to_string()
                } else {
                    let parts = conditions
                        .iter()
                        .map(|c| self.condition(c, params).map(|s| format!("({})", s)))
                        .collect::<CrudResult<Vec<_>>>()?;
                    format!("({})", parts.join(" OR "))
                }
            }
            Condition::All(conditions) => {
                if conditions.is_empty() {
                    "1 = 1".to_string()
                } else {
                    let parts = conditions
                        .iter()
                        .map(|c| self.condition(c, params).map(|s| format!("({})", s)))
                        .collect::<CrudResult<Vec<_>>>()?;
                    format!("({})", parts.join(" AND "))
                }
            }
            Condition::Sql { sql, bindings } => {
                let mut out = String::with_capacity(sql.len());
                let mut bindings = bindings.iter();
                // Placeholders inside quoted literals and identifiers are text
                let mut quote: Option<char> = None;
                for ch in sql.chars() {
                    match (quote, ch) {
                        (Some(open), _) if ch == open => {
                            quote = None;
                            out.push(ch);
                        }
                        (Some(_), _) => out.push(ch),
                        (None, '\'' | '"' | '`') => {
                            quote = Some(ch);
                            out.push(ch);
                        }
                        (None, '?') => {
                            let value = bindings.next().cloned().unwrap_or(Value::Null);
                            out.push_str(&self.bind(params, value));
                        }
                        (None, _) => out.push(ch),
                    }
                }
                format!("({})", out)
            }
            Condition::Document(filter) => {
                return Err(self.unsupported(format!("document filter {}", filter)));
            }
        };
        Ok(sql)
    }

    fn relation_in(
        &self,
        relation: &str,
        key: &str,
        values: &[Value],
        params: &mut Vec<Value>,
    ) -> CrudResult<String> {
        if values.is_empty() {
            return Ok("1 = 0".to_string());
        }
        let def = self.relation(relation)?;
        let placeholders: Vec<String> = values.iter().map(|v| self.bind(params, v.clone())).collect();
        let key = quote_ident(key);
        let related = quote_ident(&def.related_table);
        let own_pk = self.column(&self.model.primary_key);

        let sql = match (def.kind, &def.pivot) {
            (RelationKind::BelongsToMany, Some(pivot)) => format!(
                "{} IN (SELECT {} FROM {} INNER JOIN {} ON {} = {} WHERE {} IN ({}))",
                own_pk,
                quote_ident(&format!("{}.{}", pivot.table, pivot.foreign_pivot_key)),
                quote_ident(&pivot.table),
                related,
                quote_ident(&format!("{}.{}", def.related_table, def.related_key)),
                quote_ident(&format!("{}.{}", pivot.table, pivot.related_pivot_key)),
                key,
                placeholders.join(", ")
            ),
            (RelationKind::HasMany | RelationKind::HasOne, _) => format!(
                "{} IN (SELECT {} FROM {} WHERE {} IN ({}))",
                own_pk,
                quote_ident(&format!("{}.{}", def.related_table, def.foreign_key)),
                related,
                key,
                placeholders.join(", ")
            ),
            (RelationKind::BelongsTo, _) => format!(
                "{} IN (SELECT {} FROM {} WHERE {} IN ({}))",
                self.column(&def.foreign_key),
                quote_ident(&format!("{}.{}", def.related_table, def.related_key)),
                related,
                key,
                placeholders.join(", ")
            ),
            (RelationKind::BelongsToMany, None) => {
                return Err(self.unsupported(format!(
                    "embedded key relation '{}' on a relational table",
                    relation
                )));
            }
        };
        Ok(sql)
    }

    fn bind(&self, params: &mut Vec<Value>, value: Value) -> String {
        params.push(value);
        self.dialect.placeholder(params.len())
    }

    fn unsupported(&self, condition: String) -> crate::error::CrudError {
        QueryError::UnsupportedCondition {
            backend: self.backend_name.to_string(),
            condition,
        }
        .into()
    }
}

/// Builds the write statements relational stores run inside a transaction.
#[derive(Debug, Clone, Copy)]
pub struct WriteBuilder {
    dialect: SqlDialect,
}

impl WriteBuilder {
    /// Creates a builder for the dialect.
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    fn placeholders(&self, from: usize, count: usize) -> Vec<String> {
        (from..from + count).map(|n| self.dialect.placeholder(n)).collect()
    }

    /// `INSERT` of the given attributes. With `returning`, PostgreSQL
    /// statements return that column.
    pub fn insert(
        &self,
        table: &str,
        attributes: &Map<String, Value>,
        returning: Option<&str>,
    ) -> SqlFragment {
        let returning = match (self.dialect, returning) {
            (SqlDialect::Postgres, Some(column)) => format!(" RETURNING {}", quote_ident(column)),
            _ => String::new(),
        };
        if attributes.is_empty() {
            return SqlFragment::new(format!(
                "INSERT INTO {} DEFAULT VALUES{}",
                quote_ident(table),
                returning
            ));
        }
        let columns: Vec<String> = attributes.keys().map(|k| quote_ident(k)).collect();
        SqlFragment::with_params(
            format!(
                "INSERT INTO {} ({}) VALUES ({}){}",
                quote_ident(table),
                columns.join(", "),
                self.placeholders(1, columns.len()).join(", "),
                returning
            ),
            attributes.values().cloned().collect(),
        )
    }

    /// `UPDATE` of the given attributes on the row with the given key.
    pub fn update(
        &self,
        table: &str,
        key_column: &str,
        key: &Value,
        attributes: &Map<String, Value>,
    ) -> SqlFragment {
        let assignments: Vec<String> = attributes
            .keys()
            .enumerate()
            .map(|(i, column)| format!("{} = {}", quote_ident(column), self.dialect.placeholder(i + 1)))
            .collect();
        let mut params: Vec<Value> = attributes.values().cloned().collect();
        params.push(key.clone());
        SqlFragment::with_params(
            format!(
                "UPDATE {} SET {} WHERE {} = {}",
                quote_ident(table),
                assignments.join(", "),
                quote_ident(key_column),
                self.dialect.placeholder(params.len())
            ),
            params,
        )
    }

    /// `SELECT <column> FROM <table> WHERE <filter_column> = ?`.
    pub fn pluck(&self, table: &str, column: &str, filter_column: &str, value: &Value) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "SELECT {} FROM {} WHERE {} = {}",
                quote_ident(column),
                quote_ident(table),
                quote_ident(filter_column),
                self.dialect.placeholder(1)
            ),
            vec![value.clone()],
        )
    }

    /// `SELECT * FROM <table> WHERE <column> IN (...)`.
    pub fn select_in(&self, table: &str, column: &str, values: &[Value]) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "SELECT * FROM {} WHERE {} IN ({})",
                quote_ident(table),
                quote_ident(column),
                self.placeholders(1, values.len()).join(", ")
            ),
            values.to_vec(),
        )
    }

    /// `UPDATE <table> SET <column> = ? WHERE <key_column> = ?`.
    pub fn set_column(
        &self,
        table: &str,
        column: &str,
        value: &Value,
        key_column: &str,
        key: &Value,
    ) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "UPDATE {} SET {} = {} WHERE {} = {}",
                quote_ident(table),
                quote_ident(column),
                self.dialect.placeholder(1),
                quote_ident(key_column),
                self.dialect.placeholder(2)
            ),
            vec![value.clone(), key.clone()],
        )
    }

    /// Inserts one pivot link.
    pub fn attach(&self, pivot: &PivotTable, parent: &Value, related: &Value) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "INSERT INTO {} ({}, {}) VALUES ({}, {})",
                quote_ident(&pivot.table),
                quote_ident(&pivot.foreign_pivot_key),
                quote_ident(&pivot.related_pivot_key),
                self.dialect.placeholder(1),
                self.dialect.placeholder(2)
            ),
            vec![parent.clone(), related.clone()],
        )
    }

    /// Deletes one pivot link.
    pub fn detach(&self, pivot: &PivotTable, parent: &Value, related: &Value) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "DELETE FROM {} WHERE {} = {} AND {} = {}",
                quote_ident(&pivot.table),
                quote_ident(&pivot.foreign_pivot_key),
                self.dialect.placeholder(1),
                quote_ident(&pivot.related_pivot_key),
                self.dialect.placeholder(2)
            ),
            vec![parent.clone(), related.clone()],
        )
    }
}
