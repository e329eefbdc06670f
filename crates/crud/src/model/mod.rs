//! Record types and records.
//!
//! - [`ModelSchema`] - the record-type contract: table, key, connection,
//!   fillable/guarded declarations and relation accessors
//! - [`Record`] - one persisted entity with change tracking
//! - [`path`] - dotted-path helpers shared by adapters and stores

pub mod path;
mod record;
mod schema;

pub use record::Record;
pub use schema::{ConnectionInfo, ModelSchema, PivotTable, RelationDef, RelationKind};
