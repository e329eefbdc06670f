//! Core store traits.
//!
//! - [`RecordStore`] - runs compiled listing queries, finds records and
//!   opens transactions
//! - [`StoreTransaction`] - transactional writes and relation sync
//!
//! Adapters decide *what* to run; stores decide *how*. A store only accepts
//! the [`CompiledQuery`](crate::query::CompiledQuery) family of its engine.

mod store;

pub use store::{RecordStore, RelationChanges, StoreTransaction, SyncChanges, key_text, unique_keys};
