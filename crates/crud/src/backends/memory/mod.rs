//! Embedded document engine.
//!
//! Collections of JSON documents keyed by `_id`, evaluated with Mongo-style
//! filter documents. It stands in for a MongoDB server in tests and in
//! embedded use; deployments run the `mongodb` feature's store.

mod filter;
mod store;

pub use filter::{as_date, matches, sort_order};
pub use store::{MemoryStore, MemoryTransaction};
