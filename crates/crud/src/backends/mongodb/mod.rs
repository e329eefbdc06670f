//! MongoDB record store.
//!
//! Runs compiled [`DocumentQuery`](crate::query::DocumentQuery)s against a
//! MongoDB database. A listing page is one aggregation pipeline: the filter,
//! sort, skip and limit first, then the projection, then a `$lookup` per
//! eager-loaded relation.
//!
//! Date literals in filters are extended JSON (`{"$date": ..}`) and reach
//! the server as BSON dates. Object ids come back as hex strings.
//!
//! There is no multi-document atomicity. Writes inside a
//! [`MongoTransaction`] apply as they are issued and rollback only logs.
//!
//! # Example
//!
//! ```no_run
//! use helios_crud::backends::mongodb::{MongoConfig, MongoStore};
//!
//! # async fn main_example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MongoStore::new(MongoConfig {
//!     uri: "mongodb://localhost:27017".to_string(),
//!     database: "crm".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//! // Or from CRUD_MONGO_* variables
//! let store = MongoStore::from_env().await?;
//! # Ok(())
//! # }
//! ```

mod convert;
mod store;
mod transaction;

pub use store::{MongoConfig, MongoStore};
pub use transaction::MongoTransaction;
