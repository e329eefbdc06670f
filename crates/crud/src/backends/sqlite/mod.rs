//! SQLite record store.
//!
//! Runs compiled [`SqlStatement`](crate::query::SqlStatement)s over an r2d2
//! connection pool. Supports both in-memory databases (great for testing)
//! and file-based databases.
//!
//! # Features
//!
//! - In-memory and file-based modes
//! - Paginated listing with a separate count query
//! - Follow-up loading of to-one relations
//! - Write transactions with `BEGIN IMMEDIATE`
//!
//! # Example
//!
//! ```no_run
//! use helios_crud::backends::sqlite::SqliteStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::in_memory()?;
//! store.execute_batch(
//!     "CREATE TABLE people (
//!         id INTEGER PRIMARY KEY,
//!         name TEXT NOT NULL,
//!         created_at TEXT,
//!         updated_at TEXT
//!     );",
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! # Value Mapping
//!
//! | JSON | SQLite |
//! |------|--------|
//! | `null` | `NULL` |
//! | boolean | `INTEGER` 0/1 |
//! | integer | `INTEGER` |
//! | float | `REAL` |
//! | string | `TEXT` |
//! | array / object | `TEXT` holding JSON |

mod rows;
mod store;
mod transaction;

pub use store::{SqliteStore, SqliteStoreConfig};
pub use transaction::SqliteTransaction;
