//! Record store implementations.
//!
//! # Available Stores
//!
//! | Store | Feature | Description |
//! |-------|---------|-------------|
//! | [`memory::MemoryStore`] | always | In-process document engine for tests and embedding |
//! | SQLite | `sqlite` | rusqlite over an r2d2 pool, in-memory or file |
//! | PostgreSQL | `postgres` | tokio-postgres over a deadpool pool |
//! | MongoDB | `mongodb` | aggregation pipelines over the official driver |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use helios_crud::backends::sqlite::SqliteStore;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory SQLite store
//! let store = SqliteStore::in_memory()?;
//!
//! // Or use a file-based database
//! let store = SqliteStore::open("./data/app.db")?;
//! # Ok(())
//! # }
//! ```

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mongodb")]
pub mod mongodb;
