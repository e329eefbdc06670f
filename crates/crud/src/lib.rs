//! Helios CRUD Pipelines
//!
//! This crate turns a declarative description of a record type into a
//! listing endpoint (search, filter, sort, paginate) and write endpoints
//! (store, update) that run unchanged over a relational engine or a document
//! engine.
//!
//! # Features
//!
//! - **Field catalogue**: one [`FieldDescriptor`](field::FieldDescriptor) per
//!   attribute drives listing columns, search, filters, sorting and writes
//! - **Storage adapters**: SQLite, PostgreSQL and MongoDB, selected
//!   by probing the record type's connection
//! - **Fillable/guarded resolution**: a fail-closed allow-list decides which
//!   input keys may ever be persisted
//! - **Hooks**: every pipeline stage can be replaced by a typed override
//! - **Transactions**: store and update run inside the engine's native
//!   transaction
//!
//! # Backend Features
//!
//! ```toml
//! [dependencies]
//! helios-crud = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! - `sqlite` (default) - SQLite record store with in-memory and file modes
//! - `postgres` - PostgreSQL record store over deadpool-postgres
//! - `mongodb` - MongoDB record store over the official driver
//!
//! The in-memory document store is always available as a test double.
//!
//! # Architecture
//!
//! - [`field`] - field descriptors and the catalogue
//! - [`model`] - record type contract and records
//! - [`query`] - engine-neutral listing query and its compilers
//! - [`adapter`] - storage adapters and adapter selection
//! - [`hooks`] - per-request stage overrides
//! - [`service`] - listing, store and update pipelines
//! - [`core`] - record store traits
//! - [`backends`] - record store implementations
//!
//! # Quick Start
//!
//! ```
//! use helios_crud::adapter::AdapterRegistry;
//! use helios_crud::field::{FieldCatalogue, FieldDescriptor, FieldType, FilterType};
//! use helios_crud::model::{ConnectionInfo, ModelSchema};
//! use helios_crud::request::ListingRequest;
//! use helios_crud::context::RequestContext;
//! use helios_crud::backends::memory::MemoryStore;
//! use helios_crud::service::ListingService;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = ModelSchema::new("Person", "people", ConnectionInfo::mongodb())
//!     .with_primary_key("_id");
//! let fields = FieldCatalogue::new(vec![
//!     FieldDescriptor::new("name", FieldType::Text).searchable().sortable(),
//!     FieldDescriptor::new("status", FieldType::Select).filter(FilterType::Select),
//! ])?;
//!
//! let store = MemoryStore::new();
//! let adapters = AdapterRegistry::default();
//! let service = ListingService::new(&model, &fields, &store, &adapters);
//! assert_eq!(service.adapter().driver_name(), "mongodb");
//!
//! let request = ListingRequest::from_query_pairs([("search", "ada"), ("result", "25")])?;
//! let query = service.build_query(&request, &RequestContext::new())?;
//! assert_eq!(query.conditions().len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod adapter;
pub mod backends;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod field;
pub mod filter;
pub mod hooks;
pub mod model;
pub mod query;
pub mod request;
pub mod service;
pub mod types;

// Re-export commonly used types at crate root
pub use config::CrudConfig;
pub use context::RequestContext;
pub use error::{CrudError, CrudResult};
pub use field::{FieldCatalogue, FieldDescriptor};
pub use model::{ModelSchema, Record};
pub use types::{PageRequest, Paginated, StoreResponse, UpdateResponse};

// Re-export core traits
pub use adapter::{AdapterRegistry, StorageAdapter};
pub use core::{RecordStore, StoreTransaction};
pub use hooks::{HookEvent, HookRegistry};
pub use service::{ListingService, StoreService, UpdateService};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
