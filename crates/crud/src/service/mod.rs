//! Listing, store and update pipelines.
//!
//! Each service is built per request from a record type, its field
//! catalogue, a record store and the adapter registry. The adapter is
//! selected once, at construction, from the record type's connection.
//!
//! | Service | Stages |
//! |---------|--------|
//! | [`ListingService`] | initQuery, select, relations, search, filters, sort, modifyQuery, paginate |
//! | [`StoreService`] | store, or fillableData, fill, persist, syncRelations |
//! | [`UpdateService`] | find, then update, or fillableData, fill, persist, syncRelations |
//!
//! Every stage consults the [`HookRegistry`](crate::hooks::HookRegistry)
//! first; a hook that returns a value replaces the stage entirely.

mod listing;
mod mutation;
mod store;
mod update;

pub use listing::ListingService;
pub use store::StoreService;
pub use update::{UpdateOutcome, UpdateService};
