//! Envelope types returned by the pipelines.
//!
//! - [`PageRequest`], [`Paginated`] - listing pages
//! - [`StoreResponse`], [`UpdateResponse`] - write outcomes

mod pagination;
mod response;

pub use pagination::{PageRequest, Paginated};
pub use response::{StoreResponse, UpdateResponse};
