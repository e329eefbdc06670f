//! Shared fixtures for the pipeline integration tests.
//!
//! Each fixture describes the same `Person` record type on one engine:
//! searchable `name` and `email`, a `status` select, an `age` slider, a
//! `created_at` date picker, a guarded `is_admin` flag, a to-one `team`
//! and a to-many `tags` relation.

pub mod fixtures;

pub use fixtures::*;
