//! Core data models for the file object store.
//!
//! `ObjectRecord` maps to the `objects` table via `sqlx::FromRow`; the
//! response types serialize as JSON via `serde`.

pub mod object;
pub mod responses;
