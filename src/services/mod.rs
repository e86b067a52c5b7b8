//! Storage layer: the metadata index, the on-disk blob store, per-name
//! locking, and the service that coordinates them.

pub mod blob_store;
pub mod metadata_index;
pub mod name_locks;
pub mod object_store;
