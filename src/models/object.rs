//! Represents a stored object (file) as recorded in the metadata index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single present object in the flat namespace.
///
/// The record carries metadata only; the content bytes live in blob storage
/// at `location`. Existence of a record is what makes an object "present".
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Externally visible unique name.
    pub name: String,

    /// Blob path relative to the storage root. Produced by the blob store
    /// when an upload is committed and never accepted from callers.
    #[serde(skip_serializing)]
    pub location: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type) supplied at upload time.
    pub content_type: Option<String>,

    /// When the object was stored.
    pub created_at: DateTime<Utc>,
}

impl ObjectRecord {
    /// Build a fresh record for a blob that was just promoted to `location`.
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        size_bytes: i64,
        content_type: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location: location.into(),
            size_bytes,
            content_type,
            created_at: Utc::now(),
        }
    }
}
