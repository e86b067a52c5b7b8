//! src/services/object_store.rs
//!
//! ObjectStoreService — put/get/delete over the metadata index and the blob
//! store. Ordering rules:
//!
//! - put: validate → lock name → index lookup → stage payload → promote →
//!   index insert (compensate by removing the blob if the insert fails).
//! - get: lock name → index lookup → open blob.
//! - delete: lock name → index lookup → remove blob → index remove.
//!
//! The commit half of put and the whole of delete run in spawned tasks that
//! own the name guard, so a dropped request future cannot stop them between
//! the filesystem step and the index step.

use crate::{
    models::object::ObjectRecord,
    services::{
        blob_store::{BlobError, BlobStore, StagedBlob},
        metadata_index::{IndexError, MetadataIndex},
        name_locks::{NameGuard, NameLocks},
    },
};
use bytes::Bytes;
use futures::Stream;
use std::{collections::HashSet, io};
use thiserror::Error;
use tokio::{fs::File, task::JoinError};
use tracing::{debug, error, info, warn};

/// Longest accepted object name, in bytes (one filesystem name component).
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object name `{name}` is invalid: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("object `{0}` already exists")]
    Conflict(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("object `{name}` is indexed but its blob cannot be opened: {source}")]
    DanglingRecord {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] JoinError),
}

impl From<BlobError> for ObjectStoreError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::TooLarge { limit } => ObjectStoreError::TooLarge { limit },
            BlobError::Io(err) => ObjectStoreError::Io(err),
        }
    }
}

pub type StoreResult<T> = Result<T, ObjectStoreError>;

/// Outcome of `ObjectStoreService::reconcile`.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Leftover in-flight uploads removed from the staging area.
    pub staging_removed: usize,
    /// Locations of committed blobs that had no record and were removed.
    pub orphans_removed: Vec<String>,
    /// Names whose record points at a missing blob. Left in place.
    pub dangling_records: Vec<String>,
}

/// Check that `name` is a single, plain path component.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("must be at most 255 bytes")
    } else if name == "." || name == ".." {
        Some("must not be a relative path segment")
    } else if name.contains('/') || name.contains('\\') {
        Some("must not contain path separators")
    } else if name.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ObjectStoreError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[derive(Clone)]
pub struct ObjectStoreService {
    index: MetadataIndex,
    blobs: BlobStore,
    locks: NameLocks,
    max_object_bytes: Option<u64>,
}

impl ObjectStoreService {
    pub fn new(index: MetadataIndex, blobs: BlobStore) -> Self {
        Self {
            index,
            blobs,
            locks: NameLocks::new(),
            max_object_bytes: None,
        }
    }

    /// Reject uploads larger than `limit` bytes.
    pub fn with_max_object_bytes(mut self, limit: u64) -> Self {
        self.max_object_bytes = Some(limit);
        self
    }

    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Store a new object under `name`.
    ///
    /// Succeeds only once the blob is durably promoted and the record is
    /// inserted. A name that is already present yields `Conflict` and
    /// leaves storage untouched.
    pub async fn put<S>(
        &self,
        name: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StoreResult<ObjectRecord>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        validate_name(name)?;
        let guard = self.locks.lock(name).await;

        if self.index.lookup(name).await?.is_some() {
            debug!("put rejected, `{}` already present", name);
            return Err(ObjectStoreError::Conflict(name.to_string()));
        }

        let staged = self.blobs.stage(stream, self.max_object_bytes).await?;

        let this = self.clone();
        tokio::spawn(async move { this.commit(guard, staged, content_type).await }).await?
    }

    async fn commit(
        &self,
        guard: NameGuard,
        staged: StagedBlob,
        content_type: Option<String>,
    ) -> StoreResult<ObjectRecord> {
        let name = guard.name();
        let size_bytes = staged.size_bytes();
        let location = self.blobs.promote(staged, name).await?;
        let record = ObjectRecord::new(name, location, size_bytes, content_type);

        match self.index.insert(&record).await {
            Ok(()) => {
                info!("stored `{}` ({} bytes)", name, size_bytes);
                Ok(record)
            }
            Err(IndexError::AlreadyExists(_)) => {
                self.discard(&record.location).await;
                Err(ObjectStoreError::Conflict(name.to_string()))
            }
            Err(err) => {
                error!("index insert for `{}` failed, removing blob: {}", name, err);
                self.discard(&record.location).await;
                Err(err.into())
            }
        }
    }

    /// Open a present object for reading.
    pub async fn get(&self, name: &str) -> StoreResult<(ObjectRecord, File)> {
        if validate_name(name).is_err() {
            return Err(ObjectStoreError::NotFound(name.to_string()));
        }
        let _guard = self.locks.lock(name).await;

        let record = self
            .index
            .lookup(name)
            .await?
            .ok_or_else(|| ObjectStoreError::NotFound(name.to_string()))?;

        let file = self
            .blobs
            .open_blob(&record.location)
            .await
            .map_err(|source| {
                error!("record for `{}` has no readable blob: {}", name, source);
                ObjectStoreError::DanglingRecord {
                    name: name.to_string(),
                    source,
                }
            })?;

        Ok((record, file))
    }

    /// Delete a present object: blob first, then its record.
    ///
    /// If the blob cannot be removed the record is kept and the failure is
    /// reported, so the object still shows as present and can be retried.
    pub async fn delete(&self, name: &str) -> StoreResult<ObjectRecord> {
        if validate_name(name).is_err() {
            return Err(ObjectStoreError::NotFound(name.to_string()));
        }

        let this = self.clone();
        let name = name.to_string();
        tokio::spawn(async move { this.delete_locked(&name).await }).await?
    }

    async fn delete_locked(&self, name: &str) -> StoreResult<ObjectRecord> {
        let _guard = self.locks.lock(name).await;

        let record = self
            .index
            .lookup(name)
            .await?
            .ok_or_else(|| ObjectStoreError::NotFound(name.to_string()))?;

        if let Err(err) = self.blobs.remove(&record.location).await {
            error!("removing blob for `{}` failed, record kept: {}", name, err);
            return Err(err.into());
        }

        match self.index.remove(name).await {
            Ok(()) => {
                info!("deleted `{}`", name);
                Ok(record)
            }
            Err(IndexError::NotFound(_)) => Err(ObjectStoreError::NotFound(name.to_string())),
            Err(err) => {
                error!("blob for `{}` removed but record remains: {}", name, err);
                Err(err.into())
            }
        }
    }

    /// Bring blob storage back in line with the index.
    ///
    /// Clears the staging area, removes committed blobs with no record, and
    /// reports records whose blob is missing. Must not run while another
    /// process serves the same storage root.
    pub async fn reconcile(&self) -> StoreResult<ReconcileReport> {
        let mut report = ReconcileReport {
            staging_removed: self.blobs.clear_staging().await?,
            ..Default::default()
        };

        let on_disk = self.blobs.committed_locations().await?;
        for location in &on_disk {
            let Some(name) = location.rsplit('/').next() else {
                continue;
            };
            let _guard = self.locks.lock(name).await;
            let owned = self
                .index
                .lookup(name)
                .await?
                .is_some_and(|record| &record.location == location);
            if !owned {
                warn!("removing orphaned blob {}", location);
                self.blobs.remove(location).await?;
                report.orphans_removed.push(location.clone());
            }
        }

        let on_disk: HashSet<&str> = on_disk.iter().map(String::as_str).collect();
        for record in self.index.records().await? {
            if !on_disk.contains(record.location.as_str()) {
                warn!("record `{}` points at missing blob {}", record.name, record.location);
                report.dangling_records.push(record.name);
            }
        }

        Ok(report)
    }

    async fn discard(&self, location: &str) {
        if let Err(err) = self.blobs.remove(location).await {
            warn!("failed to discard blob {}: {}", location, err);
        }
    }
}

#[cfg(test)]
pub(crate) async fn open_temp_service(dir: &std::path::Path) -> ObjectStoreService {
    let index = crate::services::metadata_index::open_temp_index(dir).await;
    let blobs = BlobStore::open(dir.join("objects")).await.unwrap();
    ObjectStoreService::new(index, blobs)
}
