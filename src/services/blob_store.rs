//! src/services/blob_store.rs
//!
//! BlobStore — the on-disk half of the object store. Payloads are first
//! streamed into `base_path/.staging/` and then renamed into their final
//! sharded location `base_path/{shard}/{shard}/{name}`. The blob store has
//! no notion of whether an object "exists"; that is the metadata index's job.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory under the storage root that holds in-flight uploads.
pub const STAGING_DIR: &str = ".staging";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A fully written, fsynced upload that has not been promoted yet.
///
/// Dropping it without promoting removes the staging file, so an aborted
/// request never leaves payload bytes behind.
#[derive(Debug)]
pub struct StagedBlob {
    path: PathBuf,
    size_bytes: i64,
    armed: bool,
}

impl StagedBlob {
    pub fn size_bytes(&self) -> i64 {
        self.size_bytes
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        // Drop cannot await; a single unlink is short enough to run inline.
        if self.armed {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!("failed to remove staging file {}: {}", self.path.display(), err);
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct BlobStore {
    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create the storage root and staging area if missing.
    pub async fn open(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let store = Self::new(base_path);
        fs::create_dir_all(store.staging_dir()).await?;
        Ok(store)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.base_path.join(STAGING_DIR)
    }

    /// Generate two-level shard identifiers for an object name.
    ///
    /// Uses MD5(name) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn shards(name: &str) -> (String, String) {
        let digest = md5::compute(name);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Deterministic location (relative to the root) for `name`.
    pub fn location_for(name: &str) -> String {
        let (shard_a, shard_b) = Self::shards(name);
        format!("{}/{}/{}", shard_a, shard_b, name)
    }

    /// Turn a stored location back into an absolute path.
    ///
    /// Only plain relative segments are accepted; anything that could
    /// escape the root is rejected.
    pub fn resolve(&self, location: &str) -> io::Result<PathBuf> {
        let relative = Path::new(location);
        let plain = !location.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("location `{}` is outside the storage root", location),
            ));
        }
        Ok(self.base_path.join(relative))
    }

    /// Stream a payload into a fresh staging file.
    ///
    /// - Writes chunks incrementally, counting bytes against `limit`.
    /// - Flushes and fsyncs before returning.
    /// - Any error drops the `StagedBlob`, which removes the file.
    pub async fn stage<S>(&self, stream: S, limit: Option<u64>) -> Result<StagedBlob, BlobError>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let staging = self.staging_dir();
        fs::create_dir_all(&staging).await?;
        let path = staging.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&path).await?;
        let mut staged = StagedBlob {
            path,
            size_bytes: 0,
            armed: true,
        };

        let mut written: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if let Some(limit) = limit {
                if written > limit {
                    return Err(BlobError::TooLarge { limit });
                }
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        staged.size_bytes = written as i64;
        Ok(staged)
    }

    /// Move a staged upload to the deterministic location for `name`.
    ///
    /// Returns the new location. A stale file already sitting at the target
    /// is replaced; the caller has established through the index that no
    /// present object owns it.
    pub async fn promote(&self, mut staged: StagedBlob, name: &str) -> io::Result<String> {
        let location = Self::location_for(name);
        let target = self.resolve(&location)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        let created = !fs::try_exists(&parent).await?;
        fs::create_dir_all(&parent).await?;

        fs::rename(&staged.path, &target).await?;
        staged.armed = false;
        debug!("promoted {} to {}", staged.path.display(), target.display());

        // The rename and any new shard directories must reach disk before
        // the caller records the location in the index.
        if let Err(err) = self.sync_promoted(&parent, created).await {
            let _ = fs::remove_file(&target).await;
            return Err(err);
        }

        Ok(location)
    }

    /// Sync the directory holding a promoted blob, plus every ancestor up
    /// to the root when the shard directories were freshly created.
    async fn sync_promoted(&self, parent: &Path, created: bool) -> io::Result<()> {
        sync_dir(parent).await?;
        if created {
            let mut dir = parent.parent();
            while let Some(current) = dir {
                sync_dir(current).await?;
                if current == self.base_path {
                    break;
                }
                dir = current.parent();
            }
        }
        Ok(())
    }

    /// Open the blob at `location` for reading.
    pub async fn open_blob(&self, location: &str) -> io::Result<File> {
        File::open(self.resolve(location)?).await
    }

    /// Remove the blob at `location` and prune shard directories left empty.
    ///
    /// A missing blob is reported as `NotFound`, not treated as success.
    pub async fn remove(&self, location: &str) -> io::Result<()> {
        let path = self.resolve(location)?;
        fs::remove_file(&path).await?;
        debug!("removed physical file {}", path.display());

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Delete everything in the staging area. Returns how many files went.
    pub async fn clear_staging(&self) -> io::Result<usize> {
        let staging = self.staging_dir();
        let mut entries = match fs::read_dir(&staging).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Locations of every committed blob (`{shard}/{shard}/{name}`).
    pub async fn committed_locations(&self) -> io::Result<Vec<String>> {
        let mut locations = Vec::new();
        for shard_a in shard_dirs(&self.base_path).await? {
            let dir_a = self.base_path.join(&shard_a);
            for shard_b in shard_dirs(&dir_a).await? {
                let mut entries = fs::read_dir(dir_a.join(&shard_b)).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if !entry.file_type().await?.is_file() {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        locations.push(format!("{}/{}/{}", shard_a, shard_b, name));
                    }
                }
            }
        }
        locations.sort();
        Ok(locations)
    }

    /// Recursively remove empty directories up to the storage root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.base_path.as_path();
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Flush a directory's entries (creations, renames) to disk.
async fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir).await?.sync_all().await
}

/// Two-character lowercase hex subdirectories of `dir`.
async fn shard_dirs(dir: &Path) -> io::Result<Vec<String>> {
    let mut shards = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(shards),
        Err(err) => return Err(err),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.len() == 2 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
                shards.push(name.to_string());
            }
        }
    }
    Ok(shards)
}
