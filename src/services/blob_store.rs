//! src/services/blob_store.rs
//!
//! BlobStore: raw file contents on local disk, one file per blob id directly
//! beneath `root`. Ids are random numbers claimed with an exclusive create, so
//! a file's existence is the allocation record.

use crate::{
    models::node::BlobId,
    services::{
        error::{StorageError, StorageResult},
        lock_registry::LockRegistry,
    },
};
use bytes::Bytes;
use rand::Rng;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::{Mutex, OwnedRwLockReadGuard},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Upper bound (exclusive) for randomly allocated blob ids.
const BLOB_ID_SPACE: BlobId = 100_000_000;

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
    locks: Arc<LockRegistry>,
    /// Serializes id selection only, never the byte transfer.
    alloc_lock: Arc<Mutex<()>>,
}

/// An opened blob and the read lock that keeps writers out while it is held.
pub struct BlobReader {
    pub file: File,
    pub len: u64,
    _guard: OwnedRwLockReadGuard<()>,
}

impl BlobReader {
    /// Give up the read lock and keep the handle. The handle stays on the
    /// content it opened even if the blob is replaced afterwards.
    pub fn into_parts(self) -> (File, u64) {
        (self.file, self.len)
    }
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, locks: Arc<LockRegistry>) -> Self {
        Self {
            root: root.into(),
            locks,
            alloc_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Path of the file holding `blob_id`. Does not check for existence.
    pub fn blob_path(&self, blob_id: BlobId) -> PathBuf {
        self.root.join(blob_id.to_string())
    }

    /// Store `data` under a freshly allocated id.
    ///
    /// The allocation lock covers only the create-if-absent retry loop; the
    /// write happens after it is released. If the write fails the claimed file
    /// is removed again.
    pub async fn create(&self, data: &[u8]) -> StorageResult<BlobId> {
        fs::create_dir_all(&self.root).await?;

        let (blob_id, mut file) = {
            let _alloc = self.alloc_lock.lock().await;
            loop {
                let candidate = rand::rng().random_range(1..BLOB_ID_SPACE);
                match OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(self.blob_path(candidate))
                    .await
                {
                    Ok(file) => break (candidate, file),
                    Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                        debug!(blob_id = candidate, "blob id taken, retrying");
                        continue;
                    }
                    Err(err) => return Err(StorageError::Io(err)),
                }
            }
        };

        if let Err(err) = write_all_synced(&mut file, data).await {
            drop(file);
            self.discard(&self.blob_path(blob_id)).await;
            return Err(StorageError::Io(err));
        }

        debug!(blob_id, size = data.len(), "blob created");
        Ok(blob_id)
    }

    /// Replace the content of an existing blob atomically.
    ///
    /// Bytes go to a temporary sibling which is renamed over the target, so a
    /// reader sees either the old or the new content. Holds the blob's write
    /// lock for the duration. On failure the original is left untouched.
    pub async fn write(&self, blob_id: BlobId, data: &[u8]) -> StorageResult<()> {
        let _guard = self.locks.write_blob(blob_id).await;

        let target = self.blob_path(blob_id);
        if !fs::try_exists(&target).await? {
            return Err(StorageError::BlobNotFound(blob_id));
        }
        persist_atomically(&target, data).await?;

        debug!(blob_id, size = data.len(), "blob replaced");
        Ok(())
    }

    /// Read a blob's full content under its read lock.
    pub async fn read(&self, blob_id: BlobId) -> StorageResult<Bytes> {
        let _guard = self.locks.read_blob(blob_id).await;
        fs::read(self.blob_path(blob_id))
            .await
            .map(Bytes::from)
            .map_err(|err| StorageError::from_blob_io(blob_id, err))
    }

    /// Open a blob for streaming.
    ///
    /// The handle refers to the content current at open time even if a later
    /// write renames new bytes over the path.
    pub async fn open(&self, blob_id: BlobId) -> StorageResult<BlobReader> {
        let guard = self.locks.read_blob(blob_id).await;
        let file = File::open(self.blob_path(blob_id))
            .await
            .map_err(|err| StorageError::from_blob_io(blob_id, err))?;
        let len = file.metadata().await?.len();
        Ok(BlobReader {
            file,
            len,
            _guard: guard,
        })
    }

    /// Size in bytes, or `None` when the blob file is missing.
    pub async fn size(&self, blob_id: BlobId) -> Option<u64> {
        fs::metadata(self.blob_path(blob_id))
            .await
            .ok()
            .map(|meta| meta.len())
    }

    /// Best-effort removal. Failures are logged, never returned: an orphaned
    /// file is preferable to failing the tree mutation that freed it.
    pub async fn delete(&self, blob_id: BlobId) {
        let _guard = self.locks.write_blob(blob_id).await;
        let path = self.blob_path(blob_id);
        match fs::remove_file(&path).await {
            Ok(()) => debug!(blob_id, "removed blob file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(blob_id, "blob file already missing");
            }
            Err(err) => warn!(blob_id, error = %err, "failed to remove blob file"),
        }
    }

    async fn discard(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to clean up partial blob");
            }
        }
    }
}

async fn write_all_synced(file: &mut File, data: &[u8]) -> io::Result<()> {
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Write `data` to a temporary sibling of `target`, then rename it into place.
///
/// The temporary file is removed on any failure.
pub(crate) async fn persist_atomically(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = target.parent().ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidInput, "target path missing parent directory")
    })?;
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.tmp-{}", file_name, Uuid::new_v4()));

    let result = async {
        let mut file = File::create(&tmp_path).await?;
        write_all_synced(&mut file, data).await?;
        drop(file);
        fs::rename(&tmp_path, target).await
    }
    .await;

    if let Err(err) = result {
        if let Err(cleanup) = fs::remove_file(&tmp_path).await {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temp file");
            }
        }
        return Err(err);
    }
    Ok(())
}
