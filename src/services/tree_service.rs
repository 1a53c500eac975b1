//! src/services/tree_service.rs
//!
//! TreeService: the tree mutation engine. Each operation runs in a single
//! `BEGIN IMMEDIATE` transaction composed from `tree_repository` calls and
//! blob store I/O, so a failure at any step leaves the tree as it was.
//!
//! Blob files follow the transaction outcome: blobs allocated by a rolled
//! back transaction are removed, blobs freed by a committed one are removed
//! after the commit.

use crate::{
    models::node::{BlobId, Node, NodeEntry, NodeId, NodeView, OwnerId},
    services::{
        blob_store::{BlobReader, BlobStore},
        error::{StorageError, StorageResult, is_unique_violation},
        share_service,
        thumbnail_cache::{MediaKind, ThumbnailCache},
        tree_repository as repo,
    },
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_NAME_LEN: usize = 255;

/// Result of a recursive copy.
#[derive(Debug, Clone, Serialize)]
pub struct CopyOutcome {
    /// Id of the new top-level node.
    pub node_id: NodeId,
    pub copied: usize,
    /// Descendants that failed to copy and were left out.
    pub skipped: usize,
}

/// Blob side effects of one transaction, applied once its outcome is known.
#[derive(Default, Debug)]
struct BlobLedger {
    created: Vec<BlobId>,
    replaced: Vec<BlobId>,
    freed: Vec<BlobId>,
}

#[derive(Clone)]
pub struct TreeService {
    /// Shared SQLite connection pool used for node metadata.
    pub db: Arc<SqlitePool>,
    blobs: BlobStore,
    thumbnails: ThumbnailCache,
}

impl TreeService {
    pub fn new(db: Arc<SqlitePool>, blobs: BlobStore, thumbnails: ThumbnailCache) -> Self {
        Self {
            db,
            blobs,
            thumbnails,
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn thumbnails(&self) -> &ThumbnailCache {
        &self.thumbnails
    }

    /// Create `name` under `parent` (the owner's root when `None`), or replace
    /// what is already there.
    ///
    /// - nothing there: insert a directory, or a file backed by a new blob;
    /// - directory there, directory requested: no-op, existing node returned;
    /// - directory there, file requested: `FolderExists`;
    /// - file there, directory requested: the file is deleted, then the
    ///   directory inserted;
    /// - file there, file requested: content replaced in place, node id and
    ///   blob id preserved, modification time bumped.
    pub async fn upload(
        &self,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
        is_dir: bool,
        data: &[u8],
    ) -> StorageResult<Node> {
        ensure_name_safe(name)?;
        let mut tx = self.begin().await?;
        let mut ledger = BlobLedger::default();
        let result = self
            .upload_in(&mut tx, &mut ledger, owner, parent, name, is_dir, data)
            .await;
        let node = self.finish(tx, ledger, result).await?;
        info!(owner, node_id = node.id, name, is_dir, "upload committed");
        Ok(node)
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_in(
        &self,
        conn: &mut SqliteConnection,
        ledger: &mut BlobLedger,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
        is_dir: bool,
        data: &[u8],
    ) -> StorageResult<Node> {
        let parent = match parent {
            Some(id) => repo::require_dir(conn, owner, id).await?,
            None => repo::root(conn, owner).await?,
        };

        match repo::find_child(conn, owner, parent.id, name).await? {
            None if is_dir => repo::insert_dir(conn, owner, parent.id, name).await,
            None => self.insert_new_file(conn, ledger, owner, parent.id, name, data).await,
            Some(existing) if existing.is_dir && is_dir => {
                debug!(owner, node_id = existing.id, "directory already exists");
                Ok(existing)
            }
            Some(existing) if existing.is_dir => {
                Err(StorageError::FolderExists(name.to_string()))
            }
            Some(existing) if is_dir => {
                debug!(owner, node_id = existing.id, "directory supersedes file");
                delete_subtree(conn, ledger, owner, &existing).await?;
                repo::insert_dir(conn, owner, parent.id, name).await
            }
            Some(mut existing) => {
                let blob_id = existing
                    .blob_id
                    .ok_or(StorageError::BlobNotFound(existing.id))?;
                self.blobs.write(blob_id, data).await?;
                ledger.replaced.push(blob_id);
                let now = Utc::now();
                repo::touch(conn, owner, existing.id, now).await?;
                existing.updated_at = now;
                Ok(existing)
            }
        }
    }

    async fn insert_new_file(
        &self,
        conn: &mut SqliteConnection,
        ledger: &mut BlobLedger,
        owner: OwnerId,
        parent: NodeId,
        name: &str,
        data: &[u8],
    ) -> StorageResult<Node> {
        let blob_id = self.blobs.create(data).await?;
        match repo::insert_file(conn, owner, parent, name, blob_id).await {
            Ok(node) => {
                ledger.created.push(blob_id);
                Ok(node)
            }
            Err(err) => {
                // A node row must never reference a blob that is not there, and
                // a blob must never outlive a node row that was not written.
                self.blobs.delete(blob_id).await;
                Err(err)
            }
        }
    }

    /// Copy `src` (recursively for directories) into the directory `dst`.
    ///
    /// A same-name entry at the destination is a `NameConflict` unless
    /// `overwrite`, in which case it is deleted first. An entry that is `src`
    /// or contains it is never overwritten. Descendants that fail
    /// to copy are logged and counted in `skipped`; the top-level node must
    /// copy or the whole operation fails.
    pub async fn copy(
        &self,
        owner: OwnerId,
        src: NodeId,
        dst: NodeId,
        overwrite: bool,
    ) -> StorageResult<CopyOutcome> {
        let mut tx = self.begin().await?;
        let mut ledger = BlobLedger::default();
        let result = self
            .copy_in(&mut tx, &mut ledger, owner, src, dst, overwrite)
            .await;
        let outcome = self.finish(tx, ledger, result).await?;
        info!(
            owner,
            src,
            dst,
            node_id = outcome.node_id,
            copied = outcome.copied,
            skipped = outcome.skipped,
            "copy committed"
        );
        Ok(outcome)
    }

    async fn copy_in(
        &self,
        conn: &mut SqliteConnection,
        ledger: &mut BlobLedger,
        owner: OwnerId,
        src: NodeId,
        dst: NodeId,
        overwrite: bool,
    ) -> StorageResult<CopyOutcome> {
        let src = repo::require(conn, owner, src).await?;
        let dst = repo::require(conn, owner, dst).await?;
        if src.is_dir && (dst.id == src.id || repo::is_ancestor(conn, owner, src.id, dst.id).await?)
        {
            return Err(StorageError::CycleRejected);
        }
        if !dst.is_dir {
            return Err(StorageError::NotADirectory(dst.id));
        }

        if let Some(existing) = repo::find_child(conn, owner, dst.id, &src.name).await? {
            if !overwrite || encloses(conn, owner, &existing, &src).await? {
                return Err(StorageError::NameConflict(src.name.clone()));
            }
            delete_subtree(conn, ledger, owner, &existing).await?;
        }

        let top = self.copy_one(conn, ledger, owner, &src, dst.id).await?;
        let mut outcome = CopyOutcome {
            node_id: top.id,
            copied: 1,
            skipped: 0,
        };

        let mut pending = Vec::new();
        if src.is_dir {
            pending.push((src.id, top.id));
        }
        while let Some((from, to)) = pending.pop() {
            let kids = match repo::children(conn, owner, from).await {
                Ok(kids) => kids,
                Err(err) => {
                    warn!(owner, node_id = from, error = %err, "failed to list children for copy");
                    outcome.skipped += 1;
                    continue;
                }
            };
            for child in kids {
                match self.copy_one(conn, ledger, owner, &child, to).await {
                    Ok(copy) => {
                        outcome.copied += 1;
                        if child.is_dir {
                            pending.push((child.id, copy.id));
                        }
                    }
                    Err(err) => {
                        warn!(owner, node_id = child.id, error = %err, "copy child failed, skipping");
                        outcome.skipped += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Copy a single node under `parent`, duplicating its blob for files.
    async fn copy_one(
        &self,
        conn: &mut SqliteConnection,
        ledger: &mut BlobLedger,
        owner: OwnerId,
        node: &Node,
        parent: NodeId,
    ) -> StorageResult<Node> {
        match node.blob_id {
            None => repo::insert_dir(conn, owner, parent, &node.name).await,
            Some(blob_id) => {
                let content = self.blobs.read(blob_id).await?;
                self.insert_new_file(conn, ledger, owner, parent, &node.name, &content)
                    .await
            }
        }
    }

    /// Re-parent `src` under the directory `dst`.
    ///
    /// Rejected with `CycleRejected` when `dst` is `src` or one of its
    /// descendants. A same-name entry that contains `src` is a `NameConflict`
    /// even with `overwrite`. Only the parent reference changes.
    pub async fn move_node(
        &self,
        owner: OwnerId,
        src: NodeId,
        dst: NodeId,
        overwrite: bool,
    ) -> StorageResult<Node> {
        let mut tx = self.begin().await?;
        let mut ledger = BlobLedger::default();
        let result = self
            .move_in(&mut tx, &mut ledger, owner, src, dst, overwrite)
            .await;
        let node = self.finish(tx, ledger, result).await?;
        info!(owner, node_id = node.id, dst, "move committed");
        Ok(node)
    }

    async fn move_in(
        &self,
        conn: &mut SqliteConnection,
        ledger: &mut BlobLedger,
        owner: OwnerId,
        src: NodeId,
        dst: NodeId,
        overwrite: bool,
    ) -> StorageResult<Node> {
        let mut src = repo::require(conn, owner, src).await?;
        if src.is_root() {
            return Err(StorageError::RootImmutable("moved"));
        }
        let dst = repo::require(conn, owner, dst).await?;
        if dst.id == src.id || repo::is_ancestor(conn, owner, src.id, dst.id).await? {
            return Err(StorageError::CycleRejected);
        }
        if !dst.is_dir {
            return Err(StorageError::NotADirectory(dst.id));
        }
        if src.parent_id == Some(dst.id) {
            debug!(owner, node_id = src.id, "move to current parent, nothing to do");
            return Ok(src);
        }

        if let Some(existing) = repo::find_child(conn, owner, dst.id, &src.name).await? {
            if !overwrite || encloses(conn, owner, &existing, &src).await? {
                return Err(StorageError::NameConflict(src.name.clone()));
            }
            delete_subtree(conn, ledger, owner, &existing).await?;
        }

        repo::set_parent(conn, owner, src.id, dst.id).await?;
        src.parent_id = Some(dst.id);
        Ok(src)
    }

    /// Change a node's name.
    ///
    /// There is no overwrite option: a sibling already holding `new_name` is
    /// reported by the store's uniqueness constraint as `NameConflict`.
    pub async fn rename(&self, owner: OwnerId, src: NodeId, new_name: &str) -> StorageResult<Node> {
        ensure_name_safe(new_name)?;
        let mut tx = self.begin().await?;
        let result = async {
            let mut node = repo::require(&mut tx, owner, src).await?;
            if node.is_root() {
                return Err(StorageError::RootImmutable("renamed"));
            }
            if node.name != new_name {
                repo::set_name(&mut tx, owner, node.id, new_name)
                    .await
                    .map_err(|err| match err {
                        StorageError::Sqlx(ref e) if is_unique_violation(e) => {
                            StorageError::NameConflict(new_name.to_string())
                        }
                        other => other,
                    })?;
                node.name = new_name.to_string();
            }
            Ok::<_, StorageError>(node)
        }
        .await;
        let node = self.finish(tx, BlobLedger::default(), result).await?;
        info!(owner, node_id = node.id, new_name, "rename committed");
        Ok(node)
    }

    /// Delete a node and its whole subtree, freeing every blob in it.
    pub async fn delete(&self, owner: OwnerId, id: NodeId) -> StorageResult<usize> {
        let mut tx = self.begin().await?;
        let mut ledger = BlobLedger::default();
        let result = async {
            let node = repo::require(&mut tx, owner, id).await?;
            if node.is_root() {
                return Err(StorageError::RootImmutable("deleted"));
            }
            delete_subtree(&mut tx, &mut ledger, owner, &node).await
        }
        .await;
        let removed = self.finish(tx, ledger, result).await?;
        info!(owner, node_id = id, removed, "delete committed");
        Ok(removed)
    }

    /// A node (the root when `id` is `None`) with its path, size, share token
    /// and direct children.
    pub async fn describe(&self, owner: OwnerId, id: Option<NodeId>) -> StorageResult<NodeView> {
        let mut conn = self.db.acquire().await?;
        let node = match id {
            Some(id) => repo::require(&mut conn, owner, id).await?,
            None => repo::root(&mut conn, owner).await?,
        };
        let path = repo::path_of(&mut conn, owner, &node).await?;
        let kids = repo::children(&mut conn, owner, node.id).await?;

        let entry = self.entry(&mut conn, owner, node).await?;
        let mut children = Vec::with_capacity(kids.len());
        for kid in kids {
            children.push(self.entry(&mut conn, owner, kid).await?);
        }

        Ok(NodeView {
            entry,
            path,
            children,
        })
    }

    async fn entry(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        node: Node,
    ) -> StorageResult<NodeEntry> {
        let size = match node.blob_id {
            Some(blob_id) => self.blobs.size(blob_id).await,
            None => None,
        };
        let share_token = share_service::token_for(conn, owner, node.id).await?;
        Ok(NodeEntry {
            node,
            size,
            share_token,
        })
    }

    /// Resolve a file node owned by `owner`.
    pub async fn file_node(&self, owner: OwnerId, id: NodeId) -> StorageResult<(Node, BlobId)> {
        let mut conn = self.db.acquire().await?;
        let node = repo::require(&mut conn, owner, id).await?;
        match node.blob_id {
            Some(blob_id) => Ok((node, blob_id)),
            None => Err(StorageError::IsADirectory(id)),
        }
    }

    /// Open a file node's content for streaming.
    pub async fn open_file(&self, owner: OwnerId, id: NodeId) -> StorageResult<(Node, BlobReader)> {
        let (node, blob_id) = self.file_node(owner, id).await?;
        let reader = self.blobs.open(blob_id).await?;
        Ok((node, reader))
    }

    /// Read a file node's full content.
    pub async fn read_file(&self, owner: OwnerId, id: NodeId) -> StorageResult<Bytes> {
        let (_, blob_id) = self.file_node(owner, id).await?;
        self.blobs.read(blob_id).await
    }

    /// Preview image for an image or video file node.
    pub async fn thumbnail(&self, owner: OwnerId, id: NodeId) -> StorageResult<Bytes> {
        let (node, blob_id) = self.file_node(owner, id).await?;
        let kind = MediaKind::from_name(&node.name)?;
        self.thumbnails.get_or_create(blob_id, kind).await
    }

    async fn begin(&self) -> StorageResult<Transaction<'static, Sqlite>> {
        // Take the write lock up front so concurrent mutations queue on the
        // busy timeout instead of failing on lock upgrade.
        Ok(self.db.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Commit or roll back `tx` according to `result`, then settle the blob
    /// side effects recorded in `ledger`.
    async fn finish<T>(
        &self,
        tx: Transaction<'static, Sqlite>,
        ledger: BlobLedger,
        result: StorageResult<T>,
    ) -> StorageResult<T> {
        match result {
            Ok(value) => match tx.commit().await {
                Ok(()) => {
                    self.settle_committed(ledger).await;
                    Ok(value)
                }
                Err(err) => {
                    self.settle_rolled_back(ledger).await;
                    Err(StorageError::Sqlx(err))
                }
            },
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "transaction rollback failed");
                }
                self.settle_rolled_back(ledger).await;
                Err(err)
            }
        }
    }

    async fn settle_committed(&self, ledger: BlobLedger) {
        for blob_id in ledger.freed {
            self.blobs.delete(blob_id).await;
            self.thumbnails.invalidate(blob_id).await;
        }
        for blob_id in ledger.replaced {
            self.thumbnails.invalidate(blob_id).await;
        }
    }

    async fn settle_rolled_back(&self, ledger: BlobLedger) {
        for blob_id in ledger.created {
            self.blobs.delete(blob_id).await;
        }
        for blob_id in ledger.replaced {
            // Content was swapped before the rollback; only the metadata reverted.
            warn!(blob_id, "blob content replaced by a rolled back transaction");
            self.thumbnails.invalidate(blob_id).await;
        }
    }
}

/// Delete `node` and all of its descendants, children before parents.
///
/// Rows already removed by someone else count as deleted. Blobs are recorded
/// in `ledger` and removed only after the transaction commits.
async fn delete_subtree(
    conn: &mut SqliteConnection,
    ledger: &mut BlobLedger,
    owner: OwnerId,
    node: &Node,
) -> StorageResult<usize> {
    let order = repo::subtree(conn, owner, node).await?;
    let mut removed = 0;
    for doomed in order.iter().rev() {
        if repo::delete_row(conn, owner, doomed.id).await? {
            removed += 1;
            if let Some(blob_id) = doomed.blob_id {
                ledger.freed.push(blob_id);
            }
        } else {
            debug!(owner, node_id = doomed.id, "node already removed");
        }
    }
    Ok(removed)
}

/// True if overwriting `existing` would also delete `src`: it is `src` itself
/// or one of its ancestors.
async fn encloses(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    existing: &Node,
    src: &Node,
) -> StorageResult<bool> {
    if existing.id == src.id {
        return Ok(true);
    }
    if !existing.is_dir {
        return Ok(false);
    }
    repo::is_ancestor(conn, owner, existing.id, src.id).await
}

/// Reject names that can not live in a single path segment.
pub fn ensure_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| {
        Err(StorageError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };
    if name.trim().is_empty() {
        return invalid("must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("must be at most 255 bytes");
    }
    if name == "." || name == ".." {
        return invalid("must not be `.` or `..`");
    }
    if name
        .chars()
        .any(|c| c.is_control() || c == '/' || c == '\\')
    {
        return invalid("must not contain slashes or control characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_with_separators_are_rejected() {
        assert!(ensure_name_safe("a.txt").is_ok());
        assert!(ensure_name_safe("My Photos").is_ok());
        for bad in ["", "   ", ".", "..", "a/b", "a\\b", "nul\0byte", "tab\tname"] {
            assert!(
                matches!(ensure_name_safe(bad), Err(StorageError::InvalidName { .. })),
                "{bad:?} should be rejected"
            );
        }
        assert!(ensure_name_safe(&"x".repeat(256)).is_err());
    }
}
