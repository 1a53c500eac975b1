//! src/services/tree_repository.rs
//!
//! Row-level access to the `nodes` table. Every function takes the connection
//! to run on, so the tree engine can compose them inside one transaction.
//! All reads are scoped by owner: another user's node looks exactly like a
//! missing one.

use crate::{
    models::node::{BlobId, Node, NodeId, OwnerId},
    services::error::{StorageError, StorageResult},
};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::collections::HashSet;
use tracing::warn;

/// Display name of every root directory.
pub const ROOT_NAME: &str = "/";

/// Fetch a node by id.
pub async fn get(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
) -> StorageResult<Option<Node>> {
    let node = sqlx::query_as::<_, Node>(
        "SELECT id, owner_id, name, is_dir, parent_id, blob_id, updated_at
         FROM nodes WHERE id = ? AND owner_id = ?",
    )
    .bind(id)
    .bind(owner)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(node)
}

/// Fetch a node by id, failing with `NodeNotFound` when absent.
pub async fn require(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
) -> StorageResult<Node> {
    get(conn, owner, id)
        .await?
        .ok_or(StorageError::NodeNotFound(id))
}

/// Fetch a node that must be a directory.
pub async fn require_dir(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
) -> StorageResult<Node> {
    let node = require(conn, owner, id).await?;
    if !node.is_dir {
        return Err(StorageError::NotADirectory(id));
    }
    Ok(node)
}

/// The owner's root directory.
pub async fn root(conn: &mut SqliteConnection, owner: OwnerId) -> StorageResult<Node> {
    sqlx::query_as::<_, Node>(
        "SELECT id, owner_id, name, is_dir, parent_id, blob_id, updated_at
         FROM nodes WHERE parent_id IS NULL AND owner_id = ?",
    )
    .bind(owner)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::RootNotFound)
}

/// Look up the child of `parent` called `name` (case-sensitive).
pub async fn find_child(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    parent: NodeId,
    name: &str,
) -> StorageResult<Option<Node>> {
    let node = sqlx::query_as::<_, Node>(
        "SELECT id, owner_id, name, is_dir, parent_id, blob_id, updated_at
         FROM nodes WHERE parent_id = ? AND name = ? AND owner_id = ?",
    )
    .bind(parent)
    .bind(name)
    .bind(owner)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(node)
}

/// Direct children of `parent`. Order is not meaningful.
pub async fn children(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    parent: NodeId,
) -> StorageResult<Vec<Node>> {
    let nodes = sqlx::query_as::<_, Node>(
        "SELECT id, owner_id, name, is_dir, parent_id, blob_id, updated_at
         FROM nodes WHERE parent_id = ? AND owner_id = ?",
    )
    .bind(parent)
    .bind(owner)
    .fetch_all(&mut *conn)
    .await?;
    Ok(nodes)
}

/// `node` and all of its descendants in pre-order (parents before children).
pub async fn subtree(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    node: &Node,
) -> StorageResult<Vec<Node>> {
    let mut order = Vec::new();
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        if current.is_dir {
            stack.extend(children(conn, owner, current.id).await?);
        }
        order.push(current);
    }
    Ok(order)
}

/// Ancestors of `node`, nearest first, ending at the root.
///
/// Stops early if a parent row is missing or a parent id repeats, so a
/// damaged table can not make the walk spin.
pub async fn ancestors(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    node: &Node,
) -> StorageResult<Vec<Node>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([node.id]);
    let mut next = node.parent_id;
    while let Some(parent_id) = next {
        if !seen.insert(parent_id) {
            warn!(owner, node_id = node.id, parent_id, "cycle detected in ancestor walk");
            break;
        }
        match get(conn, owner, parent_id).await? {
            Some(parent) => {
                next = parent.parent_id;
                chain.push(parent);
            }
            None => break,
        }
    }
    Ok(chain)
}

/// Absolute path of `node`: `/` for the root, `/a/b` below it.
pub async fn path_of(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    node: &Node,
) -> StorageResult<String> {
    if node.is_root() {
        return Ok("/".to_string());
    }
    let chain = ancestors(conn, owner, node).await?;
    let mut parts: Vec<&str> = chain
        .iter()
        .filter(|ancestor| !ancestor.is_root())
        .map(|ancestor| ancestor.name.as_str())
        .collect();
    parts.reverse();
    parts.push(&node.name);
    Ok(format!("/{}", parts.join("/")))
}

/// True if `ancestor` is a proper ancestor of the node `id`.
pub async fn is_ancestor(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    ancestor: NodeId,
    id: NodeId,
) -> StorageResult<bool> {
    let Some(node) = get(conn, owner, id).await? else {
        return Ok(false);
    };
    let chain = ancestors(conn, owner, &node).await?;
    Ok(chain.iter().any(|n| n.id == ancestor))
}

/// Insert the owner's root directory.
pub async fn insert_root(conn: &mut SqliteConnection, owner: OwnerId) -> StorageResult<Node> {
    insert(conn, owner, None, ROOT_NAME, None).await
}

pub async fn insert_dir(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    parent: NodeId,
    name: &str,
) -> StorageResult<Node> {
    insert(conn, owner, Some(parent), name, None).await
}

pub async fn insert_file(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    parent: NodeId,
    name: &str,
    blob_id: BlobId,
) -> StorageResult<Node> {
    insert(conn, owner, Some(parent), name, Some(blob_id)).await
}

async fn insert(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    parent: Option<NodeId>,
    name: &str,
    blob_id: Option<BlobId>,
) -> StorageResult<Node> {
    let node = sqlx::query_as::<_, Node>(
        "INSERT INTO nodes (owner_id, name, is_dir, parent_id, blob_id, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id, owner_id, name, is_dir, parent_id, blob_id, updated_at",
    )
    .bind(owner)
    .bind(name)
    .bind(blob_id.is_none())
    .bind(parent)
    .bind(blob_id)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    Ok(node)
}

/// Bump the modification time.
pub async fn touch(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
    at: DateTime<Utc>,
) -> StorageResult<()> {
    let result = sqlx::query("UPDATE nodes SET updated_at = ? WHERE id = ? AND owner_id = ?")
        .bind(at)
        .bind(id)
        .bind(owner)
        .execute(&mut *conn)
        .await?;
    expect_row(result.rows_affected(), id)
}

pub async fn set_name(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
    name: &str,
) -> StorageResult<()> {
    let result = sqlx::query(
        "UPDATE nodes SET name = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
    )
    .bind(name)
    .bind(Utc::now())
    .bind(id)
    .bind(owner)
    .execute(&mut *conn)
    .await?;
    expect_row(result.rows_affected(), id)
}

pub async fn set_parent(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
    parent: NodeId,
) -> StorageResult<()> {
    let result = sqlx::query(
        "UPDATE nodes SET parent_id = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
    )
    .bind(parent)
    .bind(Utc::now())
    .bind(id)
    .bind(owner)
    .execute(&mut *conn)
    .await?;
    expect_row(result.rows_affected(), id)
}

/// Delete one node row. Returns false if it was already gone.
pub async fn delete_row(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
) -> StorageResult<bool> {
    let result = sqlx::query("DELETE FROM nodes WHERE id = ? AND owner_id = ?")
        .bind(id)
        .bind(owner)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn expect_row(rows: u64, id: NodeId) -> StorageResult<()> {
    if rows == 0 {
        Err(StorageError::NodeNotFound(id))
    } else {
        Ok(())
    }
}
