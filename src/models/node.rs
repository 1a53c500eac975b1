//! Represents an entry (file or directory) in a user's tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type NodeId = i64;
pub type OwnerId = i64;
pub type BlobId = i64;

/// A single node row.
///
/// `blob_id` is present exactly when `is_dir` is false; the `nodes` table
/// enforces this with a CHECK constraint. The per-user root is the only node
/// without a `parent_id`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,

    /// Owning user. Every read is scoped by this column.
    pub owner_id: OwnerId,

    /// Display name, unique among siblings.
    pub name: String,

    pub is_dir: bool,

    pub parent_id: Option<NodeId>,

    /// Backing blob for file nodes.
    #[serde(skip_serializing)]
    pub blob_id: Option<BlobId>,

    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Listing entry returned to clients: the node plus derived fields.
#[derive(Serialize, Clone, Debug)]
pub struct NodeEntry {
    #[serde(flatten)]
    pub node: Node,

    /// Blob size in bytes, files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_token: Option<String>,
}

/// A node with its absolute path and direct children.
#[derive(Serialize, Clone, Debug)]
pub struct NodeView {
    #[serde(flatten)]
    pub entry: NodeEntry,

    pub path: String,

    pub children: Vec<NodeEntry>,
}
