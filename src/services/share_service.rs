//! src/services/share_service.rs
//!
//! ShareService: public read grants. One grant per node and owner: asking
//! again returns the existing token.

use crate::{
    models::{
        node::{Node, NodeId, OwnerId},
        share::Share,
    },
    services::{
        error::{StorageError, StorageResult},
        tree_repository as repo,
    },
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};

const TOKEN_BYTES: usize = 16;

#[derive(Clone)]
pub struct ShareService {
    pub db: Arc<SqlitePool>,
}

impl ShareService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Grant public access to `node_id`, reusing an existing grant while it is
    /// still active. An expired grant is replaced by a fresh token.
    pub async fn create_share(
        &self,
        owner: OwnerId,
        node_id: NodeId,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<Share> {
        let mut tx = self.db.begin_with("BEGIN IMMEDIATE").await?;
        repo::require(&mut tx, owner, node_id).await?;

        let now = Utc::now();
        if let Some(existing) = find_by_node(&mut tx, owner, node_id).await? {
            if !existing.is_expired(now) {
                tx.commit().await?;
                return Ok(existing);
            }
            sqlx::query("DELETE FROM shares WHERE id = ?")
                .bind(existing.id)
                .execute(&mut *tx)
                .await?;
            debug!(owner, node_id, "replacing expired share");
        }

        let share = sqlx::query_as::<_, Share>(
            "INSERT INTO shares (token, node_id, owner_id, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, token, node_id, owner_id, created_at, expires_at",
        )
        .bind(generate_token())
        .bind(node_id)
        .bind(owner)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(owner, node_id, "share created");
        Ok(share)
    }

    /// Revoke the grant for `node_id`. Revoking a missing grant is not an error.
    pub async fn delete_share(&self, owner: OwnerId, node_id: NodeId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM shares WHERE node_id = ? AND owner_id = ?")
            .bind(node_id)
            .bind(owner)
            .execute(&*self.db)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            info!(owner, node_id, "share revoked");
        }
        Ok(removed)
    }

    /// The file node behind a token, for anonymous readers.
    pub async fn resolve(&self, token: &str) -> StorageResult<Node> {
        let mut conn = self.db.acquire().await?;
        let share = sqlx::query_as::<_, Share>(
            "SELECT id, token, node_id, owner_id, created_at, expires_at
             FROM shares WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StorageError::ShareNotFound)?;

        if share.is_expired(Utc::now()) {
            return Err(StorageError::ShareExpired);
        }

        let node = repo::require(&mut conn, share.owner_id, share.node_id).await?;
        if node.is_dir {
            return Err(StorageError::IsADirectory(node.id));
        }
        Ok(node)
    }
}

async fn find_by_node(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    node_id: NodeId,
) -> StorageResult<Option<Share>> {
    let share = sqlx::query_as::<_, Share>(
        "SELECT id, token, node_id, owner_id, created_at, expires_at
         FROM shares WHERE node_id = ? AND owner_id = ?",
    )
    .bind(node_id)
    .bind(owner)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(share)
}

/// Token of the grant on `node_id`, if any.
pub async fn token_for(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    node_id: NodeId,
) -> StorageResult<Option<String>> {
    Ok(find_by_node(conn, owner, node_id)
        .await?
        .map(|share| share.token))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE.encode(bytes)
}
