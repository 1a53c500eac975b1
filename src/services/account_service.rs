//! Account bootstrap: every user is created together with their root directory.

use crate::{
    models::{
        node::OwnerId,
        user::{Account, User},
    },
    services::{
        error::{StorageError, StorageResult, is_unique_violation},
        tree_repository as repo,
    },
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

const USERNAME_MAX_LEN: usize = 64;

#[derive(Clone)]
pub struct AccountService {
    pub db: Arc<SqlitePool>,
}

impl AccountService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a user and their root node in one transaction.
    pub async fn create_account(&self, username: &str) -> StorageResult<Account> {
        let username = username.trim();
        if username.is_empty() || username.len() > USERNAME_MAX_LEN {
            return Err(StorageError::InvalidRequest(format!(
                "username must be 1-{USERNAME_MAX_LEN} characters"
            )));
        }

        let mut tx = self.db.begin_with("BEGIN IMMEDIATE").await?;
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, created_at) VALUES (?, ?)
             RETURNING id, username, created_at",
        )
        .bind(username)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StorageError::UsernameTaken(username.to_string())
            } else {
                StorageError::Sqlx(err)
            }
        })?;
        let root = repo::insert_root(&mut tx, user.id).await?;
        tx.commit().await?;

        info!(owner = user.id, root_id = root.id, "account created");
        Ok(Account {
            user,
            root_id: root.id,
        })
    }

    pub async fn get(&self, owner: OwnerId) -> StorageResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE id = ?",
        )
        .bind(owner)
        .fetch_optional(&*self.db)
        .await?;
        Ok(user)
    }
}
