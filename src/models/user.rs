//! Represents an account that owns exactly one tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::node::{NodeId, OwnerId};

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: OwnerId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A freshly created account together with its root directory.
#[derive(Serialize, Clone, Debug)]
pub struct Account {
    #[serde(flatten)]
    pub user: User,
    pub root_id: NodeId,
}
