//! Represents a public read grant for one node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::node::{NodeId, OwnerId};

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Share {
    pub id: i64,

    /// URL-safe random token handed out to anonymous readers.
    pub token: String,

    pub node_id: NodeId,

    pub owner_id: OwnerId,

    pub created_at: DateTime<Utc>,

    /// Links without an expiry never lapse.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Share {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}
