//! Public link management and anonymous downloads.

use crate::{
    errors::AppError,
    handlers::{Owner, file_response, is_inline, node_handlers::InlineQuery},
    models::{node::NodeId, share::Share},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateShareReq {
    pub node_id: NodeId,
    /// Lifetime of a new link; omitted means it never expires.
    pub expires_in_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ShareResp {
    pub success: bool,
    pub url: String,
    #[serde(flatten)]
    pub share: Share,
}

#[derive(Debug, Serialize)]
pub struct RevokeResp {
    pub success: bool,
    pub removed: bool,
}

/// `POST /share`
pub async fn create_share(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<CreateShareReq>,
) -> Result<Json<ShareResp>, AppError> {
    let expires_at = match req.expires_in_secs {
        Some(secs) if secs <= 0 => {
            return Err(AppError::bad_request("expires_in_secs must be positive"));
        }
        Some(secs) => {
            let lifetime = Duration::try_seconds(secs)
                .ok_or_else(|| AppError::bad_request("expires_in_secs out of range"))?;
            let at = Utc::now()
                .checked_add_signed(lifetime)
                .ok_or_else(|| AppError::bad_request("expires_in_secs out of range"))?;
            Some(at)
        }
        None => None,
    };

    let share = state
        .shares
        .create_share(owner, req.node_id, expires_at)
        .await?;
    Ok(Json(ShareResp {
        success: true,
        url: format!("/s/{}", share.token),
        share,
    }))
}

/// `DELETE /share/{node_id}`
pub async fn delete_share(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(node_id): Path<NodeId>,
) -> Result<Json<RevokeResp>, AppError> {
    let removed = state.shares.delete_share(owner, node_id).await?;
    Ok(Json(RevokeResp {
        success: true,
        removed,
    }))
}

/// `GET /s/{token}`: download through a public link. No identity required.
pub async fn get_shared_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(q): Query<InlineQuery>,
) -> Result<Response, AppError> {
    let node = state.shares.resolve(&token).await?;
    let (node, reader) = state.tree.open_file(node.owner_id, node.id).await?;
    let (file, len) = reader.into_parts();
    Ok(file_response(
        &node.name,
        file,
        len,
        node.updated_at,
        is_inline(q.inline.as_deref()),
    ))
}
