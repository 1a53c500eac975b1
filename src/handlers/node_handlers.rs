//! HTTP handlers for tree reads and mutations.

use crate::{
    errors::AppError,
    handlers::{Owner, file_response, is_inline},
    models::node::{Node, NodeId, NodeView},
    services::tree_service::CopyOutcome,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct InlineQuery {
    pub inline: Option<String>,
}

/// Body of `POST /copy` and `POST /move`.
#[derive(Debug, Deserialize)]
pub struct TransferReq {
    pub src_id: Option<NodeId>,
    pub dst_id: Option<NodeId>,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub src_id: Option<NodeId>,
    pub new_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteReq {
    pub src_id: Option<NodeId>,
}

#[derive(Debug, Serialize)]
pub struct NodeResp {
    pub success: bool,
    #[serde(flatten)]
    pub node: Node,
}

#[derive(Debug, Serialize)]
pub struct CopyResp {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: CopyOutcome,
}

#[derive(Debug, Serialize)]
pub struct DeleteResp {
    pub success: bool,
    pub removed: usize,
}

/// `GET /node`: the caller's root directory with its children.
pub async fn get_root_node(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<NodeView>, AppError> {
    Ok(Json(state.tree.describe(owner, None).await?))
}

/// `GET /node/{id}`: one node with path, size, share token and children.
pub async fn get_node(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<NodeId>,
) -> Result<Json<NodeView>, AppError> {
    Ok(Json(state.tree.describe(owner, Some(id)).await?))
}

/// `GET /file/{id}`: stream a file's content.
pub async fn get_file(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<NodeId>,
    Query(q): Query<InlineQuery>,
) -> Result<Response, AppError> {
    let (node, reader) = state.tree.open_file(owner, id).await?;
    let (file, len) = reader.into_parts();
    Ok(file_response(
        &node.name,
        file,
        len,
        node.updated_at,
        is_inline(q.inline.as_deref()),
    ))
}

/// `GET /thumbnail/{id}`: JPEG preview of an image or video file.
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<NodeId>,
) -> Result<Response, AppError> {
    let bytes = state.tree.thumbnail(owner, id).await?;
    let etag = format!("\"{:x}\"", md5::compute(&bytes));

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}

/// `POST /copy`: recursive copy into a directory.
pub async fn copy_node(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<TransferReq>,
) -> Result<Json<CopyResp>, AppError> {
    let (src, dst) = transfer_ids(&req)?;
    let outcome = state.tree.copy(owner, src, dst, req.overwrite).await?;
    Ok(Json(CopyResp {
        success: true,
        outcome,
    }))
}

/// `POST /move`: re-parent a node.
pub async fn move_node(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<TransferReq>,
) -> Result<Json<NodeResp>, AppError> {
    let (src, dst) = transfer_ids(&req)?;
    let node = state.tree.move_node(owner, src, dst, req.overwrite).await?;
    Ok(Json(NodeResp {
        success: true,
        node,
    }))
}

/// `POST /rename`
pub async fn rename_node(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<RenameReq>,
) -> Result<Json<NodeResp>, AppError> {
    let (Some(src), Some(new_name)) = (req.src_id.filter(|id| *id > 0), req.new_name) else {
        return Err(AppError::bad_request("src_id and new_name required"));
    };
    let node = state.tree.rename(owner, src, &new_name).await?;
    Ok(Json(NodeResp {
        success: true,
        node,
    }))
}

/// `POST /delete`: recursive delete.
pub async fn delete_node(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<DeleteReq>,
) -> Result<Json<DeleteResp>, AppError> {
    let Some(src) = req.src_id.filter(|id| *id > 0) else {
        return Err(AppError::bad_request("src_id required"));
    };
    let removed = state.tree.delete(owner, src).await?;
    Ok(Json(DeleteResp {
        success: true,
        removed,
    }))
}

fn transfer_ids(req: &TransferReq) -> Result<(NodeId, NodeId), AppError> {
    match (
        req.src_id.filter(|id| *id > 0),
        req.dst_id.filter(|id| *id > 0),
    ) {
        (Some(src), Some(dst)) => Ok((src, dst)),
        _ => Err(AppError::bad_request("src_id and dst_id required")),
    }
}
