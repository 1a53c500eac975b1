//! Upload intake (multipart or JSON) and the progress event stream.

use crate::{
    errors::AppError,
    handlers::Owner,
    models::node::{Node, NodeId},
    services::{
        error::StorageError,
        progress::ProgressSubscription,
        upload::{ProgressTarget, collect_body},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{HeaderMap, header},
    response::sse::{Event, KeepAlive, Sse},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Cap on the non-file multipart fields (names, ids, flags).
const MAX_TEXT_FIELD_BYTES: u64 = 4 * 1024;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub upload_id: Option<String>,
}

/// JSON form of an upload; content travels base64-encoded.
#[derive(Debug, Deserialize)]
pub struct JsonUpload {
    pub filename: String,
    #[serde(default)]
    pub is_dir: bool,
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub data_base64: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResp {
    pub success: bool,
    pub node_id: NodeId,
    pub name: String,
}

impl From<Node> for UploadResp {
    fn from(node: Node) -> Self {
        Self {
            success: true,
            node_id: node.id,
            name: node.name,
        }
    }
}

/// Fields gathered from either request form.
#[derive(Default)]
struct UploadForm {
    filename: Option<String>,
    is_dir: bool,
    parent_id: Option<NodeId>,
    data: Bytes,
}

/// `POST /upload`
///
/// Accepts `multipart/form-data` with fields `filename`, `is_dir`,
/// `parent_id`, `upload_id` and `file`, or a JSON body. Progress is published
/// under `upload_id` when the caller supplies one.
pub async fn upload(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> Result<Json<UploadResp>, AppError> {
    // Stops consuming the body when the server starts shutting down.
    let cancel = state.shutdown.child_token();

    let total = content_length(request.headers());
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let mut upload_id = query.upload_id.filter(|id| !id.is_empty());
    let form = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;
        read_multipart(&state, multipart, &mut upload_id, total, &cancel).await?
    } else {
        read_json(&state, request, upload_id.as_deref(), total, &cancel).await?
    };

    let Some(filename) = form.filename.filter(|name| !name.is_empty()) else {
        return Err(AppError::bad_request("filename required"));
    };

    let node = state
        .tree
        .upload(owner, form.parent_id, &filename, form.is_dir, &form.data)
        .await?;

    if let Some(upload_id) = upload_id.as_deref() {
        ProgressTarget {
            registry: &state.progress,
            upload_id,
            total,
        }
        .complete();
    }
    info!(owner, node_id = node.id, size = form.data.len(), "upload accepted");
    Ok(Json(node.into()))
}

async fn read_multipart(
    state: &AppState,
    mut multipart: Multipart,
    upload_id: &mut Option<String>,
    total: Option<u64>,
    cancel: &CancellationToken,
) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if form.filename.is_none() {
                    form.filename = field.file_name().map(str::to_string);
                }
                let target = upload_id.as_deref().map(|upload_id| ProgressTarget {
                    registry: &state.progress,
                    upload_id,
                    total,
                });
                form.data =
                    collect_body(field, state.max_upload_bytes, cancel, target.as_ref()).await?;
            }
            "filename" | "is_dir" | "parent_id" | "upload_id" => {
                let raw = collect_body(field, MAX_TEXT_FIELD_BYTES, cancel, None).await?;
                let value = std::str::from_utf8(&raw)
                    .map_err(|_| AppError::bad_request(format!("{name} must be UTF-8")))?;
                apply_text_field(&mut form, upload_id, &name, value.trim())?;
            }
            other => debug!(field = other, "ignoring unknown upload field"),
        }
    }
    Ok(form)
}

fn apply_text_field(
    form: &mut UploadForm,
    upload_id: &mut Option<String>,
    name: &str,
    value: &str,
) -> Result<(), AppError> {
    match name {
        "filename" => form.filename = Some(value.to_string()),
        "is_dir" => form.is_dir = matches!(value, "1" | "true"),
        "parent_id" if value.is_empty() => form.parent_id = None,
        "parent_id" => {
            let id = value
                .parse::<NodeId>()
                .map_err(|_| AppError::bad_request("parent_id must be an integer"))?;
            form.parent_id = Some(id);
        }
        "upload_id" if !value.is_empty() && upload_id.is_none() => {
            *upload_id = Some(value.to_string());
        }
        _ => {}
    }
    Ok(())
}

async fn read_json(
    state: &AppState,
    request: Request,
    upload_id: Option<&str>,
    total: Option<u64>,
    cancel: &CancellationToken,
) -> Result<UploadForm, AppError> {
    let target = upload_id.map(|upload_id| ProgressTarget {
        registry: &state.progress,
        upload_id,
        total,
    });
    // Base64 inflates content by a third; leave room for the envelope.
    let encoded_limit = state.max_upload_bytes.saturating_mul(4) / 3 + 4096;
    let body = collect_body(
        request.into_body().into_data_stream(),
        encoded_limit,
        cancel,
        target.as_ref(),
    )
    .await?;

    let req: JsonUpload = serde_json::from_slice(&body)
        .map_err(|err| AppError::bad_request(format!("invalid upload body: {err}")))?;
    let data = match req.data_base64.as_deref() {
        Some(encoded) if !req.is_dir => general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| AppError::bad_request("data_base64 is not valid base64"))?,
        _ => Vec::new(),
    };
    if data.len() as u64 > state.max_upload_bytes {
        return Err(StorageError::UploadTooLarge(state.max_upload_bytes).into());
    }

    Ok(UploadForm {
        filename: Some(req.filename),
        is_dir: req.is_dir,
        parent_id: req.parent_id,
        data: Bytes::from(data),
    })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub upload_id: Option<String>,
}

enum ProgressState {
    Start(ProgressSubscription),
    Streaming(ProgressSubscription),
    Done,
}

/// `GET /upload/progress?upload_id=`
///
/// Server-sent events carrying integer percentages. Starts with `0` and ends
/// after `100`. Dropping the connection unregisters the stream.
pub async fn upload_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Some(upload_id) = query.upload_id.filter(|id| !id.is_empty()) else {
        return Err(AppError::bad_request("upload_id required"));
    };
    let subscription = state.progress.subscribe(&upload_id);
    Ok(Sse::new(progress_events(subscription)).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}

fn progress_events(
    subscription: ProgressSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(ProgressState::Start(subscription), |state| async move {
        match state {
            ProgressState::Start(sub) => Some((percent_event(0), ProgressState::Streaming(sub))),
            ProgressState::Streaming(mut sub) => {
                let percent = sub.recv().await?;
                let event = percent_event(percent);
                if percent >= 100 {
                    debug!(upload_id = sub.upload_id(), "upload progress complete");
                    Some((event, ProgressState::Done))
                } else {
                    Some((event, ProgressState::Streaming(sub)))
                }
            }
            ProgressState::Done => None,
        }
    })
}

fn percent_event(percent: u8) -> Result<Event, Infallible> {
    Ok(Event::default().data(percent.to_string()))
}
