//! HTTP handlers. Identity is resolved upstream; handlers trust the
//! `x-user-id` header and scope every operation to it.

pub mod account_handlers;
pub mod health_handlers;
pub mod node_handlers;
pub mod share_handlers;
pub mod upload_handlers;

use crate::{errors::AppError, models::node::OwnerId};
use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::Response,
};
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated owner of the request.
#[derive(Debug, Clone, Copy)]
pub struct Owner(pub OwnerId);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<OwnerId>().ok())
            .filter(|id| *id > 0)
            .map(Owner)
            .ok_or_else(|| AppError::unauthorized("Unauthorized"))
    }
}

/// Stream a file's content with download headers.
pub(crate) fn file_response(
    name: &str,
    file: File,
    len: u64,
    modified: DateTime<Utc>,
    inline: bool,
) -> Response {
    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;

    let content_type = mime_guess::from_path(name).first_or_octet_stream();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&len.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    let disposition = if inline { "inline" } else { "attachment" };
    let safe_name = name.replace(['"', '\\'], "_");
    if let Ok(value) = HeaderValue::from_str(&format!("{}; filename=\"{}\"", disposition, safe_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

/// IMF-fixdate, the `Last-Modified` format.
pub(crate) fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `inline=1` or `inline=true`.
pub(crate) fn is_inline(flag: Option<&str>) -> bool {
    matches!(flag, Some("1") | Some("true"))
}
