//! Error taxonomy shared by the storage services.

use crate::models::node::{BlobId, NodeId};
use crate::services::frame_extractor::FrameError;
use serde::Serialize;
use std::io;
use thiserror::Error;

/// Machine-distinguishable outcome class surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Conflict,
    FolderExists,
    InvalidRequest,
    CycleRejected,
    Gone,
    StorageFailure,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::FolderExists => "folder_exists",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::CycleRejected => "cycle_rejected",
            ErrorCode::Gone => "gone",
            ErrorCode::StorageFailure => "storage_failure",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("blob {0} not found")]
    BlobNotFound(BlobId),
    #[error("no root directory for this user")]
    RootNotFound,
    #[error("shared link not found")]
    ShareNotFound,
    #[error("shared link expired")]
    ShareExpired,
    #[error("destination already contains an entry named `{0}`")]
    NameConflict(String),
    #[error("folder_exists")]
    FolderExists(String),
    #[error("username `{0}` already exists")]
    UsernameTaken(String),
    #[error("name `{name}` invalid: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("{0}")]
    InvalidRequest(String),
    #[error("node {0} is not a directory")]
    NotADirectory(NodeId),
    #[error("node {0} is a directory")]
    IsADirectory(NodeId),
    #[error("the root directory can not be {0}")]
    RootImmutable(&'static str),
    #[error("cannot move or copy a node into itself or a descendant")]
    CycleRejected,
    #[error("not a supported media file: `{0}`")]
    UnsupportedMedia(String),
    #[error("upload exceeds the {0} byte limit")]
    UploadTooLarge(u64),
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    FrameExtraction(#[from] FrameError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::NodeNotFound(_)
            | StorageError::BlobNotFound(_)
            | StorageError::RootNotFound
            | StorageError::ShareNotFound => ErrorCode::NotFound,
            StorageError::ShareExpired => ErrorCode::Gone,
            StorageError::NameConflict(_) | StorageError::UsernameTaken(_) => ErrorCode::Conflict,
            StorageError::FolderExists(_) => ErrorCode::FolderExists,
            StorageError::InvalidName { .. }
            | StorageError::InvalidRequest(_)
            | StorageError::NotADirectory(_)
            | StorageError::IsADirectory(_)
            | StorageError::RootImmutable(_)
            | StorageError::UnsupportedMedia(_)
            | StorageError::UploadTooLarge(_)
            | StorageError::Cancelled => ErrorCode::InvalidRequest,
            StorageError::CycleRejected => ErrorCode::CycleRejected,
            StorageError::Sqlx(err) if is_unique_violation(err) => ErrorCode::Conflict,
            StorageError::FrameExtraction(_)
            | StorageError::Image(_)
            | StorageError::Join(_)
            | StorageError::Sqlx(_)
            | StorageError::Io(_) => ErrorCode::StorageFailure,
        }
    }

    /// Map an I/O error on a blob path, turning a missing file into `BlobNotFound`.
    pub(crate) fn from_blob_io(blob_id: BlobId, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::BlobNotFound(blob_id)
        } else {
            StorageError::Io(err)
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation()
            || db_err.message().to_ascii_lowercase().contains("unique")
    )
}
