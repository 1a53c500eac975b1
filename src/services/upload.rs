//! Chunked upload intake with progress reporting and cooperative cancellation.

use crate::services::{
    error::{StorageError, StorageResult},
    progress::{ProgressRegistry, percent_of},
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use std::fmt::Display;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where to report progress for one upload.
pub struct ProgressTarget<'a> {
    pub registry: &'a ProgressRegistry,
    pub upload_id: &'a str,
    /// Expected byte count; percentages are reported only when known.
    pub total: Option<u64>,
}

impl ProgressTarget<'_> {
    fn report(&self, received: u64) {
        if let Some(total) = self.total.filter(|total| *total > 0) {
            // 100 is reserved for the committed upload.
            self.registry
                .publish(self.upload_id, percent_of(received, total).min(99));
        }
    }

    /// Signal that the upload has been stored.
    pub fn complete(&self) {
        self.registry.publish(self.upload_id, 100);
    }
}

/// Drain `stream` into memory.
///
/// Before each chunk the cancellation token is checked, so an abandoned
/// request stops consuming input. Bodies larger than `limit` are rejected.
pub async fn collect_body<S, E>(
    stream: S,
    limit: u64,
    cancel: &CancellationToken,
    progress: Option<&ProgressTarget<'_>>,
) -> StorageResult<Bytes>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    pin_mut!(stream);
    let mut buf = BytesMut::new();
    let mut received: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            debug!(received, "upload cancelled by caller");
            return Err(StorageError::Cancelled);
        }
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(received, "upload cancelled by caller");
                return Err(StorageError::Cancelled);
            }
            next = stream.next() => match next {
                Some(chunk) => chunk,
                None => break,
            },
        };
        let chunk = chunk
            .map_err(|err| StorageError::InvalidRequest(format!("failed to read upload: {err}")))?;

        received += chunk.len() as u64;
        if received > limit {
            return Err(StorageError::UploadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);

        if let Some(progress) = progress {
            progress.report(received);
        }
    }

    Ok(buf.freeze())
}
