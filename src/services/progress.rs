//! Upload progress side channel.
//!
//! A subscriber registers an upload id and receives integer percentages while
//! an upload with that id is consumed. Channels are bounded; when a subscriber
//! falls behind, new values are dropped rather than buffered.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Capacity of each per-upload progress channel.
const PROGRESS_CAPACITY: usize = 10;

#[derive(Clone, Default)]
pub struct ProgressRegistry {
    channels: Arc<DashMap<String, mpsc::Sender<u8>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the stream for `upload_id`, replacing any previous subscriber.
    pub fn subscribe(&self, upload_id: &str) -> ProgressSubscription {
        let (tx, rx) = mpsc::channel(PROGRESS_CAPACITY);
        self.channels.insert(upload_id.to_string(), tx.clone());
        debug!(upload_id, "progress stream opened");
        ProgressSubscription {
            upload_id: upload_id.to_string(),
            channels: Arc::clone(&self.channels),
            tx,
            rx,
        }
    }

    /// Best-effort notification. Missing subscribers and full channels are ignored.
    pub fn publish(&self, upload_id: &str, percent: u8) {
        let percent = percent.min(100);
        if let Some(tx) = self.channels.get(upload_id) {
            if tx.try_send(percent).is_err() {
                trace!(upload_id, percent, "progress notification dropped");
            }
        }
    }

    pub fn is_subscribed(&self, upload_id: &str) -> bool {
        self.channels.contains_key(upload_id)
    }
}

/// Receiving end of one progress stream. Dropping it tears the stream down.
pub struct ProgressSubscription {
    upload_id: String,
    channels: Arc<DashMap<String, mpsc::Sender<u8>>>,
    tx: mpsc::Sender<u8>,
    rx: mpsc::Receiver<u8>,
}

impl ProgressSubscription {
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub async fn recv(&mut self) -> Option<u8> {
        self.rx.recv().await
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        // Only remove our own channel; a newer subscriber may have replaced it.
        let tx = &self.tx;
        self.channels
            .remove_if(&self.upload_id, |_, current| current.same_channel(tx));
        debug!(upload_id = %self.upload_id, "progress stream closed");
    }
}

/// Percentage of `done` out of `total`, clamped to 0-100.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}
