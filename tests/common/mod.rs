#![allow(dead_code)]

use async_trait::async_trait;
use drive_store::{
    db,
    models::{node::OwnerId, user::Account},
    services::{
        frame_extractor::{FrameError, FrameExtractor},
        thumbnail_cache::ThumbnailSettings,
    },
    state::{AppState, StoreSettings},
};
use image::DynamicImage;
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

/// Frame extractor double: counts invocations and returns a solid frame
/// after a short delay so concurrent callers overlap.
#[derive(Default)]
pub struct CountingExtractor {
    calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameExtractor for CountingExtractor {
    async fn extract_first_frame(
        &self,
        path: &Path,
        size: u32,
    ) -> Result<DynamicImage, FrameError> {
        assert!(path.exists(), "extractor handed a missing file");
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(DynamicImage::new_rgb8(size, size))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub extractor: Arc<CountingExtractor>,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_limit(16 * 1024 * 1024).await
    }

    pub async fn with_limit(max_upload_bytes: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta/drive.db").display());
        let pool = db::connect(&url, 4).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let extractor = Arc::new(CountingExtractor::default());
        let settings = StoreSettings {
            data_dir: dir.path().join("blobs"),
            thumbnail_dir: dir.path().join("thumbnails"),
            thumbnails: ThumbnailSettings::default(),
            max_upload_bytes,
        };
        let state = AppState::new(Arc::new(pool), settings, extractor.clone());
        Self {
            state,
            extractor,
            dir,
        }
    }

    pub async fn account(&self, username: &str) -> Account {
        self.state.accounts.create_account(username).await.unwrap()
    }

    /// Number of blob files currently on disk.
    pub fn blob_count(&self) -> usize {
        let root = self.dir.path().join("blobs");
        match std::fs::read_dir(root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
                .count(),
            Err(_) => 0,
        }
    }
}

pub fn owner(account: &Account) -> OwnerId {
    account.user.id
}

/// Encode a blank image of the given dimensions as PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
