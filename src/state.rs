//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        account_service::AccountService,
        blob_store::BlobStore,
        frame_extractor::{FfmpegExtractor, FrameExtractor},
        lock_registry::LockRegistry,
        progress::ProgressRegistry,
        share_service::ShareService,
        thumbnail_cache::{ThumbnailCache, ThumbnailSettings},
        tree_service::TreeService,
    },
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Storage locations and limits needed to assemble the services.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub data_dir: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub thumbnails: ThumbnailSettings,
    pub max_upload_bytes: u64,
}

impl From<&AppConfig> for StoreSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            data_dir: PathBuf::from(&cfg.data_dir),
            thumbnail_dir: PathBuf::from(&cfg.thumbnail_dir),
            thumbnails: ThumbnailSettings {
                size: cfg.thumbnail_size,
                quality: cfg.thumbnail_quality,
            },
            max_upload_bytes: cfg.max_upload_bytes,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub tree: TreeService,
    pub shares: ShareService,
    pub accounts: AccountService,
    pub progress: ProgressRegistry,
    pub max_upload_bytes: u64,
    /// Cancelled once the server begins a graceful shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the services for the configured ffmpeg binary.
    pub fn from_config(db: Arc<SqlitePool>, cfg: &AppConfig) -> Self {
        let extractor = Arc::new(FfmpegExtractor::new(&cfg.ffmpeg_path));
        Self::new(db, StoreSettings::from(cfg), extractor)
    }

    pub fn new(
        db: Arc<SqlitePool>,
        settings: StoreSettings,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Self {
        let locks = Arc::new(LockRegistry::new());
        let blobs = BlobStore::new(settings.data_dir, locks);
        let thumbnails = ThumbnailCache::new(
            settings.thumbnail_dir,
            settings.thumbnails,
            blobs.clone(),
            extractor,
        );
        Self {
            tree: TreeService::new(db.clone(), blobs, thumbnails),
            shares: ShareService::new(db.clone()),
            accounts: AccountService::new(db),
            progress: ProgressRegistry::new(),
            max_upload_bytes: settings.max_upload_bytes,
            shutdown: CancellationToken::new(),
        }
    }
}
