//! src/services/thumbnail_cache.rs
//!
//! ThumbnailCache: lazily derived JPEG previews, one file per blob id
//! (`{root}/{blob_id}.jpg`). The cache is disposable: losing a file only costs
//! a regeneration.

use crate::{
    models::node::BlobId,
    services::{
        blob_store::{BlobStore, persist_atomically},
        error::{StorageError, StorageResult},
        frame_extractor::FrameExtractor,
        lock_registry::LockRegistry,
    },
};
use bytes::Bytes;
use image::{DynamicImage, codecs::jpeg::JpegEncoder, imageops::FilterType};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::fs;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];
const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "webm", "ogg", "mov", "mkv", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a file by the extension of its node name.
    pub fn from_name(name: &str) -> StorageResult<Self> {
        let ext = Path::new(name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Ok(MediaKind::Video)
        } else {
            Err(StorageError::UnsupportedMedia(name.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailSettings {
    /// Bounding box edge in pixels.
    pub size: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            size: 200,
            quality: 85,
        }
    }
}

#[derive(Clone)]
pub struct ThumbnailCache {
    root: PathBuf,
    settings: ThumbnailSettings,
    blobs: BlobStore,
    locks: Arc<LockRegistry>,
    extractor: Arc<dyn FrameExtractor>,
    generations: Arc<AtomicUsize>,
}

impl ThumbnailCache {
    pub fn new(
        root: impl Into<PathBuf>,
        settings: ThumbnailSettings,
        blobs: BlobStore,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Self {
        let locks = Arc::clone(blobs.locks());
        Self {
            root: root.into(),
            settings,
            blobs,
            locks,
            extractor,
            generations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn thumbnail_path(&self, blob_id: BlobId) -> PathBuf {
        self.root.join(format!("{blob_id}.jpg"))
    }

    /// Number of thumbnails generated by this process.
    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::Relaxed)
    }

    /// Serve the cached thumbnail for `blob_id`, generating it on a miss.
    ///
    /// The fast path reads the persisted file without locking. On a miss the
    /// per-key lock is taken and the cache checked again, so a burst of
    /// requests for the same blob produces exactly one generation.
    pub async fn get_or_create(&self, blob_id: BlobId, kind: MediaKind) -> StorageResult<Bytes> {
        let path = self.thumbnail_path(blob_id);
        if let Some(bytes) = self.load_cached(&path).await {
            debug!(blob_id, "serving cached thumbnail");
            return Ok(bytes);
        }

        let _lease = self.locks.thumbnail_lock(&lock_key(blob_id)).await;
        if let Some(bytes) = self.load_cached(&path).await {
            debug!(blob_id, "serving thumbnail created by another request");
            return Ok(bytes);
        }

        info!(blob_id, ?kind, "generating thumbnail");
        let preview = match kind {
            MediaKind::Image => self.image_preview(blob_id).await?,
            MediaKind::Video => self.video_preview(blob_id).await?,
        };

        let quality = self.settings.quality;
        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&preview, quality)).await??;
        self.generations.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = self.persist(&path, &encoded).await {
            warn!(blob_id, error = %err, "failed to persist thumbnail");
        }
        Ok(Bytes::from(encoded))
    }

    /// Drop the cached thumbnail for a blob whose content changed or went away.
    ///
    /// Waits for any in-flight generation of the same key so a preview of the
    /// old content is not persisted afterwards.
    pub async fn invalidate(&self, blob_id: BlobId) {
        let _lease = self.locks.thumbnail_lock(&lock_key(blob_id)).await;
        match fs::remove_file(self.thumbnail_path(blob_id)).await {
            Ok(()) => debug!(blob_id, "thumbnail invalidated"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(blob_id, error = %err, "failed to remove stale thumbnail"),
        }
    }

    async fn load_cached(&self, path: &Path) -> Option<Bytes> {
        match fs::read(path).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable cached thumbnail");
                None
            }
        }
    }

    async fn image_preview(&self, blob_id: BlobId) -> StorageResult<DynamicImage> {
        let source = self.blobs.read(blob_id).await?;
        let size = self.settings.size;
        let preview = tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&source)?;
            Ok::<_, image::ImageError>(fit_within(img, size))
        })
        .await??;
        Ok(preview)
    }

    async fn video_preview(&self, blob_id: BlobId) -> StorageResult<DynamicImage> {
        // Keep writers out while the external tool reads the file.
        let _guard = self.locks.read_blob(blob_id).await;
        let source = self.blobs.blob_path(blob_id);
        if !fs::try_exists(&source).await? {
            return Err(StorageError::BlobNotFound(blob_id));
        }
        let frame = self
            .extractor
            .extract_first_frame(&source, self.settings.size)
            .await?;
        Ok(frame)
    }

    async fn persist(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        persist_atomically(path, bytes).await
    }
}

fn lock_key(blob_id: BlobId) -> String {
    format!("thumb_{blob_id}")
}

/// Shrink `img` to fit a `size` x `size` box, keeping aspect ratio. Never upscales.
fn fit_within(img: DynamicImage, size: u32) -> DynamicImage {
    if img.width() <= size && img.height() <= size {
        img
    } else {
        img.resize(size, size, FilterType::Lanczos3)
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    // JPEG carries no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
    Ok(out)
}
