//! First-frame extraction for video thumbnails, delegated to an external tool.

use async_trait::async_trait;
use image::DynamicImage;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
};
use thiserror::Error;
use tokio::{fs, process::Command};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame extractor `{0}` not found")]
    ToolMissing(String),
    #[error("frame extractor exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },
    #[error("failed to decode extracted frame: {0}")]
    Decode(String),
    #[error("frame extractor i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces one decoded image representing an early frame of a video file.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// `size` is the edge of the square canvas the frame is scaled and padded to.
    async fn extract_first_frame(&self, path: &Path, size: u32)
        -> Result<DynamicImage, FrameError>;
}

/// Runs `ffmpeg` to grab the first frame, letterboxed onto a black square.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    binary: PathBuf,
    scratch_dir: PathBuf,
}

impl FfmpegExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    fn filter(size: u32) -> String {
        format!(
            "scale={size}:{size}:force_original_aspect_ratio=decrease,pad={size}:{size}:-1:-1:color=black"
        )
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract_first_frame(
        &self,
        path: &Path,
        size: u32,
    ) -> Result<DynamicImage, FrameError> {
        let out_path = self
            .scratch_dir
            .join(format!("frame-{}.jpg", Uuid::new_v4()));

        let output = Command::new(&self.binary)
            .arg("-ss")
            .arg("00:00:00")
            .arg("-i")
            .arg(path)
            .args(["-vframes", "1", "-vf"])
            .arg(Self::filter(size))
            .args(["-q:v", "2", "-f", "image2", "-update", "1", "-y"])
            .arg(&out_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    FrameError::ToolMissing(self.binary.display().to_string())
                } else {
                    FrameError::Io(err)
                }
            })?;

        let result = if output.status.success() {
            match fs::read(&out_path).await {
                Ok(bytes) => image::load_from_memory(&bytes)
                    .map_err(|err| FrameError::Decode(err.to_string())),
                Err(err) => Err(FrameError::Io(err)),
            }
        } else {
            Err(FrameError::NonZeroExit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        };

        match fs::remove_file(&out_path).await {
            Ok(()) => debug!(path = %out_path.display(), "removed extracted frame"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %out_path.display(), error = %err, "failed to remove extracted frame"),
        }

        result
    }
}
