use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub thumbnail_dir: String,
    pub database_url: String,
    pub ffmpeg_path: String,
    pub thumbnail_size: u32,
    pub thumbnail_quality: u8,
    pub max_upload_bytes: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Multi-tenant hierarchical file store")]
pub struct Args {
    /// Host to bind to (overrides DRIVE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DRIVE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides DRIVE_STORE_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Directory for cached thumbnails (overrides DRIVE_STORE_THUMBNAIL_DIR)
    #[arg(long)]
    pub thumbnail_dir: Option<String>,

    /// Database URL (overrides DRIVE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Frame extractor binary used for video thumbnails (overrides DRIVE_STORE_FFMPEG)
    #[arg(long)]
    pub ffmpeg_path: Option<String>,

    /// Maximum accepted upload size in bytes (overrides DRIVE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// Merge parsed arguments over the environment over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("DRIVE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("DRIVE_STORE_PORT", 3000)?;
        let env_data = env::var("DRIVE_STORE_DATA_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_thumbs = env::var("DRIVE_STORE_THUMBNAIL_DIR")
            .unwrap_or_else(|_| "./data/thumbnails".into());
        let env_db = env::var("DRIVE_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/drive.db".into());
        let env_ffmpeg = env::var("DRIVE_STORE_FFMPEG").unwrap_or_else(|_| "ffmpeg".into());
        let env_max_upload = env_parse("DRIVE_STORE_MAX_UPLOAD_BYTES", 1024 * 1024 * 1024)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            data_dir: args.data_dir.unwrap_or(env_data),
            thumbnail_dir: args.thumbnail_dir.unwrap_or(env_thumbs),
            database_url: args.database_url.unwrap_or(env_db),
            ffmpeg_path: args.ffmpeg_path.unwrap_or(env_ffmpeg),
            thumbnail_size: env_parse("DRIVE_STORE_THUMBNAIL_SIZE", 200)?,
            thumbnail_quality: env_parse("DRIVE_STORE_THUMBNAIL_QUALITY", 85)?,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional environment variable, falling back to `default`.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
