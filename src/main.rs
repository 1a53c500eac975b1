use anyhow::Result;
use drive_store::{config::AppConfig, db, state::AppState};
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

const MAX_DB_CONNECTIONS: u32 = 8;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting drive-store with config: {:?}", cfg);

    // --- Ensure storage directories exist ---
    for dir in [&cfg.data_dir, &cfg.thumbnail_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).await?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url, MAX_DB_CONNECTIONS).await?);
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Build router ---
    let state = AppState::from_config(db, &cfg);
    let shutdown = state.shutdown.clone();
    let app = drive_store::app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received, draining requests");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
