use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Mutex};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, RunMode};
use services::{
    blob_store::BlobStore, metadata_index::MetadataIndex, object_store::ObjectStoreService,
};

const MAX_DB_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    init_logging(cfg.log_file.as_deref())?;

    tracing::info!("Starting file-store with config: {:?}", cfg);

    // --- Initialize SQLite metadata index ---
    ensure_db_parent(&cfg.database_url)?;
    let index = MetadataIndex::connect(&cfg.database_url, MAX_DB_CONNECTIONS)
        .await
        .with_context(|| format!("opening metadata index at {}", cfg.database_url))?;
    let applied = index.migrate().await.context("applying index schema")?;
    tracing::debug!("Applied {} schema statements", applied);

    if mode == RunMode::Migrate {
        tracing::info!("Database migration complete.");
        index.close().await;
        return Ok(()); // exit after migration
    }

    // --- Initialize blob storage + core service ---
    let blobs = BlobStore::open(&cfg.storage_dir)
        .await
        .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
    let service = ObjectStoreService::new(index.clone(), blobs)
        .with_max_object_bytes(cfg.max_object_bytes);

    if mode == RunMode::Reconcile {
        let report = service.reconcile().await?;
        tracing::info!(
            "Reconcile complete: {} staging files removed, {} orphans removed, {} dangling records",
            report.staging_removed,
            report.orphans_removed.len(),
            report.dangling_records.len()
        );
        for name in &report.dangling_records {
            tracing::warn!("dangling record needs attention: {}", name);
        }
        index.close().await;
        return Ok(());
    }

    let swept = service.blobs().clear_staging().await?;
    if swept > 0 {
        tracing::info!("Removed {} abandoned staging files", swept);
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

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
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    index.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

/// Install the global subscriber. With `log_file` set, logs are appended
/// to that file without ANSI colours; otherwise they go to stderr.
fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    Ok(())
}

/// Create the parent directory of a file-backed SQLite URL if needed.
fn ensure_db_parent(database_url: &str) -> Result<()> {
    // Extract the local file path SQLx will use
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    if db_path.is_empty() || db_path.starts_with(":memory:") {
        return Ok(());
    }
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
