//! One cleanup pass over expired files, meant to be run by cron or a scheduler.
//!
//! Exits 0 after a full pass, even if individual deletions failed; exits 1 when
//! the database, blob store or configuration cannot be reached at startup.

use anyhow::{Context, Result};
use chrono::Utc;
use linkdrop::reaper::Reaper;
use linkdrop::storage::FileStorage;
use linkdrop::{blob, db, telemetry, Config};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "Cleanup aborted");
            eprintln!("Cleanup error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init(config.log_json);

    let pool = db::connect(&config.database_url, 2).await?;
    tracing::info!("Connected to database");

    let blobs = blob::from_config(&config.blob)
        .await
        .context("Failed to initialize blob storage")?;

    let reaper = Reaper::new(Arc::new(FileStorage::new(pool.clone())), blobs);
    reaper
        .run_once(Utc::now())
        .await
        .context("Failed to query expired files")?;

    pool.close().await;
    Ok(())
}
