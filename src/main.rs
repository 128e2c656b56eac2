use anyhow::{Context, Result};
use linkdrop::{db, handlers, telemetry, AppState, Config};
use std::net::SocketAddr;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init(config.log_json);

    let pool = db::connect(&config.database_url, config.db_max_connections).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let environment = config.environment.clone();

    let state = AppState::from_config(config, pool).await?;
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(%addr, environment = %environment, "File sharing backend listening");
    tracing::info!("Endpoints: POST /register, POST /login, POST /upload, GET /download/:id, GET /my-files, GET /health");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
