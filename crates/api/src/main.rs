//! LedgerLink - integration health and transaction reconciliation service

use std::sync::Arc;

use anyhow::Context;
use ledgerlink_api::utils::logging::init_tracing;
use ledgerlink_api::{router, AppContext};
use ledgerlink_infra::config;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env before reading configuration
    let dotenv = dotenvy::dotenv();

    let config = config::load().context("failed to load configuration")?;
    init_tracing(&config.logging);
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(err) => warn!(error = %err, "no .env file loaded"),
    }

    info!("LedgerLink starting...");
    let bind_address = config.server.bind_address.clone();
    let ctx = Arc::new(AppContext::new(config).await.context("failed to initialize application context")?);
    ctx.start_background().await.context("failed to start sync scheduler")?;

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(address = %bind_address, "LedgerLink listening");

    axum::serve(listener, router(Arc::clone(&ctx)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    ctx.shutdown().await.context("shutdown failed")?;
    info!("LedgerLink stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
