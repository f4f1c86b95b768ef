//! ICR Server - REST API for PSA graded card label recognition
//!
//! Exposes the icr-core pipeline over HTTP under `/api/icr`:
//! upload, extract, stitch, OCR, match and review.

use std::net::SocketAddr;

use icr_server::{create_router_with_config, AppState, Config};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("icr_server=info,icr_core=info,tower_http=info")
        }))
        .with_target(true)
        .init();

    let config = Config::from_env();
    let state = AppState::from_config(&config).await.inspect_err(|e| {
        tracing::error!(error = %e, "Failed to start ICR server");
    })?;

    let app = create_router_with_config(state, &config);
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "ICR server listening on http://{}",
        addr
    );
    tracing::info!("API docs at http://{}/swagger-ui", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("ICR server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
