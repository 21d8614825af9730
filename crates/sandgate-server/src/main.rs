//! Sandgate server entry point.
//!
//! Loads configuration from the environment, starts the lifecycle event loop
//! and serves the HTTP API until Ctrl-C.

use sandgate_server::{http, SandgateConfig, SandgateServer};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("sandgate_server=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Sandgate server");

    let config = SandgateConfig::from_env()?;
    tracing::info!(
        http_addr = %config.http_addr,
        ingress = ?config.ingress,
        control_port = config.control_port,
        "Configuration loaded"
    );

    // A gateway that cannot publish addresses must not serve traffic
    config.validate()?;
    config.validate_warn();

    let server = SandgateServer::new(config.clone());
    server.start_events().await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http_server = server.clone();
    let http_addr = config.http_addr;
    let http_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = http::serve(http_server, http_addr, shutdown).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(http_addr = %config.http_addr, "Server ready");

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    // Stop in-flight readiness probes first so pending creates can return
    server.shutdown();
    let _ = shutdown_tx.send(());
    let _ = http_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
