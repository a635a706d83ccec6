use anyhow::Context;
use clap::Parser;
use reef_core::store::build_store;
use reef_server::config::{Cli, ServerConfig};
use reef_server::{demo, router, telemetry, ServerState};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::try_from(Cli::parse())?;
    telemetry::init_tracing(&config.log_filter)?;

    let store = build_store(config.redis_url.as_deref(), config.sweep_interval).await;
    let app = demo::build_app(store, config.app.clone());
    info!(
        app = %app.name(),
        session_ttl_secs = config.app.session_ttl.as_secs(),
        dispatch_mode = ?config.app.dispatch_mode,
        "application ready"
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(listen_addr = %config.listen_addr, "reef server listening");

    axum::serve(listener, router(ServerState::new(app)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("reef server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
