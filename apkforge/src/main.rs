//! apkforge - Main Entry Point
//!
//! Serves the AAB upload form and the conversion endpoint.

use anyhow::{Context, Result};
use apkforge::{create_app, AppState, Config};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    init_tracing(config.log_json);

    info!("Starting apkforge");
    info!("Configuration:");
    info!("  Bind address: {}", config.bind_addr);
    info!("  bundletool: {}", config.tool.bundletool.display());
    info!("  Keystore: {}", config.signing.keystore.display());
    info!("  Key alias: {}", config.signing.key_alias);
    info!("  Max upload: {} bytes", config.max_upload_bytes);
    info!(
        "  Tool timeout: {}",
        humantime::format_duration(config.tool_timeout())
    );
    info!("  Temporary root: {}", config.tmp_root().display());

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e).context("invalid configuration");
    }

    let bind_addr = config.bind_addr;
    let app = create_app(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("apkforge listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("apkforge stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,apkforge=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight requests");
}
