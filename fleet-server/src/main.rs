//! Fleet server - main entry point

use clap::Parser;
use fleet_server::config::{AppConfig, MonitorSettings};
use fleet_server::{routes, utils, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides FLEET_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Data directory (overrides FLEET_DATA_DIR)
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    utils::logger::init(args.log_level.as_deref().unwrap_or(&config.log_level))?;

    tracing::info!("Starting fleet server v{} on port {}", env!("CARGO_PKG_VERSION"), config.port);

    for dir in [&config.data_dir, &config.backups_dir, &config.log_dir] {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to create directory");
        }
    }

    let settings = MonitorSettings::load(&config.settings_path()).await;
    let interval = settings.interval();
    let state = Arc::new(AppState::new(config.clone(), settings).await?);

    if state.admin_token.is_none() {
        tracing::warn!("No admin token configured, write operations are unauthenticated");
    }
    for marker in state.backups.pending_restores().await {
        tracing::warn!(
            instance = %marker.instance,
            artifact = %marker.artifact,
            holding = %marker.holding_dir.display(),
            started = %marker.started,
            "Unfinished restore found, data directory needs attention"
        );
    }

    let cancel = CancellationToken::new();
    let monitor = state.monitor.clone().spawn(interval, cancel.clone());

    let app = routes::create_router(state.clone());

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();
    if let Err(e) = monitor.await {
        tracing::warn!("Health monitor task ended abnormally: {}", e);
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
