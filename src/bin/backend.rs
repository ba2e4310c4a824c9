use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{fs, signal};
use tracing::{error, info, warn};
use tubefetch::{
    cleanup::CleanupScheduler,
    config::load_service_config,
    extractor::{Extractor, YtDlp},
    server::{AppState, router},
    telemetry::{LogFormat, init_logging},
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info", LogFormat::from_env())?;

    let config = load_service_config().context("loading configuration")?;
    fs::create_dir_all(&config.serving_dir)
        .await
        .with_context(|| format!("creating {}", config.serving_dir.display()))?;
    fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("creating {}", config.work_dir.display()))?;

    let extractor = YtDlp::new(&config.ytdlp_path).with_cookies(config.cookies_file.clone());
    match extractor.version() {
        Ok(version) => info!(%version, "yt-dlp available"),
        Err(err) => warn!(error = %err, "yt-dlp is not usable; requests will fail until it is"),
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("parsing listen address {}:{}", config.host, config.port))?;
    info!(
        %addr,
        environment = %config.environment,
        serving_dir = %config.serving_dir.display(),
        cleanup_delay_secs = config.cleanup_delay.as_secs(),
        "starting API server"
    );

    let (cleanup, cleanup_task) = CleanupScheduler::spawn();
    let app = router(AppState::new(config, Arc::new(extractor), cleanup));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("API server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    // The router held the last scheduler handles; once they are gone the
    // cleanup task removes whatever is still pending and exits.
    if let Err(err) = cleanup_task.await {
        error!(error = %err, "cleanup task failed");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received");
}
