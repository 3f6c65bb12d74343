use std::path::Path;
use std::sync::Arc;

use d_config::config_routes;
use d_config::file_io::open_file_for_append;
use d_config::init_sled_db;
use d_config::ConfigService;
use d_config::ConfigStore;
use d_config::Error;
use d_config::Result;
use d_config::ServiceConfig;
use d_config::SledVersionLog;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = ServiceConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.server.log_dir)?;
    info!("starting with {:?}", settings);

    // Build the store
    let db = init_sled_db(&settings.storage)?;
    let log = Arc::new(SledVersionLog::new(db)?);
    let store = ConfigStore::new(log.clone(), settings.storage.allocation);
    let service = Arc::new(ConfigService::new(store, settings.server.request_timeout()));

    // Serve API and metrics until a shutdown signal arrives
    let (addr, server) = warp::serve(config_routes(service))
        .try_bind_with_graceful_shutdown(settings.server.listen_address, async {
            if let Err(e) = graceful_shutdown().await {
                error!("Failed to listen for shutdown signals: {:?}", e);
            }
        })
        .map_err(|e| Error::Fatal(format!("bind {} failed: {}", settings.server.listen_address, e)))?;

    info!("config service listening on {}. Waiting for CTRL+C signal...", addr);
    server.await;

    if let Err(e) = log.flush_async().await {
        error!("final flush failed: {:?}", e);
    }
    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    info!("Shutdown server..");
    Ok(())
}

pub fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(log_dir.join("d-config.log"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
