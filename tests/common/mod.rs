use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use d_config::config_routes;
use d_config::init_sled_db;
use d_config::AllocationMode;
use d_config::ConfigService;
use d_config::ConfigStore;
use d_config::DeliveryStrategy;
use d_config::SdkConfig;
use d_config::SledVersionLog;
use d_config::StorageConfig;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::time::sleep;

pub const GROUP: &str = "payments";
pub const APP: &str = "gateway";

/// Config service over a throwaway sled directory, served on an ephemeral port
pub struct TestServer {
    pub endpoint: String,
    pub log: Arc<SledVersionLog>,
    pub service: Arc<ConfigService>,
    shutdown: Option<oneshot::Sender<()>>,
    _db_dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub fn start_server(allocation: AllocationMode) -> TestServer {
    let db_dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig {
        db_root_dir: db_dir.path().to_path_buf(),
        allocation,
        ..Default::default()
    };
    let db = init_sled_db(&storage).unwrap();
    let log = Arc::new(SledVersionLog::new(db).unwrap());
    let service = Arc::new(ConfigService::new(
        ConfigStore::new(log.clone(), allocation),
        Duration::from_secs(1),
    ));

    let (tx, rx) = oneshot::channel::<()>();
    let (addr, server) =
        warp::serve(config_routes(service.clone())).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async {
            rx.await.ok();
        });
    tokio::spawn(server);

    TestServer {
        endpoint: format!("http://{addr}"),
        log,
        service,
        shutdown: Some(tx),
        _db_dir: db_dir,
    }
}

pub fn sdk_config(
    strategy: DeliveryStrategy,
    dir: &Path,
    endpoints: Vec<String>,
) -> SdkConfig {
    SdkConfig {
        strategy,
        endpoints,
        poll_interval_ms: 100,
        bootstrap_timeout_ms: 3000,
        ..SdkConfig::new(GROUP, APP, dir)
    }
}

pub fn read(
    dir: &Path,
    name: &str,
) -> String {
    std::fs::read_to_string(dir.join(name)).unwrap()
}

pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}
