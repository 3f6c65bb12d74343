use std::sync::Arc;
use std::time::Duration;

use d_config::AllocationMode;
use d_config::ClientReconciler;
use d_config::ConfigApi;
use d_config::DeliveryStrategy;
use d_config::Error;
use d_config::LocalConnector;
use d_config::ReconcilerSlot;
use d_config::SyncSource;
use d_config::WatchCredentials;
use d_config::APP_CONFIG_FILE;
use d_config::SOURCE_CONFIG_FILE;

use crate::common::read;
use crate::common::sdk_config;
use crate::common::start_server;
use crate::common::wait_until;
use crate::common::APP;
use crate::common::GROUP;

#[tokio::test]
async fn test_http_poll_follows_sets_and_rollbacks() {
    let server = start_server(AllocationMode::Transactional);
    server
        .service
        .set(GROUP, APP, r#"{"feature":"off"}"#, r#"{"db":"primary"}"#)
        .await
        .unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let reconciler = ClientReconciler::builder(sdk_config(
        DeliveryStrategy::HttpPoll,
        out_dir.path(),
        vec![server.endpoint.clone()],
    ))
    .start()
    .await
    .unwrap();

    assert_eq!(reconciler.source(), SyncSource::ApiPoll);
    assert_eq!(read(out_dir.path(), APP_CONFIG_FILE), r#"{"feature":"off"}"#);
    assert_eq!(read(out_dir.path(), SOURCE_CONFIG_FILE), r#"{"db":"primary"}"#);

    server
        .service
        .set(GROUP, APP, r#"{"feature":"on"}"#, r#"{"db":"replica"}"#)
        .await
        .unwrap();
    let r = &reconciler;
    assert!(wait_until(|| async move { r.last_applied().await == 2 }).await);
    assert_eq!(read(out_dir.path(), APP_CONFIG_FILE), r#"{"feature":"on"}"#);
    assert_eq!(read(out_dir.path(), SOURCE_CONFIG_FILE), r#"{"db":"replica"}"#);

    server.service.rollback(GROUP, APP, 1).await.unwrap();
    assert!(wait_until(|| async move { r.last_applied().await == 3 }).await);
    assert_eq!(read(out_dir.path(), APP_CONFIG_FILE), r#"{"feature":"off"}"#);

    reconciler.shutdown().await;
}

#[tokio::test]
async fn test_watch_in_process_store() {
    let server = start_server(AllocationMode::Ordered);
    server
        .service
        .set_watch_addr(WatchCredentials {
            username: "reader".into(),
            passwd: "secret".into(),
            addrs: vec!["in-process".into()],
            replica_set_name: "rs0".into(),
        })
        .await
        .unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let reconciler = ClientReconciler::builder(sdk_config(
        DeliveryStrategy::Watch,
        out_dir.path(),
        vec![server.endpoint.clone()],
    ))
    .connector(Arc::new(LocalConnector::new(server.log.clone())))
    .start()
    .await
    .unwrap();

    assert_eq!(reconciler.source(), SyncSource::ChangeFeed);
    assert_eq!(reconciler.last_applied().await, 0);
    assert_eq!(read(out_dir.path(), APP_CONFIG_FILE), "{}");

    for i in 1..=3u64 {
        server
            .service
            .set(GROUP, APP, &format!(r#"{{"rev":{i}}}"#), "")
            .await
            .unwrap();
    }
    let r = &reconciler;
    assert!(wait_until(|| async move { r.last_applied().await == 3 }).await);
    assert_eq!(read(out_dir.path(), APP_CONFIG_FILE), r#"{"rev":3}"#);

    reconciler.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_server_fails_bootstrap() {
    let out_dir = tempfile::tempdir().unwrap();
    let config = d_config::SdkConfig {
        bootstrap_timeout_ms: 300,
        request_timeout_ms: 100,
        ..sdk_config(
            DeliveryStrategy::HttpPoll,
            out_dir.path(),
            vec!["http://127.0.0.1:1".into()],
        )
    };

    let started = tokio::time::Instant::now();
    let result = ClientReconciler::builder(config).start().await;

    assert!(matches!(result, Err(Error::Bootstrap(_))));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_slot_keeps_one_reconciler() {
    let server = start_server(AllocationMode::Transactional);
    server.service.set(GROUP, APP, "", "").await.unwrap();

    let slot = ReconcilerSlot::new();
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();

    let first = slot
        .get_or_start(ClientReconciler::builder(sdk_config(
            DeliveryStrategy::HttpPoll,
            first_dir.path(),
            vec![server.endpoint.clone()],
        )))
        .await
        .unwrap();
    let second = slot
        .get_or_start(ClientReconciler::builder(sdk_config(
            DeliveryStrategy::HttpPoll,
            second_dir.path(),
            vec![server.endpoint.clone()],
        )))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!second_dir.path().join(APP_CONFIG_FILE).exists());
    first.shutdown().await;
}
