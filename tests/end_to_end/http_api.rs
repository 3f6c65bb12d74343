use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use d_config::AllocationMode;
use d_config::AppKey;
use d_config::ConfigApi;
use d_config::Error;
use d_config::HttpConfigClient;
use d_config::InfoResponse;
use d_config::VersionLog;
use d_config::WatchCredentials;

use crate::common::start_server;
use crate::common::APP;
use crate::common::GROUP;

const MODES: [AllocationMode; 2] = [AllocationMode::Transactional, AllocationMode::Ordered];

fn client(endpoint: &str) -> HttpConfigClient {
    HttpConfigClient::new(vec![endpoint.to_string()], Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_set_get_info_round_trip() {
    for mode in MODES {
        let server = start_server(mode);
        let api = client(&server.endpoint);

        api.set(GROUP, APP, r#"{"x":1}"#, "{}").await.unwrap();

        let version = api.get(GROUP, APP, 1).await.unwrap();
        assert_eq!(version.index, 1);
        assert_eq!(version.app_config, r#"{"x":1}"#);
        assert_eq!(version.source_config, "{}");

        match api.info(GROUP, APP, 0).await.unwrap() {
            InfoResponse::Current(snapshot) => {
                assert_eq!(snapshot.cur_index, 1);
                assert_eq!(snapshot.op_num, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            api.info(GROUP, APP, 1).await.unwrap(),
            InfoResponse::Unchanged { op_num: 1 }
        );
    }
}

#[tokio::test]
async fn test_rollback_keeps_history() {
    let server = start_server(AllocationMode::Transactional);
    let api = client(&server.endpoint);

    for i in 1..=3 {
        api.set(GROUP, APP, &format!(r#"{{"v":{i}}}"#), "").await.unwrap();
    }
    api.rollback(GROUP, APP, 2).await.unwrap();
    assert!(matches!(api.rollback(GROUP, APP, 4).await, Err(Error::NotExist)));

    let pointer = server
        .log
        .pointer(&AppKey::new(GROUP, APP))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pointer.cur_index, 2);
    assert_eq!(pointer.max_index, 3);
    assert_eq!(pointer.op_num, 4);

    match api.info(GROUP, APP, 0).await.unwrap() {
        InfoResponse::Current(snapshot) => assert_eq!(snapshot.app_config, r#"{"v":2}"#),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sets_over_http() {
    const N: u64 = 16;
    for mode in MODES {
        let server = start_server(mode);
        let api = Arc::new(client(&server.endpoint));

        let mut handles = Vec::new();
        for i in 0..N {
            let api = api.clone();
            handles.push(tokio::spawn(async move {
                api.set(GROUP, APP, &format!(r#"{{"writer":{i}}}"#), "").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let key = AppKey::new(GROUP, APP);
        let pointer = server.log.pointer(&key).await.unwrap().unwrap();
        assert_eq!(pointer.max_index, N, "{mode:?}");
        assert_eq!(pointer.op_num, N, "{mode:?}");

        let mut writers = HashSet::new();
        for index in 1..=N {
            let version = api.get(GROUP, APP, index).await.unwrap();
            assert_eq!(version.index, index);
            writers.insert(version.app_config);
        }
        assert_eq!(writers.len() as u64, N);
    }
}

#[tokio::test]
async fn test_listing_and_watch_admin() {
    let server = start_server(AllocationMode::Transactional);
    let api = client(&server.endpoint);

    api.set("g1", "a1", "", "").await.unwrap();
    api.set("g1", "a2", "", "").await.unwrap();
    api.set("g2", "b1", "", "").await.unwrap();

    assert_eq!(api.groups().await.unwrap(), vec!["g1", "g2"]);
    assert_eq!(api.apps("g1").await.unwrap(), vec!["a1", "a2"]);
    assert!(api.apps("missing").await.unwrap().is_empty());

    let creds = WatchCredentials {
        username: "reader".into(),
        passwd: "secret".into(),
        addrs: vec!["/srv/d-config/db".into()],
        replica_set_name: "rs0".into(),
    };
    api.set_watch_addr(creds.clone()).await.unwrap();
    assert_eq!(api.get_watch_addr().await.unwrap(), creds);

    // Any empty field clears the record
    api.set_watch_addr(WatchCredentials {
        passwd: String::new(),
        ..creds
    })
    .await
    .unwrap();
    assert!(api.get_watch_addr().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = start_server(AllocationMode::Transactional);
    let api = client(&server.endpoint);
    api.set(GROUP, APP, "", "").await.unwrap();

    let body = reqwest::get(format!("{}/metrics", server.endpoint))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("config_mutations"));
}
