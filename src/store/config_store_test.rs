use std::collections::HashSet;
use std::sync::Arc;

use mockall::predicate::eq;
use tracing_test::traced_test;

use super::*;
use crate::test_utils::setup_store;
use crate::AllocationMode;
use crate::AppKey;
use crate::Error;
use crate::MockVersionLog;
use crate::PointerRecord;
use crate::StorageError;
use crate::SystemError;
use crate::VersionLog;
use crate::WatchCredentials;

const MODES: [AllocationMode; 2] = [AllocationMode::Transactional, AllocationMode::Ordered];

#[test]
fn test_normalize_payload() {
    assert_eq!(normalize_payload("app_config", "").unwrap(), "{}");
    assert_eq!(
        normalize_payload("app_config", r#"{"x":1}"#).unwrap(),
        r#"{"x":1}"#
    );
    assert!(matches!(
        normalize_payload("app_config", "[1,2]"),
        Err(Error::ConfigFormat(field)) if field == "app_config"
    ));
    assert!(matches!(
        normalize_payload("source_config", "not json"),
        Err(Error::ConfigFormat(field)) if field == "source_config"
    ));
    assert!(matches!(
        normalize_payload("source_config", "42"),
        Err(Error::ConfigFormat(field)) if field == "source_config"
    ));
}

#[tokio::test]
#[traced_test]
async fn test_round_trip_on_fresh_app() {
    for mode in MODES {
        let (store, _log, _dir) = setup_store(mode);

        let pointer = store.set("g", "a", r#"{"x":1}"#, "{}").await.unwrap();
        assert_eq!(pointer.cur_index, 1);

        let version = store.get_by_index("g", "a", 1).await.unwrap();
        assert_eq!(version.app_config, r#"{"x":1}"#);
        assert_eq!(version.source_config, "{}");

        match store.get_current("g", "a", 0).await.unwrap() {
            CurrentConfig::Snapshot(snapshot) => {
                assert_eq!(snapshot.cur_index, 1);
                assert_eq!(snapshot.op_num, 1);
                assert_eq!(snapshot.app_config, r#"{"x":1}"#);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
#[traced_test]
async fn test_n_sets_yield_n_versions() {
    for mode in MODES {
        let (store, log, _dir) = setup_store(mode);

        for i in 0..5 {
            store
                .set("g", "a", &format!(r#"{{"i":{i}}}"#), "")
                .await
                .unwrap();
        }

        let pointer = log.pointer(&AppKey::new("g", "a")).await.unwrap().unwrap();
        assert_eq!(
            pointer,
            PointerRecord {
                cur_index: 5,
                max_index: 5,
                op_num: 5
            },
            "mode {mode:?}"
        );
        for index in 1..=5 {
            assert_eq!(store.get_by_index("g", "a", index).await.unwrap().index, index);
        }
    }
}

#[tokio::test]
#[traced_test]
async fn test_get_current_unchanged_short_circuit() {
    let (store, _log, _dir) = setup_store(AllocationMode::Transactional);
    store.set("g", "a", "{}", "{}").await.unwrap();
    store.set("g", "a", "{}", "{}").await.unwrap();

    assert_eq!(
        store.get_current("g", "a", 2).await.unwrap(),
        CurrentConfig::Unchanged { op_num: 2 }
    );
    // stale or future op_num gets the full snapshot
    assert!(matches!(
        store.get_current("g", "a", 1).await.unwrap(),
        CurrentConfig::Snapshot(_)
    ));
    assert!(matches!(
        store.get_current("g", "a", 9).await.unwrap(),
        CurrentConfig::Snapshot(_)
    ));
}

#[tokio::test]
#[traced_test]
async fn test_get_current_missing_app() {
    let (store, _log, _dir) = setup_store(AllocationMode::Transactional);

    assert!(matches!(
        store.get_current("g", "missing", 0).await,
        Err(Error::NotExist)
    ));
    assert!(matches!(
        store.get_by_index("g", "missing", 1).await,
        Err(Error::NotExist)
    ));
}

#[tokio::test]
#[traced_test]
async fn test_get_current_before_first_advance_is_empty() {
    let (store, log, _dir) = setup_store(AllocationMode::Ordered);
    // reserved by a writer that has not advanced yet
    log.reserve_index(&AppKey::new("g", "a")).await.unwrap();

    match store.get_current("g", "a", 0).await.unwrap() {
        CurrentConfig::Snapshot(snapshot) => {
            assert_eq!(snapshot.cur_index, 0);
            assert_eq!(snapshot.max_index, 1);
            assert_eq!(snapshot.op_num, 0);
            assert_eq!(snapshot.app_config, "{}");
            assert_eq!(snapshot.source_config, "{}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
#[traced_test]
async fn test_set_rejects_non_object_payloads() {
    let (store, log, _dir) = setup_store(AllocationMode::Transactional);

    assert!(matches!(
        store.set("g", "a", "[]", "{}").await,
        Err(Error::ConfigFormat(field)) if field == "app_config"
    ));
    assert!(matches!(
        store.set("g", "a", "{}", "nope").await,
        Err(Error::ConfigFormat(field)) if field == "source_config"
    ));
    assert_eq!(log.pointer(&AppKey::new("g", "a")).await.unwrap(), None);
}

#[tokio::test]
#[traced_test]
async fn test_invalid_names() {
    let (store, _log, _dir) = setup_store(AllocationMode::Transactional);

    assert!(matches!(
        store.set("", "a", "{}", "{}").await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.set("g", "a/b", "{}", "{}").await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(store.list_apps("").await, Err(Error::InvalidArgument(_))));
}

#[tokio::test]
#[traced_test]
async fn test_rollback() {
    for mode in MODES {
        let (store, _log, _dir) = setup_store(mode);
        for i in 1..=3 {
            store.set("g", "a", &format!(r#"{{"v":{i}}}"#), "{}").await.unwrap();
        }

        let pointer = store.rollback("g", "a", 2).await.unwrap();
        assert_eq!(
            pointer,
            PointerRecord {
                cur_index: 2,
                max_index: 3,
                op_num: 4
            }
        );
        match store.get_current("g", "a", 0).await.unwrap() {
            CurrentConfig::Snapshot(snapshot) => assert_eq!(snapshot.app_config, r#"{"v":2}"#),
            other => panic!("unexpected {other:?}"),
        }

        // out of range changes nothing
        assert!(matches!(store.rollback("g", "a", 4).await, Err(Error::NotExist)));
        assert!(matches!(store.rollback("g", "a", 0).await, Err(Error::NotExist)));
        assert_eq!(
            store.get_current("g", "a", 4).await.unwrap(),
            CurrentConfig::Unchanged { op_num: 4 }
        );

        // a set after a rollback allocates past max_index
        let pointer = store.set("g", "a", "{}", "{}").await.unwrap();
        assert_eq!(
            pointer,
            PointerRecord {
                cur_index: 4,
                max_index: 4,
                op_num: 5
            }
        );
    }
}

#[tokio::test]
#[traced_test]
async fn test_list_groups_and_apps() {
    let (store, _log, _dir) = setup_store(AllocationMode::Transactional);
    store.set("default", "billing", "{}", "{}").await.unwrap();
    store.set("default", "audit", "{}", "{}").await.unwrap();
    store.set("edge", "proxy", "{}", "{}").await.unwrap();

    assert_eq!(store.list_groups().await.unwrap(), vec!["default", "edge"]);
    assert_eq!(
        store.list_apps("default").await.unwrap(),
        vec!["audit", "billing"]
    );
}

#[tokio::test]
#[traced_test]
async fn test_watch_addr_admin() {
    let (store, _log, _dir) = setup_store(AllocationMode::Transactional);
    assert!(store.get_watch_addr().await.unwrap().is_empty());

    let credentials = WatchCredentials {
        username: "watcher".into(),
        passwd: "secret".into(),
        addrs: vec!["/var/lib/d-config/db".into()],
        replica_set_name: "rs0".into(),
    };
    store.set_watch_addr(credentials.clone()).await.unwrap();
    assert_eq!(store.get_watch_addr().await.unwrap(), credentials);

    // any empty field clears the record
    store
        .set_watch_addr(WatchCredentials {
            passwd: String::new(),
            ..credentials
        })
        .await
        .unwrap();
    assert!(store.get_watch_addr().await.unwrap().is_empty());
}

#[test]
fn test_watch_credentials_debug_redacts_secret() {
    let credentials = WatchCredentials {
        username: "watcher".into(),
        passwd: "hunter2".into(),
        addrs: vec![],
        replica_set_name: String::new(),
    };
    let printed = format!("{credentials:?}");
    assert!(!printed.contains("hunter2"));
    assert!(printed.contains("watcher"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sets_both_modes() {
    for mode in MODES {
        let (store, _log, _dir) = setup_store(mode);
        let n = 24u64;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set("g", "a", &format!(r#"{{"writer":{i}}}"#), "{}")
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut writers = HashSet::new();
        for index in 1..=n {
            writers.insert(store.get_by_index("g", "a", index).await.unwrap().app_config);
        }
        assert_eq!(writers.len() as u64, n, "mode {mode:?}");
        match store.get_current("g", "a", 0).await.unwrap() {
            CurrentConfig::Snapshot(snapshot) => {
                assert_eq!(snapshot.max_index, n);
                assert_eq!(snapshot.op_num, n);
                assert_eq!(snapshot.cur_index, n);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_unchanged_does_not_fetch_version() {
    let mut log = MockVersionLog::new();
    log.expect_pointer().returning(|_| {
        Ok(Some(PointerRecord {
            cur_index: 3,
            max_index: 3,
            op_num: 7,
        }))
    });
    log.expect_version().never();
    let store = ConfigStore::new(Arc::new(log), AllocationMode::Transactional);

    assert_eq!(
        store.get_current("g", "a", 7).await.unwrap(),
        CurrentConfig::Unchanged { op_num: 7 }
    );
}

#[tokio::test]
async fn test_dangling_pointer_is_system_error() {
    let mut log = MockVersionLog::new();
    log.expect_pointer().returning(|_| {
        Ok(Some(PointerRecord {
            cur_index: 2,
            max_index: 2,
            op_num: 2,
        }))
    });
    log.expect_version()
        .with(mockall::predicate::always(), eq(2))
        .times(1)
        .returning(|_, _| Ok(None));
    let store = ConfigStore::new(Arc::new(log), AllocationMode::Transactional);

    let result = store.get_current("g", "a", 0).await;

    assert!(matches!(
        result,
        Err(Error::System(SystemError::Storage(
            StorageError::DataCorruption { .. }
        )))
    ));
}

#[tokio::test]
async fn test_storage_failure_is_not_retried() {
    let mut log = MockVersionLog::new();
    log.expect_append_and_advance()
        .times(1)
        .returning(|_, _, _| Err(StorageError::DbError("disk full".into()).into()));
    let store = ConfigStore::new(Arc::new(log), AllocationMode::Transactional);

    let result = store.set("g", "a", "{}", "{}").await;

    assert!(matches!(result, Err(Error::System(_))));
}
