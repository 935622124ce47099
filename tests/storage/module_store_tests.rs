//! ModuleStore interface tests.
//!
//! These tests verify the contract of the ModuleStore trait.
//! Each storage implementation should run these tests.

use chrono::{DateTime, Duration, Utc};
use fleet_saga::registry::{ModuleStore, WorkerRecord, WorkerState, WorkerType};

fn at(offset_secs: i64) -> DateTime<Utc> {
    // Whole seconds survive the RFC3339 round trip exactly.
    DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).expect("valid timestamp")
}

// =============================================================================
// put / get / delete
// =============================================================================

pub async fn test_get_nonexistent<S: ModuleStore + ?Sized>(store: &S) {
    let result = store.get_module("missing").await.expect("get should succeed");
    assert!(result.is_none(), "unknown module should be None");
}

pub async fn test_put_and_get<S: ModuleStore + ?Sized>(store: &S) {
    let record = WorkerRecord::registered("mod_put_get", WorkerType::Ingest, at(0));
    store.put_module(&record).await.expect("put should succeed");

    let stored = store
        .get_module("mod_put_get")
        .await
        .expect("get should succeed")
        .expect("module should exist");
    assert_eq!(stored, record);
    assert_eq!(stored.state, WorkerState::Unknown);
}

pub async fn test_put_overwrites<S: ModuleStore + ?Sized>(store: &S) {
    let mut record = WorkerRecord::registered("mod_overwrite", WorkerType::Outbound, at(0));
    store.put_module(&record).await.unwrap();
    record.state = WorkerState::Unhealthy;
    record.last_heartbeat = at(30);
    store.put_module(&record).await.unwrap();

    let stored = store.get_module("mod_overwrite").await.unwrap().unwrap();
    assert_eq!(stored.state, WorkerState::Unhealthy);
    assert_eq!(stored.last_heartbeat, at(30));
}

pub async fn test_delete<S: ModuleStore + ?Sized>(store: &S) {
    let record = WorkerRecord::registered("mod_delete", WorkerType::Ingest, at(0));
    store.put_module(&record).await.unwrap();

    assert!(store.delete_module("mod_delete").await.unwrap(), "first delete finds it");
    assert!(!store.delete_module("mod_delete").await.unwrap(), "second delete is a no-op");
    assert!(store.get_module("mod_delete").await.unwrap().is_none());
}

// =============================================================================
// listing
// =============================================================================

pub async fn test_list_in_registration_order<S: ModuleStore + ?Sized>(store: &S) {
    store.clear_modules().await.unwrap();
    for (id, worker_type, offset) in [
        ("mod_c", WorkerType::Ingest, 20),
        ("mod_a", WorkerType::RuleEngine, 0),
        ("mod_b", WorkerType::Ingest, 10),
    ] {
        store
            .put_module(&WorkerRecord::registered(id, worker_type, at(offset)))
            .await
            .unwrap();
    }

    let all: Vec<_> = store
        .list_modules()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(all, ["mod_a", "mod_b", "mod_c"]);

    let ingest: Vec<_> = store
        .list_modules_by_type(WorkerType::Ingest)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ingest, ["mod_b", "mod_c"]);

    store.clear_modules().await.unwrap();
    assert!(store.list_modules().await.unwrap().is_empty());
}

// =============================================================================
// heartbeats
// =============================================================================

pub async fn test_touch_known_and_unknown<S: ModuleStore + ?Sized>(store: &S) {
    store
        .put_module(&WorkerRecord::registered("mod_touch", WorkerType::Ingest, at(0)))
        .await
        .unwrap();

    let touched = store
        .touch_module("mod_touch", WorkerState::Healthy, at(45))
        .await
        .unwrap();
    assert!(touched);
    let stored = store.get_module("mod_touch").await.unwrap().unwrap();
    assert_eq!(stored.last_heartbeat, at(45));
    assert_eq!(stored.state, WorkerState::Healthy);
    assert_eq!(stored.registered_at, at(0));

    let ghost = store
        .touch_module("mod_ghost", WorkerState::Healthy, at(45))
        .await
        .unwrap();
    assert!(!ghost, "unknown module is not touched");
    assert!(store.get_module("mod_ghost").await.unwrap().is_none(), "and not created");
}

pub async fn test_touch_all<S: ModuleStore + ?Sized>(store: &S) {
    store.clear_modules().await.unwrap();
    for id in ["mod_all_1", "mod_all_2"] {
        store
            .put_module(&WorkerRecord::registered(id, WorkerType::Ingest, at(0)))
            .await
            .unwrap();
    }

    let now = at(0) + Duration::hours(1);
    assert_eq!(store.touch_all_modules(now).await.unwrap(), 2);
    for record in store.list_modules().await.unwrap() {
        assert_eq!(record.last_heartbeat, now);
    }
    store.clear_modules().await.unwrap();
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all ModuleStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_module_store_tests {
    ($store:expr) => {
        use $crate::storage::module_store_tests::*;

        test_get_nonexistent($store).await;
        println!("  test_get_nonexistent: PASSED");

        test_put_and_get($store).await;
        println!("  test_put_and_get: PASSED");

        test_put_overwrites($store).await;
        println!("  test_put_overwrites: PASSED");

        test_delete($store).await;
        println!("  test_delete: PASSED");

        test_list_in_registration_order($store).await;
        println!("  test_list_in_registration_order: PASSED");

        test_touch_known_and_unknown($store).await;
        println!("  test_touch_known_and_unknown: PASSED");

        test_touch_all($store).await;
        println!("  test_touch_all: PASSED");
    };
}
