//! AssignmentStore interface tests.

use fleet_saga::registry::{AssignmentStore, WorkerType};
use serde_json::json;

pub async fn test_claim_from_empty_pool<S: AssignmentStore + ?Sized>(store: &S) {
    let claimed = store.claim(WorkerType::Backchannel, "mod_1").await.unwrap();
    assert!(claimed.is_none());
}

pub async fn test_claim_is_sticky<S: AssignmentStore + ?Sized>(store: &S) {
    for (id, port) in [("ingest-0", 7001), ("ingest-1", 7002)] {
        store
            .put_config(WorkerType::Ingest, id, &json!({ "port": port }))
            .await
            .unwrap();
    }

    let first = store.claim(WorkerType::Ingest, "mod_a").await.unwrap().unwrap();
    assert_eq!(first.config_id, "ingest-0");
    assert_eq!(first.module_id.as_deref(), Some("mod_a"));
    assert_eq!(first.setup, json!({"port": 7001}));

    let again = store.claim(WorkerType::Ingest, "mod_a").await.unwrap().unwrap();
    assert_eq!(again.config_id, "ingest-0", "holder gets its own config back");

    let second = store.claim(WorkerType::Ingest, "mod_b").await.unwrap().unwrap();
    assert_eq!(second.config_id, "ingest-1");

    assert!(store.claim(WorkerType::Ingest, "mod_c").await.unwrap().is_none());
}

pub async fn test_release_module<S: AssignmentStore + ?Sized>(store: &S) {
    assert_eq!(store.release_module("mod_a").await.unwrap(), 1);
    let claimed = store.claim(WorkerType::Ingest, "mod_c").await.unwrap().unwrap();
    assert_eq!(claimed.config_id, "ingest-0");
}

pub async fn test_reseed_keeps_holder<S: AssignmentStore + ?Sized>(store: &S) {
    store
        .put_config(WorkerType::Ingest, "ingest-0", &json!({"port": 8001}))
        .await
        .unwrap();
    let pool = store.list_assignments(WorkerType::Ingest).await.unwrap();
    assert_eq!(pool[0].module_id.as_deref(), Some("mod_c"));
    assert_eq!(pool[0].setup, json!({"port": 8001}));
}

pub async fn test_release_orphans<S: AssignmentStore + ?Sized>(store: &S) {
    // ingest-0 held by mod_c, ingest-1 by mod_b.
    let released = store
        .release_orphans(WorkerType::Ingest, &["mod_b".to_string()])
        .await
        .unwrap();
    assert_eq!(released, 1);

    let pool = store.list_assignments(WorkerType::Ingest).await.unwrap();
    assert!(pool[0].module_id.is_none());
    assert_eq!(pool[1].module_id.as_deref(), Some("mod_b"));

    let released = store.release_orphans(WorkerType::Ingest, &[]).await.unwrap();
    assert_eq!(released, 1, "no live modules frees every claim");

    store.claim(WorkerType::Ingest, "mod_d").await.unwrap();
    store.release_all().await.unwrap();
    let pool = store.list_assignments(WorkerType::Ingest).await.unwrap();
    assert!(pool.iter().all(|a| a.module_id.is_none()));
}

/// Run all AssignmentStore interface tests against a store implementation.
///
/// The tests build on each other's pool state and must run in this order.
#[macro_export]
macro_rules! run_assignment_store_tests {
    ($store:expr) => {
        use $crate::storage::assignment_store_tests::*;

        test_claim_from_empty_pool($store).await;
        println!("  test_claim_from_empty_pool: PASSED");

        test_claim_is_sticky($store).await;
        println!("  test_claim_is_sticky: PASSED");

        test_release_module($store).await;
        println!("  test_release_module: PASSED");

        test_reseed_keeps_holder($store).await;
        println!("  test_reseed_keeps_holder: PASSED");

        test_release_orphans($store).await;
        println!("  test_release_orphans: PASSED");
    };
}
