//! TransactionStore interface tests.

use fleet_saga::registry::{TransactionRecord, TransactionState, TransactionStore};

pub async fn test_list_empty<S: TransactionStore + ?Sized>(store: &S) {
    let rows = store.list_transactions("tx_none").await.unwrap();
    assert!(rows.is_empty());
}

pub async fn test_upsert_per_module<S: TransactionStore + ?Sized>(store: &S) {
    for state in [
        TransactionState::Started,
        TransactionState::Sent,
        TransactionState::Successful,
    ] {
        store
            .put_transaction(&TransactionRecord::new("tx_upsert", "mod_1", state))
            .await
            .unwrap();
    }
    store
        .put_transaction(&TransactionRecord::new("tx_upsert", "mod_2", TransactionState::Failed))
        .await
        .unwrap();

    let rows = store.list_transactions("tx_upsert").await.unwrap();
    assert_eq!(
        rows,
        vec![
            TransactionRecord::new("tx_upsert", "mod_1", TransactionState::Successful),
            TransactionRecord::new("tx_upsert", "mod_2", TransactionState::Failed),
        ]
    );
}

pub async fn test_delete_by_transaction<S: TransactionStore + ?Sized>(store: &S) {
    store
        .put_transaction(&TransactionRecord::new("tx_del", "mod_1", TransactionState::Sent))
        .await
        .unwrap();
    store
        .put_transaction(&TransactionRecord::new("tx_keep", "mod_1", TransactionState::Sent))
        .await
        .unwrap();

    assert_eq!(store.delete_transactions("tx_del").await.unwrap(), 1);
    assert_eq!(store.delete_transactions("tx_del").await.unwrap(), 0);
    assert_eq!(store.list_transactions("tx_keep").await.unwrap().len(), 1);
}

pub async fn test_delete_by_module<S: TransactionStore + ?Sized>(store: &S) {
    for tx in ["tx_m1", "tx_m2"] {
        store
            .put_transaction(&TransactionRecord::new(tx, "mod_gone", TransactionState::Started))
            .await
            .unwrap();
    }
    store
        .put_transaction(&TransactionRecord::new("tx_m1", "mod_live", TransactionState::Started))
        .await
        .unwrap();

    assert_eq!(store.delete_module_transactions("mod_gone").await.unwrap(), 2);
    let remaining = store.list_transactions("tx_m1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].module_id, "mod_live");

    store.clear_transactions().await.unwrap();
    assert!(store.list_transactions("tx_m1").await.unwrap().is_empty());
}

/// Run all TransactionStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_transaction_store_tests {
    ($store:expr) => {
        use $crate::storage::transaction_store_tests::*;

        test_list_empty($store).await;
        println!("  test_list_empty: PASSED");

        test_upsert_per_module($store).await;
        println!("  test_upsert_per_module: PASSED");

        test_delete_by_transaction($store).await;
        println!("  test_delete_by_transaction: PASSED");

        test_delete_by_module($store).await;
        println!("  test_delete_by_module: PASSED");
    };
}
