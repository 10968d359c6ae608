use cartstore::{CartError, CartFacade, CartResult, IndexKind};

use super::e2e_support::{init_tracing, StoreHarness};

#[test]
fn e2e_metrics_track_outcomes() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("metrics").build();
    let store = harness.open()?;

    store.add(1, 10)?;
    store.add(1, 11)?;
    store.remove(1, 10)?;
    store.list_customer(1)?;
    assert!(store.list_customer(2).is_err());
    assert!(store.remove(1, 99).is_err());

    let busy = {
        let locks = store.coordinator().locks(IndexKind::Item);
        let _guard = locks.try_guard(11).expect("shard is free");
        store.list_item(11).unwrap_err()
    };
    assert!(matches!(busy, CartError::Unavailable { index: IndexKind::Item, .. }));

    let snapshot = store.metrics().snapshot();
    assert_eq!(snapshot.adds_applied, 2);
    assert_eq!(snapshot.removes_applied, 1);
    assert_eq!(snapshot.lists_served, 1);
    assert_eq!(snapshot.failed_operations, 2);
    assert_eq!(snapshot.unavailable_rejections, 1);
    assert_eq!(snapshot.compensations, 0);
    assert_eq!(snapshot.intents_recovered, 0);

    store.close()
}

#[test]
fn e2e_shards_appear_on_first_write_only() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("lazy-shards").shards_count(4).build();
    let store = harness.open()?;
    let customers = store.coordinator().storage(IndexKind::Customer);

    assert!(store.list_customer(6).unwrap_err().is_not_found());
    assert_eq!(customers.stores_opened(), 0);
    assert!(!customers.shard_path(2).exists());

    store.add(6, 1)?;
    assert_eq!(customers.stores_opened(), 1);
    assert!(customers.shard_path(2).join("data.mdb").is_file());
    assert!(harness.data_dir().join("shards").join("customer-2").is_dir());

    store.close()
}
