use cartstore::state::multiset::add_to_set;
use cartstore::{
    CartError, CartFacade, CartOp, CartResult, CartStoreFacade, IndexKind, Intent,
    LmdbMetadataStore, MetadataStore, ShardedStorage,
};

use super::e2e_support::{init_tracing, StoreHarness};

#[test]
fn e2e_reopen_preserves_both_indexes() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("reopen").build();
    {
        let store = harness.open()?;
        store.add(10, 1)?;
        store.add(10, 1)?;
        store.add(11, 1)?;
        store.add(10, 2)?;
        store.remove(10, 2)?;
        store.close()?;
    }

    let store = harness.reopen()?;
    assert_eq!(store.shards_count(), 16);

    let cart = store.list_customer(10)?;
    assert_eq!(cart.iter().collect::<Vec<_>>(), vec![(1, 2)]);
    let holders = store.list_item(1)?;
    assert_eq!(holders.iter().collect::<Vec<_>>(), vec![(10, 2), (11, 1)]);
    assert!(store.list_item(2).unwrap_err().is_not_found());

    let report = store.audit()?;
    assert!(report.is_consistent());
    assert_eq!(report.pairs_checked, 2);

    store.close()
}

#[test]
fn e2e_interrupted_write_is_rolled_back_on_open() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("interrupted").build();
    let config = harness.config();
    {
        let store = harness.open()?;
        store.add(3, 4)?;
        store.close()?;
    }

    // Replay a crash between the two index writes of a second add.
    {
        let metadata =
            LmdbMetadataStore::new_with_map_size(config.metadata_dir(), config.metadata_map_size)?;
        metadata.record_intent(&Intent {
            customer: 3,
            item: 4,
            op: CartOp::Add,
            customer_before: 1,
            item_before: 1,
        })?;
        metadata.close()?;

        let customers = ShardedStorage::new(
            IndexKind::Customer,
            config.shards_dir(),
            16,
            config.shard_map_size,
        );
        assert_eq!(customers.change(3, 4, add_to_set)?, 2);
        customers.close()?;
    }

    let store = harness.open()?;
    assert_eq!(store.metrics().snapshot().intents_recovered, 1);
    assert_eq!(store.list_customer(3)?.get(4), 1);
    assert_eq!(store.list_item(4)?.get(3), 1);
    assert!(store.audit()?.is_consistent());
    assert!(store.coordinator().metadata().pending_intents()?.is_empty());

    store.close()
}

#[test]
fn e2e_interrupted_first_add_leaves_nothing_behind() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("interrupted-first").build();
    let config = harness.config();
    {
        let metadata =
            LmdbMetadataStore::new_with_map_size(config.metadata_dir(), config.metadata_map_size)?;
        metadata.record_intent(&Intent {
            customer: 50,
            item: 60,
            op: CartOp::Add,
            customer_before: 0,
            item_before: 0,
        })?;
    }

    let store = harness.open()?;
    assert!(store.list_customer(50).unwrap_err().is_not_found());
    assert!(store.list_item(60).unwrap_err().is_not_found());

    store.add(50, 60)?;
    assert_eq!(store.list_customer(50)?.get(60), 1);

    store.close()
}

#[test]
fn e2e_data_dir_admits_one_store() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("exclusive").build();
    let store = harness.open()?;

    let err = harness.open().err().expect("second open must fail");
    assert!(matches!(err, CartError::DataDirLocked { .. }));
    assert!(harness.data_dir().join("cartd.lock").exists());

    store.close()?;
    drop(store);
    harness.open()?.close()
}

#[test]
fn e2e_flush_starts_from_empty_store() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("flush").build();
    {
        let store = harness.open()?;
        store.add(1, 1)?;
    }

    let store = CartStoreFacade::new(harness.config().with_flush(true))?;
    assert!(store.list_customer(1).unwrap_err().is_not_found());
    assert_eq!(store.audit()?.pairs_checked, 0);

    store.add(1, 1)?;
    assert_eq!(store.list_item(1)?.get(1), 1);

    store.close()
}
