use cartstore::{CartError, CartFacade, CartResult, IndexKind};

use super::e2e_support::{init_tracing, StoreHarness};

#[test]
fn e2e_single_add_is_visible_from_both_sides() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("single-add").build();
    let store = harness.open()?;

    store.add(4321, 1234)?;

    let cart = store.list_customer(4321)?;
    assert_eq!(cart.iter().collect::<Vec<_>>(), vec![(1234, 1)]);

    let holders = store.list_item(1234)?;
    assert_eq!(holders.iter().collect::<Vec<_>>(), vec![(4321, 1)]);

    store.close()
}

#[test]
fn e2e_repeated_adds_then_remove() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("add-remove").build();
    let store = harness.open()?;

    for _ in 0..3 {
        store.add(17, 99)?;
    }
    store.remove(17, 99)?;

    let cart = store.list_customer(17)?;
    assert_eq!(cart.iter().collect::<Vec<_>>(), vec![(99, 2)]);
    assert_eq!(store.list_item(99)?.get(17), 2);

    store.close()
}

#[test]
fn e2e_untouched_customer_is_not_found() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("untouched").build();
    let store = harness.open()?;

    let err = store.list_customer(555).unwrap_err();
    assert!(matches!(
        err,
        CartError::NotFound {
            index: IndexKind::Customer,
            key: 555
        }
    ));

    // a neighbour in the same shard does not make it appear
    store.add(555 + 16, 1)?;
    assert!(store.list_customer(555).unwrap_err().is_not_found());

    store.close()
}

#[test]
fn e2e_remove_drops_empty_entries() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("drop-empty").build();
    let store = harness.open()?;

    store.add(1, 2)?;
    store.add(1, 3)?;
    store.remove(1, 2)?;

    let cart = store.list_customer(1)?;
    assert!(!cart.contains(2));
    assert_eq!(cart.get(3), 1);
    assert!(store.list_item(2).unwrap_err().is_not_found());

    store.remove(1, 3)?;
    assert!(store.list_customer(1).unwrap_err().is_not_found());
    assert!(store.audit()?.is_consistent());

    store.close()
}

#[test]
fn e2e_remove_of_absent_item_changes_nothing() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("remove-absent").build();
    let store = harness.open()?;

    store.add(8, 1)?;
    let err = store.remove(8, 2).unwrap_err();
    assert!(matches!(err, CartError::NotInCart { key: 8, peer: 2 }));

    let cart = store.list_customer(8)?;
    assert_eq!(cart.iter().collect::<Vec<_>>(), vec![(1, 1)]);
    assert!(store.list_item(2).unwrap_err().is_not_found());

    // the rejected remove and the empty listing both count as failures
    let snapshot = store.metrics().snapshot();
    assert_eq!(snapshot.adds_applied, 1);
    assert_eq!(snapshot.failed_operations, 2);
    assert_eq!(snapshot.compensations, 0);

    store.close()
}

#[test]
fn e2e_same_number_in_both_spaces_stays_separate() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("id-spaces").build();
    let store = harness.open()?;

    store.add(7, 7)?;
    store.add(7, 8)?;

    assert_eq!(store.list(IndexKind::Customer, 7)?.len(), 2);
    assert_eq!(store.list(IndexKind::Item, 7)?.len(), 1);
    assert_eq!(store.list(IndexKind::Item, 8)?.get(7), 1);

    store.close()
}
