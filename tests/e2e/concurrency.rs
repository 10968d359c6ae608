use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

use cartstore::{CartFacade, CartResult, CartStoreFacade, CustomerId, IndexKind, ItemId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::e2e_support::{init_tracing, retry_unavailable, StoreHarness, DEFAULT_TIMEOUT};

const WORKERS: usize = 10;
const ADDS_PER_WORKER: usize = 100;
const CUSTOMERS: u32 = 100;
const ITEMS: u32 = 200;

type PairCounts = HashMap<(CustomerId, ItemId), u32>;

fn run_workers(store: &CartStoreFacade, seed: u64) -> PairCounts {
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> CartResult<(PairCounts, usize)> {
                let mut rng = StdRng::seed_from_u64(seed + worker as u64);
                let mut issued = PairCounts::new();
                let mut retries = 0;
                barrier.wait();

                for _ in 0..ADDS_PER_WORKER {
                    let customer = rng.gen_range(0..CUSTOMERS);
                    let item = rng.gen_range(0..ITEMS);
                    let attempts =
                        retry_unavailable(|| store.add(customer, item), DEFAULT_TIMEOUT)?;
                    retries += attempts - 1;
                    *issued.entry((customer, item)).or_default() += 1;
                }
                Ok((issued, retries))
            })
        })
        .collect();

    let mut issued = PairCounts::new();
    let mut retries = 0;
    for handle in handles {
        let (worker_issued, worker_retries) = handle
            .join()
            .expect("worker panicked")
            .expect("worker failed");
        retries += worker_retries;
        for (pair, count) in worker_issued {
            *issued.entry(pair).or_default() += count;
        }
    }
    tracing::info!(retries, pairs = issued.len(), "concurrent adds complete");
    issued
}

fn sums_by<F>(issued: &PairCounts, key: F) -> HashMap<u32, u64>
where
    F: Fn(&(CustomerId, ItemId)) -> u32,
{
    let mut sums = HashMap::new();
    for (pair, count) in issued {
        *sums.entry(key(pair)).or_default() += u64::from(*count);
    }
    sums
}

#[test]
fn e2e_concurrent_adds_reconcile_across_indexes() -> CartResult<()> {
    init_tracing();

    // few shards so workers collide often
    let harness = StoreHarness::builder("concurrent-adds")
        .shards_count(4)
        .build();
    let store = harness.open()?;

    let issued = run_workers(&store, 0x5eed);
    let total: u64 = issued.values().map(|count| u64::from(*count)).sum();
    assert_eq!(total, (WORKERS * ADDS_PER_WORKER) as u64);

    for (customer, expected) in sums_by(&issued, |(customer, _)| *customer) {
        let cart = store.list_customer(customer)?;
        assert_eq!(cart.total(), expected, "customer {customer}");
    }
    for (item, expected) in sums_by(&issued, |(_, item)| *item) {
        let holders = store.list_item(item)?;
        assert_eq!(holders.total(), expected, "item {item}");
    }
    for (&(customer, item), &count) in &issued {
        assert_eq!(store.list_customer(customer)?.get(item), count);
        assert_eq!(store.list_item(item)?.get(customer), count);
    }

    for customer in 0..CUSTOMERS {
        let touched = issued.keys().any(|(c, _)| *c == customer);
        if !touched {
            assert!(store.list(IndexKind::Customer, customer).unwrap_err().is_not_found());
        }
    }

    let report = store.audit()?;
    assert!(report.is_consistent(), "{:?}", report.mismatches);
    assert_eq!(report.pairs_checked, issued.len());

    let snapshot = store.metrics().snapshot();
    assert_eq!(snapshot.adds_applied, (WORKERS * ADDS_PER_WORKER) as u64);
    assert_eq!(snapshot.failed_operations, 0);

    store.close()
}

#[test]
fn e2e_contended_single_pair_counts_every_add() -> CartResult<()> {
    init_tracing();

    let harness = StoreHarness::builder("hot-pair").build();
    let store = harness.open()?;
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> CartResult<()> {
                barrier.wait();
                for _ in 0..25 {
                    retry_unavailable(|| store.add(42, 24), DEFAULT_TIMEOUT)?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    assert_eq!(store.list_customer(42)?.get(24), 100);
    assert_eq!(store.list_item(24)?.get(42), 100);

    store.close()
}
