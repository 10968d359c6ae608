use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CartError, CartResult};
use crate::types::{Count, Key};

/// Peer key -> positive occurrence count.
///
/// A peer whose count drops to zero is removed; zero is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiset {
    entries: BTreeMap<Key, Count>,
}

impl Multiset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of `peer`, zero when absent.
    pub fn get(&self, peer: Key) -> Count {
        self.entries.get(&peer).copied().unwrap_or(0)
    }

    pub fn contains(&self, peer: Key) -> bool {
        self.entries.contains_key(&peer)
    }

    /// Number of distinct peers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.entries.values().map(|count| u64::from(*count)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, Count)> + '_ {
        self.entries.iter().map(|(peer, count)| (*peer, *count))
    }

    /// Sets `peer` to exactly `count`, removing it when `count` is zero.
    pub fn restore(&mut self, peer: Key, count: Count) {
        if count == 0 {
            self.entries.remove(&peer);
        } else {
            self.entries.insert(peer, count);
        }
    }

    /// First peer recorded with a zero count, if any.
    pub(crate) fn find_zero(&self) -> Option<Key> {
        self.entries
            .iter()
            .find(|(_, count)| **count == 0)
            .map(|(peer, _)| *peer)
    }
}

impl FromIterator<(Key, Count)> for Multiset {
    fn from_iter<I: IntoIterator<Item = (Key, Count)>>(iter: I) -> Self {
        let mut set = Multiset::new();
        for (peer, count) in iter {
            set.restore(peer, count);
        }
        set
    }
}

impl IntoIterator for Multiset {
    type Item = (Key, Count);
    type IntoIter = btree_map::IntoIter<Key, Count>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Increments `peer`, starting at one when absent.
///
/// Fails with `CountOverflow` and leaves the set untouched when the count is
/// already `Count::MAX`. The owning key is reported as `0`, as for removes.
pub fn add_to_set(set: &mut Multiset, peer: Key) -> CartResult<()> {
    let count = set.entries.entry(peer).or_insert(0);
    *count = count
        .checked_add(1)
        .ok_or(CartError::CountOverflow { key: 0, peer })?;
    Ok(())
}

/// Decrements `peer`, deleting it when the count reaches zero.
///
/// Fails with `NotInCart` and leaves the set untouched when `peer` is absent.
/// The owning key is unknown at this level and reported as `0`; callers going
/// through the storage layer get it filled in.
pub fn remove_from_set(set: &mut Multiset, peer: Key) -> CartResult<()> {
    match set.entries.entry(peer) {
        btree_map::Entry::Vacant(_) => Err(CartError::NotInCart { key: 0, peer }),
        btree_map::Entry::Occupied(mut slot) => {
            if *slot.get() <= 1 {
                slot.remove();
            } else {
                *slot.get_mut() -= 1;
            }
            Ok(())
        }
    }
}
