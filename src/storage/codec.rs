//! Byte encodings for shard store keys and values.
//!
//! Keys are fixed-width big-endian so LMDB's lexicographic order matches
//! numeric order. Values are bincode-encoded multisets; decoding rejects
//! zero counts so a corrupted entry never leaks into the mutation path.

use crate::error::{CartError, CartResult};
use crate::types::{IndexKind, Key, Multiset};

pub const KEY_BYTES: usize = std::mem::size_of::<Key>();

#[inline]
pub fn encode_key(key: Key) -> [u8; KEY_BYTES] {
    key.to_be_bytes()
}

pub fn decode_key(index: IndexKind, bytes: &[u8]) -> CartResult<Key> {
    let raw: [u8; KEY_BYTES] = bytes.try_into().map_err(|_| CartError::CorruptEntry {
        index,
        reason: format!("key is {} bytes, expected {KEY_BYTES}", bytes.len()),
    })?;
    Ok(Key::from_be_bytes(raw))
}

pub fn encode_multiset(set: &Multiset) -> CartResult<Vec<u8>> {
    Ok(bincode::serialize(set)?)
}

pub fn decode_multiset(index: IndexKind, bytes: &[u8]) -> CartResult<Multiset> {
    let set: Multiset = bincode::deserialize(bytes)?;
    if let Some(peer) = set.find_zero() {
        return Err(CartError::CorruptEntry {
            index,
            reason: format!("peer {peer} stored with a zero count"),
        });
    }
    Ok(set)
}
