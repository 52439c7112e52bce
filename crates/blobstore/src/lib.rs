//! # Blobstore
//!
//! A content-addressed, reference-counted value table for the Arbor storage
//! engine.
//!
//! Values larger than the engine's inline threshold are not kept inside tree
//! nodes. Instead they land here, keyed by the SHA-256 hash of their content,
//! and the node stores the 32-byte id. Writing the same byte sequence twice
//! therefore costs one stored copy and a refcount bump.
//!
//! ## Key properties
//! - **Content addressing**: the id of a value is `SHA-256(value)`; identical
//!   values always share one entry.
//! - **Reference counting**: every [`put`](BlobStore::put) of an existing
//!   value increments the count, every [`release`](BlobStore::release)
//!   decrements it; the entry is dropped when the count reaches zero.
//! - **Defensive reads**: [`get`](BlobStore::get) hands out an owned copy,
//!   never a view into the table, so a later `release` cannot invalidate a
//!   buffer a caller is still holding.
//!
//! ## Example
//! ```rust
//! use blobstore::BlobStore;
//!
//! let mut store = BlobStore::new();
//! let id = store.put(vec![0xAB; 64]);
//! assert_eq!(store.get(id.as_bytes()).unwrap(), vec![0xAB; 64]);
//!
//! store.release(id.as_bytes());
//! assert!(store.get(id.as_bytes()).is_none());
//! ```

use std::collections::HashMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// Length of a blob id in bytes (a SHA-256 digest).
pub const BLOB_ID_LEN: usize = 32;

/// The 32-byte SHA-256 content hash identifying a stored blob.
///
/// A fixed-size array rather than a slice so it can serve as a map key and
/// be copied freely. Ids render as lowercase hex in `Debug`/`Display`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobId([u8; BLOB_ID_LEN]);

impl BlobId {
    /// Builds a `BlobId` from an arbitrary byte slice.
    ///
    /// Returns `None` unless the slice is exactly [`BLOB_ID_LEN`] bytes.
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        if src.len() != BLOB_ID_LEN {
            return None;
        }

        let mut id = [0u8; BLOB_ID_LEN];
        id.copy_from_slice(src);
        Some(BlobId(id))
    }

    /// Computes the id of the given value: `SHA-256(value)`.
    pub fn for_value(value: &[u8]) -> Self {
        BlobId(Sha256::digest(value).into())
    }

    /// Returns the id as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", hex::encode(self.0))
    }
}

/// A stored value and the number of records referencing it.
#[derive(Debug, Clone)]
struct BlobEntry {
    value: Vec<u8>,
    ref_count: u64,
}

/// Content-addressed table of oversize values.
///
/// The store is owned by exactly one tree and is not synchronized on its
/// own; the owning tree's lock covers all access.
#[derive(Debug, Default)]
pub struct BlobStore {
    entries: HashMap<BlobId, BlobEntry>,
}

impl BlobStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Inserts a value, returning its content id.
    ///
    /// If a byte-identical value is already present its refcount is
    /// incremented and the passed buffer is dropped; otherwise the value is
    /// stored with a refcount of 1. Idempotent on identical bytes.
    pub fn put(&mut self, value: Vec<u8>) -> BlobId {
        let id = BlobId::for_value(&value);

        self.entries
            .entry(id)
            .and_modify(|entry| entry.ref_count += 1)
            .or_insert(BlobEntry {
                value,
                ref_count: 1,
            });

        id
    }

    /// Returns an owned copy of the value stored under `id`.
    ///
    /// Returns `None` when the id is unknown or not [`BLOB_ID_LEN`] bytes
    /// long. The copy is deliberate: callers may hold the buffer past a
    /// later [`release`](BlobStore::release) of the entry.
    pub fn get(&self, id: &[u8]) -> Option<Vec<u8>> {
        let id = BlobId::from_bytes(id)?;
        self.entries.get(&id).map(|entry| entry.value.clone())
    }

    /// Decrements the refcount of the entry under `id`, removing the entry
    /// when the count reaches zero.
    ///
    /// Unknown or malformed ids are a no-op, so callers that already follow
    /// the one-release-per-lost-reference rule never need to pre-check.
    pub fn release(&mut self, id: &[u8]) {
        let Some(id) = BlobId::from_bytes(id) else {
            return;
        };

        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.ref_count > 0 {
                entry.ref_count -= 1;
            }

            if entry.ref_count == 0 {
                self.entries.remove(&id);
            }
        }
    }

    /// Returns the refcount of the entry under `id`, or 0 when absent.
    pub fn ref_count(&self, id: &[u8]) -> u64 {
        BlobId::from_bytes(id)
            .and_then(|id| self.entries.get(&id))
            .map_or(0, |entry| entry.ref_count)
    }

    /// Returns `true` if an entry exists under `id`.
    pub fn contains(&self, id: &[u8]) -> bool {
        BlobId::from_bytes(id).is_some_and(|id| self.entries.contains_key(&id))
    }

    /// Returns the number of distinct stored values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no values.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Inserts an entry verbatim, bypassing hashing and refcount logic.
    ///
    /// Used by deserialization to rebuild a persisted table; `id` is
    /// trusted to be the content hash of `value`. An existing entry under
    /// the same id is replaced.
    pub fn restore(&mut self, id: BlobId, value: Vec<u8>, ref_count: u64) {
        self.entries.insert(id, BlobEntry { value, ref_count });
    }

    /// Iterates over `(id, value, ref_count)` in ascending id order.
    ///
    /// The ordering makes serialized output deterministic for a given set
    /// of entries.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (&BlobId, &[u8], u64)> {
        let mut ids: Vec<&BlobId> = self.entries.keys().collect();
        ids.sort();

        ids.into_iter().map(|id| {
            let entry = &self.entries[id];
            (id, entry.value.as_slice(), entry.ref_count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------- BlobId --------------------

    #[test]
    fn id_from_bytes_requires_exact_length() {
        assert!(BlobId::from_bytes(&[0u8; 32]).is_some());
        assert!(BlobId::from_bytes(&[0u8; 31]).is_none());
        assert!(BlobId::from_bytes(&[0u8; 33]).is_none());
        assert!(BlobId::from_bytes(b"").is_none());
    }

    #[test]
    fn id_matches_sha256_of_value() {
        // SHA-256("abc"), a fixed vector.
        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(BlobId::for_value(b"abc").to_string(), expected);
    }

    #[test]
    fn id_debug_renders_hex() {
        let id = BlobId::from_bytes(&[0xFFu8; 32]).unwrap();
        assert_eq!(format!("{:?}", id), format!("BlobId({})", "ff".repeat(32)));
    }

    // -------------------- put --------------------

    #[test]
    fn put_and_get_roundtrip() {
        let mut store = BlobStore::new();
        let id = store.put(b"pineapple".to_vec());

        assert_eq!(store.get(id.as_bytes()).unwrap(), b"pineapple");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn put_duplicate_increments_refcount() {
        let mut store = BlobStore::new();

        for expected in 1..=3u64 {
            let id = store.put(b"apple".to_vec());
            assert_eq!(store.ref_count(id.as_bytes()), expected);
        }

        assert_eq!(store.len(), 1);
    }

    #[test]
    fn put_distinct_values_get_distinct_entries() {
        let mut store = BlobStore::new();
        let a = store.put(b"aaaa".to_vec());
        let b = store.put(b"bbbb".to_vec());

        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn put_empty_value() {
        let mut store = BlobStore::new();
        let id = store.put(Vec::new());

        assert_eq!(store.get(id.as_bytes()).unwrap(), Vec::<u8>::new());
    }

    // -------------------- get --------------------

    #[test]
    fn get_unknown_id_returns_none() {
        let store = BlobStore::new();
        assert!(store.get(&[0u8; 32]).is_none());
    }

    #[test]
    fn get_malformed_id_returns_none() {
        let mut store = BlobStore::new();
        store.put(b"value".to_vec());

        assert!(store.get(b"short").is_none());
    }

    #[test]
    fn get_returns_defensive_copy() {
        let mut store = BlobStore::new();
        let id = store.put(b"original".to_vec());

        let mut copy = store.get(id.as_bytes()).unwrap();
        copy[0] = b'X';

        assert_eq!(store.get(id.as_bytes()).unwrap(), b"original");
    }

    // -------------------- release --------------------

    #[test]
    fn release_counts_down_to_removal() {
        let mut store = BlobStore::new();
        let refs = 20u64;

        let mut id = None;
        for _ in 0..refs {
            id = Some(store.put(b"pineapple".to_vec()));
        }
        let id = id.unwrap();

        for remaining in (0..refs).rev() {
            store.release(id.as_bytes());

            if remaining == 0 {
                assert!(!store.contains(id.as_bytes()));
            } else {
                assert_eq!(store.ref_count(id.as_bytes()), remaining);
            }
        }

        assert!(store.is_empty());
    }

    #[test]
    fn release_unknown_id_is_noop() {
        let mut store = BlobStore::new();
        store.put(b"value".to_vec());

        store.release(&[0u8; 32]);
        store.release(b"bogus");

        assert_eq!(store.len(), 1);
    }

    #[test]
    fn release_after_removal_is_noop() {
        let mut store = BlobStore::new();
        let id = store.put(b"value".to_vec());

        store.release(id.as_bytes());
        store.release(id.as_bytes());

        assert!(store.is_empty());
    }

    // -------------------- restore / iter_sorted --------------------

    #[test]
    fn restore_rebuilds_entry_verbatim() {
        let mut store = BlobStore::new();
        let value = b"restored".to_vec();
        let id = BlobId::for_value(&value);

        store.restore(id, value.clone(), 7);

        assert_eq!(store.get(id.as_bytes()).unwrap(), value);
        assert_eq!(store.ref_count(id.as_bytes()), 7);
    }

    #[test]
    fn iter_sorted_yields_ascending_ids() {
        let mut store = BlobStore::new();
        store.put(b"cherry".to_vec());
        store.put(b"apple".to_vec());
        store.put(b"banana".to_vec());

        let ids: Vec<BlobId> = store.iter_sorted().map(|(id, _, _)| *id).collect();
        let mut sorted = ids.clone();
        sorted.sort();

        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn iter_sorted_exposes_refcounts() {
        let mut store = BlobStore::new();
        store.put(b"twice".to_vec());
        store.put(b"twice".to_vec());
        store.put(b"once".to_vec());

        let counts: Vec<u64> = store
            .iter_sorted()
            .map(|(_, _, ref_count)| ref_count)
            .collect();

        assert_eq!(counts.iter().sum::<u64>(), 3);
    }

    // -------------------- clear --------------------

    #[test]
    fn clear_removes_everything() {
        let mut store = BlobStore::new();
        store.put(b"a".to_vec());
        store.put(b"b".to_vec());

        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }
}
