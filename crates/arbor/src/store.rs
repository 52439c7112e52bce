//! The thread-safe store handle.

use std::io::{Read, Write};

use parking_lot::RwLock;

use crate::error::Error;
use crate::tree::RadixTree;

/// A concurrent handle over a [`RadixTree`].
///
/// Readers (`get`, `len`, `is_empty`, `for_each`) take a shared lock and
/// may run in parallel; every mutation plus `serialize` takes the
/// exclusive lock, so writers are serialized and each reader sees a
/// consistent snapshot. Returned buffers are owned copies and stay valid
/// after the lock is released.
///
/// Operations must not re-enter the same handle from inside a callback
/// holding the lock.
pub struct Arbor {
    tree: RwLock<RadixTree>,
}

impl Arbor {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Arbor {
            tree: RwLock::new(RadixTree::new()),
        }
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Returns `true` if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Inserts a new record. Fails with [`Error::DuplicateKey`] if the key
    /// already exists.
    pub fn add(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.tree.write().add(key, value)
    }

    /// Inserts or overwrites a record.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.tree.write().put(key, value)
    }

    /// Returns an owned copy of the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        self.tree.read().get(key)
    }

    /// Removes the record stored under `key`.
    pub fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.tree.write().delete(key)
    }

    /// Removes every record and blob.
    pub fn clear(&self) {
        self.tree.write().clear()
    }

    /// Calls `cb` on every record in ascending key order under the shared
    /// lock, stopping at the first error.
    pub fn for_each(
        &self,
        cb: impl FnMut(&[u8], &[u8]) -> Result<(), Error>,
    ) -> Result<(), Error> {
        self.tree.read().for_each(cb)
    }

    /// Writes the store to `w`, holding the exclusive lock for the
    /// duration (serialization stamps the tree's `updated_at`).
    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        self.tree.write().serialize(w)
    }

    /// Reads a store previously written by [`serialize`](Arbor::serialize).
    pub fn deserialize<R: Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Arbor {
            tree: RwLock::new(RadixTree::deserialize(r)?),
        })
    }
}

impl Default for Arbor {
    fn default() -> Self {
        Self::new()
    }
}
