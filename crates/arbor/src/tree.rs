//! The radix tree engine: point operations, structural rewrites, and the
//! inline-versus-blob value policy.

use std::mem;
use std::time::{SystemTime, UNIX_EPOCH};

use blobstore::BlobStore;

use crate::error::Error;
use crate::node::Node;
use crate::prefix::longest_common_prefix;

/// Largest value stored inline in a node. Anything longer goes to the blob
/// store and the node keeps the 32-byte content id instead.
pub const INLINE_VALUE_MAX: usize = 32;

/// Largest accepted key length in bytes.
pub const MAX_KEY_LEN: usize = 65535;

/// Largest accepted value length in bytes.
pub const MAX_VALUE_LEN: u64 = u32::MAX as u64;

/// Seconds since the Unix epoch, saturating to 0 on a pre-epoch clock.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// An ordered key–value index over byte keys with prefix compression.
///
/// This is the unsynchronized engine; [`crate::Arbor`] wraps it in a
/// reader–writer lock for concurrent use. The tree exclusively owns its
/// nodes and its blob store, and every returned value buffer is an owned
/// copy.
#[derive(Debug)]
pub struct RadixTree {
    pub(crate) root: Option<Node>,
    pub(crate) num_nodes: u64,
    pub(crate) num_records: u64,
    pub(crate) blobs: BlobStore,
    pub(crate) created_at: u64,
    pub(crate) updated_at: u64,
}

impl RadixTree {
    /// Creates a new, empty tree.
    pub fn new() -> Self {
        let now = unix_now();

        RadixTree {
            root: None,
            num_nodes: 0,
            num_records: 0,
            blobs: BlobStore::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the number of records (not nodes).
    pub fn len(&self) -> usize {
        self.num_records as usize
    }

    /// Returns `true` if the tree holds no records.
    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// Returns the total node count, including non-record branch nodes.
    pub fn node_count(&self) -> usize {
        self.num_nodes as usize
    }

    /// Inserts a new record. Fails with [`Error::DuplicateKey`] if the key
    /// already exists.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.insert(key, value, false)
    }

    /// Inserts or overwrites a record.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.insert(key, value, true)
    }

    /// Returns an owned copy of the value stored under `key`.
    ///
    /// # Errors
    ///
    /// [`Error::KeyNotFound`] when the key is absent or resolves to a
    /// non-record branch node; [`Error::InvalidChecksum`] when the record
    /// fails its integrity check; [`Error::Corrupted`] when a blob-backed
    /// record has no live store entry.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        check_key(key)?;

        let mut cur = self.root.as_ref().ok_or(Error::KeyNotFound)?;
        let mut k = key;

        loop {
            let p = longest_common_prefix(&cur.key, k).len();

            if p < cur.key.len() {
                return Err(Error::KeyNotFound);
            }

            if p == k.len() {
                if !cur.is_record {
                    return Err(Error::KeyNotFound);
                }

                if !cur.verify_checksum() {
                    return Err(Error::InvalidChecksum);
                }

                return if cur.is_blob {
                    self.blobs.get(&cur.data).ok_or(Error::Corrupted)
                } else {
                    Ok(cur.data.clone())
                };
            }

            k = &k[p..];
            cur = cur.find_compatible_child(k).ok_or(Error::KeyNotFound)?;
        }
    }

    /// Removes the record stored under `key`.
    ///
    /// Branch nodes left redundant by the removal are merged away so the
    /// structural invariants keep holding.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        check_key(key)?;

        let Self {
            root,
            blobs,
            num_nodes,
            num_records,
            ..
        } = self;

        let root_node = root.as_mut().ok_or(Error::KeyNotFound)?;

        let p = longest_common_prefix(&root_node.key, key).len();

        if p < root_node.key.len() {
            return Err(Error::KeyNotFound);
        }

        if p == key.len() {
            // The root itself is the target.
            if !root_node.is_record {
                return Err(Error::KeyNotFound);
            }

            if root_node.is_blob {
                blobs.release(&root_node.data);
            }

            match root_node.children.len() {
                0 => {
                    *root = None;
                    *num_nodes -= 1;
                }
                1 => {
                    // Promote the sole child into the root slot.
                    let mut child = root_node.children.remove(0);
                    child.prepend_key(&root_node.key);
                    *root_node = child;
                    *num_nodes -= 1;
                }
                _ => root_node.clear_value(),
            }

            *num_records -= 1;
            return Ok(());
        }

        let mut k = &key[p..];
        let mut cur = root_node;

        loop {
            let Some(i) = cur.compatible_child_index(k) else {
                return Err(Error::KeyNotFound);
            };

            let cp = longest_common_prefix(&cur.children[i].key, k).len();

            if cp < cur.children[i].key.len() {
                return Err(Error::KeyNotFound);
            }

            if cp < k.len() {
                k = &k[cp..];
                cur = &mut cur.children[i];
                continue;
            }

            // cur.children[i] spells the whole key.
            if !cur.children[i].is_record {
                return Err(Error::KeyNotFound);
            }

            if cur.children[i].is_blob {
                blobs.release(&cur.children[i].data);
            }

            match cur.children[i].children.len() {
                0 => {
                    cur.remove_child(k).ok_or(Error::Corrupted)?;
                    *num_nodes -= 1;
                    *num_records -= 1;

                    // Removing the leaf may leave a non-record branch with a
                    // single child; such a branch is redundant and is
                    // absorbed into its child by key concatenation. The
                    // merged node takes over this slot, so the grandparent
                    // link stays valid.
                    if !cur.is_record && cur.children.len() == 1 {
                        let mut child = cur.children.remove(0);
                        child.prepend_key(&cur.key);
                        *cur = child;
                        *num_nodes -= 1;
                    }
                }
                1 => {
                    // The record sits on a chain: remove it and reattach its
                    // sole child with the removed edge prepended.
                    let mut target = cur.remove_child(k).ok_or(Error::Corrupted)?;
                    let mut child = target.children.remove(0);
                    child.prepend_key(&target.key);
                    cur.add_child(child);
                    *num_nodes -= 1;
                    *num_records -= 1;
                }
                _ => {
                    // A branch point in its own right: demote to non-record.
                    cur.children[i].clear_value();
                    *num_records -= 1;
                }
            }

            return Ok(());
        }
    }

    /// Removes every record and blob, leaving an empty tree.
    pub fn clear(&mut self) {
        self.root = None;
        self.num_nodes = 0;
        self.num_records = 0;
        self.blobs.clear();
    }

    /// Calls `cb` on every record in ascending key order, stopping at the
    /// first error.
    ///
    /// The key passed to the callback is the full stored key; the value is
    /// materialized per record (blob-backed values are fetched from the
    /// store).
    pub fn for_each(
        &self,
        mut cb: impl FnMut(&[u8], &[u8]) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let Some(root) = self.root.as_ref() else {
            return Ok(());
        };

        let mut path = Vec::new();
        self.visit(root, &mut path, &mut cb)
    }

    fn visit<F>(&self, node: &Node, path: &mut Vec<u8>, cb: &mut F) -> Result<(), Error>
    where
        F: FnMut(&[u8], &[u8]) -> Result<(), Error>,
    {
        path.extend_from_slice(&node.key);

        if node.is_record {
            let value = if node.is_blob {
                self.blobs.get(&node.data).ok_or(Error::Corrupted)?
            } else {
                node.data.clone()
            };

            cb(path, &value)?;
        }

        node.for_each_child(|_, child| self.visit(child, path, cb))?;

        path.truncate(path.len() - node.key.len());
        Ok(())
    }

    fn insert(&mut self, key: &[u8], value: &[u8], overwrite: bool) -> Result<(), Error> {
        check_key(key)?;
        check_value_len(value.len() as u64)?;

        let Self {
            root,
            blobs,
            num_nodes,
            num_records,
            ..
        } = self;

        let Some(mut cur) = root.as_mut() else {
            // Empty tree: the root becomes a record leaf carrying the whole
            // key.
            let mut node = Node::new(key.to_vec());
            let (data, is_blob) = payload_for(blobs, value);
            node.set_value(data, is_blob);

            *root = Some(node);
            *num_nodes = 1;
            *num_records = 1;
            return Ok(());
        };

        let mut k: &[u8] = key;

        loop {
            let p = longest_common_prefix(&cur.key, k).len();

            if p == 0 && !cur.key.is_empty() {
                // Disjoint from the root's key: introduce an empty-keyed
                // branch root holding the old root and the new leaf. Below
                // the root this cannot happen, because descent only enters a
                // child sharing the first byte.
                let old = mem::take(cur);

                let mut leaf = Node::new(k.to_vec());
                let (data, is_blob) = payload_for(blobs, value);
                leaf.set_value(data, is_blob);

                let mut branch = Node::new(Vec::new());
                branch.add_child(old);
                branch.add_child(leaf);

                *cur = branch;
                *num_nodes += 2;
                *num_records += 1;
                return Ok(());
            }

            if p == cur.key.len() && p == k.len() {
                // Exact match.
                if cur.is_record {
                    if !overwrite {
                        return Err(Error::DuplicateKey);
                    }

                    if cur.is_blob {
                        blobs.release(&cur.data);
                    }
                } else {
                    *num_records += 1;
                }

                let (data, is_blob) = payload_for(blobs, value);
                cur.set_value(data, is_blob);
                return Ok(());
            }

            if p == k.len() {
                // The new key ends above the current node: splice a record
                // between the node and its slot, keeping the node as the
                // record's sole child with its key left-trimmed.
                let mut old = mem::take(cur);
                old.trim_key_prefix(p);

                let mut spliced = Node::new(k.to_vec());
                let (data, is_blob) = payload_for(blobs, value);
                spliced.set_value(data, is_blob);
                spliced.add_child(old);

                *cur = spliced;
                *num_nodes += 1;
                *num_records += 1;
                return Ok(());
            }

            if p < cur.key.len() {
                // Keys diverge inside this edge: split on the shared prefix.
                let mut old = mem::take(cur);
                let prefix = old.key[..p].to_vec();
                old.trim_key_prefix(p);

                let mut leaf = Node::new(k[p..].to_vec());
                let (data, is_blob) = payload_for(blobs, value);
                leaf.set_value(data, is_blob);

                let mut branch = Node::new(prefix);
                branch.add_child(old);
                branch.add_child(leaf);

                *cur = branch;
                *num_nodes += 2;
                *num_records += 1;
                return Ok(());
            }

            // The edge is fully consumed: advance and descend.
            k = &k[p..];

            match cur.compatible_child_index(k) {
                Some(i) => cur = &mut cur.children[i],
                None => {
                    let mut leaf = Node::new(k.to_vec());
                    let (data, is_blob) = payload_for(blobs, value);
                    leaf.set_value(data, is_blob);
                    cur.add_child(leaf);

                    *num_nodes += 1;
                    *num_records += 1;
                    return Ok(());
                }
            }
        }
    }
}

impl Default for RadixTree {
    fn default() -> Self {
        Self::new()
    }
}

fn check_key(key: &[u8]) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::NilKey);
    }

    if key.len() > MAX_KEY_LEN {
        return Err(Error::KeyTooLarge);
    }

    Ok(())
}

fn check_value_len(len: u64) -> Result<(), Error> {
    if len > MAX_VALUE_LEN {
        return Err(Error::ValueTooLarge);
    }

    Ok(())
}

/// Encodes a value per the inline policy: values over [`INLINE_VALUE_MAX`]
/// bytes go to the blob store and the node keeps the id.
fn payload_for(blobs: &mut BlobStore, value: &[u8]) -> (Vec<u8>, bool) {
    if value.len() > INLINE_VALUE_MAX {
        let id = blobs.put(value.to_vec());
        (id.as_bytes().to_vec(), true)
    } else {
        (value.to_vec(), false)
    }
}

#[cfg(test)]
impl RadixTree {
    /// Walks the whole tree and re-checks every structural invariant.
    /// Returns a description of the first violation found.
    pub(crate) fn verify_integrity(&self) -> Result<(), String> {
        use std::collections::HashMap;

        let mut nodes = 0u64;
        let mut records = 0u64;
        let mut blob_refs: HashMap<Vec<u8>, u64> = HashMap::new();

        if let Some(root) = self.root.as_ref() {
            let mut stack: Vec<(&Node, Vec<u8>, bool)> = vec![(root, root.key.clone(), true)];

            while let Some((node, path, is_root)) = stack.pop() {
                nodes += 1;

                if node.key.is_empty() && !is_root {
                    return Err(format!("non-root node with empty key at {:?}", path));
                }

                for pair in node.children.windows(2) {
                    if pair[0].key >= pair[1].key {
                        return Err(format!("unsorted siblings under {:?}", path));
                    }

                    if !longest_common_prefix(&pair[0].key, &pair[1].key).is_empty() {
                        return Err(format!("siblings share a prefix under {:?}", path));
                    }
                }

                if node.is_record {
                    records += 1;

                    if !node.verify_checksum() {
                        return Err(format!("record checksum mismatch at {:?}", path));
                    }

                    if node.is_blob {
                        if node.data.len() != 32 {
                            return Err(format!("blob id length {} at {:?}", node.data.len(), path));
                        }

                        if !self.blobs.contains(&node.data) {
                            return Err(format!("dangling blob reference at {:?}", path));
                        }

                        *blob_refs.entry(node.data.clone()).or_insert(0) += 1;
                    }
                } else if node.children.len() < 2 && !is_root {
                    return Err(format!("redundant unary branch at {:?}", path));
                }

                for child in &node.children {
                    let mut child_path = path.clone();
                    child_path.extend_from_slice(&child.key);
                    stack.push((child, child_path, false));
                }
            }
        }

        if nodes != self.num_nodes {
            return Err(format!("num_nodes {} but walked {}", self.num_nodes, nodes));
        }

        if records != self.num_records {
            return Err(format!(
                "num_records {} but walked {}",
                self.num_records, records
            ));
        }

        if self.blobs.len() != blob_refs.len() {
            return Err(format!(
                "blob store has {} entries but {} are referenced",
                self.blobs.len(),
                blob_refs.len()
            ));
        }

        for (id, count) in &blob_refs {
            if self.blobs.ref_count(id) != *count {
                return Err(format!(
                    "blob refcount {} but {} references",
                    self.blobs.ref_count(id),
                    count
                ));
            }
        }

        Ok(())
    }
}
