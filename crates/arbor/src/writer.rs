//! Serialization of a tree into the on-disk format.
//!
//! Nodes are laid out in depth-first order, parent before children and
//! children in sibling order, so every node's offset is simply
//! `header + sum of the sizes written before it`. A node's first child is
//! the record immediately after it; its next sibling follows the whole
//! preceding subtree. The reader navigates purely through these offsets.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;

use crate::error::Error;
use crate::format::{
    FileHeader, CRC_LEN, FILE_HEADER_LEN, FLAG_HAS_BLOB, FLAG_IS_RECORD, NODE_FIXED_LEN,
};
use crate::node::Node;
use crate::tree::{unix_now, RadixTree};

impl RadixTree {
    /// Writes the tree to `w` in the format described in the crate docs.
    ///
    /// Stamps `updated_at` with the current time. The whole file content is
    /// staged in memory first, so on error nothing has been written.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChecksum`] if any record node fails its in-memory
    /// integrity check — verified before a single byte is emitted — and
    /// [`Error::Io`] for write failures.
    pub fn serialize<W: Write>(&mut self, w: &mut W) -> Result<(), Error> {
        self.verify_record_checksums()?;

        let (order, parents) = flatten(self.root.as_ref());

        // Assign each node its absolute offset in depth-first order.
        let mut offsets = vec![0u64; order.len()];
        let mut pos = FILE_HEADER_LEN;

        for (i, node) in order.iter().enumerate() {
            offsets[i] = pos;
            pos += encoded_node_len(node);
        }

        let radix_index_size = pos - FILE_HEADER_LEN;

        // Link offsets: the first child of a node is the first of its
        // children in depth-first order; each child's next sibling is the
        // child that follows it under the same parent. Real offsets never
        // equal 0, which doubles as "none".
        let mut first_child = vec![0u64; order.len()];
        let mut next_sibling = vec![0u64; order.len()];
        let mut last_child: Vec<Option<usize>> = vec![None; order.len()];

        for i in 1..order.len() {
            let parent = parents[i];

            if first_child[parent] == 0 {
                first_child[parent] = offsets[i];
            }

            if let Some(prev) = last_child[parent] {
                next_sibling[prev] = offsets[i];
            }

            last_child[parent] = Some(i);
        }

        let mut nodes_buf = Vec::with_capacity(radix_index_size as usize);
        for (i, node) in order.iter().enumerate() {
            encode_node(&mut nodes_buf, node, first_child[i], next_sibling[i])?;
        }

        let mut blobs_buf = Vec::new();
        for (id, value, ref_count) in self.blobs.iter_sorted() {
            encode_blob_entry(&mut blobs_buf, id.as_bytes(), value, ref_count)?;
        }

        self.updated_at = unix_now();

        let header = FileHeader {
            node_count: self.num_nodes,
            record_count: self.num_records,
            blob_count: self.blobs.len() as u64,
            radix_index_offset: FILE_HEADER_LEN,
            radix_index_size,
            blob_index_offset: FILE_HEADER_LEN + radix_index_size,
            blob_index_size: blobs_buf.len() as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        w.write_all(&header.encode()?)?;
        w.write_all(&nodes_buf)?;
        w.write_all(&blobs_buf)?;
        w.flush()?;

        Ok(())
    }

    fn verify_record_checksums(&self) -> Result<(), Error> {
        let Some(root) = self.root.as_ref() else {
            return Ok(());
        };

        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            if node.is_record && !node.verify_checksum() {
                return Err(Error::InvalidChecksum);
            }

            stack.extend(node.children.iter());
        }

        Ok(())
    }
}

/// Flattens the tree depth-first (parent before children, children in
/// sibling order), returning the nodes and each node's index of its parent.
/// The root's parent index is its own.
fn flatten(root: Option<&Node>) -> (Vec<&Node>, Vec<usize>) {
    let mut order = Vec::new();
    let mut parents = Vec::new();

    let Some(root) = root else {
        return (order, parents);
    };

    let mut stack: Vec<(&Node, usize)> = vec![(root, 0)];

    while let Some((node, parent)) = stack.pop() {
        let index = order.len();
        order.push(node);
        parents.push(parent);

        for child in node.children.iter().rev() {
            stack.push((child, index));
        }
    }

    (order, parents)
}

fn encoded_node_len(node: &Node) -> u64 {
    let data_len = if node.is_record { node.data.len() as u64 } else { 0 };
    NODE_FIXED_LEN + node.key.len() as u64 + data_len + CRC_LEN
}

fn encode_node(
    buf: &mut Vec<u8>,
    node: &Node,
    first_child_offset: u64,
    next_sibling_offset: u64,
) -> Result<(), Error> {
    let mut flags = 0u8;
    if node.is_record {
        flags |= FLAG_IS_RECORD;
    }
    if node.is_blob {
        flags |= FLAG_HAS_BLOB;
    }

    let data_len = if node.is_record { node.data.len() as u32 } else { 0 };

    let start = buf.len();
    buf.write_u8(flags)?;
    buf.write_u16::<LittleEndian>(node.children.len() as u16)?;
    buf.write_u16::<LittleEndian>(node.key.len() as u16)?;
    buf.write_u32::<LittleEndian>(data_len)?;
    buf.write_u64::<LittleEndian>(first_child_offset)?;
    buf.write_u64::<LittleEndian>(next_sibling_offset)?;
    buf.extend_from_slice(&node.key);

    if node.is_record {
        buf.extend_from_slice(&node.data);
    }

    let mut hasher = Crc32::new();
    hasher.update(&buf[start..]);
    buf.write_u32::<LittleEndian>(hasher.finalize())?;

    Ok(())
}

fn encode_blob_entry(
    buf: &mut Vec<u8>,
    id: &[u8],
    value: &[u8],
    ref_count: u64,
) -> Result<(), Error> {
    let start = buf.len();
    buf.extend_from_slice(id);
    buf.write_u64::<LittleEndian>(ref_count)?;
    buf.write_u32::<LittleEndian>(value.len() as u32)?;
    buf.extend_from_slice(value);

    let mut hasher = Crc32::new();
    hasher.update(&buf[start..]);
    buf.write_u32::<LittleEndian>(hasher.finalize())?;

    Ok(())
}
