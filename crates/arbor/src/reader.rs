//! Deserialization of a persisted tree.
//!
//! Nodes are read back in the depth-first order the writer emitted them,
//! rebuilding the tree with an explicit stack of partially-assembled
//! parents. The `first_child` / `next_sibling` offsets recorded in the file
//! are cross-checked against the actual stream positions as reading
//! proceeds, so a file whose offset table disagrees with its structure is
//! rejected rather than silently reinterpreted.

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;

use blobstore::{BlobId, BlobStore, BLOB_ID_LEN};

use crate::error::Error;
use crate::format::{
    FileHeader, BLOB_ENTRY_FIXED_LEN, CRC_LEN, FILE_HEADER_LEN, FLAG_HAS_BLOB, FLAG_IS_RECORD,
    NODE_FIXED_LEN,
};
use crate::node::Node;
use crate::tree::{RadixTree, INLINE_VALUE_MAX};

/// A decoded persistent node plus the navigation fields that only matter
/// during reconstruction.
struct RawNode {
    node: Node,
    num_children: u16,
    first_child_offset: u64,
    next_sibling_offset: u64,
}

/// A parent whose children are still being read.
struct Frame {
    node: Node,
    remaining: u16,
    next_sibling_offset: u64,
}

impl RadixTree {
    /// Reads a tree previously written by
    /// [`serialize`](RadixTree::serialize).
    ///
    /// # Errors
    ///
    /// [`Error::Corrupted`] for anything unusable: wrong magic or version,
    /// CRC mismatches, truncation, offset-table inconsistencies, counter
    /// mismatches, or blob references without a store entry. Non-EOF I/O
    /// failures surface as [`Error::Io`].
    pub fn deserialize<R: Read>(r: &mut R) -> Result<RadixTree, Error> {
        let mut header_buf = [0u8; FILE_HEADER_LEN as usize];
        read_exact(r, &mut header_buf)?;
        let header = FileHeader::decode(&header_buf)?;

        if header.radix_index_offset != FILE_HEADER_LEN {
            return Err(Error::Corrupted);
        }

        if header.blob_index_offset != FILE_HEADER_LEN + header.radix_index_size {
            return Err(Error::Corrupted);
        }

        let mut pos = FILE_HEADER_LEN;
        let root = read_radix_index(r, &header, &mut pos)?;

        if pos != FILE_HEADER_LEN + header.radix_index_size {
            return Err(Error::Corrupted);
        }

        let blobs = read_blob_index(r, &header)?;
        verify_blob_references(root.as_ref(), &blobs)?;

        // Anything after the blob index is not part of the format.
        let mut trailer = [0u8; 1];
        if r.read(&mut trailer)? != 0 {
            return Err(Error::Corrupted);
        }

        Ok(RadixTree {
            root,
            num_nodes: header.node_count,
            num_records: header.record_count,
            blobs,
            created_at: header.created_at,
            updated_at: header.updated_at,
        })
    }
}

fn read_radix_index<R: Read>(
    r: &mut R,
    header: &FileHeader,
    pos: &mut u64,
) -> Result<Option<Node>, Error> {
    if header.node_count == 0 {
        if header.record_count != 0 || header.radix_index_size != 0 {
            return Err(Error::Corrupted);
        }

        return Ok(None);
    }

    let mut nodes_read = 1u64;
    let mut records = 0u64;

    let raw = read_raw_node(r, pos, true)?;
    if raw.node.is_record {
        records += 1;
    }
    check_first_child_offset(&raw, *pos)?;
    if raw.next_sibling_offset != 0 {
        return Err(Error::Corrupted);
    }

    let mut stack = vec![Frame {
        remaining: raw.num_children,
        next_sibling_offset: 0,
        node: raw.node,
    }];
    let mut root = None;

    loop {
        let remaining = match stack.last() {
            Some(frame) => frame.remaining,
            None => break,
        };

        if remaining > 0 {
            if nodes_read == header.node_count {
                // The file promises fewer nodes than the tree needs.
                return Err(Error::Corrupted);
            }

            let raw = read_raw_node(r, pos, false)?;
            nodes_read += 1;
            if raw.node.is_record {
                records += 1;
            }
            check_first_child_offset(&raw, *pos)?;

            if let Some(frame) = stack.last_mut() {
                frame.remaining -= 1;
            }

            stack.push(Frame {
                remaining: raw.num_children,
                next_sibling_offset: raw.next_sibling_offset,
                node: raw.node,
            });
            continue;
        }

        // The frame's subtree is complete; hand the node to its parent.
        let frame = match stack.pop() {
            Some(frame) => frame,
            None => break,
        };

        match stack.last_mut() {
            Some(parent) => {
                // If more siblings follow, the completed node must point at
                // the next stream position; otherwise at nothing.
                let expected = if parent.remaining > 0 { *pos } else { 0 };
                if frame.next_sibling_offset != expected {
                    return Err(Error::Corrupted);
                }

                // Reject siblings that break the radix property before they
                // enter the child list.
                if parent.node.find_compatible_child(&frame.node.key).is_some() {
                    return Err(Error::Corrupted);
                }

                parent.node.add_child(frame.node);
            }
            None => root = Some(frame.node),
        }
    }

    if nodes_read != header.node_count || records != header.record_count {
        return Err(Error::Corrupted);
    }

    Ok(root)
}

fn read_raw_node<R: Read>(r: &mut R, pos: &mut u64, is_root: bool) -> Result<RawNode, Error> {
    let mut fixed = [0u8; NODE_FIXED_LEN as usize];
    read_exact(r, &mut fixed)?;

    let mut fields = &fixed[..];
    let flags = fields.read_u8()?;
    let num_children = fields.read_u16::<LittleEndian>()?;
    let key_len = fields.read_u16::<LittleEndian>()?;
    let data_len = fields.read_u32::<LittleEndian>()?;
    let first_child_offset = fields.read_u64::<LittleEndian>()?;
    let next_sibling_offset = fields.read_u64::<LittleEndian>()?;

    if flags & !(FLAG_IS_RECORD | FLAG_HAS_BLOB) != 0 {
        return Err(Error::Corrupted);
    }

    let is_record = flags & FLAG_IS_RECORD != 0;
    let has_blob = flags & FLAG_HAS_BLOB != 0;

    if has_blob && !is_record {
        return Err(Error::Corrupted);
    }

    if has_blob && data_len as usize != BLOB_ID_LEN {
        return Err(Error::Corrupted);
    }

    if !is_record && data_len != 0 {
        return Err(Error::Corrupted);
    }

    if key_len == 0 && (!is_root || is_record) {
        return Err(Error::Corrupted);
    }

    if !is_record && num_children < 2 {
        // A non-record node with fewer than two children is a redundant
        // branch no valid tree contains.
        return Err(Error::Corrupted);
    }

    let mut key = vec![0u8; key_len as usize];
    read_exact(r, &mut key)?;

    let mut data = vec![0u8; data_len as usize];
    read_exact(r, &mut data)?;

    let mut crc_buf = [0u8; CRC_LEN as usize];
    read_exact(r, &mut crc_buf)?;
    let stored_crc = u32::from_le_bytes(crc_buf);

    let mut hasher = Crc32::new();
    hasher.update(&fixed);
    hasher.update(&key);
    hasher.update(&data);

    if hasher.finalize() != stored_crc {
        return Err(Error::Corrupted);
    }

    *pos += NODE_FIXED_LEN + key_len as u64 + data_len as u64 + CRC_LEN;

    let mut node = Node::default();
    node.set_key(key);
    if is_record {
        node.set_value(data, has_blob);
    }

    Ok(RawNode {
        node,
        num_children,
        first_child_offset,
        next_sibling_offset,
    })
}

/// A node's first child is written immediately after it, so a parent's
/// `first_child_offset` must equal the stream position right behind the
/// parent; leaves must carry 0.
fn check_first_child_offset(raw: &RawNode, pos_after: u64) -> Result<(), Error> {
    let expected = if raw.num_children > 0 { pos_after } else { 0 };

    if raw.first_child_offset != expected {
        return Err(Error::Corrupted);
    }

    Ok(())
}

fn read_blob_index<R: Read>(r: &mut R, header: &FileHeader) -> Result<BlobStore, Error> {
    let mut blobs = BlobStore::new();
    let mut size = 0u64;

    for _ in 0..header.blob_count {
        let mut fixed = [0u8; BLOB_ENTRY_FIXED_LEN as usize];
        read_exact(r, &mut fixed)?;

        let mut fields = &fixed[BLOB_ID_LEN..];
        let ref_count = fields.read_u64::<LittleEndian>()?;
        let value_len = fields.read_u32::<LittleEndian>()?;

        if ref_count == 0 || value_len as usize <= INLINE_VALUE_MAX {
            // Entries nobody references, or values small enough to have
            // been stored inline, never leave the writer.
            return Err(Error::Corrupted);
        }

        let mut value = vec![0u8; value_len as usize];
        read_exact(r, &mut value)?;

        let mut crc_buf = [0u8; CRC_LEN as usize];
        read_exact(r, &mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = Crc32::new();
        hasher.update(&fixed);
        hasher.update(&value);

        if hasher.finalize() != stored_crc {
            return Err(Error::Corrupted);
        }

        let id = BlobId::from_bytes(&fixed[..BLOB_ID_LEN]).ok_or(Error::Corrupted)?;
        blobs.restore(id, value, ref_count);

        size += BLOB_ENTRY_FIXED_LEN + value_len as u64 + CRC_LEN;
    }

    if size != header.blob_index_size || blobs.len() as u64 != header.blob_count {
        return Err(Error::Corrupted);
    }

    Ok(blobs)
}

/// Every blob-backed record must resolve to a live store entry.
fn verify_blob_references(root: Option<&Node>, blobs: &BlobStore) -> Result<(), Error> {
    let Some(root) = root else {
        return Ok(());
    };

    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if node.is_blob && !blobs.contains(&node.data) {
            return Err(Error::Corrupted);
        }

        stack.extend(node.children.iter());
    }

    Ok(())
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Corrupted
        } else {
            Error::Io(e)
        }
    })
}
