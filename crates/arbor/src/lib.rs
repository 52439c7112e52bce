//! # Arbor — an embedded radix-tree key–value store
//!
//! Arbor indexes arbitrary byte keys in a radix (Patricia) tree with prefix
//! compression. Values of 32 bytes or less live inline in their node; larger
//! values are deduplicated through a content-addressed
//! [`blobstore::BlobStore`] and the node keeps the 32-byte SHA-256 id.
//! A tree serializes to a platform-agnostic little-endian file format with
//! CRC32 integrity on the header and on every node and blob entry.
//!
//! [`Arbor`] is the thread-safe handle (single writer, many readers behind a
//! reader–writer lock); [`RadixTree`] is the same engine without the lock
//! for single-threaded embedding.
//!
//! ## File layout (v1, extension `.rdx`)
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ HEADER (80 bytes)                               │
//! │                                                 │
//! │ magic 'A' | version | compression | reserved    │
//! │ node_count | record_count | blob_count (u64 ×3) │
//! │ radix index offset/size, blob index offset/size │
//! │ created_at | updated_at | header CRC32          │
//! ├─────────────────────────────────────────────────┤
//! │ RADIX INDEX (nodes in depth-first order)        │
//! │                                                 │
//! │ flags (u8) | num_children (u16) | key_len (u16) │
//! │ data_len (u32) | first_child_offset (u64)       │
//! │ next_sibling_offset (u64) | key | data | CRC32  │
//! ├─────────────────────────────────────────────────┤
//! │ BLOB INDEX (entries in ascending id order)      │
//! │                                                 │
//! │ blob_id (32) | ref_count (u64) | value_len (u32)│
//! │ value | CRC32                                   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Offsets are absolute file positions; 0
//! means "none".
//!
//! ## Example
//! ```rust
//! use arbor::Arbor;
//!
//! let db = Arbor::new();
//! db.put(b"grape", b"vine").unwrap();
//! db.put(b"grapefruit", b"citrus").unwrap();
//!
//! assert_eq!(db.get(b"grape").unwrap(), b"vine");
//! assert_eq!(db.len(), 2);
//! ```

mod error;
mod format;
mod node;
mod prefix;
mod reader;
mod store;
mod tree;
mod writer;

#[cfg(test)]
mod proptests;

pub use error::Error;
pub use format::{FileHeader, FILE_EXT, FILE_HEADER_LEN, FORMAT_VERSION, MAGIC};
pub use store::Arbor;
pub use tree::{RadixTree, INLINE_VALUE_MAX, MAX_KEY_LEN, MAX_VALUE_LEN};
