//! On-disk format constants and file-header read/write helpers.
//!
//! Every Arbor file starts with a fixed **80-byte header**:
//!
//! ```text
//!  0: magic (u8, 'A')      1: version (u8)
//!  2: compression (u8)     3: reserved (u8)
//!  4: node_count (u64)    12: record_count (u64)
//! 20: blob_count (u64)    28: radix_index_offset (u64)
//! 36: radix_index_size (u64)
//! 44: blob_index_offset (u64)
//! 52: blob_index_size (u64)
//! 60: created_at (u64)    68: updated_at (u64)
//! 76: CRC32 over bytes 0..76 (u32)
//! ```
//!
//! All integers are little-endian. The format is stable across
//! implementations; a reader must reject unknown magic or version values.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;

use crate::error::Error;

/// First byte of every Arbor file.
pub const MAGIC: u8 = 0x41;

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Compression algorithm id for uncompressed payloads, the only one
/// defined by format version 1.
pub const COMPRESSION_NONE: u8 = 0;

/// Size of the file header in bytes.
pub const FILE_HEADER_LEN: u64 = 80;

/// Recommended file extension (non-normative).
pub const FILE_EXT: &str = "rdx";

/// `is_record` bit in a persistent node's flags byte.
pub(crate) const FLAG_IS_RECORD: u8 = 1 << 0;

/// `has_blob` bit in a persistent node's flags byte.
pub(crate) const FLAG_HAS_BLOB: u8 = 1 << 1;

/// Fixed part of a persistent node: flags (1) + num_children (2) +
/// key_len (2) + data_len (4) + first_child_offset (8) +
/// next_sibling_offset (8).
pub(crate) const NODE_FIXED_LEN: u64 = 25;

/// Fixed part of a blob entry: id (32) + ref_count (8) + value_len (4).
pub(crate) const BLOB_ENTRY_FIXED_LEN: u64 = 44;

/// Trailing CRC32 on nodes and blob entries.
pub(crate) const CRC_LEN: u64 = 4;

/// Decoded file header. Field meanings are documented in the module-level
/// layout; offsets are absolute file positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub node_count: u64,
    pub record_count: u64,
    pub blob_count: u64,
    pub radix_index_offset: u64,
    pub radix_index_size: u64,
    pub blob_index_offset: u64,
    pub blob_index_size: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl FileHeader {
    /// Encodes the header into its 80-byte on-disk form, CRC included.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(FILE_HEADER_LEN as usize);

        buf.write_u8(MAGIC)?;
        buf.write_u8(FORMAT_VERSION)?;
        buf.write_u8(COMPRESSION_NONE)?;
        buf.write_u8(0)?; // reserved
        buf.write_u64::<LittleEndian>(self.node_count)?;
        buf.write_u64::<LittleEndian>(self.record_count)?;
        buf.write_u64::<LittleEndian>(self.blob_count)?;
        buf.write_u64::<LittleEndian>(self.radix_index_offset)?;
        buf.write_u64::<LittleEndian>(self.radix_index_size)?;
        buf.write_u64::<LittleEndian>(self.blob_index_offset)?;
        buf.write_u64::<LittleEndian>(self.blob_index_size)?;
        buf.write_u64::<LittleEndian>(self.created_at)?;
        buf.write_u64::<LittleEndian>(self.updated_at)?;

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        buf.write_u32::<LittleEndian>(hasher.finalize())?;

        Ok(buf)
    }

    /// Decodes and validates an 80-byte header.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupted`] when the buffer is not exactly header-sized,
    /// the magic or version is unknown, the compression id is not "none",
    /// or the CRC does not match.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != FILE_HEADER_LEN as usize {
            return Err(Error::Corrupted);
        }

        let payload = &buf[..FILE_HEADER_LEN as usize - CRC_LEN as usize];
        let mut hasher = Crc32::new();
        hasher.update(payload);

        let mut crc_field = &buf[FILE_HEADER_LEN as usize - CRC_LEN as usize..];
        let stored_crc = crc_field.read_u32::<LittleEndian>()?;

        if hasher.finalize() != stored_crc {
            return Err(Error::Corrupted);
        }

        if buf[0] != MAGIC || buf[1] != FORMAT_VERSION || buf[2] != COMPRESSION_NONE {
            return Err(Error::Corrupted);
        }

        let mut fields = &buf[4..];

        Ok(FileHeader {
            node_count: fields.read_u64::<LittleEndian>()?,
            record_count: fields.read_u64::<LittleEndian>()?,
            blob_count: fields.read_u64::<LittleEndian>()?,
            radix_index_offset: fields.read_u64::<LittleEndian>()?,
            radix_index_size: fields.read_u64::<LittleEndian>()?,
            blob_index_offset: fields.read_u64::<LittleEndian>()?,
            blob_index_size: fields.read_u64::<LittleEndian>()?,
            created_at: fields.read_u64::<LittleEndian>()?,
            updated_at: fields.read_u64::<LittleEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> FileHeader {
        FileHeader {
            node_count: 5,
            record_count: 4,
            blob_count: 1,
            radix_index_offset: FILE_HEADER_LEN,
            radix_index_size: 300,
            blob_index_offset: FILE_HEADER_LEN + 300,
            blob_index_size: 120,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_123,
        }
    }

    #[test]
    fn encode_is_header_sized_and_tagged() {
        let buf = sample_header().encode().unwrap();

        assert_eq!(buf.len(), FILE_HEADER_LEN as usize);
        assert_eq!(buf[0], MAGIC);
        assert_eq!(buf[1], FORMAT_VERSION);
        assert_eq!(buf[2], COMPRESSION_NONE);
        assert_eq!(buf[3], 0);
    }

    #[test]
    fn decode_roundtrips_all_fields() {
        let header = sample_header();
        let buf = header.encode().unwrap();

        assert_eq!(FileHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn decode_rejects_wrong_size() {
        assert!(matches!(
            FileHeader::decode(&[0u8; 79]),
            Err(Error::Corrupted)
        ));
        assert!(matches!(FileHeader::decode(&[]), Err(Error::Corrupted)));
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut buf = sample_header().encode().unwrap();
        buf[0] = 0x5A;
        // Re-seal the CRC so only the magic is at fault.
        let mut hasher = Crc32::new();
        hasher.update(&buf[..76]);
        buf[76..].copy_from_slice(&hasher.finalize().to_le_bytes());

        assert!(matches!(FileHeader::decode(&buf), Err(Error::Corrupted)));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut buf = sample_header().encode().unwrap();
        buf[1] = FORMAT_VERSION + 1;
        let mut hasher = Crc32::new();
        hasher.update(&buf[..76]);
        buf[76..].copy_from_slice(&hasher.finalize().to_le_bytes());

        assert!(matches!(FileHeader::decode(&buf), Err(Error::Corrupted)));
    }

    #[test]
    fn decode_rejects_unknown_compression() {
        let mut buf = sample_header().encode().unwrap();
        buf[2] = 9;
        let mut hasher = Crc32::new();
        hasher.update(&buf[..76]);
        buf[76..].copy_from_slice(&hasher.finalize().to_le_bytes());

        assert!(matches!(FileHeader::decode(&buf), Err(Error::Corrupted)));
    }

    #[test]
    fn decode_rejects_crc_mismatch() {
        let mut buf = sample_header().encode().unwrap();
        buf[20] ^= 0xFF; // corrupt blob_count without fixing the CRC

        assert!(matches!(FileHeader::decode(&buf), Err(Error::Corrupted)));
    }
}
