//! Log entry framing with CRC32 checksums
//!
//! ## Entry Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: Total size of type + payload + crc (NOT including length itself)
//! - **type**: Entry type tag (1=LogRecord, 2=StoreOp)
//! - **payload**: opaque bytes supplied by the caller
//! - **crc32**: CRC32 checksum over \[type\]\[payload\]

use crc32fast::Hasher;
use schemata_core::error::{Error, Result};

/// Entry holding one record appended to a [`crate::log::FileLog`]
pub const TYPE_LOG_RECORD: u8 = 1;

/// Entry holding one mutation of a [`crate::store::FileStore`]
pub const TYPE_STORE_OP: u8 = 2;

/// Length prefix plus type tag plus CRC
const FRAME_OVERHEAD: usize = 4 + 1 + 4;

/// Encode a framed entry
///
/// Format: `[length: u32][type: u8][payload: bytes][crc32: u32]`
pub fn encode_entry(entry_type: u8, payload: &[u8]) -> Vec<u8> {
    let total_len = 1 + payload.len() + 4;
    let mut buf = Vec::with_capacity(4 + total_len);

    buf.extend_from_slice(&(total_len as u32).to_le_bytes());
    buf.push(entry_type);
    buf.extend_from_slice(payload);

    let mut hasher = Hasher::new();
    hasher.update(&[entry_type]);
    hasher.update(payload);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());

    buf
}

/// A decoded entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    /// Entry type tag
    pub entry_type: u8,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Bytes consumed from the buffer, including framing
    pub consumed: usize,
}

/// Decode one framed entry from the front of `buf`
///
/// `offset` is the file offset of `buf[0]`, used for error reporting.
///
/// # Errors
///
/// - `IncompleteEntry` if the buffer ends before the declared entry does
/// - `Corruption` if the length is impossible or the CRC does not match
pub fn decode_entry(buf: &[u8], offset: u64) -> Result<DecodedEntry> {
    if buf.len() < 4 {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: 4,
        });
    }
    let total_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    // Minimum valid entry: type(1) + crc(4)
    if total_len < 5 {
        return Err(Error::Corruption(format!(
            "offset {}: Invalid entry length {} (minimum is 5 bytes: type(1) + crc(4))",
            offset, total_len
        )));
    }

    if buf.len() < 4 + total_len {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: 4 + total_len,
        });
    }

    let entry_type = buf[4];
    let payload = &buf[5..4 + total_len - 4];
    let crc_start = 4 + total_len - 4;
    let expected_crc = u32::from_le_bytes([
        buf[crc_start],
        buf[crc_start + 1],
        buf[crc_start + 2],
        buf[crc_start + 3],
    ]);

    let mut hasher = Hasher::new();
    hasher.update(&[entry_type]);
    hasher.update(payload);
    let actual_crc = hasher.finalize();

    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "offset {}: CRC mismatch: expected {:08x}, got {:08x}",
            offset, expected_crc, actual_crc
        )));
    }

    Ok(DecodedEntry {
        entry_type,
        payload: payload.to_vec(),
        consumed: 4 + total_len,
    })
}

/// Size of the framed form of a payload of `payload_len` bytes
pub fn framed_len(payload_len: usize) -> usize {
    FRAME_OVERHEAD + payload_len
}
