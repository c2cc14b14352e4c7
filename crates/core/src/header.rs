//! Per-message wire header
//!
//! ## Format
//!
//! ```text
//! [marker: u8 = 0x00][encoding id: i32 BE][payload ...]
//! ```
//!
//! Readers take the encoding id from the header and resolve it to the writer
//! schema and codec before decoding the payload.

use crate::error::{Error, Result};
use crate::types::EncodingId;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Protocol marker byte
pub const PROTOCOL_MARKER: u8 = 0x00;

/// Header size in bytes
pub const HEADER_LEN: usize = 5;

/// Write the header for `encoding_id` to the front of `buf`
pub fn write_header(buf: &mut Vec<u8>, encoding_id: EncodingId) -> Result<()> {
    buf.write_u8(PROTOCOL_MARKER)?;
    buf.write_i32::<BigEndian>(encoding_id.id())?;
    Ok(())
}

/// Prepend a header to a payload
pub fn encode_message(encoding_id: EncodingId, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    write_header(&mut buf, encoding_id)?;
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Split a message into its encoding id and payload
///
/// # Errors
///
/// - `Corruption` if the message is shorter than the header or the marker is wrong
pub fn decode_message(message: &[u8]) -> Result<(EncodingId, &[u8])> {
    if message.len() < HEADER_LEN {
        return Err(Error::Corruption(format!(
            "message of {} bytes is shorter than the {} byte header",
            message.len(),
            HEADER_LEN
        )));
    }

    let mut cursor = Cursor::new(&message[..HEADER_LEN]);
    let marker = cursor.read_u8()?;
    if marker != PROTOCOL_MARKER {
        return Err(Error::Corruption(format!(
            "unknown protocol marker {:#04x}",
            marker
        )));
    }
    let id = cursor.read_i32::<BigEndian>()?;
    Ok((EncodingId::new(id), &message[HEADER_LEN..]))
}
