//! Fixed-size structure encoding
//!
//! Every USB/IP structure has a fixed on-wire size and is transmitted with
//! multi-byte integers in network byte order. A structure is only ever decoded
//! from exactly its own size: a short read is an error, never a smaller valid
//! structure.
//!
//! # Example
//! ```
//! use protocol::{OpHeader, Wire, OP_REQ_DEVLIST};
//!
//! let header = OpHeader::request(OP_REQ_DEVLIST);
//! let bytes = header.to_bytes();
//! assert_eq!(bytes, [0x01, 0x11, 0x80, 0x05, 0, 0, 0, 0]);
//!
//! assert!(OpHeader::from_bytes(&bytes[..7]).is_err());
//! ```

use crate::error::{ProtocolError, Result};
use std::io::{Read, Write};

/// A structure with a fixed on-wire layout
pub trait Wire: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Encode into `buf`, which is exactly `SIZE` zeroed bytes
    fn encode(&self, buf: &mut [u8]);

    /// Decode from `buf`, which is exactly `SIZE` bytes
    fn decode(buf: &[u8]) -> Self;

    /// Canonical on-wire bytes
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        self.encode(&mut buf);
        buf
    }

    /// Decode a structure, failing unless `bytes` is exactly `SIZE` long
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ProtocolError::Malformed {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self::decode(bytes))
    }
}

/// Write one structure to a link
pub fn write_message<W: Write, T: Wire>(writer: &mut W, message: &T) -> Result<()> {
    writer.write_all(&message.to_bytes())?;
    Ok(())
}

/// Read exactly one structure from a link
pub fn read_message<R: Read, T: Wire>(reader: &mut R) -> Result<T> {
    let mut buf = vec![0u8; T::SIZE];
    reader.read_exact(&mut buf)?;
    T::from_bytes(&buf)
}

/// Copy a string into a NUL-padded fixed-width field, always leaving room for
/// the terminator
pub(crate) fn encode_str(field: &mut [u8], value: &str) {
    let len = value.len().min(field.len().saturating_sub(1));
    field[..len].copy_from_slice(&value.as_bytes()[..len]);
}

/// Read a NUL-terminated string out of a fixed-width field
pub(crate) fn decode_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
