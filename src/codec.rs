//! Backend value encoding.
//!
//! A provider record's value is its write timestamp (wall-clock milliseconds
//! since the Unix epoch) encoded as an LEB128 unsigned varint. Typical
//! values fit in 6 bytes and the format has no endianness. There is no
//! version byte; the layout is fixed.

use bytes::Bytes;
use snafu::Snafu;

/// A u64 varint never needs more than 10 LEB128 bytes.
const MAX_VARINT_LEN: usize = 10;

/// Errors decoding a backend record value.
///
/// These only arise while scanning the backend; callers log and skip the
/// offending entry rather than aborting.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum RecordError {
    /// The value ended before the varint terminated.
    #[snafu(display("malformed record: truncated timestamp varint"))]
    Truncated,

    /// The varint encodes more than 64 bits.
    #[snafu(display("malformed record: timestamp varint overflows u64"))]
    Overflow,

    /// Bytes remained after the varint terminated.
    #[snafu(display("malformed record: {trailing} trailing byte(s) after timestamp"))]
    TrailingBytes {
        /// Number of unconsumed bytes.
        trailing: usize,
    },
}

/// Encode a millisecond timestamp as an LEB128 unsigned varint.
pub fn encode_timestamp(ms: u64) -> Bytes {
    let mut out = Vec::with_capacity(MAX_VARINT_LEN);
    let mut value = ms;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    Bytes::from(out)
}

/// Decode an LEB128 unsigned varint back into a millisecond timestamp.
///
/// The entire input must be consumed; truncation, 64-bit overflow, and
/// trailing bytes are all rejected.
pub fn decode_timestamp(bytes: &[u8]) -> Result<u64, RecordError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for (index, byte) in bytes.iter().enumerate() {
        let payload = (byte & 0x7f) as u64;
        if shift >= 64 || (shift == 63 && payload > 1) {
            return Err(RecordError::Overflow);
        }
        value |= payload << shift;

        if byte & 0x80 == 0 {
            let trailing = bytes.len() - index - 1;
            if trailing > 0 {
                return Err(RecordError::TrailingBytes { trailing });
            }
            return Ok(value);
        }
        shift += 7;
    }

    Err(RecordError::Truncated)
}
