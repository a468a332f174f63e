/*!
Offsets uniquely locate a record in the segmented log.

An offset is the triple of the segment the record lives in, the 32 KiB block inside that
segment where the record's first chunk starts, and the byte position of that chunk inside the
block. Offsets order the log: the tuple ordering of the three fields is exactly append order.
*/

use integer_encoding::FixedInt;

use crate::config::ENCODED_OFFSET_LENGTH_BYTES;
use crate::errors::WalError;

/// Alias for a [`Result`] that wraps a [`WalError`].
type WalResult<T> = Result<T, WalError>;

/**
The location of a record in the segmented log.

# Serialization

An offset encodes to exactly 12 bytes: the segment id, block number, and chunk offset as
fixed-width little-endian u32 values, in that order. The all-zero encoding is used as the
"no previous record" sentinel in transaction chains (segment ids start at 1, so no real
record can occupy it).
*/
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Offset {
    /// The id of the segment file holding the record.
    pub segment_id: u32,

    /// The index of the block inside the segment where the record's first chunk starts.
    pub block_number: u32,

    /// The byte position of the record's first chunk inside its block.
    pub chunk_offset: u32,
}

/// Public methods
impl Offset {
    /// The zero offset used as the "no previous record" sentinel.
    pub const ZERO: Offset = Offset {
        segment_id: 0,
        block_number: 0,
        chunk_offset: 0,
    };

    /// Create a new [`Offset`].
    pub fn new(segment_id: u32, block_number: u32, chunk_offset: u32) -> Self {
        Self {
            segment_id,
            block_number,
            chunk_offset,
        }
    }

    /// True if this offset is the sentinel value.
    pub fn is_zero(&self) -> bool {
        *self == Offset::ZERO
    }

    /// Serialize the offset to its fixed-width representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(ENCODED_OFFSET_LENGTH_BYTES);
        buf.extend_from_slice(&u32::encode_fixed_vec(self.segment_id));
        buf.extend_from_slice(&u32::encode_fixed_vec(self.block_number));
        buf.extend_from_slice(&u32::encode_fixed_vec(self.chunk_offset));

        buf
    }

    /// Deserialize an offset from its fixed-width representation.
    pub fn decode(buf: &[u8]) -> WalResult<Offset> {
        if buf.len() < ENCODED_OFFSET_LENGTH_BYTES {
            return Err(WalError::Serialization(format!(
                "an encoded offset requires {} bytes but only {} were provided",
                ENCODED_OFFSET_LENGTH_BYTES,
                buf.len()
            )));
        }

        Ok(Offset {
            segment_id: u32::decode_fixed(&buf[0..4]),
            block_number: u32::decode_fixed(&buf[4..8]),
            chunk_offset: u32::decode_fixed(&buf[8..12]),
        })
    }
}
