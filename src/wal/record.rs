/*!
The WAL record codec.

Every mutation is persisted as one or more records with a fixed, self-describing frame. The
frame layout is stable and must not change once data has been written with it:

1. The record index as a fixed-width u64
1. The log operation as 1 byte
1. The entry kind as 1 byte
1. The value kind as 1 byte
1. The 16 byte batch id (all zeroes outside of chunked batches)
1. The offset of the previous record in the same transaction chain (12 bytes, the zero
   offset for chain heads and standalone records)
1. A CRC32 over the value bytes as a fixed-width u32
1. The key as a varint32 length-prefixed slice
1. The value as a varint32 length-prefixed slice
*/

use std::convert::TryFrom;
use std::io::Cursor;

use crc::{Crc, CRC_32_ISCSI};
use integer_encoding::FixedInt;

use crate::config::BATCH_ID_LENGTH_BYTES;
use crate::errors::WalError;
use crate::utils::io::{ReadHelpers, WriteHelpers};
use crate::wal::offset::Offset;

/// CRC calculator using the iSCSI polynomial, shared by every checksum the engine computes.
pub(crate) static CRC_CALCULATOR: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// The length of the fixed portion of a record frame, before the key and value slices.
const FIXED_HEADER_LENGTH_BYTES: usize = 8 + 1 + 1 + 1 + BATCH_ID_LENGTH_BYTES + 12 + 4;

/// Alias for a [`Result`] that wraps a [`WalError`].
type WalResult<T> = Result<T, WalError>;

/// The operation a WAL record captures.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogOperation {
    /**
    Sentinel for "no operation recorded". This is only ever used as an in-memory marker and
    must never be persisted.
    */
    Noop = 0,
    /// Set a key to a value.
    Insert,
    /// Remove a key.
    Delete,
    /// Remove an entire row and all of its columns.
    DeleteRow,
    /// Open a chunked value transaction.
    TxnBegin,
    /// One chunk of a chunked value transaction.
    TxnInsert,
    /// Seal a chunked value transaction. The record value is the rolling CRC of the chunks.
    TxnCommit,
}

impl TryFrom<u8> for LogOperation {
    type Error = WalError;

    fn try_from(value: u8) -> WalResult<LogOperation> {
        let operation = match value {
            0 => LogOperation::Noop,
            1 => LogOperation::Insert,
            2 => LogOperation::Delete,
            3 => LogOperation::DeleteRow,
            4 => LogOperation::TxnBegin,
            5 => LogOperation::TxnInsert,
            6 => LogOperation::TxnCommit,
            _ => {
                return Err(WalError::Serialization(format!(
                    "there was a problem parsing the log operation. The value received was {}",
                    value
                )))
            }
        };

        Ok(operation)
    }
}

/// The shape of the entry a record belongs to.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// A plain key-value entry.
    KV = 0,
    /// An entry whose value is reassembled from a transaction chain of chunks.
    Chunked,
    /// A wide-row entry whose value is a columnar delta.
    Row,
}

impl TryFrom<u8> for EntryKind {
    type Error = WalError;

    fn try_from(value: u8) -> WalResult<EntryKind> {
        let kind = match value {
            0 => EntryKind::KV,
            1 => EntryKind::Chunked,
            2 => EntryKind::Row,
            _ => {
                return Err(WalError::Serialization(format!(
                    "there was a problem parsing the entry kind. The value received was {}",
                    value
                )))
            }
        };

        Ok(kind)
    }
}

/// The interpretation of a record's value bytes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueKind {
    /// The value bytes are the complete value.
    Full = 0,
    /// The value bytes are one piece of a chunked value.
    Chunked,
    /// The value bytes are an encoded set of column entries.
    Column,
}

impl TryFrom<u8> for ValueKind {
    type Error = WalError;

    fn try_from(value: u8) -> WalResult<ValueKind> {
        let kind = match value {
            0 => ValueKind::Full,
            1 => ValueKind::Chunked,
            2 => ValueKind::Column,
            _ => {
                return Err(WalError::Serialization(format!(
                    "there was a problem parsing the value kind. The value received was {}",
                    value
                )))
            }
        };

        Ok(kind)
    }
}

/// A fully decoded WAL record.
#[derive(Clone, Debug)]
pub struct WalRecord {
    /// Monotonically increasing counter assigned when the record was appended.
    pub index: u64,

    /// The operation the record captures.
    pub op: LogOperation,

    /// The shape of the entry the record belongs to.
    pub entry_kind: EntryKind,

    /// The interpretation of the value bytes.
    pub value_kind: ValueKind,

    /// Identifier shared by every record of one chunked batch. All zeroes otherwise.
    pub batch_id: [u8; BATCH_ID_LENGTH_BYTES],

    /// Offset of the previous record in the same transaction chain.
    pub prev_txn_offset: Offset,

    /// CRC32 over the value bytes.
    pub crc32: u32,

    /// The user key the record applies to.
    pub key: Vec<u8>,

    /// The value bytes. Empty for deletes and for transaction begin markers.
    pub value: Vec<u8>,
}

/// Public methods
impl WalRecord {
    /**
    Build a record, computing the value checksum.

    The caller supplies every semantic field; the index is assigned by the engine's write
    path so that it is monotonic across all appends.
    */
    pub(crate) fn new(
        index: u64,
        op: LogOperation,
        entry_kind: EntryKind,
        value_kind: ValueKind,
        batch_id: [u8; BATCH_ID_LENGTH_BYTES],
        prev_txn_offset: Offset,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Self {
        let crc32 = CRC_CALCULATOR.checksum(&value);

        Self {
            index,
            op,
            entry_kind,
            value_kind,
            batch_id,
            prev_txn_offset,
            crc32,
            key,
            value,
        }
    }

    /// Serialize the record to its frame representation.
    pub fn encode(&self) -> Vec<u8> {
        let initial_capacity =
            FIXED_HEADER_LENGTH_BYTES + self.key.len() + self.value.len() + 2 * 5;
        let mut buf: Vec<u8> = Vec::with_capacity(initial_capacity);

        buf.extend_from_slice(&u64::encode_fixed_vec(self.index));
        buf.push(self.op as u8);
        buf.push(self.entry_kind as u8);
        buf.push(self.value_kind as u8);
        buf.extend_from_slice(&self.batch_id);
        buf.extend_from_slice(&self.prev_txn_offset.encode());
        buf.extend_from_slice(&u32::encode_fixed_vec(self.crc32));

        // Writing to a `Vec` cannot fail
        buf.write_length_prefixed_slice(&self.key).unwrap();
        buf.write_length_prefixed_slice(&self.value).unwrap();

        buf
    }

    /// Deserialize a record from its frame representation.
    pub fn decode(buf: &[u8]) -> WalResult<WalRecord> {
        if buf.len() < FIXED_HEADER_LENGTH_BYTES {
            return Err(WalError::Serialization(format!(
                "a record frame requires at least {} bytes but only {} were provided",
                FIXED_HEADER_LENGTH_BYTES,
                buf.len()
            )));
        }

        let index = u64::decode_fixed(&buf[0..8]);
        let op = LogOperation::try_from(buf[8])?;
        let entry_kind = EntryKind::try_from(buf[9])?;
        let value_kind = ValueKind::try_from(buf[10])?;

        let mut batch_id = [0_u8; BATCH_ID_LENGTH_BYTES];
        batch_id.copy_from_slice(&buf[11..11 + BATCH_ID_LENGTH_BYTES]);

        let offset_start = 11 + BATCH_ID_LENGTH_BYTES;
        let prev_txn_offset = Offset::decode(&buf[offset_start..offset_start + 12])?;
        let crc32 = u32::decode_fixed(&buf[offset_start + 12..offset_start + 16]);

        let mut cursor = Cursor::new(&buf[FIXED_HEADER_LENGTH_BYTES..]);
        let key = cursor
            .read_length_prefixed_slice()
            .map_err(|err| WalError::Serialization(err.to_string()))?;
        let value = cursor
            .read_length_prefixed_slice()
            .map_err(|err| WalError::Serialization(err.to_string()))?;

        Ok(WalRecord {
            index,
            op,
            entry_kind,
            value_kind,
            batch_id,
            prev_txn_offset,
            crc32,
            key,
            value,
        })
    }

    /// Recompute the value checksum and compare it against the stored one.
    pub fn verify_checksum(&self) -> bool {
        CRC_CALCULATOR.checksum(&self.value) == self.crc32
    }
}
