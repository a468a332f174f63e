/*!
The chunked large-value protocol.

A value too large for one record is written as a WAL transaction chain: a `TxnBegin` marker,
one `TxnInsert` per chunk with a back-pointer to the previous record of the chain, and a
`TxnCommit` whose value is the rolling CRC accumulated over every chunk. The commit record
is what the memtable indexes; reads walk the chain backward from the commit's back-pointer
and verify the reassembled bytes against the committed checksum.

An uncommitted chain is invisible: no memtable entry points at it, and recovery replays the
commit record (or nothing) rather than the chunks.
*/

use crc::Digest;
use integer_encoding::FixedInt;

use crate::config::BATCH_ID_LENGTH_BYTES;
use crate::errors::StorageResult;
use crate::wal::log::SegmentedLog;
use crate::wal::offset::Offset;
use crate::wal::record::{EntryKind, LogOperation, ValueKind, WalRecord, CRC_CALCULATOR};

/// An in-flight chunked write. All records of one batch are appended under the engine's
/// write mutex, so the chain is contiguous in the log.
pub(crate) struct ChunkBatch {
    key: Vec<u8>,
    batch_id: [u8; BATCH_ID_LENGTH_BYTES],
    last_offset: Offset,
    rolling_checksum: Digest<'static, u32>,
}

/// Crate-only methods
impl ChunkBatch {
    /// Open a batch by appending its `TxnBegin` marker.
    pub(crate) fn begin(log: &SegmentedLog, index: u64, key: &[u8]) -> StorageResult<Self> {
        let batch_id: [u8; BATCH_ID_LENGTH_BYTES] = rand::random();

        let begin = WalRecord::new(
            index,
            LogOperation::TxnBegin,
            EntryKind::Chunked,
            ValueKind::Full,
            batch_id,
            Offset::ZERO,
            key.to_vec(),
            vec![],
        );
        let last_offset = log.append(&begin.encode())?;

        Ok(Self {
            key: key.to_vec(),
            batch_id,
            last_offset,
            rolling_checksum: CRC_CALCULATOR.digest(),
        })
    }

    /// Append one chunk, linking it to the previous record of the chain.
    pub(crate) fn append_chunk(
        &mut self,
        log: &SegmentedLog,
        index: u64,
        chunk: &[u8],
    ) -> StorageResult<()> {
        let record = WalRecord::new(
            index,
            LogOperation::TxnInsert,
            EntryKind::Chunked,
            ValueKind::Chunked,
            self.batch_id,
            self.last_offset,
            self.key.clone(),
            chunk.to_vec(),
        );

        self.last_offset = log.append(&record.encode())?;
        self.rolling_checksum.update(chunk);

        Ok(())
    }

    /**
    Seal the batch with its `TxnCommit` record and return the commit's offset.

    The commit value carries the rolling CRC so readers can verify the chain without any
    side index.
    */
    pub(crate) fn commit(self, log: &SegmentedLog, index: u64) -> StorageResult<Offset> {
        let rolling = self.rolling_checksum.finalize();
        let commit = WalRecord::new(
            index,
            LogOperation::TxnCommit,
            EntryKind::Chunked,
            ValueKind::Chunked,
            self.batch_id,
            self.last_offset,
            self.key,
            encode_rolling_checksum(rolling),
        );

        log.append(&commit.encode())
    }
}

/// Serialize a rolling checksum for a commit record's value.
pub(crate) fn encode_rolling_checksum(checksum: u32) -> Vec<u8> {
    u32::encode_fixed_vec(checksum)
}

/// Deserialize a commit record's rolling checksum. Short buffers read as zero.
pub(crate) fn decode_rolling_checksum(buf: &[u8]) -> u32 {
    if buf.len() < 4 {
        return 0;
    }

    u32::decode_fixed(&buf[0..4])
}
