/*!
The segmented write-ahead log.

The log is a directory of fixed-max-size segment files named by ascending segment id. Appends
go to the newest segment and rotate to a fresh one when the active segment is near its size
budget, so a single record never straddles two files. Reads are positional: any record can be
located by its [`Offset`] and sequential reads advance across block trailers and segment
boundaries transparently.
*/

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::config::{BLOCK_SIZE_BYTES, CHUNK_HEADER_LENGTH_BYTES, MAX_TXN_CHAIN_STEPS};
use crate::errors::{StorageError, StorageResult, WalCorruptionMetadata, WalError};
use crate::file_names::{parse_segment_id, segment_file_path};
use crate::wal::offset::Offset;
use crate::wal::record::{LogOperation, WalRecord};
use crate::wal::segment::{read_record_at, Segment};

/**
The append-only, crash-safe, segmented log.

Appends must be serialized by the caller (the engine holds its write mutex across every
append); reads may proceed concurrently from any number of threads.
*/
pub(crate) struct SegmentedLog {
    /// The directory holding the segment files.
    wal_dir: PathBuf,

    /// Size budget that triggers rotation to a new segment file.
    segment_size: usize,

    /// Whether every append should be followed by an fsync.
    sync_on_write: bool,

    /// The segment currently accepting appends.
    writer: Mutex<Segment>,

    /// The id of the oldest retained segment. Segments are never truncated here.
    oldest_segment_id: u32,

    /// The id of the segment currently accepting appends, visible to readers.
    last_segment_id: AtomicU32,
}

/// Crate-only methods
impl SegmentedLog {
    /// Open the log in `wal_dir`, resuming the highest-numbered segment or creating segment 1.
    pub(crate) fn open(
        wal_dir: &Path,
        segment_size: usize,
        sync_on_write: bool,
    ) -> StorageResult<Self> {
        fs::create_dir_all(wal_dir)?;

        let mut oldest_segment_id = u32::MAX;
        let mut newest_segment_id = 0;
        for entry in fs::read_dir(wal_dir)? {
            let path = entry?.path();
            if let Some(id) = parse_segment_id(&path) {
                oldest_segment_id = oldest_segment_id.min(id);
                newest_segment_id = newest_segment_id.max(id);
            }
        }

        if newest_segment_id == 0 {
            // Fresh log. Segment ids start at 1 so that the zero offset stays a sentinel.
            oldest_segment_id = 1;
            newest_segment_id = 1;
        }

        let writer = Segment::open(wal_dir, newest_segment_id)?;
        log::info!(
            "opened segmented log at {wal_dir:?} with segments {oldest_segment_id}..={newest_segment_id}"
        );

        Ok(SegmentedLog {
            wal_dir: wal_dir.to_path_buf(),
            segment_size,
            sync_on_write,
            writer: Mutex::new(writer),
            oldest_segment_id,
            last_segment_id: AtomicU32::new(newest_segment_id),
        })
    }

    /// The offset of the first record in the oldest retained segment.
    pub(crate) fn start_offset(&self) -> Offset {
        Offset::new(self.oldest_segment_id, 0, 0)
    }

    /// The id of the segment currently accepting appends.
    pub(crate) fn last_segment_id(&self) -> u32 {
        self.last_segment_id.load(Ordering::Acquire)
    }

    /**
    Append an encoded record and return the offset of its first chunk.

    If the record would push the active segment past its size budget, the log rotates to a
    fresh segment first so the record lands wholly inside one file.
    */
    pub(crate) fn append(&self, data: &[u8]) -> StorageResult<Offset> {
        let mut writer = self.writer.lock();

        let projected = writer.size() + encoded_size_upper_bound(data.len()) as u64;
        if writer.size() > 0 && projected > self.segment_size as u64 {
            writer.sync()?;
            let next_id = writer.id() + 1;
            *writer = Segment::open(&self.wal_dir, next_id)?;
            self.last_segment_id.store(next_id, Ordering::Release);
            log::info!("rotated the write-ahead log to segment {next_id}");
        }

        let (block_number, chunk_offset) = writer.append_record(data)?;
        if self.sync_on_write {
            writer.sync()?;
        }

        Ok(Offset::new(writer.id(), block_number, chunk_offset))
    }

    /// Request OS-level durability of the active segment.
    pub(crate) fn sync(&self) -> StorageResult<()> {
        self.writer.lock().sync()?;

        Ok(())
    }

    /**
    Read the record at `offset` and return it together with the offset suitable for the next
    sequential read.

    Reads that land past the written extent of a sealed segment advance into the next
    segment; only the tail of the final segment reads as
    [`WalError::EndOfLog`](crate::errors::WalError::EndOfLog).
    */
    pub(crate) fn read_at(&self, offset: Offset) -> StorageResult<(Vec<u8>, Offset)> {
        if offset.segment_id < self.oldest_segment_id {
            // Covers the zero sentinel, which never names a real record
            return Err(StorageError::Wal(WalError::InvalidOffset));
        }

        let mut segment_id = offset.segment_id;
        let mut block_number = offset.block_number;
        let mut chunk_offset = offset.chunk_offset;

        loop {
            let last_segment_id = self.last_segment_id();
            if segment_id > last_segment_id {
                return Err(StorageError::Wal(WalError::EndOfLog));
            }

            let file = self.open_segment_for_read(segment_id)?;
            match read_record_at(&file, segment_id, block_number, chunk_offset) {
                Ok((data, next_block, next_offset)) => {
                    return Ok((data, Offset::new(segment_id, next_block, next_offset)));
                }
                Err(WalError::EndOfLog) => {
                    if segment_id < last_segment_id {
                        // Clean end of a sealed segment. Continue in the next one.
                        segment_id += 1;
                        block_number = 0;
                        chunk_offset = 0;
                        continue;
                    }
                    return Err(StorageError::Wal(WalError::EndOfLog));
                }
                Err(err) => return Err(StorageError::Wal(err)),
            }
        }
    }

    /**
    Collect every record of one chunked batch by walking the `prev_txn_offset` back-pointers
    starting from `start` (usually the last chunk of the batch, as referenced by its commit
    record).

    The walk stops at the batch's `TxnBegin` marker or at the first record carrying a
    different batch id. Records come back in chain order, begin marker first. The number of
    hops is bounded; data corrupted into a back-pointer cycle surfaces as corruption instead
    of an infinite walk.
    */
    pub(crate) fn read_chain(&self, start: Offset) -> StorageResult<Vec<WalRecord>> {
        let mut records: Vec<WalRecord> = vec![];
        let mut next_position = Some(start);
        let mut chain_batch_id: Option<[u8; 16]> = None;
        let mut steps: usize = 0;

        while let Some(position) = next_position {
            steps += 1;
            if steps > MAX_TXN_CHAIN_STEPS {
                return Err(StorageError::Wal(WalError::Corruption(
                    WalCorruptionMetadata {
                        segment_id: position.segment_id,
                        reason: format!(
                            "transaction chain exceeded {MAX_TXN_CHAIN_STEPS} hops; assuming a \
                            back-pointer cycle"
                        ),
                    },
                )));
            }

            let (frame, _) = self.read_at(position)?;
            let record = WalRecord::decode(&frame)?;
            if !record.verify_checksum() {
                return Err(StorageError::RecordCorrupted);
            }

            match chain_batch_id {
                None => chain_batch_id = Some(record.batch_id),
                Some(expected) if expected != record.batch_id => break,
                Some(_) => {}
            }

            let at_chain_head =
                record.op == LogOperation::TxnBegin || record.prev_txn_offset.is_zero();
            let previous = record.prev_txn_offset;
            records.push(record);

            next_position = if at_chain_head { None } else { Some(previous) };
        }

        records.reverse();

        Ok(records)
    }
}

/// Private methods
impl SegmentedLog {
    /// Open a read-only handle onto the given segment.
    fn open_segment_for_read(&self, segment_id: u32) -> StorageResult<File> {
        let path = segment_file_path(&self.wal_dir, segment_id);

        File::open(path).map_err(StorageError::IO)
    }
}

/**
A conservative upper bound for the on-disk size of a record of `length` data bytes, counting
chunk headers and worst-case block padding.
*/
fn encoded_size_upper_bound(length: usize) -> usize {
    let chunk_count = length / (BLOCK_SIZE_BYTES - CHUNK_HEADER_LENGTH_BYTES) + 2;

    length + chunk_count * 2 * CHUNK_HEADER_LENGTH_BYTES
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::wal::record::{EntryKind, ValueKind};

    fn is_end_of_log<T>(result: &StorageResult<T>) -> bool {
        matches!(result, Err(StorageError::Wal(err)) if err.is_end_of_log())
    }

    #[test]
    fn appends_read_back_in_order() {
        let dir = TempDir::new().unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024, false).unwrap();

        let payloads: Vec<Vec<u8>> = (0..25)
            .map(|i| format!("record number {i}").into_bytes())
            .collect();
        let mut offsets = vec![];
        for payload in &payloads {
            offsets.push(log.append(payload).unwrap());
        }

        // Offsets are strictly increasing in append order
        for pair in offsets.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        let mut position = log.start_offset();
        for payload in &payloads {
            let (data, next) = log.read_at(position).unwrap();
            assert_eq!(&data, payload);
            position = next;
        }
        assert!(is_end_of_log(&log.read_at(position)));
    }

    #[test]
    fn rotation_keeps_records_readable_across_segments() {
        let dir = TempDir::new().unwrap();
        // Tiny budget so a handful of records spills over several segments
        let log = SegmentedLog::open(dir.path(), 4 * 1024, false).unwrap();

        let payloads: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8; 1500]).collect();
        for payload in &payloads {
            log.append(payload).unwrap();
        }
        assert!(log.last_segment_id() > 1);

        let mut position = log.start_offset();
        let mut read_back = 0;
        loop {
            match log.read_at(position) {
                Ok((data, next)) => {
                    assert_eq!(data, payloads[read_back]);
                    read_back += 1;
                    position = next;
                }
                Err(err) => {
                    assert!(matches!(&err, StorageError::Wal(e) if e.is_end_of_log()));
                    break;
                }
            }
        }
        assert_eq!(read_back, payloads.len());
    }

    #[test]
    fn reopening_resumes_the_newest_segment() {
        let dir = TempDir::new().unwrap();
        {
            let log = SegmentedLog::open(dir.path(), 1024 * 1024, false).unwrap();
            log.append(b"before reopen").unwrap();
            log.sync().unwrap();
        }

        let log = SegmentedLog::open(dir.path(), 1024 * 1024, false).unwrap();
        let appended = log.append(b"after reopen").unwrap();

        let (data, next) = log.read_at(log.start_offset()).unwrap();
        assert_eq!(data, b"before reopen");
        assert_eq!(next, appended);
        let (data, _) = log.read_at(next).unwrap();
        assert_eq!(data, b"after reopen");
    }

    #[test]
    fn the_zero_offset_is_not_a_readable_position() {
        let dir = TempDir::new().unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024, false).unwrap();
        log.append(b"something").unwrap();

        let result = log.read_at(Offset::ZERO);
        assert!(matches!(
            result,
            Err(StorageError::Wal(WalError::InvalidOffset))
        ));
    }

    #[test]
    fn chains_walk_back_to_their_begin_marker() {
        let dir = TempDir::new().unwrap();
        let log = SegmentedLog::open(dir.path(), 1024 * 1024, false).unwrap();
        let batch_id = [9_u8; 16];

        let begin = WalRecord::new(
            1,
            LogOperation::TxnBegin,
            EntryKind::Chunked,
            ValueKind::Full,
            batch_id,
            Offset::ZERO,
            b"big".to_vec(),
            vec![],
        );
        let mut last_offset = log.append(&begin.encode()).unwrap();

        for piece in [b"part one, ".as_slice(), b"part two".as_slice()] {
            let chunk = WalRecord::new(
                2,
                LogOperation::TxnInsert,
                EntryKind::Chunked,
                ValueKind::Chunked,
                batch_id,
                last_offset,
                b"big".to_vec(),
                piece.to_vec(),
            );
            last_offset = log.append(&chunk.encode()).unwrap();
        }

        let chain = log.read_chain(last_offset).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].op, LogOperation::TxnBegin);
        assert_eq!(chain[1].value, b"part one, ");
        assert_eq!(chain[2].value, b"part two");
    }
}
