/*!
Boot-time recovery.

On open the engine replays the WAL forward from the persisted checkpoint, rebuilding the
memtable tier and the Bloom filter exactly as if each record had just been appended. The
checkpoint is exclusive: its record is already durable in the store, so replay starts at the
record after it.

Damage at the very tail of the log is expected after a crash mid-write and reads as the end
of the log. Damage anywhere earlier means flushed history disagrees with the log and is
fatal.
*/

use crate::bloom::BloomFilter;
use crate::errors::{StorageError, StorageResult, WalError};
use crate::memtable::{MemTable, MemTableTier, RowDelta, TableEntry};
use crate::options::StorageOptions;
use crate::store::WalCheckpoint;
use crate::wal::log::SegmentedLog;
use crate::wal::offset::Offset;
use crate::wal::record::{EntryKind, LogOperation, WalRecord};

/// What a completed replay produced.
#[derive(Debug, Default)]
pub(crate) struct RecoveryOutcome {
    /// The number of records replayed into the memtable tier.
    pub(crate) replayed: usize,

    /// The highest record index observed, never below the checkpoint's.
    pub(crate) max_index: u64,

    /// The offset of the newest record in the log, if any record exists.
    pub(crate) last_offset: Option<Offset>,
}

/// Replay the WAL from the checkpoint (exclusive) into the memtable tier and Bloom filter.
pub(crate) fn replay_wal(
    wal: &SegmentedLog,
    checkpoint: &WalCheckpoint,
    tier: &mut MemTableTier,
    bloom: &mut BloomFilter,
    options: &StorageOptions,
) -> StorageResult<RecoveryOutcome> {
    let mut outcome = RecoveryOutcome {
        replayed: 0,
        max_index: checkpoint.record_index,
        last_offset: checkpoint.offset,
    };

    let mut position = match checkpoint.offset {
        Some(checkpointed) => match wal.read_at(checkpointed) {
            Ok((_, next)) => next,
            Err(StorageError::Wal(err)) if err.is_end_of_log() => return Ok(outcome),
            Err(err) => return Err(err),
        },
        None => wal.start_offset(),
    };

    loop {
        let (frame, next) = match wal.read_at(position) {
            Ok(read) => read,
            Err(StorageError::Wal(err)) if err.is_end_of_log() => break,
            Err(StorageError::Wal(WalError::Corruption(metadata))) => {
                if metadata.segment_id == wal.last_segment_id() {
                    // A crash can tear the newest record; everything before it was already
                    // replayed, so the log effectively ends here
                    log::warn!(
                        "treating corruption at the tail of segment {} as the end of the \
                        log: {}",
                        metadata.segment_id,
                        metadata.reason
                    );
                    break;
                }
                return Err(StorageError::Wal(WalError::Corruption(metadata)));
            }
            Err(err) => return Err(err),
        };

        let record = match WalRecord::decode(&frame) {
            Ok(record) => record,
            Err(err) => {
                if position.segment_id == wal.last_segment_id() {
                    log::warn!("treating an undecodable record at the log tail as the end: {err}");
                    break;
                }
                return Err(StorageError::Wal(err));
            }
        };

        if !record.verify_checksum() {
            if position.segment_id == wal.last_segment_id() {
                log::warn!("treating a checksum mismatch at the log tail as the end");
                break;
            }
            return Err(StorageError::RecordCorrupted);
        }

        apply_recovered_record(tier, bloom, &record, position, options);

        outcome.replayed += 1;
        if record.index > outcome.max_index {
            outcome.max_index = record.index;
        }
        outcome.last_offset = Some(position);
        position = next;
    }

    if outcome.replayed > 0 {
        log::info!(
            "recovered {count} WAL records after the checkpoint",
            count = outcome.replayed
        );
    }

    Ok(outcome)
}

/**
Apply one replayed record to the memtable tier, rotating the active table on the same
budgets a live append would.
*/
fn apply_recovered_record(
    tier: &mut MemTableTier,
    bloom: &mut BloomFilter,
    record: &WalRecord,
    offset: Offset,
    options: &StorageOptions,
) {
    match record.op {
        LogOperation::TxnBegin | LogOperation::TxnInsert | LogOperation::Noop => {
            // Chain interiors have no memtable footprint; the commit record carries the
            // visible effect
        }
        LogOperation::TxnCommit => {
            maybe_rotate(tier, record.key.len(), options);
            tier.active.apply_entry(
                &record.key,
                TableEntry {
                    offset,
                    op: LogOperation::Insert,
                    entry_kind: EntryKind::Chunked,
                },
                record.index,
            );
            bloom.insert(&record.key);
        }
        LogOperation::Insert | LogOperation::Delete | LogOperation::DeleteRow => {
            maybe_rotate(tier, record.key.len(), options);
            if record.entry_kind == EntryKind::Row {
                tier.active.apply_row_delta(
                    &record.key,
                    RowDelta {
                        offset,
                        op: record.op,
                    },
                    record.index,
                );
            } else {
                tier.active.apply_entry(
                    &record.key,
                    TableEntry {
                        offset,
                        op: record.op,
                        entry_kind: record.entry_kind,
                    },
                    record.index,
                );
            }
            bloom.insert(&record.key);
        }
    }
}

/**
Seal the active table when the incoming entry would exceed its budgets.

There is no flusher running during recovery, so the sealed backlog may grow past its
configured capacity here; the engine schedules a flush for it as soon as the worker starts.
*/
fn maybe_rotate(tier: &mut MemTableTier, key_length: usize, options: &StorageOptions) {
    if tier.active.wont_fit(
        key_length,
        options.memtable_max_bytes,
        options.memtable_max_entries,
    ) {
        let sealed = std::mem::replace(&mut tier.active, MemTable::new());
        tier.sealed.push(std::sync::Arc::new(sealed));
    }
}
