/*!
The background flush worker.

The worker owns a dedicated thread that drains sealed memtables into the persistent store.
Tasks arrive over a channel so the same thread is reused instead of continually spawning new
ones. One drain pass takes the oldest sealed table, resolves its entries against the WAL
into a flush plan, commits the plan together with the advanced checkpoint in one atomic
store transaction, and only then retires the table from the backlog.

A failed flush is logged and retried from the head of the backlog after a short pause.
Writes keep succeeding while this happens; they only start blocking once the sealed backlog
reaches its configured capacity.
*/

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::batch::decode_rolling_checksum;
use crate::bloom::BloomFilter;
use crate::errors::{StorageError, StorageResult};
use crate::memtable::{MemTable, MemTableTier};
use crate::rows::decode_column_entries;
use crate::store::{BtreeStore, FlushPlan, StoreMutation, WalCheckpoint};
use crate::wal::log::SegmentedLog;
use crate::wal::offset::Offset;
use crate::wal::record::{EntryKind, LogOperation, WalRecord, CRC_CALCULATOR};

/// Name of the flush thread.
const FLUSH_THREAD_NAME: &str = "rilldb-flush";

/// How long the worker pauses before retrying a failed flush.
const FLUSH_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// The kinds of tasks that the flush worker can schedule.
#[derive(Debug)]
pub(crate) enum TaskKind {
    /// Variant for draining the sealed memtable backlog.
    Flush,

    /// Variant for shutting down the flush thread.
    Terminate,
}

/// Signal broadcast whenever the sealed backlog shrinks. Rotation backpressure and the
/// close-time drain both wait on it.
pub(crate) struct FlushSignal {
    pub(crate) mutex: Mutex<()>,
    pub(crate) condvar: Condvar,
}

/// Crate-only methods
impl FlushSignal {
    pub(crate) fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// The shared engine state the flush thread works against.
pub(crate) struct FlushContext {
    pub(crate) tables: Arc<RwLock<MemTableTier>>,
    pub(crate) wal: Arc<SegmentedLog>,
    pub(crate) store: Arc<BtreeStore>,
    pub(crate) bloom: Arc<RwLock<BloomFilter>>,
    pub(crate) flush_signal: Arc<FlushSignal>,
    pub(crate) ops_flushed: Arc<AtomicU64>,
    pub(crate) is_shutting_down: Arc<AtomicBool>,
}

/**
The flush worker manages the thread that performs flush actions.

The worker uses a channel to communicate new tasks to the background thread so that the same
thread is reused as opposed to continually spawning new threads.
*/
pub(crate) struct FlushWorker {
    /// The join handle of the background flush thread, used for graceful shutdown.
    maybe_background_flush_handle: Option<JoinHandle<()>>,

    /// Sender end of the channel that the worker utilizes to schedule tasks.
    task_sender: mpsc::Sender<TaskKind>,
}

/// Crate-only methods
impl FlushWorker {
    /// Create a new instance of [`FlushWorker`].
    pub(crate) fn new(context: FlushContext) -> std::io::Result<Self> {
        let (task_sender, receiver) = mpsc::channel();

        log::info!("starting up the background flush thread");
        let background_thread_handle = thread::Builder::new()
            .name(FLUSH_THREAD_NAME.to_string())
            .spawn(move || loop {
                let task = match receiver.recv() {
                    Ok(task) => task,
                    Err(_) => break,
                };

                match task {
                    TaskKind::Flush => FlushWorker::drain_sealed(&context),
                    TaskKind::Terminate => {
                        log::info!(
                            "flush thread received the termination command. Shutting down \
                            the thread."
                        );
                        break;
                    }
                }
            })?;

        Ok(Self {
            maybe_background_flush_handle: Some(background_thread_handle),
            task_sender,
        })
    }

    /// Schedule a task on the background thread.
    pub(crate) fn schedule_task(&self, task_kind: TaskKind) {
        if self.task_sender.send(task_kind).is_err() {
            log::warn!("the flush thread is gone; dropping the scheduled task");
        }
    }

    /// Stop the background thread and wait for it to exit.
    pub(crate) fn shutdown(&mut self) {
        if let Some(handle) = self.maybe_background_flush_handle.take() {
            self.schedule_task(TaskKind::Terminate);
            if handle.join().is_err() {
                log::error!("the flush thread panicked during shutdown");
            }
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Private methods
impl FlushWorker {
    /// Drain the sealed backlog, oldest table first, until it is empty.
    fn drain_sealed(context: &FlushContext) {
        loop {
            let oldest = { context.tables.read().sealed.first().cloned() };
            let table = match oldest {
                Some(table) => table,
                None => break,
            };

            match FlushWorker::flush_table(context, &table) {
                Ok(applied) => {
                    {
                        let mut tier = context.tables.write();
                        if !tier.sealed.is_empty() {
                            tier.sealed.remove(0);
                        }
                    }
                    context.ops_flushed.fetch_add(applied, Ordering::Release);
                    context.flush_signal.notify_all();
                    log::debug!("flushed a sealed memtable with {applied} operations");
                }
                Err(err) => {
                    log::error!("flushing a sealed memtable failed and will be retried: {err}");
                    if context.is_shutting_down.load(Ordering::Acquire) {
                        // Give up during shutdown. Everything in the backlog is still in
                        // the WAL and replays on the next open.
                        break;
                    }
                    thread::sleep(FLUSH_RETRY_PAUSE);
                }
            }
        }
    }

    /// Apply one sealed memtable to the store in a single atomic commit.
    fn flush_table(context: &FlushContext, table: &MemTable) -> StorageResult<u64> {
        let mutations = FlushWorker::build_mutations(context, table)?;
        let checkpoint = WalCheckpoint {
            record_index: table.max_index(),
            offset: table.max_offset(),
        };
        let bloom_snapshot = context.bloom.read().to_bytes();

        context.store.apply_flush(&FlushPlan {
            mutations,
            checkpoint,
            bloom_snapshot,
        })?;

        Ok(table.op_count() as u64)
    }

    /**
    Resolve a sealed memtable into store mutations.

    All WAL reads happen here, before the store transaction opens, so the transaction itself
    touches nothing but the store.
    */
    fn build_mutations(
        context: &FlushContext,
        table: &MemTable,
    ) -> StorageResult<Vec<StoreMutation>> {
        let mut mutations: Vec<StoreMutation> = vec![];

        for (key, entry) in table.entries() {
            match entry.op {
                LogOperation::Insert if entry.entry_kind == EntryKind::Chunked => {
                    let commit = read_verified_record(&context.wal, entry.offset)?;
                    let (chunks, checksum) = resolve_chunks(&context.wal, &commit)?;
                    mutations.push(StoreMutation::PutChunks {
                        key: key.clone(),
                        chunks,
                        checksum,
                    });
                }
                LogOperation::Insert => {
                    let record = read_verified_record(&context.wal, entry.offset)?;
                    mutations.push(StoreMutation::PutValue {
                        key: key.clone(),
                        value: record.value,
                    });
                }
                LogOperation::Delete => {
                    mutations.push(StoreMutation::Delete { key: key.clone() });
                }
                other => {
                    log::warn!("skipping a memtable entry with unexpected operation {other:?}");
                }
            }
        }

        for (row_key, deltas) in table.rows() {
            let row_mutations_start = mutations.len();

            for delta in deltas {
                match delta.op {
                    LogOperation::Insert => {
                        let record = read_verified_record(&context.wal, delta.offset)?;
                        mutations.push(StoreMutation::UpsertColumns {
                            row_key: row_key.clone(),
                            entries: decode_column_entries(&record.value)?,
                        });
                    }
                    LogOperation::Delete => {
                        let record = read_verified_record(&context.wal, delta.offset)?;
                        let names = decode_column_entries(&record.value)?
                            .into_iter()
                            .map(|(name, _)| name)
                            .collect();
                        mutations.push(StoreMutation::RemoveColumns {
                            row_key: row_key.clone(),
                            names,
                        });
                    }
                    LogOperation::DeleteRow => {
                        // The tombstone supersedes every earlier delta of this row, both in
                        // this plan and in the store
                        mutations.truncate(row_mutations_start);
                        mutations.push(StoreMutation::RemoveRow {
                            existing_columns: context.store.row_column_keys(row_key)?,
                        });
                    }
                    other => {
                        log::warn!("skipping a row delta with unexpected operation {other:?}");
                    }
                }
            }
        }

        Ok(mutations)
    }
}

/// Read the record at `offset` and verify its value checksum.
fn read_verified_record(wal: &SegmentedLog, offset: Offset) -> StorageResult<WalRecord> {
    let (frame, _) = wal.read_at(offset)?;
    let record = WalRecord::decode(&frame)?;
    if !record.verify_checksum() {
        return Err(StorageError::RecordCorrupted);
    }

    Ok(record)
}

/**
Walk a commit record's transaction chain and return the chunk values in order, verifying the
reassembled bytes against the committed rolling checksum.
*/
fn resolve_chunks(
    wal: &SegmentedLog,
    commit: &WalRecord,
) -> StorageResult<(Vec<Vec<u8>>, u32)> {
    let chain = wal.read_chain(commit.prev_txn_offset)?;
    if chain.is_empty() {
        return Err(StorageError::RecordCorrupted);
    }

    let committed_checksum = decode_rolling_checksum(&commit.value);
    let mut digest = CRC_CALCULATOR.digest();
    let mut chunks: Vec<Vec<u8>> = Vec::with_capacity(chain.len() - 1);
    // The first chain element is the begin marker and carries no data
    for record in &chain[1..] {
        digest.update(&record.value);
        chunks.push(record.value.clone());
    }

    if digest.finalize() != committed_checksum {
        return Err(StorageError::RecordCorrupted);
    }

    Ok((chunks, committed_checksum))
}
