/*!
The database module contains the primary API for interacting with the engine.

One [`Engine`] owns one namespace directory: its lock file, its segmented write-ahead log,
and its persistent store. Every mutation is appended to the WAL first, indexed by the
in-memory tier second, and becomes durable in the store when the background flusher drains
the sealed memtable it landed in. Reads consult the Bloom filter, then the memtable tier,
then the store.

WAL append order is the linearization order of writes: appends happen under an exclusive
write mutex, and a read acquires the table lock only after a finished writer has released
it, so single-key read-after-write always observes the written value.
*/

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};

use crate::batch::{decode_rolling_checksum, ChunkBatch};
use crate::bloom::BloomFilter;
use crate::config::BLOOM_EXPECTED_KEYS;
use crate::errors::{StorageError, StorageResult};
use crate::file_names::FileNameHandler;
use crate::flusher::{FlushContext, FlushSignal, FlushWorker, TaskKind};
use crate::memtable::{MemTable, MemTableTier, RowDelta, TableEntry};
use crate::notifier::{AppendSignal, CancelToken};
use crate::options::StorageOptions;
use crate::recovery;
use crate::rows::{decode_column_entries, encode_column_entries};
use crate::store::{BtreeStore, WalCheckpoint};
use crate::wal::log::SegmentedLog;
use crate::wal::offset::Offset;
use crate::wal::reader::Reader;
use crate::wal::record::{EntryKind, LogOperation, ValueKind, WalRecord, CRC_CALCULATOR};

/// How long `close` waits for the flusher to drain before giving up and leaving the rest to
/// WAL replay on the next open.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Serialized state owned by the write path.
struct WriteHead {
    /// The index handed to the most recent record.
    last_index: u64,
}

impl WriteHead {
    /// Claim the next record index.
    fn next_index(&mut self) -> u64 {
        self.last_index += 1;
        self.last_index
    }
}

/**
An exclusive lock on a namespace directory.

The underlying lock is released when the handle is dropped.
*/
struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Acquire the lock, failing fast if any other process (or engine) holds it.
    fn acquire(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::DatabaseDirInUse)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Err(unlock_error) = self.file.unlock() {
            log::error!(
                "there was an error releasing the lock file at {path:?} during shutdown. \
                Error: {unlock_error}",
                path = self.path
            );
        }
    }
}

/// A per-namespace storage engine handle. Safe to share across threads.
pub struct Engine {
    /// The namespace this engine serves.
    namespace: String,

    options: StorageOptions,

    /// The segmented write-ahead log.
    wal: Arc<SegmentedLog>,

    /// The persistent B-tree store. Taken by `close` so the store's own file lock releases
    /// together with the directory lock.
    store: RwLock<Option<Arc<BtreeStore>>>,

    /// The active memtable plus the sealed backlog.
    tables: Arc<RwLock<MemTableTier>>,

    /// The engine-wide Bloom filter.
    bloom: Arc<RwLock<BloomFilter>>,

    /// Exclusive writer state. Held across WAL append, memtable apply, and rotation.
    write_head: Mutex<WriteHead>,

    /// The offset of the newest appended record.
    current_offset: RwLock<Option<Offset>>,

    /// Broadcast target for `wait_for_append`.
    append_signal: Arc<AppendSignal>,

    /// Broadcast target for backlog-shrink events.
    flush_signal: Arc<FlushSignal>,

    /// The background flush worker.
    worker: Mutex<FlushWorker>,

    /// Set once by `close`; all public operations fail afterwards.
    is_shutting_down: Arc<AtomicBool>,

    /// Total mutations accepted by this engine, including recovered ones.
    ops_received: AtomicU64,

    /// Total mutations applied to the persistent store.
    ops_flushed: Arc<AtomicU64>,

    /// The number of WAL records replayed at open.
    recovered_entries: usize,

    /// Held for the lifetime of the engine; taken and dropped by `close`.
    directory_lock: Mutex<Option<DirectoryLock>>,
}

/// Public methods
impl Engine {
    /**
    Open (or create) the engine for `namespace` under `base_dir`.

    Opening acquires the directory lock, loads the checkpoint and Bloom snapshot from the
    store, replays the WAL from the checkpoint into a fresh memtable tier, and starts the
    background flusher. A namespace already opened by any process fails with
    [`StorageError::DatabaseDirInUse`].
    */
    pub fn open(
        base_dir: &Path,
        namespace: &str,
        options: StorageOptions,
    ) -> StorageResult<Engine> {
        log::info!("opening namespace {namespace:?} under {base_dir:?} with {options:?}");

        let file_names = FileNameHandler::new(base_dir, namespace);
        fs::create_dir_all(file_names.namespace_path())?;
        let directory_lock = DirectoryLock::acquire(&file_names.lock_file_path())?;

        let store = Arc::new(BtreeStore::open(
            &file_names.store_path(),
            namespace,
            options.no_sync,
        )?);
        let checkpoint = store.load_checkpoint()?;

        let mut bloom = match store.load_bloom_snapshot()? {
            Some(snapshot) => snapshot,
            None => {
                let mut filter =
                    BloomFilter::new(BLOOM_EXPECTED_KEYS, options.bloom_false_positive);
                store.rebuild_bloom(&mut filter)?;
                filter
            }
        };

        let wal = Arc::new(SegmentedLog::open(
            &file_names.wal_dir(),
            options.wal_segment_size,
            options.wal_sync_on_write,
        )?);

        let mut tier = MemTableTier::new();
        let outcome = recovery::replay_wal(&wal, &checkpoint, &mut tier, &mut bloom, &options)?;
        let has_backlog = !tier.sealed.is_empty();

        let tables = Arc::new(RwLock::new(tier));
        let bloom = Arc::new(RwLock::new(bloom));
        let flush_signal = Arc::new(FlushSignal::new());
        let ops_flushed = Arc::new(AtomicU64::new(0));
        let is_shutting_down = Arc::new(AtomicBool::new(false));

        let worker = FlushWorker::new(FlushContext {
            tables: Arc::clone(&tables),
            wal: Arc::clone(&wal),
            store: Arc::clone(&store),
            bloom: Arc::clone(&bloom),
            flush_signal: Arc::clone(&flush_signal),
            ops_flushed: Arc::clone(&ops_flushed),
            is_shutting_down: Arc::clone(&is_shutting_down),
        })?;
        if has_backlog {
            worker.schedule_task(TaskKind::Flush);
        }

        Ok(Engine {
            namespace: namespace.to_string(),
            options,
            wal,
            store: RwLock::new(Some(store)),
            tables,
            bloom,
            write_head: Mutex::new(WriteHead {
                last_index: outcome.max_index,
            }),
            current_offset: RwLock::new(outcome.last_offset),
            append_signal: Arc::new(AppendSignal::new()),
            flush_signal,
            worker: Mutex::new(worker),
            is_shutting_down,
            ops_received: AtomicU64::new(checkpoint.record_index + outcome.replayed as u64),
            ops_flushed,
            recovered_entries: outcome.replayed,
            directory_lock: Mutex::new(Some(directory_lock)),
        })
    }

    /// Insert a key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;

        if value.len() > self.options.chunk_threshold {
            return self.persist_chunked(key, value);
        }

        self.persist_key_value(key, value, LogOperation::Insert)
    }

    /// Remove a key. Removing an absent key is accepted and recorded as a tombstone.
    pub fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;

        self.persist_key_value(key, &[], LogOperation::Delete)
    }

    /**
    Retrieve the value associated with the given key.

    The read consults the Bloom filter, the active memtable, sealed memtables newest first,
    and finally the persistent store. Chunked values are reassembled from their WAL chain
    and verified against the committed checksum.
    */
    pub fn get(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;

        let found = {
            let tier = self.tables.read();
            if !self.bloom.read().may_contain(key) {
                return Err(StorageError::KeyNotFound);
            }
            tier.lookup(key)
        };

        let entry = match found {
            // No live memtable knows the key; the store is authoritative
            None => return self.store_handle()?.get(key),
            Some(entry) => entry,
        };

        if entry.op == LogOperation::Delete {
            return Err(StorageError::KeyNotFound);
        }

        let record = self.read_verified_record(entry.offset)?;
        if entry.entry_kind == EntryKind::Chunked {
            return self.reconstruct_chunked_value(&record);
        }

        Ok(record.value)
    }

    /**
    Insert or update the provided column entries of a row.

    This is an upsert: existing columns are overwritten, new columns are created, columns
    not mentioned are untouched.
    */
    pub fn set_columns_in_row(
        &self,
        row_key: &[u8],
        column_entries: &HashMap<Vec<u8>, Vec<u8>>,
    ) -> StorageResult<()> {
        self.ensure_open()?;

        let entries: Vec<(Vec<u8>, Vec<u8>)> = column_entries
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        self.persist_row_delta(row_key, &entries, LogOperation::Insert)
    }

    /// Remove the named columns from the given row.
    pub fn delete_columns_from_row(
        &self,
        row_key: &[u8],
        column_names: &[Vec<u8>],
    ) -> StorageResult<()> {
        self.ensure_open()?;

        let entries: Vec<(Vec<u8>, Vec<u8>)> = column_names
            .iter()
            .map(|name| (name.clone(), vec![]))
            .collect();

        self.persist_row_delta(row_key, &entries, LogOperation::Delete)
    }

    /// Remove an entire row and all of its column entries.
    pub fn delete_row(&self, row_key: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;

        self.persist_row_delta(row_key, &[], LogOperation::DeleteRow)
    }

    /**
    Materialize the columns of a row.

    The result folds the store's column map with every memtable delta, oldest first: upserts
    overwrite, column removals drop, and a row tombstone resets the accumulator. When a
    `predicate` is provided it is applied both inside the store driver and again after the
    fold; it must answer consistently for a given column name for the duration of the call.
    */
    pub fn get_row_columns(
        &self,
        row_key: &[u8],
        predicate: Option<&dyn Fn(&[u8]) -> bool>,
    ) -> StorageResult<HashMap<Vec<u8>, Vec<u8>>> {
        self.ensure_open()?;

        let deltas = {
            let tier = self.tables.read();
            if !self.bloom.read().may_contain(row_key) {
                return Err(StorageError::KeyNotFound);
            }
            tier.row_delta_history(row_key)
        };

        if deltas
            .last()
            .map_or(false, |delta| delta.op == LogOperation::DeleteRow)
        {
            return Err(StorageError::KeyNotFound);
        }

        let mut columns = match self.store_handle()?.get_row_columns(row_key, predicate) {
            Ok(columns) => columns,
            Err(StorageError::KeyNotFound) => HashMap::new(),
            Err(err) => return Err(err),
        };

        for delta in &deltas {
            let record = self.read_verified_record(delta.offset)?;
            match delta.op {
                LogOperation::Insert => {
                    for (name, value) in decode_column_entries(&record.value)? {
                        columns.insert(name, value);
                    }
                }
                LogOperation::Delete => {
                    for (name, _) in decode_column_entries(&record.value)? {
                        columns.remove(&name);
                    }
                }
                LogOperation::DeleteRow => columns.clear(),
                _ => {}
            }
        }

        if let Some(keep) = predicate {
            columns.retain(|name, _| keep(name));
        }

        if columns.is_empty() && deltas.is_empty() {
            return Err(StorageError::KeyNotFound);
        }

        Ok(columns)
    }

    /**
    Block until a record newer than `last_seen` exists.

    Returns immediately when the engine's current offset already exceeds `last_seen` (or
    when `last_seen` is [`None`] and anything has ever been appended). Otherwise the call
    sleeps until an append broadcast, the `timeout` deadline
    ([`StorageError::WaitTimeoutExceeded`]), cancellation through `cancel`
    ([`StorageError::Cancelled`]), or engine shutdown ([`StorageError::InCloseProcess`]).
    */
    pub fn wait_for_append(
        &self,
        timeout: Duration,
        last_seen: Option<Offset>,
        cancel: Option<&CancelToken>,
    ) -> StorageResult<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_shutting_down.load(Ordering::Acquire) {
                return Err(StorageError::InCloseProcess);
            }
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }
            }
            if self.offset_advanced(last_seen) {
                return Ok(());
            }

            let mut guard = self.append_signal.mutex.lock();
            // Re-check under the signal lock so a broadcast racing the checks above cannot
            // be lost
            if self.offset_advanced(last_seen) {
                return Ok(());
            }

            if self
                .append_signal
                .condvar
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                drop(guard);
                if self.offset_advanced(last_seen) {
                    return Ok(());
                }
                return Err(StorageError::WaitTimeoutExceeded);
            }
        }
    }

    /// Create a cancellation token usable with [`Engine::wait_for_append`].
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new(Arc::clone(&self.append_signal))
    }

    /// Return a reader that streams records from the oldest retained segment to the tail.
    pub fn new_reader(&self) -> StorageResult<Reader> {
        self.ensure_open()?;

        Ok(Reader::new(Arc::clone(&self.wal), self.wal.start_offset()))
    }

    /**
    Return a reader that streams records from `start` (inclusive) to the tail.

    `start` must not exceed the engine's current offset, and an engine that has never
    appended has no valid starting point; both cases fail with
    [`StorageError::InvalidOffset`].
    */
    pub fn new_reader_with_start(&self, start: Offset) -> StorageResult<Reader> {
        self.ensure_open()?;

        match *self.current_offset.read() {
            None => Err(StorageError::InvalidOffset),
            Some(current) if start > current => Err(StorageError::InvalidOffset),
            Some(_) => Ok(Reader::new(Arc::clone(&self.wal), start)),
        }
    }

    /**
    Stream a snapshot of the persistent store into `writer` and return the bytes written.

    Writes are not quiesced: the snapshot reflects the store at or before the call returns.
    Sealed memtables that have not flushed yet are absent by design, since the WAL plus any
    earlier store snapshot reconstructs the engine.
    */
    pub fn btree_snapshot(&self, writer: &mut dyn Write) -> StorageResult<u64> {
        self.ensure_open()?;
        log::info!("streaming a btree snapshot for namespace {}", self.namespace);

        self.store_handle()?.snapshot(writer)
    }

    /// The last checkpoint committed to the store's metadata tree.
    pub fn wal_checkpoint(&self) -> StorageResult<WalCheckpoint> {
        self.store_handle()?.load_checkpoint()
    }

    /// The namespace this engine serves.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Total mutations accepted by this engine, including operations recovered at open.
    pub fn ops_received_count(&self) -> u64 {
        self.ops_received.load(Ordering::Acquire)
    }

    /// Total mutations this engine instance has applied to the persistent store.
    pub fn ops_flushed_count(&self) -> u64 {
        self.ops_flushed.load(Ordering::Acquire)
    }

    /// The offset of the newest appended record, if any record exists.
    pub fn current_offset(&self) -> Option<Offset> {
        *self.current_offset.read()
    }

    /// The number of WAL records replayed when this engine instance opened.
    pub fn recovered_wal_count(&self) -> usize {
        self.recovered_entries
    }

    /**
    Shut the engine down.

    Public operations start failing with [`StorageError::InCloseProcess`] immediately;
    waiters are woken once. The active memtable is sealed, the flusher drains the backlog,
    the WAL is synced, and the directory lock is released. Calling `close` a second time
    fails with [`StorageError::InCloseProcess`].
    */
    pub fn close(&self) -> StorageResult<()> {
        if self.is_shutting_down.swap(true, Ordering::AcqRel) {
            return Err(StorageError::InCloseProcess);
        }

        log::info!(
            "closing namespace {namespace} (ops received: {received}, ops flushed: {flushed})",
            namespace = self.namespace,
            received = self.ops_received.load(Ordering::Acquire),
            flushed = self.ops_flushed.load(Ordering::Acquire),
        );

        // Wake every waiter so none outlives the engine
        self.append_signal.broadcast();

        {
            // Waits out any in-flight writer, then seals whatever it left behind
            let _head = self.write_head.lock();
            let mut tier = self.tables.write();
            if !tier.active.is_empty() {
                let sealed = std::mem::replace(&mut tier.active, MemTable::new());
                tier.sealed.push(Arc::new(sealed));
            }
        }
        self.worker.lock().schedule_task(TaskKind::Flush);

        let drain_deadline = Instant::now() + CLOSE_DRAIN_TIMEOUT;
        loop {
            if self.tables.read().sealed.is_empty() {
                break;
            }
            let mut guard = self.flush_signal.mutex.lock();
            if self.tables.read().sealed.is_empty() {
                break;
            }
            if self
                .flush_signal
                .condvar
                .wait_until(&mut guard, drain_deadline)
                .timed_out()
            {
                log::warn!(
                    "timed out waiting for the flusher to drain; the WAL retains the \
                    backlog and replay will finish the job on the next open"
                );
                break;
            }
        }

        self.worker.lock().shutdown();
        self.wal.sync()?;
        if let Some(store) = self.store.read().as_ref() {
            store.store_bloom_snapshot(&self.bloom.read().to_bytes())?;
            store.flush()?;
        }

        // Releasing the handles drops the store's lock and the flock, making the
        // directory claimable again
        self.store.write().take();
        self.directory_lock.lock().take();

        Ok(())
    }
}

/// Private methods
impl Engine {
    /// Fail fast once shutdown has begun.
    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_shutting_down.load(Ordering::Acquire) {
            return Err(StorageError::InCloseProcess);
        }

        Ok(())
    }

    /// A strong reference to the persistent store, while the engine still owns one.
    fn store_handle(&self) -> StorageResult<Arc<BtreeStore>> {
        self.store
            .read()
            .as_ref()
            .cloned()
            .ok_or(StorageError::InCloseProcess)
    }

    /// Append one key-value record and index it in the memtable tier.
    fn persist_key_value(
        &self,
        key: &[u8],
        value: &[u8],
        op: LogOperation,
    ) -> StorageResult<()> {
        let mut head = self.write_head.lock();
        let index = head.next_index();

        let record = WalRecord::new(
            index,
            op,
            EntryKind::KV,
            ValueKind::Full,
            [0; 16],
            Offset::ZERO,
            key.to_vec(),
            value.to_vec(),
        );
        let offset = self.wal.append(&record.encode())?;

        self.maybe_rotate(key.len())?;
        self.tables.write().active.apply_entry(
            key,
            TableEntry {
                offset,
                op,
                entry_kind: EntryKind::KV,
            },
            index,
        );

        self.finish_append(key, offset);

        Ok(())
    }

    /// Append a whole chunked batch and index its commit record.
    fn persist_chunked(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut head = self.write_head.lock();

        let chunk_size = self.options.chunk_threshold.max(1);
        let mut batch = ChunkBatch::begin(&self.wal, head.next_index(), key)?;
        for chunk in value.chunks(chunk_size) {
            batch.append_chunk(&self.wal, head.next_index(), chunk)?;
        }
        let commit_index = head.next_index();
        let commit_offset = batch.commit(&self.wal, commit_index)?;

        self.maybe_rotate(key.len())?;
        self.tables.write().active.apply_entry(
            key,
            TableEntry {
                offset: commit_offset,
                op: LogOperation::Insert,
                entry_kind: EntryKind::Chunked,
            },
            commit_index,
        );

        self.finish_append(key, commit_offset);

        Ok(())
    }

    /// Append one row delta record and index it in the row's delta log.
    fn persist_row_delta(
        &self,
        row_key: &[u8],
        entries: &[(Vec<u8>, Vec<u8>)],
        op: LogOperation,
    ) -> StorageResult<()> {
        let mut head = self.write_head.lock();
        let index = head.next_index();

        let record = WalRecord::new(
            index,
            op,
            EntryKind::Row,
            ValueKind::Column,
            [0; 16],
            Offset::ZERO,
            row_key.to_vec(),
            encode_column_entries(entries),
        );
        let offset = self.wal.append(&record.encode())?;

        self.maybe_rotate(row_key.len())?;
        self.tables
            .write()
            .active
            .apply_row_delta(row_key, RowDelta { offset, op }, index);

        self.finish_append(row_key, offset);

        Ok(())
    }

    /// The shared tail of every write: filter, offset, counters, broadcast.
    fn finish_append(&self, key: &[u8], offset: Offset) {
        self.bloom.write().insert(key);
        *self.current_offset.write() = Some(offset);
        self.ops_received.fetch_add(1, Ordering::Release);
        self.append_signal.broadcast();
    }

    /**
    Seal the active memtable when the next entry would exceed its budgets.

    Rotation happens while the write mutex is held, so readers observe the memtable vector
    either entirely before or entirely after the swap. When the sealed backlog is at
    capacity the writer blocks here until the flusher retires a table.
    */
    fn maybe_rotate(&self, incoming_key_length: usize) -> StorageResult<()> {
        {
            let tier = self.tables.read();
            if !tier.active.wont_fit(
                incoming_key_length,
                self.options.memtable_max_bytes,
                self.options.memtable_max_entries,
            ) {
                return Ok(());
            }
        }

        loop {
            if self.tables.read().sealed.len() < self.options.sealed_memtable_capacity {
                break;
            }
            let mut guard = self.flush_signal.mutex.lock();
            if self.tables.read().sealed.len() < self.options.sealed_memtable_capacity {
                break;
            }
            self.flush_signal.condvar.wait(&mut guard);
        }

        // Rotation is a durability point regardless of the per-write sync setting
        self.wal.sync()?;

        {
            let mut tier = self.tables.write();
            let sealed = std::mem::replace(&mut tier.active, MemTable::new());
            log::info!(
                "sealed the active memtable ({} ops, ~{} bytes)",
                sealed.op_count(),
                sealed.approximate_size()
            );
            tier.sealed.push(Arc::new(sealed));
        }
        self.worker.lock().schedule_task(TaskKind::Flush);

        Ok(())
    }

    /// Read the record at `offset` and verify its value checksum.
    fn read_verified_record(&self, offset: Offset) -> StorageResult<WalRecord> {
        let (frame, _) = self.wal.read_at(offset)?;
        let record = WalRecord::decode(&frame)?;
        if !record.verify_checksum() {
            return Err(StorageError::RecordCorrupted);
        }

        Ok(record)
    }

    /// Reassemble a chunked value from its commit record's transaction chain.
    fn reconstruct_chunked_value(&self, commit: &WalRecord) -> StorageResult<Vec<u8>> {
        let chain = self.wal.read_chain(commit.prev_txn_offset)?;
        if chain.is_empty() {
            return Err(StorageError::RecordCorrupted);
        }

        let committed_checksum = decode_rolling_checksum(&commit.value);

        let estimated_size = chain[1..].iter().map(|record| record.value.len()).sum();
        let mut full_value: Vec<u8> = Vec::with_capacity(estimated_size);
        let mut digest = CRC_CALCULATOR.digest();
        // The first chain element is the begin marker and carries no data
        for record in &chain[1..] {
            digest.update(&record.value);
            full_value.extend_from_slice(&record.value);
        }

        if digest.finalize() != committed_checksum {
            return Err(StorageError::RecordCorrupted);
        }

        Ok(full_value)
    }

    /// True if the current offset has moved past `last_seen`.
    fn offset_advanced(&self, last_seen: Option<Offset>) -> bool {
        match (*self.current_offset.read(), last_seen) {
            (Some(_), None) => true,
            (Some(current), Some(seen)) => current > seen,
            (None, _) => false,
        }
    }
}
