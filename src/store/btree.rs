/*!
The embedded B-tree store implementation on top of `sled`.

Value framing follows the fixed persistent format: the first byte of a stored value is
`0x00` for a whole value or `0x01` for a chunked one. A chunked value's payload is a 9-byte
header (flag, u32 little-endian chunk count, u32 little-endian CRC32) with the chunks
themselves under `"{key}_chunk_{i}"` child keys.
*/

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use integer_encoding::FixedInt;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;

use crate::bloom::BloomFilter;
use crate::config::{
    BLOOM_FILTER_KEY, CHUNKED_VALUE_FLAG, CHUNKED_VALUE_HEADER_LENGTH_BYTES, FULL_VALUE_FLAG,
    ROW_COLUMN_SEPARATOR, SYS_TREE_NAME, WAL_CHECKPOINT_KEY,
};
use crate::errors::{StorageError, StorageResult};
use crate::wal::record::CRC_CALCULATOR;

use super::{
    chunk_child_key, row_column_key, unwrap_transaction, CountingWriter, FlushPlan, StoreMutation,
    WalCheckpoint,
};

/// The namespaced embedded B-tree store.
pub(crate) struct BtreeStore {
    db: sled::Db,
    data: sled::Tree,
    meta: sled::Tree,
    no_sync: bool,
}

/// Crate-only methods
impl BtreeStore {
    /// Open (or create) the store at `path` with a data tree named after the namespace.
    pub(crate) fn open(path: &Path, namespace: &str, no_sync: bool) -> StorageResult<Self> {
        let db = sled::Config::default().path(path).open()?;
        let data = db
            .open_tree(namespace.as_bytes())
            .map_err(|_| StorageError::BucketNotFound)?;
        let meta = db
            .open_tree(SYS_TREE_NAME.as_bytes())
            .map_err(|_| StorageError::BucketNotFound)?;

        Ok(Self {
            db,
            data,
            meta,
            no_sync,
        })
    }

    /**
    Retrieve the value associated with a key.

    Chunked values are reassembled from their children and verified against the stored
    checksum before being returned.
    */
    pub(crate) fn get(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        let stored = self.data.get(key)?.ok_or(StorageError::KeyNotFound)?;
        if stored.is_empty() {
            return Err(StorageError::InvalidDataFormat);
        }

        match stored[0] {
            FULL_VALUE_FLAG => Ok(stored[1..].to_vec()),
            CHUNKED_VALUE_FLAG => {
                if stored.len() < CHUNKED_VALUE_HEADER_LENGTH_BYTES {
                    return Err(StorageError::InvalidChunkMetadata);
                }

                let chunk_count = u32::decode_fixed(&stored[1..5]);
                let stored_checksum = u32::decode_fixed(&stored[5..9]);

                let mut digest = CRC_CALCULATOR.digest();
                let mut full_value: Vec<u8> = vec![];
                for index in 0..chunk_count {
                    let child_key = chunk_child_key(key, index);
                    let chunk = self.data.get(&child_key)?.ok_or_else(|| {
                        StorageError::Store(format!("chunk {index} missing for a chunked value"))
                    })?;
                    digest.update(&chunk);
                    full_value.extend_from_slice(&chunk);
                }

                if digest.finalize() != stored_checksum {
                    return Err(StorageError::RecordCorrupted);
                }

                Ok(full_value)
            }
            _ => Err(StorageError::InvalidDataFormat),
        }
    }

    /**
    Retrieve the columns of a row, filtered by `predicate` inside the driver so filtered
    columns never leave the store layer. Returns [`StorageError::KeyNotFound`] when the scan
    matches nothing.
    */
    pub(crate) fn get_row_columns(
        &self,
        row_key: &[u8],
        predicate: Option<&dyn Fn(&[u8]) -> bool>,
    ) -> StorageResult<HashMap<Vec<u8>, Vec<u8>>> {
        let mut prefix = row_key.to_vec();
        prefix.push(ROW_COLUMN_SEPARATOR);

        let mut columns = HashMap::new();
        for pair in self.data.scan_prefix(&prefix) {
            let (key, value) = pair?;
            let name = key[prefix.len()..].to_vec();
            if predicate.map_or(true, |keep| keep(&name)) {
                columns.insert(name, value.to_vec());
            }
        }

        if columns.is_empty() {
            return Err(StorageError::KeyNotFound);
        }

        Ok(columns)
    }

    /// Collect the full store keys of every column of a row.
    pub(crate) fn row_column_keys(&self, row_key: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        let mut prefix = row_key.to_vec();
        prefix.push(ROW_COLUMN_SEPARATOR);

        let mut keys = vec![];
        for pair in self.data.scan_prefix(&prefix) {
            let (key, _) = pair?;
            keys.push(key.to_vec());
        }

        Ok(keys)
    }

    /// Load the WAL checkpoint, defaulting to the zero checkpoint on a fresh store.
    pub(crate) fn load_checkpoint(&self) -> StorageResult<WalCheckpoint> {
        match self.meta.get(WAL_CHECKPOINT_KEY)? {
            Some(bytes) => Ok(WalCheckpoint::decode(&bytes)),
            None => Ok(WalCheckpoint::default()),
        }
    }

    /// Load the persisted Bloom filter snapshot, if a parseable one exists.
    pub(crate) fn load_bloom_snapshot(&self) -> StorageResult<Option<BloomFilter>> {
        match self.meta.get(BLOOM_FILTER_KEY)? {
            Some(bytes) => Ok(BloomFilter::from_bytes(&bytes)),
            None => Ok(None),
        }
    }

    /// Persist the Bloom filter snapshot outside of a flush (used on close).
    pub(crate) fn store_bloom_snapshot(&self, snapshot: &[u8]) -> StorageResult<()> {
        self.meta.insert(BLOOM_FILTER_KEY, snapshot)?;

        Ok(())
    }

    /**
    Rebuild the Bloom filter from the live key set.

    Row column keys contribute their row key, so row lookups keep their fast negative path
    after a restart that lost the persisted snapshot.
    */
    pub(crate) fn rebuild_bloom(&self, filter: &mut BloomFilter) -> StorageResult<()> {
        for pair in self.data.iter() {
            let (key, _) = pair?;
            filter.insert(&key);
            if let Some(separator) = key.iter().position(|byte| *byte == ROW_COLUMN_SEPARATOR) {
                filter.insert(&key[..separator]);
            }
        }

        Ok(())
    }

    /**
    Commit the effects of one sealed memtable.

    The data mutations, the checkpoint advance, and the Bloom snapshot land in a single
    atomic transaction across both trees. Recovery depends on this: a checkpoint must never
    be visible without the data it claims is durable.
    */
    pub(crate) fn apply_flush(&self, plan: &FlushPlan) -> StorageResult<()> {
        let checkpoint_bytes = plan.checkpoint.encode();

        let result = (&self.data, &self.meta).transaction(|(data, meta)| {
            for mutation in &plan.mutations {
                match mutation {
                    StoreMutation::PutValue { key, value } => {
                        remove_stale_chunks(data, key)?;
                        let mut framed = Vec::with_capacity(value.len() + 1);
                        framed.push(FULL_VALUE_FLAG);
                        framed.extend_from_slice(value);
                        data.insert(key.as_slice(), framed)?;
                    }
                    StoreMutation::PutChunks {
                        key,
                        chunks,
                        checksum,
                    } => {
                        remove_stale_chunks(data, key)?;
                        let mut header = Vec::with_capacity(CHUNKED_VALUE_HEADER_LENGTH_BYTES);
                        header.push(CHUNKED_VALUE_FLAG);
                        header.extend_from_slice(&u32::encode_fixed_vec(chunks.len() as u32));
                        header.extend_from_slice(&u32::encode_fixed_vec(*checksum));
                        data.insert(key.as_slice(), header)?;

                        for (index, chunk) in chunks.iter().enumerate() {
                            data.insert(
                                chunk_child_key(key, index as u32).as_slice(),
                                chunk.clone(),
                            )?;
                        }
                    }
                    StoreMutation::Delete { key } => {
                        remove_stale_chunks(data, key)?;
                        data.remove(key.as_slice())?;
                    }
                    StoreMutation::UpsertColumns { row_key, entries } => {
                        for (name, value) in entries {
                            data.insert(
                                row_column_key(row_key, name).as_slice(),
                                value.clone(),
                            )?;
                        }
                    }
                    StoreMutation::RemoveColumns { row_key, names } => {
                        for name in names {
                            data.remove(row_column_key(row_key, name).as_slice())?;
                        }
                    }
                    StoreMutation::RemoveRow { existing_columns } => {
                        for column_key in existing_columns {
                            data.remove(column_key.as_slice())?;
                        }
                    }
                }
            }

            meta.insert(WAL_CHECKPOINT_KEY, checkpoint_bytes.clone())?;
            meta.insert(BLOOM_FILTER_KEY, plan.bloom_snapshot.clone())?;

            Ok::<(), ConflictableTransactionError<StorageError>>(())
        });
        unwrap_transaction(result)?;

        if !self.no_sync {
            self.db.flush()?;
        }

        Ok(())
    }

    /**
    Stream a consistent view of the namespace tree into `writer` as a sequence of
    length-prefixed key/value pairs. Returns the number of bytes written.
    */
    pub(crate) fn snapshot(&self, writer: &mut dyn Write) -> StorageResult<u64> {
        let mut counting = CountingWriter::new(writer);

        for pair in self.data.iter() {
            let (key, value) = pair?;
            counting.write_all(&u32::encode_fixed_vec(key.len() as u32))?;
            counting.write_all(&key)?;
            counting.write_all(&u32::encode_fixed_vec(value.len() as u32))?;
            counting.write_all(&value)?;
        }
        counting.flush()?;

        Ok(counting.count())
    }

    /// Block until all dirty pages have reached disk.
    pub(crate) fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;

        Ok(())
    }
}

/**
Remove the chunk children of the value currently stored at `key`, if that value is chunked.
Stale children would otherwise leak when a chunked value is overwritten or deleted.
*/
fn remove_stale_chunks(
    data: &TransactionalTree,
    key: &[u8],
) -> Result<(), ConflictableTransactionError<StorageError>> {
    if let Some(stored) = data.get(key)? {
        if !stored.is_empty() && stored[0] == CHUNKED_VALUE_FLAG {
            if stored.len() < CHUNKED_VALUE_HEADER_LENGTH_BYTES {
                return Err(ConflictableTransactionError::Abort(
                    StorageError::InvalidChunkMetadata,
                ));
            }

            let chunk_count = u32::decode_fixed(&stored[1..5]);
            for index in 0..chunk_count {
                data.remove(chunk_child_key(key, index).as_slice())?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::wal::offset::Offset;

    fn plan(mutations: Vec<StoreMutation>) -> FlushPlan {
        FlushPlan {
            mutations,
            checkpoint: WalCheckpoint {
                record_index: 1,
                offset: Some(Offset::new(1, 0, 0)),
            },
            bloom_snapshot: BloomFilter::new(16, 0.01).to_bytes(),
        }
    }

    fn open_store(dir: &TempDir) -> BtreeStore {
        BtreeStore::open(&dir.path().join("store.db"), "test_ns", false).unwrap()
    }

    #[test]
    fn full_values_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .apply_flush(&plan(vec![StoreMutation::PutValue {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            }]))
            .unwrap();

        assert_eq!(store.get(b"k").unwrap(), b"v");
        assert!(matches!(
            store.get(b"absent"),
            Err(StorageError::KeyNotFound)
        ));
        assert_eq!(store.load_checkpoint().unwrap().record_index, 1);
    }

    #[test]
    fn chunked_values_reassemble_and_verify() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let chunks = vec![b"hello ".to_vec(), b"chunked ".to_vec(), b"world".to_vec()];
        let checksum = CRC_CALCULATOR.checksum(b"hello chunked world");
        store
            .apply_flush(&plan(vec![StoreMutation::PutChunks {
                key: b"big".to_vec(),
                chunks,
                checksum,
            }]))
            .unwrap();

        assert_eq!(store.get(b"big").unwrap(), b"hello chunked world");

        // Deleting cascades over the children
        store
            .apply_flush(&plan(vec![StoreMutation::Delete {
                key: b"big".to_vec(),
            }]))
            .unwrap();
        assert!(matches!(store.get(b"big"), Err(StorageError::KeyNotFound)));
        assert!(matches!(
            store.get(b"big_chunk_0"),
            Err(StorageError::KeyNotFound)
        ));
    }

    #[test]
    fn deleting_an_absent_key_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .apply_flush(&plan(vec![StoreMutation::Delete {
                key: b"never existed".to_vec(),
            }]))
            .unwrap();
    }

    #[test]
    fn row_columns_scan_with_predicate_pushdown() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .apply_flush(&plan(vec![StoreMutation::UpsertColumns {
                row_key: b"user:1".to_vec(),
                entries: vec![
                    (b"name".to_vec(), b"trillian".to_vec()),
                    (b"ship".to_vec(), b"heart of gold".to_vec()),
                ],
            }]))
            .unwrap();

        let all = store.get_row_columns(b"user:1", None).unwrap();
        assert_eq!(all.len(), 2);

        let keep_name = |column: &[u8]| column == b"name";
        let filtered = store
            .get_row_columns(b"user:1", Some(&keep_name))
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[b"name".as_slice()], b"trillian".to_vec());

        let keys = store.row_column_keys(b"user:1").unwrap();
        assert_eq!(keys.len(), 2);
        store
            .apply_flush(&plan(vec![StoreMutation::RemoveRow {
                existing_columns: keys,
            }]))
            .unwrap();
        assert!(matches!(
            store.get_row_columns(b"user:1", None),
            Err(StorageError::KeyNotFound)
        ));
    }

    #[test]
    fn snapshot_streams_every_pair() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .apply_flush(&plan(vec![StoreMutation::PutValue {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            }]))
            .unwrap();

        let mut sink: Vec<u8> = vec![];
        let written = store.snapshot(&mut sink).unwrap();
        assert_eq!(written as usize, sink.len());
        assert!(written > 0);
    }
}
