/*!
The persistent tier of the engine.

The store is an embedded B-tree database holding two trees per namespace: the namespace tree
with user data (plain values, chunked values with their chunk children, and row columns) and
a `sys` tree with engine metadata (the WAL checkpoint and the Bloom filter snapshot).

The flusher is the only writer. It commits the effects of a sealed memtable, the advanced
checkpoint, and the Bloom snapshot in one atomic transaction, which is what lets recovery use
the checkpoint as a trustworthy lower bound for WAL replay.
*/

use std::io::{self, Write};

use integer_encoding::FixedInt;

use crate::errors::{StorageError, StorageResult};
use crate::wal::offset::Offset;

mod btree;
pub(crate) use btree::BtreeStore;

/**
The WAL checkpoint: the log position up to which the persistent store is known to contain
every effect.

# Serialization

The record index encodes as a fixed-width u64, followed by the 12-byte offset encoding when
an offset is present. A store that has never flushed holds only the 8-byte form.
*/
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WalCheckpoint {
    /// The index of the last record whose effects are durable in the store.
    pub record_index: u64,

    /// The offset of that record. [`None`] before the first flush.
    pub offset: Option<Offset>,
}

/// Public methods
impl WalCheckpoint {
    /// Serialize the checkpoint for the metadata tree.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = u64::encode_fixed_vec(self.record_index);
        if let Some(offset) = self.offset {
            buf.extend_from_slice(&offset.encode());
        }

        buf
    }

    /// Deserialize a checkpoint. Unknown or short encodings read as the default checkpoint.
    pub fn decode(buf: &[u8]) -> WalCheckpoint {
        if buf.len() < 8 {
            return WalCheckpoint::default();
        }

        let record_index = u64::decode_fixed(&buf[0..8]);
        let offset = if buf.len() >= 20 {
            Offset::decode(&buf[8..20]).ok()
        } else {
            None
        };

        WalCheckpoint {
            record_index,
            offset,
        }
    }
}

/// One store-level effect of a flushed memtable entry.
#[derive(Debug)]
pub(crate) enum StoreMutation {
    /// Store a whole value under a key.
    PutValue { key: Vec<u8>, value: Vec<u8> },

    /// Store a chunked value: a metadata header under the key, chunks under child keys.
    PutChunks {
        key: Vec<u8>,
        chunks: Vec<Vec<u8>>,
        checksum: u32,
    },

    /// Remove a key, cascading over any chunk children. Absent keys are a no-op.
    Delete { key: Vec<u8> },

    /// Upsert column entries of a row.
    UpsertColumns {
        row_key: Vec<u8>,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    },

    /// Remove the named columns of a row.
    RemoveColumns {
        row_key: Vec<u8>,
        names: Vec<Vec<u8>>,
    },

    /**
    Remove a whole row. `existing_columns` holds the store keys of the row's columns,
    collected by the flusher before the transaction opens; the flusher being the only store
    writer is what makes that pre-scan stable.
    */
    RemoveRow { existing_columns: Vec<Vec<u8>> },
}

/// Everything one flush commits atomically.
#[derive(Debug)]
pub(crate) struct FlushPlan {
    /// The store effects of the sealed memtable, in replay order.
    pub(crate) mutations: Vec<StoreMutation>,

    /// The checkpoint to advance to, covering every mutation in the plan.
    pub(crate) checkpoint: WalCheckpoint,

    /// The serialized engine-wide Bloom filter.
    pub(crate) bloom_snapshot: Vec<u8>,
}

/// An [`io::Write`] adapter that counts the bytes passing through it.
pub(crate) struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    count: u64,
}

impl<'a> CountingWriter<'a> {
    pub(crate) fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, count: 0 }
    }

    /// The number of bytes written so far.
    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Resolve the child key holding chunk `index` of the value at `key`.
pub(crate) fn chunk_child_key(key: &[u8], index: u32) -> Vec<u8> {
    let suffix = format!("_chunk_{index}");
    let mut child = Vec::with_capacity(key.len() + suffix.len());
    child.extend_from_slice(key);
    child.extend_from_slice(suffix.as_bytes());

    child
}

/// Resolve the store key holding one column of a row.
pub(crate) fn row_column_key(row_key: &[u8], column: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(row_key.len() + 1 + column.len());
    key.extend_from_slice(row_key);
    key.push(crate::config::ROW_COLUMN_SEPARATOR);
    key.extend_from_slice(column);

    key
}

/// Convert a transaction result into a [`StorageResult`].
pub(crate) fn unwrap_transaction<T>(
    result: Result<T, sled::transaction::TransactionError<StorageError>>,
) -> StorageResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(sled::transaction::TransactionError::Abort(err)) => Err(err),
        Err(sled::transaction::TransactionError::Storage(err)) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn checkpoint_encoding_round_trips() {
        let checkpoint = WalCheckpoint {
            record_index: 99,
            offset: Some(Offset::new(2, 7, 1024)),
        };
        assert_eq!(WalCheckpoint::decode(&checkpoint.encode()), checkpoint);

        let fresh = WalCheckpoint::default();
        assert_eq!(WalCheckpoint::decode(&fresh.encode()), fresh);
        assert_eq!(WalCheckpoint::decode(&[]), fresh);
    }

    #[test]
    fn chunk_child_keys_use_ascii_decimal_indexes() {
        assert_eq!(chunk_child_key(b"video", 0), b"video_chunk_0".to_vec());
        assert_eq!(chunk_child_key(b"video", 12), b"video_chunk_12".to_vec());
    }

    #[test]
    fn counting_writer_tracks_bytes() {
        let mut sink: Vec<u8> = vec![];
        let mut writer = CountingWriter::new(&mut sink);
        writer.write_all(b"0123456789").unwrap();

        assert_eq!(writer.count(), 10);
        assert_eq!(sink.len(), 10);
    }
}
