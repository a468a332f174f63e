/*!
This module contains global configuration constants for RillDB.

These are fixed parameters of the on-disk formats and of internal safety limits. Tunable
behavior lives in [`StorageOptions`](crate::options::StorageOptions) instead; the values here
must not change once data has been written with them.
*/

/// The size of blocks in the segmented log format. This is set at 32 KiB.
pub(crate) const BLOCK_SIZE_BYTES: usize = 32 * 1024;

/**
The length of chunk headers in the segmented log.

This is 7 bytes: a 4 byte masked CRC32 of the chunk data, a 2 byte data length, and a 1 byte
chunk type.
*/
pub(crate) const CHUNK_HEADER_LENGTH_BYTES: usize = 4 + 2 + 1;

/**
The maximum number of back-pointer hops a transaction chain walk will follow.

A chain longer than this is assumed to be a cycle introduced by corrupted data and the walk
fails instead of spinning.
*/
pub(crate) const MAX_TXN_CHAIN_STEPS: usize = 1 << 16;

/// The number of bytes in an encoded WAL offset (three fixed-width u32 fields).
pub(crate) const ENCODED_OFFSET_LENGTH_BYTES: usize = 12;

/// The number of bytes in a batch identifier.
pub(crate) const BATCH_ID_LENGTH_BYTES: usize = 16;

/**
The number of keys the Bloom filter is sized for.

The filter cannot grow once allocated, so this is the capacity at which the configured false
positive rate holds. Sizing past the live key count only costs memory, never correctness.
*/
pub(crate) const BLOOM_EXPECTED_KEYS: usize = 100_000;

/// Name of the tree inside the persistent store that holds engine metadata.
pub(crate) const SYS_TREE_NAME: &str = "sys";

/// Metadata key for the WAL checkpoint.
pub(crate) const WAL_CHECKPOINT_KEY: &[u8] = b"wal-checkpoint";

/// Metadata key for the serialized Bloom filter snapshot.
pub(crate) const BLOOM_FILTER_KEY: &[u8] = b"bloom-filter";

/// Flag byte prefixed to persistent store values that are stored whole.
pub(crate) const FULL_VALUE_FLAG: u8 = 0x00;

/// Flag byte prefixed to persistent store values that are split into chunk children.
pub(crate) const CHUNKED_VALUE_FLAG: u8 = 0x01;

/**
The length of the chunked value header in the persistent store.

This is 9 bytes: the flag byte, a u32 little-endian chunk count, and a u32 little-endian
CRC32 over the concatenated chunks.
*/
pub(crate) const CHUNKED_VALUE_HEADER_LENGTH_BYTES: usize = 9;

/**
Separator between a row key and a column name in the persistent store key space.

Columns of row `r` live at `r \x00 column_name` so that one prefix scan yields a whole row.
*/
pub(crate) const ROW_COLUMN_SEPARATOR: u8 = 0x00;
