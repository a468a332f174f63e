/*!
This module holds the options structure that can be passed to [`Engine::open`](crate::Engine::open).
*/

/**
Holds options to control engine behavior.

There is a mix of options to configure here that are remniscent of those configurable in
LevelDB and RocksDB.
*/
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /**
    This amount of bytes will be written to a WAL segment file before switching to a new one.

    **This defaults to 16 MiB.**
    */
    pub wal_segment_size: usize,

    /**
    Request OS-level durability after every single WAL append.

    Leaving this off trades a bounded window of recent writes for much higher append
    throughput. The log is always synced on memtable rotation and on close.

    **This defaults to `false`.**
    */
    pub wal_sync_on_write: bool,

    /**
    The maximum size that the active memtable can reach before it is sealed and queued for a
    flush to the persistent store.

    **This defaults to 4 MiB.**
    */
    pub memtable_max_bytes: usize,

    /**
    The maximum number of operations the active memtable will hold before it is sealed,
    regardless of its byte size.

    **This defaults to 100,000.**
    */
    pub memtable_max_entries: usize,

    /**
    The number of sealed memtables that may await flushing at once.

    When the backlog reaches this capacity, memtable rotation (and therefore new writes)
    blocks until the flusher retires a table.

    **This defaults to 4.**
    */
    pub sealed_memtable_capacity: usize,

    /**
    Values larger than this are written through the chunked batch protocol: a begin marker,
    one WAL record per chunk of this size, and a commit record carrying the rolling checksum.

    **This defaults to 1 MiB.**
    */
    pub chunk_threshold: usize,

    /**
    Relax fsyncs in the persistent store, leaving durability of flushed data to the store's
    own background cadence. The WAL remains the durability anchor either way.

    **This defaults to `false`.**
    */
    pub no_sync: bool,

    /**
    The target false positive rate for the engine-wide Bloom filter.

    **This defaults to 0.01.**
    */
    pub bloom_false_positive: f64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions {
            wal_segment_size: 16 * 1024 * 1024,
            wal_sync_on_write: false,
            memtable_max_bytes: 4 * 1024 * 1024,
            memtable_max_entries: 100_000,
            sealed_memtable_capacity: 4,
            chunk_threshold: 1024 * 1024,
            no_sync: false,
            bloom_false_positive: 0.01,
        }
    }
}
