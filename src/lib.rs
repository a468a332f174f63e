/*!
RillDB is an embedded, single-process, per-namespace storage engine.

Every mutation is appended to a segmented write-ahead log before it is visible anywhere
else, served from an in-memory tier backed by a persistent B-tree store, and exposed to
external replicators as a tailable stream of log records. One directory houses one engine
instance per namespace; a lock file keeps concurrent processes out.
*/

mod batch;
mod bloom;
mod config;
mod db;
mod errors;
mod file_names;
mod flusher;
mod memtable;
mod notifier;
mod options;
mod recovery;
mod rows;
mod store;
mod utils;
mod wal;

pub use db::Engine;
pub use errors::{StorageError, StorageResult, WalError};
pub use notifier::CancelToken;
pub use options::StorageOptions;
pub use store::WalCheckpoint;
pub use wal::offset::Offset;
pub use wal::reader::Reader;
pub use wal::record::{EntryKind, LogOperation, ValueKind, WalRecord};
