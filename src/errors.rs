/*!
This module contains error types specific to RillDB as well as wrappers and `From` implementations
for common errors to enable error propagation.
*/

use std::fmt;
use std::io;
use std::num::TryFromIntError;

/// Alias for a [`Result`] that wraps a [`StorageError`].
pub type StorageResult<T> = Result<T, StorageError>;

/// Top-level engine errors.
#[derive(Debug)]
pub enum StorageError {
    /// The key does not exist in any memtable or in the persistent store.
    KeyNotFound,

    /// A reader was requested at an offset past the current end of the log.
    InvalidOffset,

    /// A chunked value header in the persistent store was shorter than the fixed header length.
    InvalidChunkMetadata,

    /// A stored value carried a flag byte that is not a known value framing.
    InvalidDataFormat,

    /// A record or a reassembled chunked value failed checksum verification.
    RecordCorrupted,

    /// A named tree in the persistent store could not be opened.
    BucketNotFound,

    /// Another process holds the lock file for this namespace directory.
    DatabaseDirInUse,

    /// A wait on the append notifier elapsed before any new record arrived.
    WaitTimeoutExceeded,

    /// A wait on the append notifier was cancelled through its token.
    Cancelled,

    /// The engine is shutting down and no longer accepts operations.
    InCloseProcess,

    /// Variant for errors stemming from top-level I/O operations.
    IO(io::Error),

    /// Variant for errors stemming from WAL operations.
    Wal(WalError),

    /// Variant for errors surfaced by the persistent store.
    Store(String),
}

impl std::error::Error for StorageError {}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::KeyNotFound => write!(f, "key not found"),
            StorageError::InvalidOffset => write!(f, "offset is past the current end of the log"),
            StorageError::InvalidChunkMetadata => write!(f, "chunked value metadata is malformed"),
            StorageError::InvalidDataFormat => write!(f, "stored value has an unknown framing flag"),
            StorageError::RecordCorrupted => write!(f, "record failed checksum verification"),
            StorageError::BucketNotFound => write!(f, "store tree could not be opened"),
            StorageError::DatabaseDirInUse => {
                write!(f, "database directory is locked by another process")
            }
            StorageError::WaitTimeoutExceeded => write!(f, "timed out waiting for an append"),
            StorageError::Cancelled => write!(f, "wait was cancelled"),
            StorageError::InCloseProcess => write!(f, "engine is closing"),
            StorageError::IO(base_err) => write!(f, "{}", base_err),
            StorageError::Wal(base_err) => write!(f, "{}", base_err),
            StorageError::Store(base_err) => write!(f, "{}", base_err),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::IO(err)
    }
}

impl From<WalError> for StorageError {
    fn from(err: WalError) -> Self {
        StorageError::Wal(err)
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Store(err.to_string())
    }
}

/// Metadata describing corruption detected in the WAL.
#[derive(Debug)]
pub struct WalCorruptionMetadata {
    /// The segment the corruption was found in.
    pub segment_id: u32,

    /// A human readable description of what failed to parse.
    pub reason: String,
}

/// Errors related to reading from and writing to the write-ahead log.
#[derive(Debug)]
pub enum WalError {
    /**
    Variant for errors that are related to IO.
    */
    IO(io::Error),

    /**
    Variant for IO issues where the cause is malformed data on the file system.
    */
    Corruption(WalCorruptionMetadata),

    /**
    Variant for parsing issues that arise specifically from deserializing data from the
    file system.
    */
    Serialization(String),

    /**
    Variant returned when a read lands on the clean tail of the log. This is a normal
    condition and is distinct from [`WalError::Corruption`].
    */
    EndOfLog,

    /**
    Variant returned when an offset does not name a position inside this log, such as the
    zero sentinel or a segment older than anything retained.
    */
    InvalidOffset,
}

impl std::error::Error for WalError {}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalError::IO(base_err) => write!(f, "{}", base_err),
            WalError::Corruption(err_metadata) => write!(
                f,
                "corruption in segment {}: {}",
                err_metadata.segment_id, err_metadata.reason
            ),
            WalError::Serialization(reason) => write!(f, "{}", reason),
            WalError::EndOfLog => write!(f, "end of log"),
            WalError::InvalidOffset => {
                write!(f, "offset does not name a position in this log")
            }
        }
    }
}

impl From<io::Error> for WalError {
    fn from(err: io::Error) -> Self {
        WalError::IO(err)
    }
}

impl From<TryFromIntError> for WalError {
    fn from(err: TryFromIntError) -> Self {
        WalError::Serialization(err.to_string())
    }
}

impl WalError {
    /// True if this error represents the clean tail of the log rather than damage.
    pub fn is_end_of_log(&self) -> bool {
        matches!(self, WalError::EndOfLog)
    }
}
