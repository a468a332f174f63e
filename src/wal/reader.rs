/*!
Tailing readers over the segmented log.

A reader is a sequential cursor handed to external consumers (typically replicators) so they
can stream every appended record. The reader yields encoded record frames; consumers decode
them with [`WalRecord::decode`](crate::wal::record::WalRecord::decode) when they need the
fields rather than the raw bytes.
*/

use std::sync::Arc;

use crate::errors::{StorageError, StorageResult, WalError};
use crate::wal::log::SegmentedLog;
use crate::wal::offset::Offset;

/// A sequential cursor over the log, starting at a fixed offset and running to the tail.
pub struct Reader {
    log: Arc<SegmentedLog>,
    position: Offset,
}

/// Crate-only methods
impl Reader {
    pub(crate) fn new(log: Arc<SegmentedLog>, start: Offset) -> Self {
        Self {
            log,
            position: start,
        }
    }
}

/// Public methods
impl Reader {
    /**
    Read the next record.

    Returns the encoded record frame and the offset the cursor advanced to, or [`None`] at
    the current tail of the log. Reaching the tail is not permanent: a later call observes
    records appended in the meantime. Corruption is permanent and surfaces as an error.
    */
    pub fn next(&mut self) -> StorageResult<Option<(Vec<u8>, Offset)>> {
        match self.log.read_at(self.position) {
            Ok((frame, next)) => {
                self.position = next;
                Ok(Some((frame, next)))
            }
            Err(StorageError::Wal(err)) if err.is_end_of_log() => Ok(None),
            Err(StorageError::Wal(WalError::InvalidOffset)) => Err(StorageError::InvalidOffset),
            Err(err) => Err(err),
        }
    }
}
