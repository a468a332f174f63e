/*!
The in-memory tier of the engine.

A memtable is an index over recent WAL appends: for every key it remembers where in the log
the latest mutation lives and what that mutation was. Values themselves stay in the log; a
read resolves the offset back through the WAL. Row keys additionally keep an ordered log of
column deltas, since materializing a row needs the whole delta history rather than only the
newest write.

The active memtable accepts appends until its byte or entry budget is exceeded, then it is
sealed (moved read-only into a bounded backlog) and a fresh active table takes its place.
The background flusher drains sealed tables oldest first.
*/

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::wal::offset::Offset;
use crate::wal::record::{EntryKind, LogOperation};

/// Approximate bookkeeping cost of one entry beyond its key bytes.
const ENTRY_OVERHEAD_BYTES: usize = 24;

/// What a memtable remembers about the latest mutation of one key.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TableEntry {
    /// Where in the WAL the mutation's record lives.
    pub offset: Offset,

    /// The operation that produced the record.
    pub op: LogOperation,

    /// The shape of the entry, which decides how the value is resolved on read.
    pub entry_kind: EntryKind,
}

/// One element of a row's ordered delta log.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RowDelta {
    /// Where in the WAL the delta's record lives.
    pub offset: Offset,

    /// The operation: an upsert, a column removal, or a whole-row tombstone.
    pub op: LogOperation,
}

/// A single memtable.
#[derive(Debug, Default)]
pub(crate) struct MemTable {
    /// Latest mutation per plain key.
    entries: BTreeMap<Vec<u8>, TableEntry>,

    /// Ordered column delta log per row key.
    rows: BTreeMap<Vec<u8>, Vec<RowDelta>>,

    /// Approximate memory usage of the table in bytes.
    approximate_size: usize,

    /// Number of operations applied to this table.
    op_count: usize,

    /// The highest record index applied to this table.
    max_index: u64,

    /// The highest WAL offset applied to this table.
    max_offset: Option<Offset>,
}

/// Crate-only methods
impl MemTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the latest mutation for a plain key.
    pub(crate) fn apply_entry(&mut self, key: &[u8], entry: TableEntry, index: u64) {
        if !self.entries.contains_key(key) {
            self.approximate_size += key.len() + ENTRY_OVERHEAD_BYTES;
        }
        self.entries.insert(key.to_vec(), entry);
        self.account(entry.offset, index);
    }

    /// Append a delta to a row's ordered log.
    pub(crate) fn apply_row_delta(&mut self, row_key: &[u8], delta: RowDelta, index: u64) {
        let log = self.rows.entry(row_key.to_vec()).or_default();
        if log.is_empty() {
            self.approximate_size += row_key.len();
        }
        log.push(delta);
        self.approximate_size += ENTRY_OVERHEAD_BYTES;
        self.account(delta.offset, index);
    }

    /// Get the latest mutation recorded for a plain key.
    pub(crate) fn get(&self, key: &[u8]) -> Option<TableEntry> {
        self.entries.get(key).copied()
    }

    /// Get a row's delta log, in application order. Empty if the row is unknown here.
    pub(crate) fn row_deltas(&self, row_key: &[u8]) -> &[RowDelta] {
        self.rows.get(row_key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the approximate memory usage of the memtable in bytes.
    pub(crate) fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// The number of operations applied to this table.
    pub(crate) fn op_count(&self) -> usize {
        self.op_count
    }

    /// True if nothing was ever applied to this table.
    pub(crate) fn is_empty(&self) -> bool {
        self.op_count == 0
    }

    /// The highest record index applied to this table.
    pub(crate) fn max_index(&self) -> u64 {
        self.max_index
    }

    /// The highest WAL offset applied to this table.
    pub(crate) fn max_offset(&self) -> Option<Offset> {
        self.max_offset
    }

    /**
    True if accepting one more entry with a key of `key_length` bytes would push the table
    past either of its budgets. The check runs before the insert so that rotation happens on
    the boundary rather than after overshooting.
    */
    pub(crate) fn wont_fit(
        &self,
        key_length: usize,
        max_bytes: usize,
        max_entries: usize,
    ) -> bool {
        if self.is_empty() {
            // A single oversized entry is still accepted, otherwise it could never rotate in
            return false;
        }

        self.op_count + 1 > max_entries
            || self.approximate_size + key_length + ENTRY_OVERHEAD_BYTES > max_bytes
    }

    /// Iterate the latest mutation per plain key.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (&Vec<u8>, &TableEntry)> {
        self.entries.iter()
    }

    /// Iterate every row's delta log.
    pub(crate) fn rows(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<RowDelta>)> {
        self.rows.iter()
    }
}

/// Private methods
impl MemTable {
    fn account(&mut self, offset: Offset, index: u64) {
        self.op_count += 1;
        if index > self.max_index {
            self.max_index = index;
        }
        if self.max_offset.map_or(true, |current| offset > current) {
            self.max_offset = Some(offset);
        }
    }
}

/// The active memtable plus the sealed backlog, oldest sealed table first.
#[derive(Debug)]
pub(crate) struct MemTableTier {
    /// The table accepting new appends.
    pub(crate) active: MemTable,

    /// Sealed tables awaiting flush, ordered oldest first.
    pub(crate) sealed: Vec<Arc<MemTable>>,
}

/// Crate-only methods
impl MemTableTier {
    pub(crate) fn new() -> Self {
        Self {
            active: MemTable::new(),
            sealed: vec![],
        }
    }

    /**
    Find the latest mutation for a key across the whole tier: the active table first, then
    sealed tables newest to oldest. [`None`] means no live memtable knows the key and the
    persistent store is authoritative.
    */
    pub(crate) fn lookup(&self, key: &[u8]) -> Option<TableEntry> {
        if let Some(entry) = self.active.get(key) {
            return Some(entry);
        }

        self.sealed.iter().rev().find_map(|table| table.get(key))
    }

    /// Collect a row's delta history across the whole tier, oldest delta first.
    pub(crate) fn row_delta_history(&self, row_key: &[u8]) -> Vec<RowDelta> {
        let mut deltas: Vec<RowDelta> = vec![];
        for table in &self.sealed {
            deltas.extend_from_slice(table.row_deltas(row_key));
        }
        deltas.extend_from_slice(self.active.row_deltas(row_key));

        deltas
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn entry(offset: Offset, op: LogOperation) -> TableEntry {
        TableEntry {
            offset,
            op,
            entry_kind: EntryKind::KV,
        }
    }

    #[test]
    fn latest_entry_wins_per_key() {
        let mut table = MemTable::new();
        table.apply_entry(b"k", entry(Offset::new(1, 0, 0), LogOperation::Insert), 1);
        table.apply_entry(b"k", entry(Offset::new(1, 0, 40), LogOperation::Delete), 2);

        let found = table.get(b"k").unwrap();
        assert_eq!(found.op, LogOperation::Delete);
        assert_eq!(found.offset, Offset::new(1, 0, 40));
        assert_eq!(table.op_count(), 2);
        assert_eq!(table.max_index(), 2);
        assert_eq!(table.max_offset(), Some(Offset::new(1, 0, 40)));
    }

    #[test]
    fn row_deltas_accumulate_in_order() {
        let mut table = MemTable::new();
        table.apply_row_delta(
            b"row",
            RowDelta {
                offset: Offset::new(1, 0, 0),
                op: LogOperation::Insert,
            },
            1,
        );
        table.apply_row_delta(
            b"row",
            RowDelta {
                offset: Offset::new(1, 0, 80),
                op: LogOperation::DeleteRow,
            },
            2,
        );

        let deltas = table.row_deltas(b"row");
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[1].op, LogOperation::DeleteRow);
    }

    #[test]
    fn entry_budget_triggers_wont_fit() {
        let mut table = MemTable::new();
        assert!(!table.wont_fit(10, 1024, 2));

        table.apply_entry(b"a", entry(Offset::new(1, 0, 0), LogOperation::Insert), 1);
        table.apply_entry(b"b", entry(Offset::new(1, 0, 40), LogOperation::Insert), 2);
        assert!(table.wont_fit(10, 1024, 2));
        assert!(!table.wont_fit(10, 1024, 3));
    }

    #[test]
    fn tier_lookup_prefers_newer_tables() {
        let mut old = MemTable::new();
        old.apply_entry(b"k", entry(Offset::new(1, 0, 0), LogOperation::Insert), 1);
        let mut newer = MemTable::new();
        newer.apply_entry(b"k", entry(Offset::new(1, 2, 0), LogOperation::Delete), 5);

        let tier = MemTableTier {
            active: MemTable::new(),
            sealed: vec![Arc::new(old), Arc::new(newer)],
        };

        assert_eq!(tier.lookup(b"k").unwrap().op, LogOperation::Delete);
        assert!(tier.lookup(b"missing").is_none());
    }
}
