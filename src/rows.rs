/*!
The columnar delta payload carried by wide-row WAL records.

A row mutation does not rewrite the whole row. It appends a delta: the set of column entries
being upserted, the set of column names being removed, or a whole-row tombstone with no
payload at all. Materializing a row folds these deltas, oldest first, over the columns held
by the persistent store.

# Serialization

A delta payload is a varint32 entry count followed by, per entry, the column name and the
column value as varint32 length-prefixed slices. Removed columns are encoded with empty
values.
*/

use std::io::Cursor;

use integer_encoding::{VarIntReader, VarIntWriter};

use crate::errors::WalError;
use crate::utils::io::{ReadHelpers, WriteHelpers};

/// Serialize column entries into a delta payload.
pub(crate) fn encode_column_entries(entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut buf: Vec<u8> = vec![];

    // Writing to a `Vec` cannot fail
    buf.write_varint(entries.len() as u32).unwrap();
    for (name, value) in entries {
        buf.write_length_prefixed_slice(name).unwrap();
        buf.write_length_prefixed_slice(value).unwrap();
    }

    buf
}

/// Deserialize a delta payload back into column entries.
pub(crate) fn decode_column_entries(buf: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, WalError> {
    let mut cursor = Cursor::new(buf);
    let count: u32 = cursor
        .read_varint()
        .map_err(|err| WalError::Serialization(err.to_string()))?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = cursor
            .read_length_prefixed_slice()
            .map_err(|err| WalError::Serialization(err.to_string()))?;
        let value = cursor
            .read_length_prefixed_slice()
            .map_err(|err| WalError::Serialization(err.to_string()))?;
        entries.push((name, value));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn column_entries_round_trip() {
        let entries = vec![
            (b"name".to_vec(), b"arthur".to_vec()),
            (b"planet".to_vec(), b"earth".to_vec()),
            (b"towel".to_vec(), vec![]),
        ];

        let decoded = decode_column_entries(&encode_column_entries(&entries)).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn empty_payloads_decode_to_no_entries() {
        let decoded = decode_column_entries(&encode_column_entries(&[])).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let encoded = encode_column_entries(&[(b"col".to_vec(), b"value".to_vec())]);
        assert!(decode_column_entries(&encoded[..encoded.len() - 2]).is_err());
    }
}
