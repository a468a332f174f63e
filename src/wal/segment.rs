/*!
The chunk format of one segment file.

A segment file is a series of 32 KiB blocks. Each block contains one or more chunks with a
7-byte header consisting of a 4 byte masked CRC32 of the chunk data, a 2 byte u16 data
length, and a 1 byte chunk type. A record that does not fit in the remaining space of a block
continues in the next block as a `First`/`Middle`/`Last` chain.

A chunk never starts within the last 6 bytes of a block (the header alone would not fit), so
any leftover bytes there form a zero trailer which readers skip.
*/

use std::convert::{TryFrom, TryInto};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use integer_encoding::FixedInt;

use crate::config::{BLOCK_SIZE_BYTES, CHUNK_HEADER_LENGTH_BYTES};
use crate::errors::{WalCorruptionMetadata, WalError};
use crate::file_names::segment_file_path;
use crate::wal::record::CRC_CALCULATOR;

/// Alias for a [`Result`] that wraps a [`WalError`].
type WalResult<T> = Result<T, WalError>;

/// A constant delta for masking and unmasking chunk checksums.
const CRC_MASKING_DELTA: u32 = 0xa282ead8;

/**
Return a masked representation of the checksum.

Computing the CRC of a byte string that contains embedded CRCs can be problematic, so
checksums are rotated and offset by a constant before being stored in chunk headers.
*/
fn mask_checksum(checksum: u32) -> u32 {
    ((checksum.wrapping_shr(15)) | (checksum.wrapping_shl(17))).wrapping_add(CRC_MASKING_DELTA)
}

/// Return the unmasked checksum. The checksum must have been masked with [`mask_checksum`].
fn unmask_checksum(masked_checksum: u32) -> u32 {
    let rotated = masked_checksum.wrapping_sub(CRC_MASKING_DELTA);
    (rotated.wrapping_shr(17)) | (rotated.wrapping_shl(15))
}

/**
Chunk types denote whether the data contained in the chunk is split across multiple chunks or
if it contains all of the data for a single record.
*/
#[repr(u8)]
#[derive(Clone, Copy, Debug)]
pub(crate) enum ChunkType {
    /// Denotes that the chunk contains the entirety of a record.
    Full = 0,
    /// Denotes the first fragment of a record.
    First,
    /// Denotes the interior fragments of a record.
    Middle,
    /// Denotes the last fragment of a record.
    Last,
}

impl TryFrom<u8> for ChunkType {
    type Error = WalError;

    fn try_from(value: u8) -> WalResult<ChunkType> {
        let chunk_type = match value {
            0 => ChunkType::Full,
            1 => ChunkType::First,
            2 => ChunkType::Middle,
            3 => ChunkType::Last,
            _ => {
                return Err(WalError::Serialization(format!(
                    "there was a problem parsing the chunk type. The value received was {}",
                    value
                )))
            }
        };

        Ok(chunk_type)
    }
}

/**
A chunk that is stored in a particular block. It is potentially only a fragment of a full
record.

# Serialization

When serialized to disk the chunk will have the following format:

1. A 32-bit masked checksum of the data
1. The length as a 2-byte integer with a fixed-size encoding
1. The chunk type converted to a 1 byte integer
1. The data
*/
#[derive(Debug)]
pub(crate) struct Chunk {
    /// A checksum of the data in this chunk.
    checksum: u32,

    /// The size of the data within the chunk.
    length: u16,

    /// The [`ChunkType`] of the chunk.
    chunk_type: ChunkType,

    /// Record data stored in the chunk.
    data: Vec<u8>,
}

/// Crate-only methods
impl Chunk {
    pub(crate) fn new(length: u16, chunk_type: ChunkType, data: Vec<u8>) -> Self {
        let checksum = CRC_CALCULATOR.checksum(&data);

        Self {
            checksum,
            length,
            chunk_type,
            data,
        }
    }
}

impl From<&Chunk> for Vec<u8> {
    fn from(chunk: &Chunk) -> Self {
        let initial_capacity = CHUNK_HEADER_LENGTH_BYTES + chunk.data.len();
        let mut buf: Vec<u8> = Vec::with_capacity(initial_capacity);
        buf.extend_from_slice(&u32::encode_fixed_vec(mask_checksum(chunk.checksum)));
        buf.extend_from_slice(&u16::encode_fixed_vec(chunk.length));
        buf.extend_from_slice(&[chunk.chunk_type as u8]);
        buf.extend_from_slice(&chunk.data);

        buf
    }
}

/**
Handles all write activity to a single segment file.

The file is opened in append mode; the write head is tracked as a block number plus a byte
offset inside that block so appends can report chunk-addressable positions.
*/
pub(crate) struct Segment {
    /// The id of this segment.
    id: u32,

    /// The path to the segment file.
    path: PathBuf,

    /// The underlying file representing the segment.
    file: File,

    /// The block the write head is in.
    current_block: u32,

    /// The byte offset of the write head inside the current block.
    block_offset: usize,
}

/// Crate-only methods
impl Segment {
    /// Open (or create) the segment file with the given id for appending.
    pub(crate) fn open(wal_dir: &Path, id: u32) -> WalResult<Self> {
        let path = segment_file_path(wal_dir, id);
        log::info!("opening WAL segment file at {path:?} for appends");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len() as usize;

        Ok(Segment {
            id,
            path,
            file,
            current_block: (size / BLOCK_SIZE_BYTES) as u32,
            block_offset: size % BLOCK_SIZE_BYTES,
        })
    }

    /// The id of this segment.
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// The number of bytes written to this segment so far.
    pub(crate) fn size(&self) -> u64 {
        self.current_block as u64 * BLOCK_SIZE_BYTES as u64 + self.block_offset as u64
    }

    /**
    Append a record to the segment, splitting it into chunks at block boundaries.

    The split is planned up front: the first chunk takes whatever data room the current
    block still has, and every continuation chunk fills a complete fresh block. A
    zero-length record still produces one empty `Full` chunk so that it occupies an
    addressable position.

    Returns the block number and in-block byte offset of the record's first chunk.
    */
    pub(crate) fn append_record(&mut self, data: &[u8]) -> WalResult<(u32, u32)> {
        self.close_out_unusable_block_tail()?;
        let first_chunk_position = (self.current_block, self.block_offset as u32);

        let spans = plan_chunk_spans(
            data.len(),
            BLOCK_SIZE_BYTES - self.block_offset - CHUNK_HEADER_LENGTH_BYTES,
        );
        let last_span = spans.len() - 1;

        for (span_index, span) in spans.into_iter().enumerate() {
            if span_index > 0 {
                // The previous chunk filled its block to the byte, by construction of the
                // span plan
                self.current_block += 1;
                self.block_offset = 0;
            }

            let chunk_type = match (span_index, last_span) {
                (0, 0) => ChunkType::Full,
                (0, _) => ChunkType::First,
                (index, last) if index == last => ChunkType::Last,
                _ => ChunkType::Middle,
            };

            self.emit_chunk(chunk_type, &data[span])?;
        }

        Ok(first_chunk_position)
    }

    /// Request OS-level durability for everything appended so far.
    pub(crate) fn sync(&self) -> WalResult<()> {
        self.file.sync_data()?;

        Ok(())
    }
}

/// Private methods
impl Segment {
    /**
    Zero-fill and leave the current block when the space left is smaller than a chunk
    header. Readers treat those bytes as a trailer and skip them.
    */
    fn close_out_unusable_block_tail(&mut self) -> WalResult<()> {
        const TRAILER: [u8; CHUNK_HEADER_LENGTH_BYTES] = [0; CHUNK_HEADER_LENGTH_BYTES];

        let space_left = BLOCK_SIZE_BYTES - self.block_offset;
        if space_left >= CHUNK_HEADER_LENGTH_BYTES {
            return Ok(());
        }

        if space_left > 0 {
            log::debug!(
                "segment {id}: zero-filling a {space_left} byte block trailer",
                id = self.id
            );
            self.file.write_all(&TRAILER[..space_left])?;
        }

        self.current_block += 1;
        self.block_offset = 0;

        Ok(())
    }

    /// Frame one chunk and write it to the file, advancing the in-block write head.
    fn emit_chunk(&mut self, chunk_type: ChunkType, data: &[u8]) -> WalResult<()> {
        // The header length field is a u16
        let data_length = u16::try_from(data.len())?;
        let chunk = Chunk::new(data_length, chunk_type, data.to_vec());

        self.file.write_all(Vec::<u8>::from(&chunk).as_slice())?;
        self.block_offset += CHUNK_HEADER_LENGTH_BYTES + data.len();

        Ok(())
    }
}

/**
Split a record of `length` bytes into chunk spans. The first span is bounded by
`first_chunk_capacity`, the data room left in the block the record starts in; every later
span fills a complete block. A zero-length record yields a single empty span.
*/
fn plan_chunk_spans(length: usize, first_chunk_capacity: usize) -> Vec<std::ops::Range<usize>> {
    let continuation_capacity = BLOCK_SIZE_BYTES - CHUNK_HEADER_LENGTH_BYTES;
    let mut spans: Vec<std::ops::Range<usize>> = vec![];
    let mut cursor = 0;
    let mut capacity = first_chunk_capacity;

    loop {
        let end = usize::min(length, cursor + capacity);
        spans.push(cursor..end);
        if end == length {
            return spans;
        }
        cursor = end;
        capacity = continuation_capacity;
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

/// Read `buf.len()` bytes at `position`, tolerating short reads from the OS.
fn read_full(file: &File, buf: &mut [u8], position: u64) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let bytes_read = read_from(file, &mut buf[filled..], position + filled as u64)?;
        if bytes_read == 0 {
            break;
        }
        filled += bytes_read;
    }

    Ok(filled)
}

#[cfg(target_family = "unix")]
fn read_from(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;

    file.read_at(buf, offset)
}

#[cfg(target_family = "windows")]
fn read_from(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;

    file.seek_read(buf, offset)
}

/**
Read one record from an open segment file starting at the given block and in-block offset.

Returns the reassembled record data plus the block number and in-block offset where the next
record starts. A read landing past the written extent of the file, or on a record whose
trailing chunks were lost to a crash, yields [`WalError::EndOfLog`]; callers that know more
segments follow advance instead of surfacing it. Checksum and framing failures yield
[`WalError::Corruption`].
*/
pub(crate) fn read_record_at(
    file: &File,
    segment_id: u32,
    block_number: u32,
    chunk_offset: u32,
) -> WalResult<(Vec<u8>, u32, u32)> {
    let file_length = file.metadata()?.len();
    let mut position = block_number as u64 * BLOCK_SIZE_BYTES as u64 + chunk_offset as u64;

    // A buffer consolidating all of the chunks retrieved for the record
    let mut data_buffer: Vec<u8> = vec![];

    loop {
        // Skip the zero trailer at the end of a block
        let offset_in_block = (position % BLOCK_SIZE_BYTES as u64) as usize;
        if BLOCK_SIZE_BYTES - offset_in_block < CHUNK_HEADER_LENGTH_BYTES {
            position += (BLOCK_SIZE_BYTES - offset_in_block) as u64;
        }

        if position + CHUNK_HEADER_LENGTH_BYTES as u64 > file_length {
            // The written extent of the segment ends before a full header. Either this is
            // the clean tail of the log or the writer died mid-record; both read as the end.
            return Err(WalError::EndOfLog);
        }

        let mut header_buffer = [0; CHUNK_HEADER_LENGTH_BYTES];
        let header_bytes_read = read_full(file, &mut header_buffer, position)?;
        if header_bytes_read < CHUNK_HEADER_LENGTH_BYTES {
            return Err(WalError::EndOfLog);
        }

        let stored_checksum = unmask_checksum(u32::decode_fixed(&header_buffer[0..4]));
        let data_length = u16::decode_fixed(&header_buffer[4..6]) as u64;
        let chunk_type: ChunkType = header_buffer[6].try_into().map_err(|_| {
            WalError::Corruption(WalCorruptionMetadata {
                segment_id,
                reason: format!(
                    "unknown chunk type {} at byte {}",
                    header_buffer[6], position
                ),
            })
        })?;

        if position + (CHUNK_HEADER_LENGTH_BYTES as u64) + data_length > file_length {
            // The chunk data was cut off by a crash mid-write
            return Err(WalError::EndOfLog);
        }

        let mut chunk_data = vec![0; data_length as usize];
        let data_bytes_read = read_full(
            file,
            &mut chunk_data,
            position + CHUNK_HEADER_LENGTH_BYTES as u64,
        )?;
        if (data_bytes_read as u64) < data_length {
            return Err(WalError::EndOfLog);
        }

        let calculated_checksum = CRC_CALCULATOR.checksum(&chunk_data);
        if calculated_checksum != stored_checksum {
            return Err(WalError::Corruption(WalCorruptionMetadata {
                segment_id,
                reason: format!(
                    "chunk checksum mismatch at byte {position}. Expected {stored_checksum} \
                    but got {calculated_checksum}"
                ),
            }));
        }

        data_buffer.extend(chunk_data);
        position += CHUNK_HEADER_LENGTH_BYTES as u64 + data_length;

        match chunk_type {
            ChunkType::Full | ChunkType::Last => break,
            ChunkType::First | ChunkType::Middle => {}
        }
    }

    // Normalize the next position past any block trailer
    let offset_in_block = (position % BLOCK_SIZE_BYTES as u64) as usize;
    if BLOCK_SIZE_BYTES - offset_in_block < CHUNK_HEADER_LENGTH_BYTES {
        position += (BLOCK_SIZE_BYTES - offset_in_block) as u64;
    }

    let next_block = (position / BLOCK_SIZE_BYTES as u64) as u32;
    let next_offset = (position % BLOCK_SIZE_BYTES as u64) as u32;

    Ok((data_buffer, next_block, next_offset))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn can_mask_and_unmask_checksums_correctly() {
        let checksum = CRC_CALCULATOR.checksum(b"foo");

        assert_ne!(checksum, mask_checksum(checksum));
        assert_eq!(checksum, unmask_checksum(mask_checksum(checksum)));
    }

    #[test]
    fn chunk_plans_cover_the_record_exactly() {
        // Everything fits in the room the current block has left
        assert_eq!(plan_chunk_spans(10, 100), vec![0..10]);

        // Overflow continues in fresh blocks
        let continuation = BLOCK_SIZE_BYTES - CHUNK_HEADER_LENGTH_BYTES;
        assert_eq!(
            plan_chunk_spans(continuation + 14, 4),
            vec![0..4, 4..(4 + continuation), (4 + continuation)..(continuation + 14)]
        );

        // A zero-capacity slot still opens the chain with an empty first chunk
        assert_eq!(plan_chunk_spans(3, 0), vec![0..0, 0..3]);

        // A zero-length record still gets one addressable chunk
        assert_eq!(plan_chunk_spans(0, 100), vec![0..0]);
    }

    #[test]
    fn records_round_trip_within_a_block() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 1).unwrap();

        let (block, offset) = segment.append_record(b"first record").unwrap();
        assert_eq!((block, offset), (0, 0));
        let (block, offset) = segment.append_record(b"second record").unwrap();

        let file = File::open(segment_file_path(dir.path(), 1)).unwrap();
        let (data, next_block, next_offset) = read_record_at(&file, 1, 0, 0).unwrap();
        assert_eq!(data, b"first record");
        assert_eq!((next_block, next_offset), (block, offset));

        let (data, _, _) = read_record_at(&file, 1, next_block, next_offset).unwrap();
        assert_eq!(data, b"second record");
    }

    #[test]
    fn large_records_span_blocks() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 1).unwrap();

        let record = vec![0xab_u8; BLOCK_SIZE_BYTES * 2 + 17];
        segment.append_record(&record).unwrap();

        let file = File::open(segment_file_path(dir.path(), 1)).unwrap();
        let (data, next_block, _) = read_record_at(&file, 1, 0, 0).unwrap();
        assert_eq!(data, record);
        assert!(next_block >= 2);
    }

    #[test]
    fn reading_past_the_written_extent_is_end_of_log() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 1).unwrap();
        let (_, next_block, next_offset) = {
            segment.append_record(b"only record").unwrap();
            let file = File::open(segment_file_path(dir.path(), 1)).unwrap();
            read_record_at(&file, 1, 0, 0).unwrap()
        };

        let file = File::open(segment_file_path(dir.path(), 1)).unwrap();
        let result = read_record_at(&file, 1, next_block, next_offset);
        assert!(matches!(result, Err(WalError::EndOfLog)));
    }

    #[test]
    fn flipped_bits_read_as_corruption() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 1).unwrap();
        segment.append_record(b"soon to be damaged").unwrap();
        drop(segment);

        let path = segment_file_path(dir.path(), 1);
        let mut contents = std::fs::read(&path).unwrap();
        let last = contents.len() - 1;
        contents[last] ^= 0xff;
        std::fs::write(&path, contents).unwrap();

        let file = File::open(&path).unwrap();
        let result = read_record_at(&file, 1, 0, 0);
        assert!(matches!(result, Err(WalError::Corruption(_))));
    }
}
