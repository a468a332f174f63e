//! Contains helpers for structs that implement I/O traits.

use std::io::{self, Read, Write};

use integer_encoding::VarIntReader;
use integer_encoding::VarIntWriter;

/**
Helpers that will be blanket implemented for structs that implement the [`std::io::Write`] trait.
*/
pub(crate) trait WriteHelpers {
    /// Write a slice to the buffer with the length of the slice prefixed with a varint-32 encoding.
    fn write_length_prefixed_slice(&mut self, slice: &[u8]) -> io::Result<usize>;
}

impl<W: Write> WriteHelpers for W {
    fn write_length_prefixed_slice(&mut self, slice: &[u8]) -> io::Result<usize> {
        let mut bytes_written: usize = 0;
        bytes_written += self.write_varint(slice.len() as u32)?;
        self.write_all(slice)?;
        bytes_written += slice.len();

        Ok(bytes_written)
    }
}

/**
Helpers that will be blanket implemented for structs that implement the [`std::io::Read`] trait.
*/
pub(crate) trait ReadHelpers {
    /// Read the value encoded as a varint32 length prefixed slice and return the value.
    fn read_length_prefixed_slice(&mut self) -> io::Result<Vec<u8>>;
}

impl<R: Read> ReadHelpers for R {
    fn read_length_prefixed_slice(&mut self) -> io::Result<Vec<u8>> {
        let length = self.read_varint::<u32>()? as usize;
        let mut buf = vec![0_u8; length];
        self.read_exact(&mut buf)?;

        Ok(buf)
    }
}
