// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use crate::errors::{end_of_stream_error, Result};

const BUFFER_SIZE: usize = 16350;

/// A buffered bit-oriented writer.
///
/// Bits are accumulated most-significant first into bytes, bytes into an
/// internal buffer that is flushed to the underlying writer whenever it
/// fills. The partial final byte is zero-padded when the writer is finished.
pub struct BitWriter<W: io::Write> {
    inner: W,
    buffer: Vec<u8>,
    byte: u8,
    filled: u32,
    bits_processed: u64,
}

impl<W: io::Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        BitWriter {
            inner,
            buffer: Vec::with_capacity(BUFFER_SIZE),
            byte: 0,
            filled: 0,
            bits_processed: 0,
        }
    }

    /// Append a single bit to the stream.
    pub fn put_bit(&mut self, bit: bool) -> Result<()> {
        if bit {
            self.byte |= 1 << (7 - self.filled);
        }
        self.filled += 1;
        self.bits_processed += 1;

        if self.filled == 8 {
            self.buffer.push(self.byte);
            self.byte = 0;
            self.filled = 0;
            if self.buffer.len() == BUFFER_SIZE {
                self.inner.write_all(&self.buffer)?;
                self.buffer.clear();
            }
        }
        Ok(())
    }

    /// Append the `bits` least-significant bits of `value`, most-significant
    /// bit first.
    pub fn put_bits(&mut self, value: u32, bits: u32) -> Result<()> {
        let mut n = bits;
        while n > 0 {
            n -= 1;
            self.put_bit(value & (1 << n) != 0)?;
        }
        Ok(())
    }

    /// Flush zero bits until the stream is aligned to a byte boundary.
    pub fn byte_align(&mut self) -> Result<()> {
        while self.filled != 0 {
            self.put_bit(false)?;
        }
        Ok(())
    }

    /// Number of bits written so far.
    pub fn bits_processed(&self) -> u64 {
        self.bits_processed
    }

    /// Flush all pending bits (zero-padding the final byte) and return the
    /// underlying writer.
    pub fn finish(mut self) -> Result<W> {
        if self.filled != 0 {
            self.buffer.push(self.byte);
        }
        self.inner.write_all(&self.buffer)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// A buffered bit-oriented reader.
pub struct BitReader<R: io::Read> {
    inner: R,
    buffer: Vec<u8>,
    pos: usize,
    byte: u8,
    remaining: u32,
    bits_processed: u64,
}

impl<R: io::Read> BitReader<R> {
    pub fn new(inner: R) -> Self {
        BitReader {
            inner,
            buffer: Vec::new(),
            pos: 0,
            byte: 0,
            remaining: 0,
            bits_processed: 0,
        }
    }

    fn next_byte(&mut self) -> Result<u8> {
        if self.pos == self.buffer.len() {
            let mut chunk = vec![0u8; BUFFER_SIZE];
            let read = self.inner.read(&mut chunk)?;
            if read == 0 {
                return end_of_stream_error();
            }
            chunk.truncate(read);
            self.buffer = chunk;
            self.pos = 0;
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Read a single bit from the stream.
    pub fn get_bit(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            self.byte = self.next_byte()?;
            self.remaining = 8;
        }
        self.remaining -= 1;
        self.bits_processed += 1;
        Ok(self.byte & (1 << self.remaining) != 0)
    }

    /// Read `bits` bits and compose them into an integer, most-significant
    /// bit first.
    pub fn get_bits(&mut self, bits: u32) -> Result<u32> {
        let mut value = 0;
        for _ in 0..bits {
            value = (value << 1) | u32::from(self.get_bit()?);
        }
        Ok(value)
    }

    /// Discard bits until the stream is aligned to a byte boundary.
    pub fn byte_align(&mut self) {
        self.bits_processed += u64::from(self.remaining);
        self.remaining = 0;
    }

    /// Number of bits read so far.
    pub fn bits_processed(&self) -> u64 {
        self.bits_processed
    }
}

#[cfg(test)]
mod tests {
    use super::{BitReader, BitWriter};

    #[test]
    fn verify_bit_round_trip() {
        let mut writer = BitWriter::new(Vec::new());
        writer.put_bits(0b1011, 4).unwrap();
        writer.put_bit(true).unwrap();
        writer.byte_align().unwrap();
        writer.put_bits(0xabcd, 16).unwrap();
        assert_eq!(writer.bits_processed(), 24);
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes, vec![0b1011_1000, 0xab, 0xcd]);

        let mut reader = BitReader::new(&bytes[..]);
        assert_eq!(reader.get_bits(4).unwrap(), 0b1011);
        assert!(reader.get_bit().unwrap());
        reader.byte_align();
        assert_eq!(reader.get_bits(16).unwrap(), 0xabcd);
        assert_eq!(reader.bits_processed(), 24);
    }

    #[test]
    fn verify_reader_end_of_stream() {
        let mut reader = BitReader::new(&[0xff][..]);
        assert_eq!(reader.get_bits(8).unwrap(), 0xff);
        assert!(reader.get_bit().is_err());
    }

    #[test]
    fn verify_writer_zero_pads_final_byte() {
        let mut writer = BitWriter::new(Vec::new());
        writer.put_bit(true).unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes, vec![0x80]);
    }
}
