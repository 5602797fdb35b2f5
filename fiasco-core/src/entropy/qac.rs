// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Quasi-arithmetic coding (QAC).
//!
//! A multiplication-free approximation of binary arithmetic coding: the
//! probability of the less probable symbol (LPS) is restricted to powers of
//! two, so the interval split `(high - low) >> shift` replaces the usual
//! multiply/divide. The shift for probability index `i` comes from a table
//! laid out in groups `{1/2 x2, 1/4 x4, 1/8 x8, ..., 1/2^MAX_PROB x2^MAX_PROB}`.
//!
//! The probability index itself is owned by the caller: after an MPS it is
//! incremented (clamped at [`MAX_INDEX`]), after an LPS it is halved. This
//! lets models keep one index per modelled column.

use std::io;

use once_cell::sync::Lazy;

use crate::errors::Result;
use crate::io::{BitReader, BitWriter};

use super::{HIGH, LOW};

pub const MIN_PROB: u32 = 1;
pub const MAX_PROB: u32 = 9;

/// Largest valid probability index.
pub const MAX_INDEX: usize = 1020;

static SHIFTS: Lazy<Vec<u32>> = Lazy::new(|| {
    let mut table = vec![0; 1 << (MAX_PROB + 1)];
    let mut index = 0;
    for n in MIN_PROB..=MAX_PROB {
        for _ in 0..1u32 << n {
            table[index] = n;
            index += 1;
        }
    }
    table
});

static MPS_BITS: Lazy<Vec<f32>> = Lazy::new(|| {
    SHIFTS.iter().map(|&n| -(1.0 - (0.5f64).powi(n as i32)).log2() as f32).collect()
});

static LPS_BITS: Lazy<Vec<f32>> =
    Lazy::new(|| SHIFTS.iter().map(|&n| n as f32).collect());

/// Interval-split shift for probability index `index`.
pub fn prob_shift(index: usize) -> u32 {
    SHIFTS[index]
}

/// Information content of the more probable symbol at `index`, in bits.
pub fn mps_bits(index: usize) -> f32 {
    MPS_BITS[index]
}

/// Information content of the less probable symbol at `index`, in bits.
pub fn lps_bits(index: usize) -> f32 {
    LPS_BITS[index]
}

/// Probability index after coding an MPS.
pub fn next_index_mps(index: usize) -> usize {
    if index < MAX_INDEX {
        index + 1
    }
    else {
        index
    }
}

/// Probability index after coding an LPS.
pub fn next_index_lps(index: usize) -> usize {
    index >> 1
}

pub struct QacEncoder {
    low: u16,
    high: u16,
    underflow: u32,
}

impl Default for QacEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl QacEncoder {
    pub fn new() -> Self {
        QacEncoder { low: LOW, high: HIGH, underflow: 0 }
    }

    /// Encode the more probable symbol '0' with the probability of `index`.
    pub fn encode_mps<W: io::Write>(
        &mut self,
        index: usize,
        output: &mut BitWriter<W>,
    ) -> Result<()> {
        self.high = self.high - ((self.high - self.low) >> prob_shift(index)) - 1;
        super::rescale_output(&mut self.low, &mut self.high, &mut self.underflow, output)
    }

    /// Encode the less probable symbol '1' with the probability of `index`.
    pub fn encode_lps<W: io::Write>(
        &mut self,
        index: usize,
        output: &mut BitWriter<W>,
    ) -> Result<()> {
        self.low = self.high - ((self.high - self.low) >> prob_shift(index));
        super::rescale_output(&mut self.low, &mut self.high, &mut self.underflow, output)
    }

    /// Flush the coder and align the output to a byte boundary.
    pub fn finish<W: io::Write>(mut self, output: &mut BitWriter<W>) -> Result<()> {
        self.low = self.high;
        super::rescale_output(&mut self.low, &mut self.high, &mut self.underflow, output)?;
        output.byte_align()
    }
}

pub struct QacDecoder {
    low: u16,
    high: u16,
    code: u16,
}

impl QacDecoder {
    /// Prime the decoder with the first 16 bits of the stream.
    pub fn new<R: io::Read>(input: &mut BitReader<R>) -> Result<Self> {
        Ok(QacDecoder { low: LOW, high: HIGH, code: input.get_bits(16)? as u16 })
    }

    /// Decode one symbol with the probability of `index`. Returns `true` for
    /// the LPS.
    pub fn decode<R: io::Read>(
        &mut self,
        index: usize,
        input: &mut BitReader<R>,
    ) -> Result<bool> {
        let count = self.high - ((self.high - self.low) >> prob_shift(index));

        if self.code < count {
            self.high = count - 1;
            super::rescale_input(&mut self.low, &mut self.high, &mut self.code, input)?;
            Ok(false)
        }
        else {
            self.low = count;
            super::rescale_input(&mut self.low, &mut self.high, &mut self.code, input)?;
            Ok(true)
        }
    }

    /// Re-align the input to a byte boundary.
    pub fn finish<R: io::Read>(self, input: &mut BitReader<R>) {
        input.byte_align();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn verify_shift_table_layout() {
        assert_eq!(prob_shift(0), 1);
        assert_eq!(prob_shift(1), 1);
        assert_eq!(prob_shift(2), 2);
        assert_eq!(prob_shift(5), 2);
        assert_eq!(prob_shift(6), 3);
        assert_eq!(prob_shift(MAX_INDEX), MAX_PROB);
    }

    #[test]
    fn verify_index_update_rules() {
        assert_eq!(next_index_mps(0), 1);
        assert_eq!(next_index_mps(MAX_INDEX), MAX_INDEX);
        assert_eq!(next_index_lps(7), 3);
        assert_eq!(next_index_lps(0), 0);
    }

    #[test]
    fn verify_qac_round_trip_with_adaptive_index() {
        let mut rng = SmallRng::seed_from_u64(0xbead);
        let bits: Vec<bool> = (0..3000).map(|_| rng.gen_range(0..10) == 0).collect();

        let mut writer = BitWriter::new(Vec::new());
        let mut encoder = QacEncoder::new();
        let mut index = 0;
        for &bit in &bits {
            if bit {
                encoder.encode_lps(index, &mut writer).unwrap();
                index = next_index_lps(index);
            }
            else {
                encoder.encode_mps(index, &mut writer).unwrap();
                index = next_index_mps(index);
            }
        }
        encoder.finish(&mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        let mut decoder = QacDecoder::new(&mut reader).unwrap();
        let mut index = 0;
        for &bit in &bits {
            assert_eq!(decoder.decode(index, &mut reader).unwrap(), bit);
            index = if bit { next_index_lps(index) } else { next_index_mps(index) };
        }
    }
}
