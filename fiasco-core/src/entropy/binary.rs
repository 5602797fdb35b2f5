// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary adaptive arithmetic coding.
//!
//! A stripped-down coder for bitstrings such as the bintree partitioning and
//! the prediction tree. The probability model is the pair `(sum0, sum1)`:
//! `sum0` counts '0' symbols and `sum1` counts all symbols. Both are halved
//! whenever `sum1` exceeds the rescale threshold.

use std::io;

use crate::errors::Result;
use crate::io::{BitReader, BitWriter};

use super::{HIGH, LOW};

pub struct BinaryEncoder {
    low: u16,
    high: u16,
    underflow: u32,
    sum0: u16,
    sum1: u16,
    scaling: u16,
}

impl BinaryEncoder {
    /// Create an encoder with initial counts `(sum0, sum1)` and the given
    /// rescale threshold.
    pub fn new(sum0: u16, sum1: u16, scaling: u16) -> Self {
        BinaryEncoder { low: LOW, high: HIGH, underflow: 0, sum0, sum1, scaling }
    }

    fn rescale<W: io::Write>(&mut self, output: &mut BitWriter<W>) -> Result<()> {
        super::rescale_output(&mut self.low, &mut self.high, &mut self.underflow, output)
    }

    /// Encode one bit and update the counts.
    pub fn encode<W: io::Write>(&mut self, bit: bool, output: &mut BitWriter<W>) -> Result<()> {
        let range = u32::from(self.high - self.low) + 1;

        if !bit {
            self.high = self.low
                + ((range * u32::from(self.sum0)) / u32::from(self.sum1) - 1) as u16;
            self.rescale(output)?;
            self.sum0 += 1;
        }
        else {
            self.low += ((range * u32::from(self.sum0)) / u32::from(self.sum1)) as u16;
            self.rescale(output)?;
        }

        self.sum1 += 1;
        if self.sum1 > self.scaling {
            self.sum0 >>= 1;
            self.sum1 >>= 1;
            if self.sum0 == 0 {
                self.sum0 = 1;
            }
            if self.sum0 >= self.sum1 {
                self.sum1 = self.sum0 + 1;
            }
        }
        Ok(())
    }

    /// Flush the coder and align the output to a byte boundary.
    pub fn finish<W: io::Write>(mut self, output: &mut BitWriter<W>) -> Result<()> {
        self.low = self.high;
        self.rescale(output)?;
        output.byte_align()
    }
}

pub struct BinaryDecoder {
    low: u16,
    high: u16,
    code: u16,
    sum0: u16,
    sum1: u16,
    scaling: u16,
}

impl BinaryDecoder {
    /// Create a decoder with initial counts `(sum0, sum1)`, priming it with
    /// the first 16 bits of the stream.
    pub fn new<R: io::Read>(
        sum0: u16,
        sum1: u16,
        scaling: u16,
        input: &mut BitReader<R>,
    ) -> Result<Self> {
        Ok(BinaryDecoder {
            low: LOW,
            high: HIGH,
            code: input.get_bits(16)? as u16,
            sum0,
            sum1,
            scaling,
        })
    }

    fn rescale<R: io::Read>(&mut self, input: &mut BitReader<R>) -> Result<()> {
        super::rescale_input(&mut self.low, &mut self.high, &mut self.code, input)
    }

    /// Decode one bit and update the counts.
    pub fn decode<R: io::Read>(&mut self, input: &mut BitReader<R>) -> Result<bool> {
        let range = u32::from(self.high - self.low) + 1;
        let count =
            ((u32::from(self.code - self.low) + 1) * u32::from(self.sum1) - 1) / range;

        let bit = count >= u32::from(self.sum0);
        if !bit {
            self.high = self.low
                + ((range * u32::from(self.sum0)) / u32::from(self.sum1) - 1) as u16;
            self.rescale(input)?;
            self.sum0 += 1;
        }
        else {
            self.low += ((range * u32::from(self.sum0)) / u32::from(self.sum1)) as u16;
            self.rescale(input)?;
        }

        self.sum1 += 1;
        if self.sum1 > self.scaling {
            self.sum0 >>= 1;
            self.sum1 >>= 1;
            if self.sum0 == 0 {
                self.sum0 = 1;
            }
            if self.sum0 >= self.sum1 {
                self.sum1 = self.sum0 + 1;
            }
        }
        Ok(bit)
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

    fn round_trip(bits: &[bool], sum0: u16, sum1: u16, scaling: u16) {
        let mut writer = BitWriter::new(Vec::new());
        let mut encoder = BinaryEncoder::new(sum0, sum1, scaling);
        for &bit in bits {
            encoder.encode(bit, &mut writer).unwrap();
        }
        encoder.finish(&mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        let mut decoder = BinaryDecoder::new(sum0, sum1, scaling, &mut reader).unwrap();
        for &bit in bits {
            assert_eq!(decoder.decode(&mut reader).unwrap(), bit);
        }
    }

    #[test]
    fn verify_binary_round_trip() {
        let mut rng = SmallRng::seed_from_u64(0xfeed);

        let random: Vec<bool> = (0..2000).map(|_| rng.gen_range(0..2) == 1).collect();
        round_trip(&random, 1, 11, 50);

        let skewed: Vec<bool> = (0..2000).map(|_| rng.gen_range(0..20) == 0).collect();
        round_trip(&skewed, 1, 11, 50);
        round_trip(&skewed, 1, 2, 20);
    }
}
