// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rice and adjusted-binary codes.

use std::io;

use crate::errors::Result;
use crate::io::{BitReader, BitWriter};

/// Write `value` using a Rice code with base `k`: the unary quotient as
/// 1-bits terminated by a 0-bit, followed by the `k`-bit remainder.
pub fn write_rice_code<W: io::Write>(
    value: u32,
    k: u32,
    output: &mut BitWriter<W>,
) -> Result<()> {
    for _ in 0..(value >> k) {
        output.put_bit(true)?;
    }
    output.put_bit(false)?;
    output.put_bits(value & ((1 << k) - 1), k)
}

/// Read a Rice encoded integer with base `k`.
pub fn read_rice_code<R: io::Read>(k: u32, input: &mut BitReader<R>) -> Result<u32> {
    let mut unary = 0;
    while input.get_bit()? {
        unary += 1;
    }
    Ok((unary << k) | input.get_bits(k)?)
}

/// Number of bits a Rice code with base `k` needs for `value`.
pub fn bits_rice_code(value: u32, k: u32) -> u32 {
    (value >> k) + k + 1
}

/// Write `value` in `[0, maxval]` using an adjusted binary code.
///
/// With `k = floor(log2(maxval + 1))` and `r = (maxval + 1) mod 2^k`, the
/// first `maxval + 1 - 2r` values take `k` bits, the remaining `2r` values
/// take `k + 1` bits.
pub fn write_bin_code<W: io::Write>(
    value: u32,
    maxval: u32,
    output: &mut BitWriter<W>,
) -> Result<()> {
    debug_assert!(maxval > 0 && value <= maxval);

    let k = (maxval + 1).ilog2();
    let r = (maxval + 1) % (1 << k);

    if value < maxval + 1 - 2 * r {
        output.put_bits(value, k)
    }
    else {
        output.put_bits(value + maxval + 1 - 2 * r, k + 1)
    }
}

/// Read an adjusted-binary encoded integer in `[0, maxval]`.
pub fn read_bin_code<R: io::Read>(maxval: u32, input: &mut BitReader<R>) -> Result<u32> {
    let k = (maxval + 1).ilog2();
    let r = (maxval + 1) % (1 << k);

    let mut value = input.get_bits(k)?;
    if value < maxval + 1 - 2 * r {
        Ok(value)
    }
    else {
        value <<= 1;
        if input.get_bit()? {
            value += 1;
        }
        Ok(value - maxval - 1 + 2 * r)
    }
}

/// Number of bits the adjusted binary code needs for `value` in `[0, maxval]`.
pub fn bits_bin_code(value: u32, maxval: u32) -> u32 {
    debug_assert!(maxval > 0 && value <= maxval);

    let k = (maxval + 1).ilog2();
    let r = (maxval + 1) % (1 << k);

    if value < maxval + 1 - 2 * r {
        k
    }
    else {
        k + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_rice_code_round_trip() {
        for k in 0..=16 {
            for value in [0u32, 1, 2, 3, 15, 16, 100, 255, 1000, 65535] {
                let mut writer = BitWriter::new(Vec::new());
                write_rice_code(value, k, &mut writer).unwrap();
                assert_eq!(writer.bits_processed(), u64::from(bits_rice_code(value, k)));
                let bytes = writer.finish().unwrap();

                let mut reader = BitReader::new(&bytes[..]);
                assert_eq!(read_rice_code(k, &mut reader).unwrap(), value);
            }
        }
    }

    #[test]
    fn verify_bin_code_round_trip() {
        for maxval in 1..=70u32 {
            for value in 0..=maxval {
                let mut writer = BitWriter::new(Vec::new());
                write_bin_code(value, maxval, &mut writer).unwrap();
                assert_eq!(writer.bits_processed(), u64::from(bits_bin_code(value, maxval)));
                let bytes = writer.finish().unwrap();

                let mut reader = BitReader::new(&bytes[..]);
                assert_eq!(read_bin_code(maxval, &mut reader).unwrap(), value);
            }
        }
    }
}
