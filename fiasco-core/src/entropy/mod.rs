// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `entropy` module implements the arithmetic coders of the FIASCO
//! bitstream: the full adaptive arithmetic coder with order-n models, the
//! binary adaptive coder used for tree bitstrings, and the table-driven
//! quasi-arithmetic coder (QAC).
//!
//! All coders operate on the 16-bit integer interval `[LOW, HIGH]` and share
//! the same rescale discipline with pending underflow bits.

mod arith;
mod binary;
mod qac;

pub use arith::{decode_array, encode_array, ArithDecoder, ArithEncoder, Model};
pub use binary::{BinaryDecoder, BinaryEncoder};
pub use qac::{
    lps_bits, mps_bits, next_index_lps, next_index_mps, prob_shift, QacDecoder, QacEncoder,
    MAX_INDEX, MAX_PROB, MIN_PROB,
};

pub(crate) const LOW: u16 = 0x0000;
pub(crate) const HIGH: u16 = 0xffff;
pub(crate) const FIRST_QUARTER: u16 = 0x4000;
pub(crate) const HALF: u16 = 0x8000;
pub(crate) const THIRD_QUARTER: u16 = 0xc000;

use std::io;

use crate::errors::Result;
use crate::io::{BitReader, BitWriter};

/// Renormalise the encoder interval, emitting settled bits and banking
/// underflow bits for later emission.
pub(crate) fn rescale_output<W: io::Write>(
    low: &mut u16,
    high: &mut u16,
    underflow: &mut u32,
    output: &mut BitWriter<W>,
) -> Result<()> {
    loop {
        if *high < HALF {
            output.put_bit(false)?;
            for _ in 0..*underflow {
                output.put_bit(true)?;
            }
            *underflow = 0;
        }
        else if *low >= HALF {
            output.put_bit(true)?;
            for _ in 0..*underflow {
                output.put_bit(false)?;
            }
            *underflow = 0;
        }
        else if *high < THIRD_QUARTER && *low >= FIRST_QUARTER {
            *underflow += 1;
            *high |= FIRST_QUARTER;
            *low &= FIRST_QUARTER - 1;
        }
        else {
            break;
        }
        *high = (*high << 1) | 1;
        *low <<= 1;
    }
    Ok(())
}

/// Renormalise the decoder interval, absorbing bits into the code value.
pub(crate) fn rescale_input<R: io::Read>(
    low: &mut u16,
    high: &mut u16,
    code: &mut u16,
    input: &mut BitReader<R>,
) -> Result<()> {
    loop {
        if *high >= HALF
            && *low < HALF
            && (*low & FIRST_QUARTER != FIRST_QUARTER || *high & FIRST_QUARTER != 0)
        {
            break;
        }
        else if *high < HALF || *low >= HALF {
            *low <<= 1;
            *high = (*high << 1) | 1;
            *code = (*code << 1) + u16::from(input.get_bit()?);
        }
        else {
            *code ^= FIRST_QUARTER;
            *low &= FIRST_QUARTER - 1;
            *low <<= 1;
            *high = (*high << 1) | (HALF + 1);
            *code = (*code << 1) + u16::from(input.get_bit()?);
        }
    }
    Ok(())
}
