// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements buffered bit-level I/O and the universal codes
//! built on top of it.
//!
//! Bits are packed most-significant first within each byte. Both the reader
//! and the writer keep a running count of processed bits which the encoder
//! uses for rate bookkeeping, and both can re-align to a byte boundary (the
//! writer by flushing zero bits, the reader by discarding the remainder of
//! the current byte).

mod bitstream;
mod codes;

pub use bitstream::{BitReader, BitWriter};
pub use codes::{
    bits_bin_code, bits_rice_code, read_bin_code, read_rice_code, write_bin_code, write_rice_code,
};
