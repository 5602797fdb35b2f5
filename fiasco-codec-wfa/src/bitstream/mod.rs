// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bit-accurate serialisation of FIASCO streams.
//!
//! A stream starts with the file header, followed by one block per frame:
//! the frame header, the optional tiling permutation, the bintree, the
//! optional nondeterminism block, the motion-compensation block of non-I
//! frames, the transition matrices, and the weights. Each decoding step
//! updates the same probability models as the encoder so that subsequent
//! blocks parse identically.

mod header;
mod matrices;
mod mc;
mod nd;
mod tree;
mod weights;

pub use header::{read_header, write_header};

use std::io;

use log::debug;

use fiasco_core::errors::{decode_error, Result};
use fiasco_core::io::{read_rice_code, write_rice_code, BitReader, BitWriter};

use crate::bintree::{height_of_level, width_of_level};
use crate::coder::CodingContext;
use crate::tiling::Tiling;
use crate::wfa::{FrameType, State, Wfa};

const RICE_K: u32 = 8;

/// Write the WFA of the current frame to `output`. The file header is
/// emitted in front of the first frame.
pub fn write_next_wfa<W: io::Write>(
    wfa: &Wfa,
    c: &CodingContext,
    output: &mut BitWriter<W>,
) -> Result<()> {
    if c.motion.number == 0 {
        write_header(&wfa.info, output)?;
    }

    let bits = output.bits_processed();

    write_rice_code(wfa.num_states() as u32, RICE_K, output)?;
    write_rice_code(wfa.frame_type as u32, RICE_K, output)?;
    write_rice_code(c.motion.number, RICE_K, output)?;

    output.byte_align()?;
    debug!("frame-header: {:5} bits", output.bits_processed() - bits);

    if c.tiling.exponent > 0 {
        output.put_bit(true)?;
        header::write_tiling(&c.tiling, output)?;
    }
    else {
        output.put_bit(false)?;
    }

    output.byte_align()?;

    tree::write_tree(wfa, output)?;

    if c.options.prediction {
        output.put_bit(true)?;
        nd::write_nd(wfa, output)?;
    }
    else {
        output.put_bit(false)?;
    }

    if wfa.frame_type != FrameType::I {
        mc::write_mc(wfa.frame_type, wfa, output)?;
    }

    let edges = matrices::write_matrices(
        c.options.normal_domains,
        c.options.delta_domains,
        wfa,
        output,
    )?;

    if edges > 0 {
        weights::write_weights(edges, wfa, output)?;
    }

    Ok(())
}

/// Read the next WFA frame from `input`. The stream header must already be
/// present in `wfa.info`, and the initial basis must be loaded.
///
/// Returns the display number of the frame.
pub fn read_next_wfa<R: io::Read>(wfa: &mut Wfa, input: &mut BitReader<R>) -> Result<u32> {
    let states = read_rice_code(RICE_K, input)? as usize;
    let frame_type = FrameType::from_code(read_rice_code(RICE_K, input)?)
        .ok_or(())
        .or_else(|_| decode_error("invalid frame type"))?;
    let frame_number = read_rice_code(RICE_K, input)?;

    if states > crate::wfa::MAX_STATES || states < wfa.basis_states {
        return decode_error("invalid number of states");
    }

    wfa.frame_type = frame_type;
    wfa.states.truncate(wfa.basis_states);
    wfa.states.resize(states, State::default());

    if wfa.info.release > 1 {
        input.byte_align();
    }

    let tiling = if input.get_bit()? {
        header::read_tiling(wfa.info.width, wfa.info.height, wfa.info.level, input)?
    }
    else {
        Tiling::none()
    };

    input.byte_align();

    tree::read_tree(wfa, &tiling, input)?;

    // Recompute the domain pool: states crossing the tiling level or lying
    // partially outside the image were not admitted by the coder.
    let lum_root = luminance_root(wfa);
    for state in wfa.basis_states..wfa.num_states() {
        let level = wfa.states[state].level;
        let x = wfa.states[state].labels[0].x;
        let y = wfa.states[state].labels[0].y;

        wfa.states[state].domain = (!wfa.info.color || state <= lum_root)
            && (tiling.exponent == 0 || level <= wfa.info.level - tiling.exponent)
            && x + width_of_level(level) <= wfa.info.width
            && y + height_of_level(level) <= wfa.info.height;
    }

    if input.get_bit()? {
        nd::read_nd(wfa, input)?;
    }

    if wfa.frame_type != FrameType::I {
        mc::read_mc(wfa.frame_type, wfa, input)?;
    }

    wfa.locate_delta_states();

    let edges = matrices::read_matrices(wfa, input)?;
    if edges > 0 {
        weights::read_weights(edges, wfa, input)?;
    }

    for state in wfa.basis_states..wfa.num_states() {
        wfa.states[state].final_distribution = wfa.compute_final_distribution(state);
    }

    Ok(frame_number)
}

/// Root state of the luminance band: for colour streams the first child
/// chain of the virtual root states, otherwise the root itself.
pub(crate) fn luminance_root(wfa: &Wfa) -> usize {
    if wfa.info.color {
        let node = wfa.states[wfa.root_state].labels[0].child.unwrap() as usize;
        wfa.states[node].labels[0].child.unwrap() as usize
    }
    else {
        wfa.root_state
    }
}
