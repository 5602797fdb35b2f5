// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The nondeterminism block: a breadth-first coded tree marking the
//! predicted children, followed by the DC prediction coefficients.

use std::collections::VecDeque;
use std::io;

use log::debug;

use fiasco_core::entropy::{decode_array, encode_array, BinaryDecoder, BinaryEncoder};
use fiasco_core::errors::Result;
use fiasco_core::io::{BitReader, BitWriter};

use crate::wfa::{Wfa, MAX_LABELS};

const ND_SCALING: u16 = 50;

/// Write the prediction information of `wfa` to `output`.
pub fn write_nd<W: io::Write>(wfa: &Wfa, output: &mut BitWriter<W>) -> Result<()> {
    let total = encode_nd_tree(wfa, output)?;

    if total > 0 {
        encode_nd_coefficients(total, wfa, output)?;
    }

    Ok(())
}

/// Read the prediction information of `wfa` from `input`.
pub fn read_nd<R: io::Read>(wfa: &mut Wfa, input: &mut BitReader<R>) -> Result<()> {
    let total = decode_nd_tree(wfa, input)?;

    if total > 0 {
        decode_nd_coefficients(total, wfa, input)?;
    }

    Ok(())
}

fn encode_nd_tree<W: io::Write>(wfa: &Wfa, output: &mut BitWriter<W>) -> Result<u32> {
    let bits = output.bits_processed();
    let mut used = 0;
    let mut not_used = 0;

    let mut encoder = BinaryEncoder::new(1, 11, ND_SCALING);
    let mut queue: VecDeque<usize> = VecDeque::new();
    queue.push_back(wfa.root_state);

    while let Some(next) = queue.pop_front() {
        if wfa.states[next].level > wfa.info.p_max_level + 1 {
            // Nondeterminism is not allowed above 'p_max_level'.
            for label in 0..MAX_LABELS {
                if let Some(child) = wfa.states[next].labels[label].child {
                    queue.push_back(child as usize);
                }
            }
        }
        else if wfa.states[next].level > wfa.info.p_min_level {
            for label in 0..MAX_LABELS {
                let entry = &wfa.states[next].labels[label];
                if let Some(child) = entry.child {
                    if !entry.edges.is_empty() {
                        // Prediction used.
                        used += 1;
                        encoder.encode(true, output)?;
                    }
                    else {
                        not_used += 1;
                        if wfa.states[child as usize].level > wfa.info.p_min_level {
                            queue.push_back(child as usize);
                        }
                        encoder.encode(false, output)?;
                    }
                }
            }
        }
    }

    encoder.finish(output)?;

    debug!(
        "nd-tree: {:5} bits ({:5} symbols, {} used)",
        output.bits_processed() - bits,
        used + not_used,
        used
    );

    Ok(used)
}

fn decode_nd_tree<R: io::Read>(wfa: &mut Wfa, input: &mut BitReader<R>) -> Result<u32> {
    let mut total = 0;

    let mut decoder = BinaryDecoder::new(1, 11, ND_SCALING, input)?;
    let mut queue: VecDeque<usize> = VecDeque::new();
    queue.push_back(wfa.root_state);

    while let Some(next) = queue.pop_front() {
        if wfa.states[next].level > wfa.info.p_max_level + 1 {
            for label in 0..MAX_LABELS {
                if let Some(child) = wfa.states[next].labels[label].child {
                    queue.push_back(child as usize);
                }
            }
        }
        else if wfa.states[next].level > wfa.info.p_min_level {
            for label in 0..MAX_LABELS {
                if let Some(child) = wfa.states[next].labels[label].child {
                    if decoder.decode(input)? {
                        wfa.append_edge(next, 0, -1.0, label);
                        total += 1;
                    }
                    else if wfa.states[child as usize].level > wfa.info.p_min_level {
                        queue.push_back(child as usize);
                    }
                }
            }
        }
    }

    decoder.finish(input);

    Ok(total)
}

fn encode_nd_coefficients<W: io::Write>(
    total: u32,
    wfa: &Wfa,
    output: &mut BitWriter<W>,
) -> Result<()> {
    let bits = output.bits_processed();
    let dc_rpf = &wfa.info.dc_rpf;

    let mut coefficients = Vec::with_capacity(total as usize);
    for state in wfa.basis_states..wfa.num_states() {
        for label in 0..MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            if entry.child.is_some() && !entry.edges.is_empty() {
                for edge in &entry.edges {
                    coefficients.push(dc_rpf.quantize(edge.weight) as u32);
                }
            }
        }
    }

    encode_array(output, &coefficients, None, &[dc_rpf.symbols()], u32::from(ND_SCALING))?;

    debug!(
        "nd-factors: {:5} bits ({:5} symbols)",
        output.bits_processed() - bits,
        total
    );

    Ok(())
}

fn decode_nd_coefficients<R: io::Read>(
    total: u32,
    wfa: &mut Wfa,
    input: &mut BitReader<R>,
) -> Result<()> {
    let dc_rpf = wfa.info.dc_rpf;

    let coefficients =
        decode_array(input, None, &[dc_rpf.symbols()], total as usize, u32::from(ND_SCALING))?;

    let mut ptr = coefficients.into_iter();
    for state in wfa.basis_states..wfa.num_states() {
        for label in 0..MAX_LABELS {
            let entry = &mut wfa.states[state].labels[label];
            if entry.child.is_some() && !entry.edges.is_empty() {
                let symbol = ptr.next().unwrap_or(0);
                entry.edges[0].weight = dc_rpf.dequantize(symbol as i32);
            }
        }
    }

    Ok(())
}
