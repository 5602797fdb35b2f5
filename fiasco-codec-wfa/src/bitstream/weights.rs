// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The weights block: all quantised transition weights, arithmetically
//! coded with one context per `(level, normal|delta, DC|non-DC)`.

use std::io;

use log::debug;

use fiasco_core::entropy::{decode_array, encode_array};
use fiasco_core::errors::Result;
use fiasco_core::io::{BitReader, BitWriter};

use crate::wfa::{Wfa, MAX_LABELS, MAX_LEVEL};

const WEIGHTS_SCALING: u32 = 500;

/// The probability model layout: the DC context, the delta DC context (if
/// used), one context per level of the normal weights, then one per level
/// of the delta weights.
struct WeightContexts {
    delta_approx: bool,
    offset1: usize,
    offset2: usize,
    offset3: usize,
    offset4: usize,
    min_level: u32,
    d_min_level: u32,
}

fn weight_contexts(wfa: &Wfa) -> WeightContexts {
    let delta_approx =
        (wfa.basis_states..wfa.num_states()).any(|state| wfa.states[state].delta);

    let mut min_level = MAX_LEVEL as u32;
    let mut max_level = 0;
    let mut d_min_level = MAX_LEVEL as u32;
    let mut d_max_level = 0;
    let mut dc = false;
    let mut d_dc = false;

    for state in wfa.basis_states..wfa.num_states() {
        for label in 0..MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            if entry.child.is_some() {
                continue;
            }

            let level = wfa.states[state].level.saturating_sub(1);
            let has_dc = entry.edges.first().map_or(false, |e| e.into == 0);

            if delta_approx && wfa.states[state].delta {
                d_min_level = d_min_level.min(level);
                d_max_level = d_max_level.max(level);
                d_dc |= has_dc;
            }
            else {
                min_level = min_level.min(level);
                max_level = max_level.max(level);
                dc |= has_dc;
            }
        }
    }

    if min_level > max_level {
        max_level = min_level - 1;
    }
    if d_min_level > d_max_level {
        d_max_level = d_min_level - 1;
    }

    let offset1 = usize::from(dc);
    let offset2 = offset1 + usize::from(d_dc);
    let offset3 = offset2 + (max_level - min_level + 1) as usize;
    let offset4 = offset3 + (d_max_level - d_min_level + 1) as usize;

    WeightContexts { delta_approx, offset1, offset2, offset3, offset4, min_level, d_min_level }
}

fn context_symbols(ctx: &WeightContexts, wfa: &Wfa) -> Vec<u32> {
    let mut c_symbols = vec![0u32; ctx.offset4];
    c_symbols[0] = wfa.info.dc_rpf.symbols();
    if ctx.offset1 != ctx.offset2 {
        c_symbols[ctx.offset1] = wfa.info.d_dc_rpf.symbols();
    }
    for symbol in c_symbols.iter_mut().take(ctx.offset3).skip(ctx.offset2) {
        *symbol = wfa.info.rpf.symbols();
    }
    for symbol in c_symbols.iter_mut().take(ctx.offset4).skip(ctx.offset3) {
        *symbol = wfa.info.d_rpf.symbols();
    }
    c_symbols
}

/// Write the `total` weights of `wfa` to `output`, ordered by state, label,
/// and domain number.
pub fn write_weights<W: io::Write>(total: u32, wfa: &Wfa, output: &mut BitWriter<W>) -> Result<()> {
    let bits = output.bits_processed();
    let ctx = weight_contexts(wfa);

    let mut weights = Vec::with_capacity(total as usize);
    let mut levels = Vec::with_capacity(total as usize);

    for state in wfa.basis_states..wfa.num_states() {
        for label in 0..MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            if entry.child.is_some() {
                continue;
            }

            let level = wfa.states[state].level.saturating_sub(1);
            let delta = ctx.delta_approx && wfa.states[state].delta;

            for edge in &entry.edges {
                if edge.into != 0 {
                    if delta {
                        weights.push(wfa.info.d_rpf.quantize(edge.weight) as u32);
                        levels.push((ctx.offset3 + (level - ctx.d_min_level) as usize) as u32);
                    }
                    else {
                        weights.push(wfa.info.rpf.quantize(edge.weight) as u32);
                        levels.push((ctx.offset2 + (level - ctx.min_level) as usize) as u32);
                    }
                }
                else if delta {
                    weights.push(wfa.info.d_dc_rpf.quantize(edge.weight) as u32);
                    levels.push(ctx.offset1 as u32);
                }
                else {
                    weights.push(wfa.info.dc_rpf.quantize(edge.weight) as u32);
                    levels.push(0);
                }
            }
        }
    }

    debug_assert_eq!(weights.len(), total as usize);

    let c_symbols = context_symbols(&ctx, wfa);
    encode_array(output, &weights, Some(&levels), &c_symbols, WEIGHTS_SCALING)?;

    debug!("weights: {:5} bits ({:5} symbols)", output.bits_processed() - bits, total);

    Ok(())
}

/// Read `total` weights from `input` and fill in the transition weights.
pub fn read_weights<R: io::Read>(total: u32, wfa: &mut Wfa, input: &mut BitReader<R>) -> Result<()> {
    let ctx = weight_contexts(wfa);

    let mut levels = Vec::with_capacity(total as usize);
    for state in wfa.basis_states..wfa.num_states() {
        for label in 0..MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            if entry.child.is_some() {
                continue;
            }

            let level = wfa.states[state].level.saturating_sub(1);
            let delta = ctx.delta_approx && wfa.states[state].delta;

            for edge in &entry.edges {
                if edge.into != 0 {
                    if delta {
                        levels.push((ctx.offset3 + (level - ctx.d_min_level) as usize) as u32);
                    }
                    else {
                        levels.push((ctx.offset2 + (level - ctx.min_level) as usize) as u32);
                    }
                }
                else if delta {
                    levels.push(ctx.offset1 as u32);
                }
                else {
                    levels.push(0);
                }
            }
        }
    }

    let c_symbols = context_symbols(&ctx, wfa);
    let weights = decode_array(input, Some(&levels), &c_symbols, total as usize, WEIGHTS_SCALING)?;

    let mut ptr = weights.into_iter();
    for state in wfa.basis_states..wfa.num_states() {
        let delta = ctx.delta_approx && wfa.states[state].delta;
        for label in 0..MAX_LABELS {
            let entry = &mut wfa.states[state].labels[label];
            if entry.child.is_some() {
                continue;
            }

            for edge in entry.edges.iter_mut() {
                let symbol = ptr.next().unwrap_or(0) as i32;
                edge.weight = if edge.into != 0 {
                    if delta {
                        wfa.info.d_rpf.dequantize(symbol)
                    }
                    else {
                        wfa.info.rpf.dequantize(symbol)
                    }
                }
                else if delta {
                    wfa.info.d_dc_rpf.dequantize(symbol)
                }
                else {
                    wfa.info.dc_rpf.dequantize(symbol)
                };
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfa::{Edge, State, StreamInfo};

    #[test]
    fn verify_weights_round_trip() {
        let mut wfa = Wfa::new();
        wfa.info = StreamInfo { width: 16, height: 16, level: 8, ..StreamInfo::default() };
        wfa.states.push(State { domain: true, ..State::default() });
        wfa.basis_states = 1;

        let rpf = wfa.info.rpf;
        let dc_rpf = wfa.info.dc_rpf;

        let mut leaf = State { level: 7, domain: true, ..State::default() };
        leaf.labels[0].edges.push(Edge { into: 0, weight: dc_rpf.dequantize(dc_rpf.quantize(0.7)) });
        leaf.labels[1].edges.push(Edge { into: 0, weight: dc_rpf.dequantize(dc_rpf.quantize(-0.3)) });
        leaf.labels[1].edges.push(Edge { into: 1, weight: rpf.dequantize(rpf.quantize(0.5)) });
        wfa.states.push(leaf);

        let mut root = State { level: 8, domain: true, ..State::default() };
        root.labels[0].child = Some(1);
        root.labels[1].edges.push(Edge { into: 1, weight: rpf.dequantize(rpf.quantize(-0.9)) });
        wfa.states.push(root);
        wfa.root_state = 2;

        let mut writer = BitWriter::new(Vec::new());
        write_weights(4, &wfa, &mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut decoded = wfa.clone();
        for state in 1..decoded.num_states() {
            for label in 0..MAX_LABELS {
                for edge in decoded.states[state].labels[label].edges.iter_mut() {
                    edge.weight = -1.0;
                }
            }
        }

        let mut reader = BitReader::new(&bytes[..]);
        read_weights(4, &mut decoded, &mut reader).unwrap();

        for state in 1..decoded.num_states() {
            for label in 0..MAX_LABELS {
                let expected: Vec<f32> = wfa.states[state].labels[label]
                    .edges
                    .iter()
                    .map(|e| e.weight)
                    .collect();
                let got: Vec<f32> = decoded.states[state].labels[label]
                    .edges
                    .iter()
                    .map(|e| e.weight)
                    .collect();
                assert_eq!(got, expected, "state {} label {}", state, label);
            }
        }
    }
}
