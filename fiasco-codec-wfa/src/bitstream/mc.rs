// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The motion compensation block: a breadth-first tree of prediction types
//! followed by the VLC coded vector coordinates.

use std::io;

use log::debug;

use fiasco_core::errors::{decode_error, Result};
use fiasco_core::io::{BitReader, BitWriter};

use super::luminance_root;
use crate::bintree::{height_of_level, width_of_level};
use crate::motion::MV_CODE_TABLE;
use crate::wfa::{FrameType, MvKind, Wfa, MAX_LABELS};

/// Prediction type codes of P-frames: NONE `1`, FORWARD `0`.
const P_FRAME_CODES: [(u32, u32); 4] = [(1, 1), (0, 1), (0, 0), (0, 0)];

/// Prediction type codes of B-frames: NONE `1`, FORWARD `000`,
/// BACKWARD `001`, INTERPOLATED `01`.
const B_FRAME_CODES: [(u32, u32); 4] = [(1, 1), (0b000, 3), (0b001, 3), (0b01, 2)];

/// Write the motion compensation information of `wfa` to `output`.
pub fn write_mc<W: io::Write>(
    frame_type: FrameType,
    wfa: &Wfa,
    output: &mut BitWriter<W>,
) -> Result<()> {
    let max_state =
        if wfa.info.color { luminance_root(wfa) } else { wfa.num_states() };

    encode_mc_tree(max_state, frame_type, wfa, output)?;
    encode_mc_coords(max_state, wfa, output)
}

/// Read the motion compensation information of `wfa` from `input`.
pub fn read_mc<R: io::Read>(
    frame_type: FrameType,
    wfa: &mut Wfa,
    input: &mut BitReader<R>,
) -> Result<()> {
    let max_state =
        if wfa.info.color { luminance_root(wfa) } else { wfa.num_states() };

    decode_mc_tree(frame_type, max_state, wfa, input)?;
    decode_mc_coords(max_state, wfa, input)
}

/// States forming the first level of the MC tree, in breadth first order.
fn mc_tree_roots(max_state: usize, wfa: &Wfa) -> Vec<usize> {
    (wfa.basis_states..max_state)
        .filter(|&state| wfa.states[state].level == wfa.info.p_max_level + 1)
        .collect()
}

fn visible(state: usize, label: usize, wfa: &Wfa) -> bool {
    let entry = &wfa.states[state].labels[label];
    let level = wfa.states[state].level.saturating_sub(1);
    entry.x + width_of_level(level) <= wfa.info.width
        && entry.y + height_of_level(level) <= wfa.info.height
}

fn encode_mc_tree<W: io::Write>(
    max_state: usize,
    frame_type: FrameType,
    wfa: &Wfa,
    output: &mut BitWriter<W>,
) -> Result<()> {
    let bits = output.bits_processed();
    let codes =
        if frame_type == FrameType::P { &P_FRAME_CODES } else { &B_FRAME_CODES };
    let mut total = 0;

    let mut queue = mc_tree_roots(max_state, wfa);
    let mut current = 0;

    while current < queue.len() {
        let state = queue[current];
        current += 1;

        for label in 0..MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            let kind = entry.mv.kind;

            if visible(state, label, wfa) {
                let (code, len) = codes[kind as usize];
                output.put_bits(code, len)?;
                total += 1;
            }

            if kind == MvKind::None {
                if let Some(child) = entry.child {
                    if wfa.states[state].level >= wfa.info.p_min_level + 1 {
                        queue.push(child as usize);
                    }
                }
            }
        }
    }

    output.byte_align()?;
    debug!("mc-tree: {:5} bits ({:5} symbols)", output.bits_processed() - bits, total);

    Ok(())
}

fn decode_mc_tree<R: io::Read>(
    frame_type: FrameType,
    max_state: usize,
    wfa: &mut Wfa,
    input: &mut BitReader<R>,
) -> Result<()> {
    let mut queue = mc_tree_roots(max_state, wfa);
    let mut current = 0;

    while current < queue.len() {
        let state = queue[current];
        current += 1;

        for label in 0..MAX_LABELS {
            let kind = if !visible(state, label, wfa) {
                MvKind::None
            }
            else if frame_type == FrameType::P {
                if input.get_bit()? {
                    MvKind::None
                }
                else {
                    MvKind::Forward
                }
            }
            else if input.get_bit()? {
                MvKind::None
            }
            else if input.get_bit()? {
                MvKind::Interpolated
            }
            else if input.get_bit()? {
                MvKind::Backward
            }
            else {
                MvKind::Forward
            };

            wfa.states[state].labels[label].mv.kind = kind;

            if kind == MvKind::None {
                if let Some(child) = wfa.states[state].labels[label].child {
                    if wfa.states[state].level >= wfa.info.p_min_level + 1 {
                        queue.push(child as usize);
                    }
                }
            }
        }
    }

    input.byte_align();

    Ok(())
}

fn put_mv_component<W: io::Write>(
    value: i32,
    search_range: u32,
    output: &mut BitWriter<W>,
) -> Result<()> {
    let index = (value + search_range as i32) as usize;
    let (code, len) = MV_CODE_TABLE[index];
    output.put_bits(code, len)
}

fn encode_mc_coords<W: io::Write>(
    max_state: usize,
    wfa: &Wfa,
    output: &mut BitWriter<W>,
) -> Result<()> {
    let bits = output.bits_processed();
    let sr = wfa.info.search_range;
    let mut total = 0;

    for state in wfa.basis_states..max_state {
        for label in 0..MAX_LABELS {
            let mv = wfa.states[state].labels[label].mv;
            match mv.kind {
                MvKind::None => {}
                MvKind::Forward => {
                    put_mv_component(mv.fx, sr, output)?;
                    put_mv_component(mv.fy, sr, output)?;
                    total += 2;
                }
                MvKind::Backward => {
                    put_mv_component(mv.bx, sr, output)?;
                    put_mv_component(mv.by, sr, output)?;
                    total += 2;
                }
                MvKind::Interpolated => {
                    put_mv_component(mv.fx, sr, output)?;
                    put_mv_component(mv.fy, sr, output)?;
                    put_mv_component(mv.bx, sr, output)?;
                    put_mv_component(mv.by, sr, output)?;
                    total += 4;
                }
            }
        }
    }

    output.byte_align()?;
    debug!("mv-coords: {:5} bits ({:5} symbols)", output.bits_processed() - bits, total);

    Ok(())
}

/// Decode one VLC coded vector component by matching the accumulated bits
/// against the code table.
fn get_mv<R: io::Read>(search_range: u32, input: &mut BitReader<R>) -> Result<i32> {
    let mut code = 0u32;
    let mut len = 0u32;

    while len < 12 {
        code = (code << 1) | u32::from(input.get_bit()?);
        len += 1;

        for (index, &(value, length)) in MV_CODE_TABLE.iter().enumerate() {
            if length == len && value == code {
                return Ok(index as i32 - search_range as i32);
            }
        }
    }

    decode_error("invalid motion vector code")
}

fn decode_mc_coords<R: io::Read>(
    max_state: usize,
    wfa: &mut Wfa,
    input: &mut BitReader<R>,
) -> Result<()> {
    let sr = wfa.info.search_range;

    for state in wfa.basis_states..max_state {
        for label in 0..MAX_LABELS {
            let kind = wfa.states[state].labels[label].mv.kind;
            let mv = &mut wfa.states[state].labels[label].mv;
            match kind {
                MvKind::None => {}
                MvKind::Forward => {
                    mv.fx = get_mv(sr, input)?;
                    mv.fy = get_mv(sr, input)?;
                }
                MvKind::Backward => {
                    mv.bx = get_mv(sr, input)?;
                    mv.by = get_mv(sr, input)?;
                }
                MvKind::Interpolated => {
                    mv.fx = get_mv(sr, input)?;
                    mv.fy = get_mv(sr, input)?;
                    mv.bx = get_mv(sr, input)?;
                    mv.by = get_mv(sr, input)?;
                }
            }
        }
    }

    input.byte_align();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfa::{MotionVector, State, StreamInfo};

    #[test]
    fn verify_mv_component_round_trip() {
        for value in -16..=16 {
            let mut writer = BitWriter::new(Vec::new());
            put_mv_component(value, 16, &mut writer).unwrap();
            writer.byte_align().unwrap();
            let bytes = writer.finish().unwrap();

            let mut reader = BitReader::new(&bytes[..]);
            assert_eq!(get_mv(16, &mut reader).unwrap(), value);
        }
    }

    #[test]
    fn verify_mc_round_trip_for_p_frame() {
        let mut wfa = Wfa::new();
        wfa.info = StreamInfo {
            width: 512,
            height: 512,
            level: 18,
            p_min_level: 8,
            p_max_level: 10,
            ..StreamInfo::default()
        };
        wfa.frame_type = FrameType::P;
        wfa.states.push(State { domain: true, ..State::default() });
        wfa.basis_states = 1;

        // One state at p_max_level + 1 whose label 0 is predicted.
        let mut state = State { level: 11, ..State::default() };
        state.labels[0].mv =
            MotionVector { kind: MvKind::Forward, fx: -3, fy: 7, bx: 0, by: 0 };
        state.labels[1].mv = MotionVector::default();
        wfa.states.push(state);
        wfa.root_state = 1;

        let mut writer = BitWriter::new(Vec::new());
        write_mc(FrameType::P, &wfa, &mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut decoded = wfa.clone();
        for label in 0..MAX_LABELS {
            decoded.states[1].labels[label].mv = MotionVector::default();
        }

        let mut reader = BitReader::new(&bytes[..]);
        read_mc(FrameType::P, &mut decoded, &mut reader).unwrap();

        assert_eq!(decoded.states[1].labels[0].mv, wfa.states[1].labels[0].mv);
        assert_eq!(decoded.states[1].labels[1].mv.kind, MvKind::None);
    }
}
