// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bintree partitioning block.
//!
//! The tree is traversed in breadth first order, emitting a '1' for every
//! child and a '0' for every range, coded with the binary adaptive coder.
//! The decoder rebuilds the tree in depth first order, which restores the
//! state numbering of the coder.

use std::io;

use log::debug;

use fiasco_core::entropy::{BinaryDecoder, BinaryEncoder};
use fiasco_core::errors::{decode_error, Result};
use fiasco_core::io::{BitReader, BitWriter};

use crate::bintree::{height_of_level, locate_subimage, width_of_level};
use crate::tiling::Tiling;
use crate::wfa::{Wfa, MAX_LABELS};

/// Write the bintree of `wfa` to `output`.
pub fn write_tree<W: io::Write>(wfa: &Wfa, output: &mut BitWriter<W>) -> Result<()> {
    let bits = output.bits_processed();

    // Traverse the tree in breadth first order using a queue.
    let mut tree_string: Vec<bool> = Vec::new();
    let mut queue: Vec<usize> = vec![wfa.root_state];
    let mut current = 0;

    while current < queue.len() {
        let state = queue[current];
        current += 1;
        for label in 0..MAX_LABELS {
            match wfa.states[state].labels[label].child {
                Some(child) => {
                    queue.push(child as usize);
                    tree_string.push(true);
                }
                None => tree_string.push(false),
            }
        }
    }

    let total = tree_string.len();
    debug_assert_eq!(total, (wfa.num_states() - wfa.basis_states) * MAX_LABELS);

    let scale = (total / 20) as u16;
    let mut encoder = BinaryEncoder::new(1, 11, scale);
    for &bit in &tree_string {
        encoder.encode(bit, output)?;
    }
    encoder.finish(output)?;

    debug!(
        "tree: {:5} bits ({:5} symbols)",
        output.bits_processed() - bits,
        total
    );

    Ok(())
}

/// Read the bintree partitioning from `input`: the number of states must
/// already be set from the frame header.
pub fn read_tree<R: io::Read>(wfa: &mut Wfa, tiling: &Tiling, input: &mut BitReader<R>) -> Result<()> {
    let total = (wfa.num_states() - wfa.basis_states) * MAX_LABELS;
    if total == 0 {
        return decode_error("stream contains no tree states");
    }
    let scale = (total / 20) as u16;

    let mut bitstring = Vec::with_capacity(total);
    let mut decoder = BinaryDecoder::new(1, 11, scale, input)?;
    for _ in 0..total {
        bitstring.push(decoder.decode(input)?);
    }
    decoder.finish(input);

    // Generate the tree in breadth first order.
    let n_nodes = wfa.num_states() - wfa.basis_states;
    let mut bfo_tree = vec![[-1i32; MAX_LABELS]; n_nodes];
    let mut next = 1;
    let mut buffer = bitstring.iter();
    let mut state = 0;
    while state < next {
        for label in 0..MAX_LABELS {
            let bit = *buffer.next().ok_or(()).or_else(|_| decode_error("truncated tree"))?;
            if bit {
                if next >= n_nodes {
                    return decode_error("malformed bintree");
                }
                bfo_tree[state][label] = next as i32;
                next += 1;
            }
        }
        state += 1;
    }

    if next != n_nodes {
        return decode_error("malformed bintree");
    }

    // Traverse the tree and restore the depth first order.
    let mut dst_state = wfa.basis_states;
    let level = wfa.info.level + if wfa.info.color { 2 } else { 0 };
    wfa.root_state =
        restore_depth_first_order(0, level, 0, 0, &mut dst_state, &bfo_tree, wfa, tiling);

    Ok(())
}

/// Map `src_state` (breadth first order) to a new state number in depth
/// first order, filling in the tree links, the coordinates and the level.
fn restore_depth_first_order(
    src_state: usize,
    level: u32,
    x: u32,
    y: u32,
    dst_state: &mut usize,
    bfo_tree: &[[i32; MAX_LABELS]],
    wfa: &mut Wfa,
    tiling: &Tiling,
) -> usize {
    let mut x = x;
    let mut y = y;

    // If tiling is performed, replace the coordinates at the tiling level.
    if tiling.exponent > 0 && level == wfa.info.level - tiling.exponent {
        for tile in 0..1u32 << tiling.exponent {
            let (x0, y0, _, _) = locate_subimage(wfa.info.level, level, tile);
            if x0 == x && y0 == y {
                let vorder = tiling.vorder[tile as usize];
                if vorder >= 0 {
                    let (nx, ny, _, _) = locate_subimage(wfa.info.level, level, vorder as u32);
                    x = nx;
                    y = ny;
                }
                break;
            }
        }
    }

    // Coordinates of the two children.
    let child_level = level.saturating_sub(1);
    let (newx, newy) = if wfa.info.color && level == wfa.info.level + 1 {
        ([0, 0], [0, 0])
    }
    else {
        (
            [x, if level & 1 == 1 { x } else { x + width_of_level(child_level) }],
            [y, if level & 1 == 1 { y + height_of_level(child_level) } else { y }],
        )
    };

    let mut child = [None; MAX_LABELS];
    for label in 0..MAX_LABELS {
        let domain = bfo_tree[src_state][label];
        if domain >= 0 {
            child[label] = Some(restore_depth_first_order(
                domain as usize,
                child_level,
                newx[label],
                newy[label],
                dst_state,
                bfo_tree,
                wfa,
                tiling,
            ) as u16);
        }
    }

    let state = *dst_state;
    for label in 0..MAX_LABELS {
        let entry = &mut wfa.states[state].labels[label];
        entry.child = child[label];
        entry.x = newx[label];
        entry.y = newy[label];
    }
    wfa.states[state].level = level;

    *dst_state += 1;
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfa::{State, StreamInfo};

    /// Build a small WFA whose tree has a fixed shape, write it, read it
    /// back, and compare the structure.
    #[test]
    fn verify_tree_round_trip_in_emission_order() {
        let mut wfa = Wfa::new();
        wfa.info = StreamInfo { width: 16, height: 16, level: 8, ..StreamInfo::default() };
        wfa.states.push(State { domain: true, ..State::default() });
        wfa.basis_states = 1;

        // States are created bottom-up (depth first, post order): two leaf
        // pairs at level 7, their parent at 8.
        let mut leaf1 = State { level: 7, ..State::default() };
        leaf1.labels[0].x = 0;
        leaf1.labels[1].x = 0;
        wfa.states.push(leaf1);
        let mut leaf2 = State { level: 7, ..State::default() };
        leaf2.labels[0].x = 8;
        leaf2.labels[1].x = 8;
        wfa.states.push(leaf2);
        let mut root = State { level: 8, ..State::default() };
        root.labels[0].child = Some(1);
        root.labels[1].child = Some(2);
        wfa.states.push(root);
        wfa.root_state = 3;

        let mut writer = BitWriter::new(Vec::new());
        write_tree(&wfa, &mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut decoded = Wfa::new();
        decoded.info = wfa.info.clone();
        decoded.states.push(State { domain: true, ..State::default() });
        decoded.basis_states = 1;
        decoded.states.resize(4, State::default());

        let mut reader = BitReader::new(&bytes[..]);
        read_tree(&mut decoded, &Tiling::none(), &mut reader).unwrap();

        assert_eq!(decoded.root_state, 3);
        assert_eq!(decoded.states[3].level, 8);
        assert_eq!(decoded.states[3].labels[0].child, Some(1));
        assert_eq!(decoded.states[3].labels[1].child, Some(2));
        assert_eq!(decoded.states[1].level, 7);
        assert_eq!(decoded.states[1].labels[0].child, None);
        // Label 1 of the root lies in the right half of the image.
        assert_eq!(decoded.states[2].labels[0].x, 8);
    }
}
