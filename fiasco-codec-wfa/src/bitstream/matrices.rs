// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The transition matrix block.
//!
//! Column 0 (the DC transitions) is coded with the quasi-arithmetic coder.
//! The remaining columns use a delta-index scheme: an arithmetically coded
//! per-row edge count, then the ascending target states as adjusted-binary
//! deltas against the per-row maximum admitted domain. Colour streams append
//! the chroma matrices, again QAC coded over the most referenced Y states.

use std::io;

use log::debug;

use fiasco_core::entropy::{
    next_index_lps, next_index_mps, ArithDecoder, ArithEncoder, Model, QacDecoder, QacEncoder,
};
use fiasco_core::errors::{decode_error, Result};
use fiasco_core::io::{
    read_bin_code, read_rice_code, write_bin_code, write_rice_code, BitReader, BitWriter,
};

use super::luminance_root;
use crate::wfa::{Wfa, MAX_EDGES, MAX_LABELS};

/// Write the transition matrices of `wfa` to `output`. Returns the number
/// of transitions written.
pub fn write_matrices<W: io::Write>(
    use_normal_domains: bool,
    use_delta_domains: bool,
    wfa: &Wfa,
    output: &mut BitWriter<W>,
) -> Result<u32> {
    let root_state = luminance_root(wfa);

    let mut total = column_0_encoding(wfa, root_state, output)?;
    total += delta_encoding(use_normal_domains, use_delta_domains, wfa, root_state, output)?;

    if wfa.info.color {
        total += chroma_encoding(wfa, output)?;
    }

    Ok(total)
}

/// Read the transition matrices of `wfa` from `input`. Returns the number
/// of transitions read; all weights are placeholders until the weights
/// block is decoded.
pub fn read_matrices<R: io::Read>(wfa: &mut Wfa, input: &mut BitReader<R>) -> Result<u32> {
    let root_state = luminance_root(wfa);

    let mut total = column_0_decoding(wfa, root_state, input)?;
    total += delta_decoding(wfa, root_state, input)?;

    if wfa.info.color {
        total += chroma_decoding(wfa, input)?;
    }

    Ok(total)
}

/// Write column 0 of the matrices of rows `basis..=last_row` with the QAC.
fn column_0_encoding<W: io::Write>(
    wfa: &Wfa,
    last_row: usize,
    output: &mut BitWriter<W>,
) -> Result<u32> {
    let bits = output.bits_processed();
    let mut encoder = QacEncoder::new();
    let mut index = 0;
    let mut total = 0;

    for row in wfa.basis_states..=last_row {
        for label in 0..MAX_LABELS {
            let entry = &wfa.states[row].labels[label];
            if entry.child.is_some() {
                continue;
            }

            if entry.edges.first().map_or(true, |e| e.into != 0) {
                encoder.encode_mps(index, output)?;
                index = next_index_mps(index);
            }
            else {
                encoder.encode_lps(index, output)?;
                index = next_index_lps(index);
                total += 1;
            }
        }
    }

    encoder.finish(output)?;

    debug!("delta-state0: {:5} bits ({:5} symbols)", output.bits_processed() - bits, total);

    Ok(total)
}

/// Read column 0 of the matrices of rows `basis..=last_row`.
fn column_0_decoding<R: io::Read>(
    wfa: &mut Wfa,
    last_row: usize,
    input: &mut BitReader<R>,
) -> Result<u32> {
    let mut decoder = QacDecoder::new(input)?;
    let mut index = 0;
    let mut total = 0;

    for row in wfa.basis_states..=last_row {
        for label in 0..MAX_LABELS {
            if wfa.states[row].labels[label].child.is_some() {
                continue;
            }

            if decoder.decode(index, input)? {
                index = next_index_lps(index);
                wfa.append_edge(row, 0, -1.0, label);
                total += 1;
            }
            else {
                index = next_index_mps(index);
            }
        }
    }

    decoder.finish(input);

    Ok(total)
}

/// Rice parameter of the edge count histogram.
fn count_rice_k(last_domain: usize) -> u32 {
    (last_domain.max(8) as u32).ilog2().saturating_sub(2)
}

/// Write the remaining matrix columns with delta coding.
fn delta_encoding<W: io::Write>(
    use_normal_domains: bool,
    use_delta_domains: bool,
    wfa: &Wfa,
    last_domain: usize,
    output: &mut BitWriter<W>,
) -> Result<u32> {
    let list = wfa.range_list(last_domain);
    let mut total = 0;

    // Distribution of the number of edges per range.
    let bits = output.bits_processed();
    let mut count = [0u32; MAX_EDGES + 1];
    let mut max_edges = 0;
    let mut edges = 0;

    for state in wfa.basis_states..=last_domain {
        for label in 0..MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            if entry.child.is_none() {
                count[entry.edges.len()] += 1;
                edges += 1;
                max_edges = max_edges.max(entry.edges.len());
            }
        }
    }

    write_rice_code(max_edges as u32, 3, output)?;
    for n in 0..=max_edges {
        write_rice_code(count[n], count_rice_k(last_domain), output)?;
    }

    {
        let mut elements = Model::new(max_edges + 1, 0, 0, Some(&count[..=max_edges]));
        let mut encoder = ArithEncoder::new();

        for entry in &list {
            if !entry.subdivided {
                let n = wfa.states[entry.state as usize].labels[entry.label].edges.len();
                encoder.encode_symbol(n, &mut elements, output)?;
            }
        }
        encoder.finish(output)?;
    }
    debug!("delta-#edges: {:5} bits ({:5} symbols)", output.bits_processed() - bits, edges);

    // Matrix elements: ascending delta coded target states.
    let bits = output.bits_processed();

    output.put_bit(use_normal_domains)?;
    output.put_bit(use_delta_domains)?;

    let (mapping1, mapping2) = domain_mappings(use_normal_domains, use_delta_domains, wfa);

    for entry in &list {
        if entry.subdivided {
            continue;
        }

        let state = entry.state as usize;
        let label = entry.label;
        let mapping = if wfa.states[state].delta
            || wfa.states[state].labels[label].mv.kind != crate::wfa::MvKind::None
        {
            &mapping2
        }
        else {
            &mapping1
        };

        let max_value = mapping[entry.max_domain as usize];
        let mut last = 1u32;

        for edge in &wfa.states[state].labels[label].edges {
            if edge.into > 0 {
                total += 1;
                if max_value > last {
                    write_bin_code(mapping[edge.into as usize] - last, max_value - last, output)?;
                    last = mapping[edge.into as usize] + 1;
                }
            }
        }
    }

    debug!("delta-index: {:5} bits ({:5} symbols)", output.bits_processed() - bits, total);

    Ok(total)
}

/// Read the remaining matrix columns.
fn delta_decoding<R: io::Read>(
    wfa: &mut Wfa,
    last_domain: usize,
    input: &mut BitReader<R>,
) -> Result<u32> {
    let list = wfa.range_list(last_domain);
    let mut total = 0;

    let max_edges = read_rice_code(3, input)? as usize;
    if max_edges > MAX_EDGES {
        return decode_error("too many edges per transition");
    }

    let mut count = vec![0u32; max_edges + 1];
    for n in count.iter_mut() {
        *n = read_rice_code(count_rice_k(last_domain), input)?;
    }

    // Number of elements per matrix row.
    let mut n_edges: Vec<usize> = Vec::new();
    {
        let mut elements = Model::new(max_edges + 1, 0, 0, Some(&count));
        let mut decoder = ArithDecoder::new(input)?;

        for entry in &list {
            if !entry.subdivided {
                let state = entry.state as usize;
                let symbol = decoder.decode_symbol(&mut elements, input)?;
                let dc = usize::from(
                    !wfa.states[state].labels[entry.label].edges.is_empty(),
                );
                n_edges.push(symbol - dc.min(symbol));
            }
        }
        decoder.finish(input);
    }

    let use_normal_domains = input.get_bit()?;
    let use_delta_domains = input.get_bit()?;

    let (inverse1, coder1, inverse2, coder2) =
        inverse_domain_mappings(use_normal_domains, use_delta_domains, wfa);

    let mut row = 0;
    for entry in &list {
        if entry.subdivided {
            continue;
        }

        let state = entry.state as usize;
        let label = entry.label;

        let (inverse, coder) = if wfa.states[state].delta
            || wfa.states[state].labels[label].mv.kind != crate::wfa::MvKind::None
        {
            (&inverse2, &coder2)
        }
        else {
            (&inverse1, &coder1)
        };

        let max_value = coder[entry.max_domain as usize];
        let mut last = 1u32;

        for _ in 0..n_edges[row] {
            let domain = if max_value > last {
                read_bin_code(max_value - last, input)? + last
            }
            else {
                max_value
            };
            if domain as usize >= inverse.len() {
                return decode_error("domain index out of range");
            }
            wfa.append_edge(state, inverse[domain as usize], -1.0, label);
            last = domain + 1;
            total += 1;
        }
        row += 1;
    }

    Ok(total)
}

/// Compressed domain indices per state: `mapping1` admits normal domains,
/// `mapping2` delta domains.
fn domain_mappings(
    use_normal_domains: bool,
    use_delta_domains: bool,
    wfa: &Wfa,
) -> (Vec<u32>, Vec<u32>) {
    let mut mapping1 = vec![0u32; wfa.num_states()];
    let mut mapping2 = vec![0u32; wfa.num_states()];
    let mut n1 = 0;
    let mut n2 = 0;

    for state in 0..wfa.num_states() {
        mapping1[state] = n1;
        if wfa.states[state].domain
            && (state < wfa.basis_states || use_delta_domains || !wfa.states[state].delta)
        {
            n1 += 1;
        }

        mapping2[state] = n2;
        if wfa.states[state].domain
            && (state < wfa.basis_states || use_normal_domains || wfa.states[state].delta)
        {
            n2 += 1;
        }
    }

    (mapping1, mapping2)
}

/// Decoder-side mappings: compressed index to state (`inverse`) and state
/// to compressed index (`coder`).
#[allow(clippy::type_complexity)]
fn inverse_domain_mappings(
    use_normal_domains: bool,
    use_delta_domains: bool,
    wfa: &Wfa,
) -> (Vec<u16>, Vec<u32>, Vec<u16>, Vec<u32>) {
    let mut inverse1 = vec![0u16; wfa.num_states()];
    let mut coder1 = vec![0u32; wfa.num_states()];
    let mut inverse2 = vec![0u16; wfa.num_states()];
    let mut coder2 = vec![0u32; wfa.num_states()];
    let mut n1 = 0usize;
    let mut n2 = 0usize;

    for state in 0..wfa.num_states() {
        inverse1[n1] = state as u16;
        coder1[state] = n1 as u32;
        if wfa.states[state].domain
            && (state < wfa.basis_states || use_delta_domains || !wfa.states[state].delta)
        {
            n1 += 1;
        }

        inverse2[n2] = state as u16;
        coder2[state] = n2 as u32;
        if wfa.states[state].domain
            && (state < wfa.basis_states || use_normal_domains || wfa.states[state].delta)
        {
            n2 += 1;
        }
    }

    (inverse1, coder1, inverse2, coder2)
}

/// Write the chroma matrices: one QAC coded column per admitted Y domain,
/// then the Y-reference column.
fn chroma_encoding<W: io::Write>(wfa: &Wfa, output: &mut BitWriter<W>) -> Result<u32> {
    let bits = output.bits_processed();
    let luminance_root = luminance_root(wfa);
    let first_chroma = luminance_root + 1;

    let y_domains =
        wfa.compute_hits(wfa.basis_states, luminance_root, wfa.info.chroma_max_states);

    let mut encoder = QacEncoder::new();
    let mut total = 0;
    let mut next_index = 0;

    for &domain in &y_domains {
        let mut index = next_index;
        let mut save_index = true;

        for row in first_chroma..wfa.num_states() {
            for label in 0..MAX_LABELS {
                let entry = &wfa.states[row].labels[label];
                if entry.child.is_some() {
                    continue;
                }

                let matched = entry
                    .edges
                    .iter()
                    .any(|e| e.into == domain && Some(e.into) != entry.y_state);

                if !matched {
                    encoder.encode_mps(index, output)?;
                    index = next_index_mps(index);
                }
                else {
                    encoder.encode_lps(index, output)?;
                    index = next_index_lps(index);
                    total += 1;
                }
            }
            if save_index {
                next_index = index;
                save_index = false;
            }
        }
    }

    debug!("CbCr-matrix: {:5} bits ({:5} symbols)", output.bits_processed() - bits, total);
    let bits = output.bits_processed();
    let count = total;

    // The additional column marking transitions to the state with the same
    // spatial coordinates in the Y band.
    let mut index = 0;
    for row in first_chroma..wfa.num_states() {
        for label in 0..MAX_LABELS {
            if !wfa.states[row].labels[label].y_column {
                encoder.encode_mps(index, output)?;
                index = next_index_mps(index);
            }
            else {
                encoder.encode_lps(index, output)?;
                index = next_index_lps(index);
                total += 1;
            }
        }
    }

    encoder.finish(output)?;

    debug!(
        "Y-references: {:5} bits ({:5} symbols)",
        output.bits_processed() - bits,
        total - count
    );

    Ok(total)
}

/// Read the chroma matrices.
fn chroma_decoding<R: io::Read>(wfa: &mut Wfa, input: &mut BitReader<R>) -> Result<u32> {
    let luminance_root = luminance_root(wfa);
    let first_chroma = luminance_root + 1;

    let y_domains =
        wfa.compute_hits(wfa.basis_states, luminance_root, wfa.info.chroma_max_states);

    let mut decoder = QacDecoder::new(input)?;
    let mut total = 0;
    let mut next_index = 0;

    for &domain in &y_domains {
        let mut index = next_index;
        let mut save_index = true;

        for row in first_chroma..wfa.num_states() {
            for label in 0..MAX_LABELS {
                if wfa.states[row].labels[label].child.is_some() {
                    continue;
                }

                if decoder.decode(index, input)? {
                    index = next_index_lps(index);
                    wfa.append_edge(row, domain, -1.0, label);
                    total += 1;
                }
                else {
                    index = next_index_mps(index);
                }
            }
            if save_index {
                next_index = index;
                save_index = false;
            }
        }
    }

    // Compute the y_state links of the chroma trees before the Y-reference
    // column is decoded.
    let root = wfa.root_state;
    let top = wfa.states[root].labels[0].child.unwrap() as usize;
    let cb_root = wfa.states[top].labels[1].child;
    let cr_root = wfa.states[root].labels[1].child.and_then(|n| wfa.states[n as usize].labels[0].child);
    let y_root = wfa.states[top].labels[0].child.unwrap();
    if let Some(cb) = cb_root {
        compute_y_state(cb as usize, y_root as usize, wfa);
    }
    if let Some(cr) = cr_root {
        compute_y_state(cr as usize, y_root as usize, wfa);
    }

    let mut index = 0;
    for row in first_chroma..wfa.num_states() {
        for label in 0..MAX_LABELS {
            if decoder.decode(index, input)? {
                index = next_index_lps(index);
                if let Some(y_state) = wfa.states[row].labels[label].y_state {
                    wfa.append_edge(row, y_state, -1.0, label);
                    wfa.states[row].labels[label].y_column = true;
                    total += 1;
                }
                else {
                    return decode_error("y reference without y state");
                }
            }
            else {
                index = next_index_mps(index);
            }
        }
    }

    decoder.finish(input);

    Ok(total)
}

/// Fill in the `y_state` links: the states of the Y band with the same
/// spatial coordinates as the corresponding chroma states.
fn compute_y_state(state: usize, y_state: usize, wfa: &mut Wfa) {
    for label in 0..MAX_LABELS {
        let y_child = wfa.states[y_state].labels[label].child;
        wfa.states[state].labels[label].y_state = y_child;
        if let (Some(child), Some(y_child)) = (wfa.states[state].labels[label].child, y_child) {
            compute_y_state(child as usize, y_child as usize, wfa);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfa::{Edge, State, StreamInfo};

    /// A gray-scale WFA shaped like the coder builds them: basis states,
    /// leaf pairs with edges, and a root.
    fn build_wfa() -> Wfa {
        let mut wfa = Wfa::new();
        wfa.info = StreamInfo { width: 16, height: 16, level: 8, ..StreamInfo::default() };

        let mut dc = State { final_distribution: 128.0, domain: true, ..State::default() };
        for entry in dc.labels.iter_mut() {
            entry.edges.push(Edge { into: 0, weight: 1.0 });
        }
        wfa.states.push(dc);
        wfa.basis_states = 1;

        let mut leaf1 = State { level: 7, domain: true, ..State::default() };
        leaf1.labels[0].edges.push(Edge { into: 0, weight: 0.75 });
        leaf1.labels[1].edges.push(Edge { into: 0, weight: 0.5 });
        wfa.states.push(leaf1);

        let mut leaf2 = State { level: 7, domain: true, ..State::default() };
        leaf2.labels[0].edges.push(Edge { into: 0, weight: 0.25 });
        leaf2.labels[0].edges.push(Edge { into: 1, weight: 0.5 });
        leaf2.labels[1].edges.clear();
        wfa.states.push(leaf2);

        let mut root = State { level: 8, domain: true, ..State::default() };
        root.labels[0].child = Some(1);
        root.labels[1].child = Some(2);
        for (label, entry) in root.labels.iter_mut().enumerate() {
            entry.x = label as u32 * 8;
        }
        wfa.states.push(root);
        wfa.root_state = 3;

        wfa
    }

    #[test]
    fn verify_matrices_round_trip() {
        let wfa = build_wfa();

        let mut writer = BitWriter::new(Vec::new());
        // Three DC transitions plus one delta-coded transition.
        let total = write_matrices(true, true, &wfa, &mut writer).unwrap();
        assert_eq!(total, 4);
        let bytes = writer.finish().unwrap();

        // The decoder sees the same tree but no edges yet.
        let mut decoded = build_wfa();
        for state in decoded.basis_states..decoded.num_states() {
            for label in 0..MAX_LABELS {
                decoded.states[state].labels[label].edges.clear();
            }
        }

        let mut reader = BitReader::new(&bytes[..]);
        let read_total = read_matrices(&mut decoded, &mut reader).unwrap();
        assert_eq!(read_total, total);

        for state in decoded.basis_states..decoded.num_states() {
            for label in 0..MAX_LABELS {
                let expected: Vec<u16> = wfa.states[state].labels[label]
                    .edges
                    .iter()
                    .map(|e| e.into)
                    .collect();
                let got: Vec<u16> = decoded.states[state].labels[label]
                    .edges
                    .iter()
                    .map(|e| e.into)
                    .collect();
                assert_eq!(got, expected, "state {} label {}", state, label);
            }
        }
    }
}
