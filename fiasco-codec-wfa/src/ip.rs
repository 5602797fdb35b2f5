// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Computation of inner products.
//!
//! Below `images_level` the inner products are computed directly on the
//! stored state images. Above it, they are derived from the transitions:
//! `<s, t> = sum over labels and edges of w * <d, t_child>`, evaluated one
//! level down. State x state products are cached when a state is appended,
//! image x state products are refreshed in bintree order per range.

use crate::bintree::size_of_level;
use crate::coder::{need_image, CodingContext};
use crate::wfa::{Wfa, MAX_LABELS};

/// Inner product between the subimage `address` and the state image
/// `domain` at `level`, computed on the stored pixels.
fn standard_ip_image_state(address: u32, level: u32, domain: u16, c: &CodingContext) -> f32 {
    debug_assert!(level <= c.options.images_level);

    let size = size_of_level(level);
    let image = &c.pixels[address as usize * size..(address as usize + 1) * size];
    let state_image = c.cache(domain as usize).image.as_ref().unwrap();
    let offset = size - 1;

    image.iter().zip(&state_image[offset..offset + size]).map(|(a, b)| a * b).sum()
}

/// Inner product between two state images at `level`, computed on the
/// stored pixels.
fn standard_ip_state_state(domain1: u16, domain2: u16, level: u32, c: &CodingContext) -> f32 {
    debug_assert!(level <= c.options.images_level);

    let size = size_of_level(level);
    let offset = size - 1;
    let image1 = c.cache(domain1 as usize).image.as_ref().unwrap();
    let image2 = c.cache(domain2 as usize).image.as_ref().unwrap();

    image1[offset..offset + size]
        .iter()
        .zip(&image2[offset..offset + size])
        .map(|(a, b)| a * b)
        .sum()
}

/// Inner product between the range image `image` (bintree address
/// `address`) and the state `domain` at `level`.
pub fn get_ip_image_state(
    image: u32,
    address: u32,
    level: u32,
    domain: u16,
    c: &CodingContext,
) -> f32 {
    if level <= c.options.images_level {
        standard_ip_image_state(address, level, domain, c)
    }
    else {
        c.cache(domain as usize).ip_images.as_ref().unwrap()[image as usize]
    }
}

/// Inner product between two states at `level`.
pub fn get_ip_state_state(domain1: u16, domain2: u16, level: u32, c: &CodingContext) -> f32 {
    if level <= c.options.images_level {
        standard_ip_state_state(domain1, domain2, level, c)
    }
    else if domain2 < domain1 {
        c.cache(domain1 as usize).ip_states[level as usize].as_ref().unwrap()[domain2 as usize]
    }
    else {
        c.cache(domain2 as usize).ip_states[level as usize].as_ref().unwrap()[domain1 as usize]
    }
}

/// Compute the inner products between the states `from..` and the range
/// image `image` (and its children) up to the given `level`.
pub fn compute_ip_images_state(
    image: u32,
    address: u32,
    level: u32,
    n: usize,
    from: usize,
    wfa: &Wfa,
    c: &mut CodingContext,
) {
    if level <= c.options.images_level {
        return;
    }

    if level > c.options.images_level + 1 {
        compute_ip_images_state(
            MAX_LABELS as u32 * image + 1,
            address * MAX_LABELS as u32,
            level - 1,
            MAX_LABELS * n,
            from,
            wfa,
            c,
        );
    }

    for label in 0..MAX_LABELS {
        for state in from..wfa.num_states() {
            if !need_image(state, wfa) {
                continue;
            }

            let entry = &wfa.states[state].labels[label];

            if let Some(child) = entry.child {
                let contributions = ip_contributions(image, address, level, label, n, child, 1.0, c);
                let dst = c.caches[state].ip_images.as_mut().unwrap();
                for (count, value) in contributions.into_iter().enumerate() {
                    dst[image as usize + count] += value;
                }
            }
            for edge_index in 0..entry.edges.len() {
                let edge = wfa.states[state].labels[label].edges[edge_index];
                let contributions =
                    ip_contributions(image, address, level, label, n, edge.into, edge.weight, c);
                let dst = c.caches[state].ip_images.as_mut().unwrap();
                for (count, value) in contributions.into_iter().enumerate() {
                    dst[image as usize + count] += value;
                }
            }
        }
    }
}

/// Contributions of `domain` to the products of `n` consecutive range
/// images, either read from the cached products one level down or computed
/// on the pixels.
fn ip_contributions(
    image: u32,
    address: u32,
    level: u32,
    label: usize,
    n: usize,
    domain: u16,
    weight: f32,
    c: &CodingContext,
) -> Vec<f32> {
    let mut values = Vec::with_capacity(n);

    if level > c.options.images_level + 1 {
        let src = c.cache(domain as usize).ip_images.as_ref().unwrap();
        let mut index = image as usize * MAX_LABELS + label + 1;
        for _ in 0..n {
            values.push(src[index] * weight);
            index += MAX_LABELS;
        }
    }
    else {
        let mut newadr = address * MAX_LABELS as u32 + label as u32;
        for _ in 0..n {
            values.push(weight * standard_ip_image_state(newadr, level - 1, domain, c));
            newadr += MAX_LABELS as u32;
        }
    }

    values
}

/// Compute the inner products between the states `from..=to` and all states
/// `0..=state` at the levels above `images_level`.
pub fn compute_ip_states_state(from: usize, to: usize, wfa: &Wfa, c: &mut CodingContext) {
    for level in c.options.images_level + 1..=c.options.lc_max_level {
        for state1 in from..=to {
            for state2 in 0..=state1 {
                if !need_image(state2, wfa) {
                    continue;
                }

                let mut ip = 0.0;
                for label in 0..MAX_LABELS {
                    let entry1 = &wfa.states[state1].labels[label];
                    let entry2 = &wfa.states[state2].labels[label];

                    if let Some(child1) = entry1.child {
                        let mut sum = 0.0;
                        if let Some(child2) = entry2.child {
                            sum = get_ip_state_state(child1, child2, level - 1, c);
                        }
                        for edge2 in &entry2.edges {
                            sum += edge2.weight
                                * get_ip_state_state(child1, edge2.into, level - 1, c);
                        }
                        ip += sum;
                    }
                    for edge1 in &entry1.edges {
                        let mut sum = 0.0;
                        if let Some(child2) = entry2.child {
                            sum = get_ip_state_state(edge1.into, child2, level - 1, c);
                        }
                        for edge2 in &entry2.edges {
                            sum += edge2.weight
                                * get_ip_state_state(edge1.into, edge2.into, level - 1, c);
                        }
                        ip += edge1.weight * sum;
                    }
                }

                c.caches[state1].ip_states[level as usize].as_mut().unwrap()[state2] = ip;
            }
        }
    }
}
