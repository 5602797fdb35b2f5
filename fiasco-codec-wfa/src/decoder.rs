// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image regeneration from a WFA.
//!
//! State images are evaluated level-synchronously: the level-0 image of a
//! state is its final distribution, and each higher plane is the weighted
//! sum of the children planes one level down. This works for arbitrary
//! (also mutually referencing) basis transitions because a plane only ever
//! depends on the planes of the previous level. The bintree is then walked
//! once to paste leaves and linear combinations into the output planes.

use fiasco_core::errors::{decode_error, Result};

use crate::bintree::{bintree_to_raster, size_of_level, size_of_tree};
use crate::image::Image;
use crate::motion::extract_mc_block;
use crate::wfa::{MvKind, Wfa, MAX_LABELS};

/// Multiresolution images of all states referenced as domains, up to
/// `max_level`.
struct DomainImages {
    max_level: u32,
    images: Vec<Option<Vec<f32>>>,
}

impl DomainImages {
    fn plane(&self, state: u16, level: u32) -> &[f32] {
        let offset = size_of_level(level) - 1;
        let size = size_of_level(level);
        &self.images[state as usize].as_ref().unwrap()[offset..offset + size]
    }
}

fn compute_domain_images(wfa: &Wfa) -> Result<DomainImages> {
    // Levels at which domain images are evaluated, and the referenced
    // states.
    let mut max_level = 0;
    let mut needed = vec![false; wfa.num_states()];

    for state in 0..wfa.num_states() {
        for label in 0..MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            if !entry.edges.is_empty() && state >= wfa.basis_states {
                max_level = max_level.max(wfa.states[state].level.saturating_sub(1));
            }
            for edge in &entry.edges {
                if edge.into as usize >= wfa.num_states() {
                    return decode_error("transition into unknown state");
                }
                needed[edge.into as usize] = true;
            }
        }
    }

    if max_level as usize >= crate::wfa::MAX_LEVEL {
        return decode_error("transition level out of range");
    }
    for state in 0..wfa.basis_states {
        needed[state] = true;
    }

    // Close the set downward: the evaluation of a needed state reaches its
    // children and edge targets.
    loop {
        let mut changed = false;
        for state in (0..wfa.num_states()).rev() {
            if !needed[state] {
                continue;
            }
            for label in 0..MAX_LABELS {
                let entry = &wfa.states[state].labels[label];
                if let Some(child) = entry.child {
                    if !needed[child as usize] {
                        needed[child as usize] = true;
                        changed = true;
                    }
                }
                for edge in &entry.edges {
                    if !needed[edge.into as usize] {
                        needed[edge.into as usize] = true;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut images: Vec<Option<Vec<f32>>> = vec![None; wfa.num_states()];
    for state in 0..wfa.num_states() {
        if needed[state] {
            let mut image = vec![0.0; size_of_tree(max_level)];
            image[0] = wfa.states[state].final_distribution;
            images[state] = Some(image);
        }
    }

    for level in 1..=max_level {
        let offset = size_of_level(level) - 1;
        let src_offset = size_of_level(level - 1) - 1;
        let half = size_of_level(level - 1);

        for state in 0..wfa.num_states() {
            if images[state].is_none() {
                continue;
            }

            for label in 0..MAX_LABELS {
                let entry = &wfa.states[state].labels[label];
                let mut plane = vec![0.0f32; half];

                if let Some(child) = entry.child {
                    let src = images[child as usize]
                        .as_ref()
                        .ok_or(())
                        .or_else(|_| decode_error("dangling tree child"))?;
                    plane.copy_from_slice(&src[src_offset..src_offset + half]);
                }
                for edge in &entry.edges {
                    let src = images[edge.into as usize]
                        .as_ref()
                        .ok_or(())
                        .or_else(|_| decode_error("dangling transition"))?;
                    for (d, s) in plane.iter_mut().zip(&src[src_offset..src_offset + half]) {
                        *d += s * edge.weight;
                    }
                }

                let dst = images[state].as_mut().unwrap();
                dst[offset + label * half..offset + (label + 1) * half]
                    .copy_from_slice(&plane);
            }
        }
    }

    Ok(DomainImages { max_level, images })
}

/// Evaluate the subtree of `state` at `level` into a bintree ordered
/// buffer.
fn render_state(
    state: usize,
    level: u32,
    dst: &mut [f32],
    wfa: &Wfa,
    domains: &DomainImages,
) -> Result<()> {
    debug_assert_eq!(dst.len(), size_of_level(level));

    let half = size_of_level(level - 1);
    for label in 0..MAX_LABELS {
        let entry = &wfa.states[state].labels[label];
        let slice = &mut dst[label * half..(label + 1) * half];

        match entry.child {
            Some(child) => render_state(child as usize, level - 1, slice, wfa, domains)?,
            None => slice.fill(0.0),
        }

        if !entry.edges.is_empty() {
            if level - 1 > domains.max_level {
                return decode_error("transition above evaluated levels");
            }
            for edge in &entry.edges {
                let src = domains.plane(edge.into, level - 1);
                for (d, s) in slice.iter_mut().zip(src) {
                    *d += s * edge.weight;
                }
            }
        }
    }

    Ok(())
}

fn raster_band(
    root: usize,
    wfa: &Wfa,
    domains: &DomainImages,
    width: u32,
    height: u32,
) -> Result<Vec<i16>> {
    let level = wfa.states[root].level;
    let mut tree_buffer = vec![0.0f32; size_of_level(level)];
    render_state(root, level, &mut tree_buffer, wfa, domains)?;

    let mut raster = vec![0.0f32; (width * height) as usize];
    bintree_to_raster(
        &tree_buffer,
        &mut raster,
        width,
        height,
        0,
        0,
        crate::bintree::width_of_level(level),
        crate::bintree::height_of_level(level),
    );

    Ok(raster
        .into_iter()
        .map(|f| ((f * 16.0 + 0.5) as i32).clamp(0, 255 * 16) as i16)
        .collect())
}

/// Regenerate the frame described by `wfa`.
pub fn decode_image(wfa: &Wfa) -> Result<Image> {
    let width = wfa.info.width;
    let height = wfa.info.height;
    let domains = compute_domain_images(wfa)?;

    let mut image = Image::new(width, height, wfa.info.color);

    if !wfa.info.color {
        image.pixels[0] = raster_band(wfa.root_state, wfa, &domains, width, height)?;
    }
    else {
        let root = wfa.root_state;
        let top = wfa.states[root].labels[0]
            .child
            .ok_or(())
            .or_else(|_| decode_error("malformed colour root"))?;
        let y_root = wfa.states[top as usize].labels[0]
            .child
            .ok_or(())
            .or_else(|_| decode_error("malformed colour root"))?;
        let cb_root = wfa.states[top as usize].labels[1]
            .child
            .ok_or(())
            .or_else(|_| decode_error("malformed colour root"))?;
        let cr_node = wfa.states[root].labels[1]
            .child
            .ok_or(())
            .or_else(|_| decode_error("malformed colour root"))?;
        let cr_root = wfa.states[cr_node as usize].labels[0]
            .child
            .ok_or(())
            .or_else(|_| decode_error("malformed colour root"))?;

        image.pixels[0] = raster_band(y_root as usize, wfa, &domains, width, height)?;
        image.pixels[1] = raster_band(cb_root as usize, wfa, &domains, width, height)?;
        image.pixels[2] = raster_band(cr_root as usize, wfa, &domains, width, height)?;
    }

    Ok(image)
}

/// Restore the motion compensated prediction of a decoded non-I frame:
/// the decoded residual plus the prediction from the reference frames.
pub fn restore_mc(
    frame: &mut Image,
    past: &Image,
    future: Option<&Image>,
    wfa: &Wfa,
) -> Result<()> {
    let p_max = wfa.info.p_max_level;
    let mut mcblock1 = vec![0i16; size_of_level(p_max)];
    let mut mcblock2 = vec![0i16; size_of_level(p_max)];

    for state in wfa.basis_states..wfa.num_states() {
        for label in 0..MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            if entry.mv.kind == MvKind::None {
                continue;
            }

            let level = wfa.states[state].level - 1;
            let width = crate::bintree::width_of_level(level);
            let height = crate::bintree::height_of_level(level);
            let size = (width * height) as usize;

            for band in frame.bands() {
                // Chroma planes use the vector rounded to full pixels.
                let (fx, fy, bx, by) = if band == 0 {
                    (entry.mv.fx, entry.mv.fy, entry.mv.bx, entry.mv.by)
                }
                else {
                    (
                        (entry.mv.fx / 2) * 2,
                        (entry.mv.fy / 2) * 2,
                        (entry.mv.bx / 2) * 2,
                        (entry.mv.by / 2) * 2,
                    )
                };

                let prediction: &[i16] = match entry.mv.kind {
                    MvKind::Forward => {
                        extract_mc_block(
                            &mut mcblock1[..size],
                            width,
                            height,
                            &past.pixels[band],
                            past.width,
                            wfa.info.half_pixel,
                            entry.x,
                            entry.y,
                            fx,
                            fy,
                        );
                        &mcblock1[..size]
                    }
                    MvKind::Backward => {
                        let future = future
                            .ok_or(())
                            .or_else(|_| decode_error("missing future reference"))?;
                        extract_mc_block(
                            &mut mcblock1[..size],
                            width,
                            height,
                            &future.pixels[band],
                            future.width,
                            wfa.info.half_pixel,
                            entry.x,
                            entry.y,
                            bx,
                            by,
                        );
                        &mcblock1[..size]
                    }
                    MvKind::Interpolated => {
                        let future = future
                            .ok_or(())
                            .or_else(|_| decode_error("missing future reference"))?;
                        extract_mc_block(
                            &mut mcblock1[..size],
                            width,
                            height,
                            &past.pixels[band],
                            past.width,
                            wfa.info.half_pixel,
                            entry.x,
                            entry.y,
                            fx,
                            fy,
                        );
                        extract_mc_block(
                            &mut mcblock2[..size],
                            width,
                            height,
                            &future.pixels[band],
                            future.width,
                            wfa.info.half_pixel,
                            entry.x,
                            entry.y,
                            bx,
                            by,
                        );
                        for (a, &b) in mcblock1[..size].iter_mut().zip(&mcblock2[..size]) {
                            *a = ((i32::from(*a) + i32::from(b)) / 2) as i16;
                        }
                        &mcblock1[..size]
                    }
                    MvKind::None => unreachable!(),
                };

                let frame_width = frame.width;
                let plane = &mut frame.pixels[band];
                for y in 0..height {
                    for x in 0..width {
                        let dst = &mut plane
                            [((entry.y + y) * frame_width + entry.x + x) as usize];
                        let sum = i32::from(*dst)
                            + i32::from(prediction[(y * width + x) as usize]);
                        *dst = sum.clamp(0, 255 * 16) as i16;
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis;
    use crate::wfa::{Edge, State, StreamInfo};

    /// A WFA whose root approximates the whole image with the DC state at
    /// weight one decodes to solid grey.
    #[test]
    fn verify_flat_wfa_decodes_to_grey() {
        let mut wfa = Wfa::new();
        assert!(basis::get_linked_basis("small.wfa", &mut wfa));
        wfa.info = StreamInfo { width: 16, height: 16, level: 8, ..StreamInfo::default() };

        let mut root = State { level: 8, final_distribution: 128.0, ..State::default() };
        for entry in root.labels.iter_mut() {
            entry.edges.push(Edge { into: 0, weight: 1.0 });
        }
        wfa.states.push(root);
        wfa.root_state = 3;

        let image = decode_image(&wfa).unwrap();
        assert!(image.pixels[0].iter().all(|&p| p == 128 << 4));
    }

    /// A root mixing the DC state at different weights per label splits the
    /// image into two brightness halves.
    #[test]
    fn verify_two_level_wfa_decodes_halves() {
        let mut wfa = Wfa::new();
        assert!(basis::get_linked_basis("small.wfa", &mut wfa));
        wfa.info = StreamInfo { width: 16, height: 16, level: 8, ..StreamInfo::default() };

        let mut root = State { level: 8, ..State::default() };
        root.labels[0].edges.push(Edge { into: 0, weight: 0.5 });
        root.labels[1].edges.push(Edge { into: 0, weight: 1.5 });
        wfa.states.push(root);
        wfa.root_state = 3;

        let image = decode_image(&wfa).unwrap();
        // Label 0 is the left half at level 8.
        assert_eq!(image.pixels[0][0], 64 << 4);
        assert_eq!(image.pixels[0][15], 192 << 4);
    }
}
