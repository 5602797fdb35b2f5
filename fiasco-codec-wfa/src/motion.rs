// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Motion estimation and compensation.
//!
//! P-frames search the past reference exhaustively inside the configured
//! search range, reusing a norms table that is accumulated bottom-up across
//! the levels. B-frames search past and future independently and then try a
//! bidirectional combination. Motion-vector components use the MPEG/H.263
//! variable length code table.

use crate::bintree::{height_of_level, width_of_level};
use crate::coder::MAX_COSTS;
use crate::image::{Image, GRAY};
use crate::subdivide::Range;
use crate::wfa::{FrameType, MotionVector, MvKind, StreamInfo, MAX_LEVEL};

/// MPEG's Huffman code for vector components, `(code, length)` per
/// component value in `-16..=16`.
pub const MV_CODE_TABLE: [(u32, u32); 33] = [
    (0x19, 11),
    (0x1b, 11),
    (0x1d, 11),
    (0x1f, 11),
    (0x21, 11),
    (0x23, 11),
    (0x13, 10),
    (0x15, 10),
    (0x17, 10),
    (0x7, 8),
    (0x9, 8),
    (0xb, 8),
    (0x7, 7),
    (0x3, 5),
    (0x3, 4),
    (0x3, 3),
    (0x1, 1),
    (0x2, 3),
    (0x2, 4),
    (0x2, 5),
    (0x6, 7),
    (0xa, 8),
    (0x8, 8),
    (0x6, 8),
    (0x16, 10),
    (0x14, 10),
    (0x12, 10),
    (0x22, 11),
    (0x20, 11),
    (0x1e, 11),
    (0x1c, 11),
    (0x1a, 11),
    (0x18, 11),
];

const LOCAL_RANGE: i32 = 6;

/// Motion estimation context of the current frame.
pub struct Motion {
    pub original: Option<Image>,
    pub past: Option<Image>,
    pub future: Option<Image>,
    pub frame_type: FrameType,
    /// Display number of the frame.
    pub number: u32,
    /// Bit cost per motion vector component.
    pub xbits: Vec<f32>,
    pub ybits: Vec<f32>,
    /// Norms of the motion compensated prediction error, per level and
    /// displacement.
    pub forward_norms: Vec<Vec<f32>>,
    pub backward_norms: Vec<Vec<f32>>,
}

fn norms_range_size(info: &StreamInfo) -> usize {
    let sr = if info.half_pixel { info.search_range } else { 2 * info.search_range };
    (sr * sr) as usize
}

impl Motion {
    pub fn new(info: &StreamInfo) -> Motion {
        let sr = info.search_range as usize;
        let mut xbits = vec![0.0; 2 * sr];
        for dx in 0..2 * sr {
            xbits[dx] = MV_CODE_TABLE[dx].1 as f32;
        }
        let ybits = xbits.clone();

        let range_size = norms_range_size(info);
        let mut forward_norms = vec![Vec::new(); MAX_LEVEL];
        let mut backward_norms = vec![Vec::new(); MAX_LEVEL];
        for level in info.p_min_level..=info.p_max_level {
            forward_norms[level as usize] = vec![0.0; range_size];
            backward_norms[level as usize] = vec![0.0; range_size];
        }

        Motion {
            original: None,
            past: None,
            future: None,
            frame_type: FrameType::I,
            number: 0,
            xbits,
            ybits,
            forward_norms,
            backward_norms,
        }
    }
}

/// Extract the block predicted by the motion vector `(mx, my)` at position
/// `(x0, y0)` from `reference`. With `half_pixel` the vector components are
/// in half-pel units and the samples are bilinearly interpolated.
pub fn extract_mc_block(
    mcblock: &mut [i16],
    width: u32,
    height: u32,
    reference: &[i16],
    ref_width: u32,
    half_pixel: bool,
    x0: u32,
    y0: u32,
    mx: i32,
    my: i32,
) {
    let ref_height = reference.len() as u32 / ref_width;

    if !half_pixel {
        for y in 0..height {
            let sy = (y0 + y) as i32 + my;
            for x in 0..width {
                let sx = (x0 + x) as i32 + mx;
                mcblock[(y * width + x) as usize] =
                    reference[(sy as u32 * ref_width + sx as u32) as usize];
            }
        }
    }
    else {
        let hx = mx & 1;
        let hy = my & 1;
        let sample = |x: i32, y: i32| -> i32 {
            let x = x.clamp(0, ref_width as i32 - 1);
            let y = y.clamp(0, ref_height as i32 - 1);
            i32::from(reference[(y as u32 * ref_width + x as u32) as usize])
        };

        for y in 0..height {
            let sy = (y0 + y) as i32 + (my >> 1);
            for x in 0..width {
                let sx = (x0 + x) as i32 + (mx >> 1);
                let value = match (hx, hy) {
                    (0, 0) => sample(sx, sy),
                    (1, 0) => (sample(sx, sy) + sample(sx + 1, sy) + 1) >> 1,
                    (0, 1) => (sample(sx, sy) + sample(sx, sy + 1) + 1) >> 1,
                    _ => {
                        (sample(sx, sy)
                            + sample(sx + 1, sy)
                            + sample(sx, sy + 1)
                            + sample(sx + 1, sy + 1)
                            + 2)
                            >> 2
                    }
                };
                mcblock[(y * width + x) as usize] = value as i16;
            }
        }
    }
}

/// Compute the MCPE `original - reference`, the reference being `mcblock1`
/// or the average of `mcblock1` and `mcblock2`.
pub fn get_mcpe(
    mcpe: &mut [i16],
    original: &Image,
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    mcblock1: &[i16],
    mcblock2: Option<&[i16]>,
) {
    let plane = &original.pixels[GRAY];

    for y in 0..height {
        for x in 0..width {
            let orig = plane[((y0 + y) * original.width + x0 + x) as usize];
            let n = (y * width + x) as usize;
            mcpe[n] = match mcblock2 {
                Some(mc2) => {
                    orig - ((i32::from(mcblock1[n]) + i32::from(mc2[n])) / 2) as i16
                }
                None => orig - mcblock1[n],
            };
        }
    }
}

/// Squared norm of the motion compensated prediction error.
pub fn mcpe_norm(
    original: &Image,
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    mcblock1: &[i16],
    mcblock2: Option<&[i16]>,
) -> f32 {
    let mut mcpe = vec![0i16; (width * height) as usize];
    get_mcpe(&mut mcpe, original, x0, y0, width, height, mcblock1, mcblock2);

    mcpe.iter()
        .map(|&p| {
            let v = i32::from(p) / 16;
            (v * v) as f32
        })
        .sum()
}

/// Exhaustive search for the best motion vector predicting the block
/// `(x0, y0)` of `original` from `reference`, using the precomputed
/// `mc_norms` table. Returns the prediction costs; the chosen vector and
/// its bit count are stored in `(mx, my)` and `bits`.
fn find_best_mv(
    price: f32,
    original: &Image,
    reference: &Image,
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    bits: &mut f32,
    mx: &mut i32,
    my: &mut i32,
    mc_norms: &[f32],
    info: &StreamInfo,
    mt: &Motion,
) -> f32 {
    let sr = if info.half_pixel { info.search_range / 2 } else { info.search_range } as i32;
    let bitshift = if info.half_pixel { 2 } else { 1 };

    *mx = 0;
    *my = 0;
    let mut mincosts = MAX_COSTS;

    let mut index = 0;
    for y in -sr..sr {
        for x in -sr..sr {
            let inside = x0 as i32 + x >= 0
                && y0 as i32 + y >= 0
                && x0 as i32 + x + width as i32 <= original.width as i32
                && y0 as i32 + y + height as i32 <= original.height as i32;
            if inside {
                let costs = mc_norms[index]
                    + (mt.xbits[((x + sr) * bitshift) as usize]
                        + mt.ybits[((y + sr) * bitshift) as usize])
                        * price;
                if costs < mincosts {
                    mincosts = costs;
                    *mx = x * bitshift;
                    *my = y * bitshift;
                }
            }
            index += 1;
        }
    }

    // Half-pel refinement of the eight neighbours of the integer optimum.
    if info.half_pixel {
        let mut mcblock = vec![0i16; (width * height) as usize];
        let mut bestrx = 0;
        let mut bestry = 0;

        for rx in -1..=1 {
            for ry in -1..=1 {
                if rx == 0 && ry == 0 {
                    continue;
                }
                if x0 as i32 + *mx / 2 + rx < 0
                    || x0 as i32 + *mx / 2 + rx + width as i32 > original.width as i32
                    || y0 as i32 + *my / 2 + ry < 0
                    || y0 as i32 + *my / 2 + ry + height as i32 > original.height as i32
                {
                    continue;
                }
                if *mx + rx < -sr || *mx + rx >= sr || *my + ry < -sr || *my + ry >= sr {
                    continue;
                }

                extract_mc_block(
                    &mut mcblock,
                    width,
                    height,
                    &reference.pixels[GRAY],
                    reference.width,
                    info.half_pixel,
                    x0,
                    y0,
                    *mx + rx,
                    *my + ry,
                );
                let costs = mcpe_norm(original, x0, y0, width, height, &mcblock, None)
                    + (mt.xbits[(*mx + rx + sr * bitshift) as usize]
                        + mt.ybits[(*my + ry + sr * bitshift) as usize])
                        * price;
                if costs < mincosts {
                    bestrx = rx;
                    bestry = ry;
                    mincosts = costs;
                }
            }
        }

        *mx += bestrx;
        *my += bestry;
    }

    *bits = mt.xbits[(*mx + sr * bitshift) as usize] + mt.ybits[(*my + sr * bitshift) as usize];

    mincosts
}

/// Search the local window around `(mx, my)` for the best second vector of
/// a bidirectional prediction, with `mcblock1` already fixed.
fn find_second_mv(
    price: f32,
    original: &Image,
    reference: &Image,
    mcblock1: &[i16],
    xr: u32,
    yr: u32,
    width: u32,
    height: u32,
    bits: &mut f32,
    mx: &mut i32,
    my: &mut i32,
    info: &StreamInfo,
    mt: &Motion,
) -> f32 {
    let sr = info.search_range as i32;
    let bitshift = if info.half_pixel { 2i64 } else { 1 };
    let mut mincosts = MAX_COSTS;

    let y0 = (-sr).max(*my - LOCAL_RANGE);
    let y1 = sr.min(*my + LOCAL_RANGE);
    let x0 = (-sr).max(*mx - LOCAL_RANGE);
    let x1 = sr.min(*mx + LOCAL_RANGE);

    *mx = 0;
    *my = 0;

    let mut mcblock2 = vec![0i16; (width * height) as usize];

    // The candidate blocks and the error norm are taken at the window
    // origin, not at the block position. A negative origin is skipped.
    if x0 >= 0 && y0 >= 0 {
        for y in y0..y1 {
            for x in x0..x1 {
                if i64::from(xr) * bitshift + i64::from(x) < 0
                    || i64::from(xr) * bitshift + i64::from(x)
                        > i64::from(original.width - width) * bitshift
                    || i64::from(yr) * bitshift + i64::from(y) < 0
                    || i64::from(yr) * bitshift + i64::from(y)
                        > i64::from(original.height - height) * bitshift
                {
                    continue;
                }

                extract_mc_block(
                    &mut mcblock2,
                    width,
                    height,
                    &reference.pixels[GRAY],
                    reference.width,
                    info.half_pixel,
                    x0 as u32,
                    y0 as u32,
                    x,
                    y,
                );

                let costs = mcpe_norm(
                    original,
                    x0 as u32,
                    y0 as u32,
                    width,
                    height,
                    mcblock1,
                    Some(&mcblock2),
                ) + (mt.xbits[(x + sr) as usize] + mt.ybits[(y + sr) as usize]) * price;

                if costs < mincosts {
                    mincosts = costs;
                    *mx = x;
                    *my = y;
                }
            }
        }
    }

    *bits = mt.xbits[(*mx + sr) as usize] + mt.ybits[(*my + sr) as usize];

    mincosts
}

/// Determine the best motion vector of a P-frame range and compute its MCPE.
pub fn find_p_frame_mc(
    mcpe: &mut [i16],
    price: f32,
    range: &mut Range,
    info: &StreamInfo,
    mt: &Motion,
) {
    let width = width_of_level(range.level);
    let height = height_of_level(range.level);
    let mut mcblock = vec![0i16; (width * height) as usize];

    range.mv_tree_bits = 1.0;
    range.mv.kind = MvKind::Forward;

    let original = mt.original.as_ref().unwrap();
    let past = mt.past.as_ref().unwrap();

    find_best_mv(
        price,
        original,
        past,
        range.x,
        range.y,
        width,
        height,
        &mut range.mv_coord_bits,
        &mut range.mv.fx,
        &mut range.mv.fy,
        &mt.forward_norms[range.level as usize],
        info,
        mt,
    );

    extract_mc_block(
        &mut mcblock,
        width,
        height,
        &past.pixels[GRAY],
        past.width,
        info.half_pixel,
        range.x,
        range.y,
        range.mv.fx,
        range.mv.fy,
    );
    get_mcpe(mcpe, original, range.x, range.y, width, height, &mcblock, None);
}

/// Determine the best motion compensation of a B-frame range: forward,
/// backward, and interpolated prediction are tried and the cheapest mode is
/// kept. Mode bit codes: FORWARD `000`, BACKWARD `001`, INTERPOLATED `01`.
pub fn find_b_frame_mc(
    mcpe: &mut [i16],
    price: f32,
    range: &mut Range,
    info: &StreamInfo,
    mt: &Motion,
) {
    let width = width_of_level(range.level);
    let height = height_of_level(range.level);
    let mut mcblock1 = vec![0i16; (width * height) as usize];
    let mut mcblock2 = vec![0i16; (width * height) as usize];

    let original = mt.original.as_ref().unwrap();
    let past = mt.past.as_ref().unwrap();
    let future = mt.future.as_ref().unwrap();

    let mut forward_bits = 0.0;
    let mut backward_bits = 0.0;
    let (mut fx, mut fy) = (0, 0);
    let (mut bx, mut by) = (0, 0);

    let forward_costs = find_best_mv(
        price,
        original,
        past,
        range.x,
        range.y,
        width,
        height,
        &mut forward_bits,
        &mut fx,
        &mut fy,
        &mt.forward_norms[range.level as usize],
        info,
        mt,
    ) + 3.0 * price;

    let backward_costs = find_best_mv(
        price,
        original,
        future,
        range.x,
        range.y,
        width,
        height,
        &mut backward_bits,
        &mut bx,
        &mut by,
        &mt.backward_norms[range.level as usize],
        info,
        mt,
    ) + 3.0 * price;

    let mut ifx = fx;
    let mut ify = fy;
    let mut ibx = bx;
    let mut iby = by;
    let interp_bits;
    let interp_costs;

    if info.cross_b_search {
        // Alternative 1: keep the forward vector, vary the backward one.
        extract_mc_block(
            &mut mcblock1,
            width,
            height,
            &past.pixels[GRAY],
            past.width,
            info.half_pixel,
            range.x,
            range.y,
            fx,
            fy,
        );
        let mut ibackward_bits = 0.0;
        ibx = bx;
        iby = by;
        let icosts1 = find_second_mv(
            price,
            original,
            future,
            &mcblock1,
            range.x,
            range.y,
            width,
            height,
            &mut ibackward_bits,
            &mut ibx,
            &mut iby,
            info,
            mt,
        ) + (forward_bits + 2.0) * price;

        // Alternative 2: keep the backward vector, vary the forward one.
        extract_mc_block(
            &mut mcblock1,
            width,
            height,
            &future.pixels[GRAY],
            future.width,
            info.half_pixel,
            range.x,
            range.y,
            bx,
            by,
        );
        let mut iforward_bits = 0.0;
        ifx = fx;
        ify = fy;
        let icosts2 = find_second_mv(
            price,
            original,
            past,
            &mcblock1,
            range.x,
            range.y,
            width,
            height,
            &mut iforward_bits,
            &mut ifx,
            &mut ify,
            info,
            mt,
        ) + (backward_bits + 2.0) * price;

        if icosts1 < icosts2 {
            ifx = fx;
            ify = fy;
            interp_bits = forward_bits + ibackward_bits;
            interp_costs = icosts1;
        }
        else {
            ibx = bx;
            iby = by;
            interp_bits = iforward_bits + backward_bits;
            interp_costs = icosts2;
        }
    }
    else {
        // Keep both independent vectors due to time constraints.
        interp_bits = forward_bits + backward_bits;

        extract_mc_block(
            &mut mcblock1,
            width,
            height,
            &past.pixels[GRAY],
            past.width,
            info.half_pixel,
            range.x,
            range.y,
            fx,
            fy,
        );
        extract_mc_block(
            &mut mcblock2,
            width,
            height,
            &future.pixels[GRAY],
            future.width,
            info.half_pixel,
            range.x,
            range.y,
            bx,
            by,
        );
        interp_costs =
            mcpe_norm(original, range.x, range.y, width, height, &mcblock1, Some(&mcblock2))
                + (interp_bits + 2.0) * price;
    }

    let kind = if forward_costs <= interp_costs {
        if forward_costs <= backward_costs {
            MvKind::Forward
        }
        else {
            MvKind::Backward
        }
    }
    else if backward_costs <= interp_costs {
        MvKind::Backward
    }
    else {
        MvKind::Interpolated
    };

    match kind {
        MvKind::Forward => {
            range.mv_tree_bits = 3.0;
            range.mv_coord_bits = forward_bits;
            range.mv = MotionVector { kind, fx, fy, bx: 0, by: 0 };
            extract_mc_block(
                &mut mcblock1,
                width,
                height,
                &past.pixels[GRAY],
                past.width,
                info.half_pixel,
                range.x,
                range.y,
                fx,
                fy,
            );
            get_mcpe(mcpe, original, range.x, range.y, width, height, &mcblock1, None);
        }
        MvKind::Backward => {
            range.mv_tree_bits = 3.0;
            range.mv_coord_bits = backward_bits;
            range.mv = MotionVector { kind, fx: 0, fy: 0, bx, by };
            extract_mc_block(
                &mut mcblock1,
                width,
                height,
                &future.pixels[GRAY],
                future.width,
                info.half_pixel,
                range.x,
                range.y,
                bx,
                by,
            );
            get_mcpe(mcpe, original, range.x, range.y, width, height, &mcblock1, None);
        }
        _ => {
            range.mv_tree_bits = 2.0;
            range.mv_coord_bits = interp_bits;
            range.mv = MotionVector { kind: MvKind::Interpolated, fx: ifx, fy: ify, bx: ibx, by: iby };
            extract_mc_block(
                &mut mcblock1,
                width,
                height,
                &past.pixels[GRAY],
                past.width,
                info.half_pixel,
                range.x,
                range.y,
                ifx,
                ify,
            );
            extract_mc_block(
                &mut mcblock2,
                width,
                height,
                &future.pixels[GRAY],
                future.width,
                info.half_pixel,
                range.x,
                range.y,
                ibx,
                iby,
            );
            get_mcpe(
                mcpe,
                original,
                range.x,
                range.y,
                width,
                height,
                &mcblock1,
                Some(&mcblock2),
            );
        }
    }
}

/// Populate the norms tables at `level` with the MCPE norms of all
/// displacements of the block at `(x0, y0)`.
pub fn fill_norms_table(x0: u32, y0: u32, level: u32, info: &StreamInfo, mt: &mut Motion) {
    let width = width_of_level(level);
    let height = height_of_level(level);
    let mut mcblock = vec![0i16; (width * height) as usize];
    let sr = if info.half_pixel { info.search_range / 2 } else { info.search_range } as i32;

    let original = mt.original.take().unwrap();
    let past = mt.past.take().unwrap();
    let future = mt.future.take();

    let mut index = 0;
    for my in -sr..sr {
        for mx in -sr..sr {
            let outside = x0 as i32 + mx < 0
                || x0 as i32 + mx + width as i32 > original.width as i32
                || y0 as i32 + my < 0
                || y0 as i32 + my + height as i32 > original.height as i32;
            if outside {
                mt.forward_norms[level as usize][index] = 0.0;
                mt.backward_norms[level as usize][index] = 0.0;
            }
            else {
                extract_mc_block(
                    &mut mcblock,
                    width,
                    height,
                    &past.pixels[GRAY],
                    past.width,
                    info.half_pixel,
                    x0,
                    y0,
                    mx,
                    my,
                );
                mt.forward_norms[level as usize][index] =
                    mcpe_norm(&original, x0, y0, width, height, &mcblock, None);

                if mt.frame_type == FrameType::B {
                    let future = future.as_ref().unwrap();
                    extract_mc_block(
                        &mut mcblock,
                        width,
                        height,
                        &future.pixels[GRAY],
                        future.width,
                        info.half_pixel,
                        x0,
                        y0,
                        mx,
                        my,
                    );
                    mt.backward_norms[level as usize][index] =
                        mcpe_norm(&original, x0, y0, width, height, &mcblock, None);
                }
            }
            index += 1;
        }
    }

    mt.original = Some(original);
    mt.past = Some(past);
    mt.future = future;
}

/// Clear the norms tables at `level`.
pub fn clear_norms_table(level: u32, info: &StreamInfo, mt: &mut Motion) {
    if level > info.p_min_level {
        for norm in mt.forward_norms[level as usize].iter_mut() {
            *norm = 0.0;
        }
        for norm in mt.backward_norms[level as usize].iter_mut() {
            *norm = 0.0;
        }
    }
}

/// Accumulate the norms of `level` from the previously computed norms one
/// level down, at equal displacements.
pub fn update_norms_table(level: u32, info: &StreamInfo, mt: &mut Motion) {
    if level > info.p_min_level {
        let range_size = norms_range_size(info);
        for index in 0..range_size {
            mt.forward_norms[level as usize][index] =
                mt.forward_norms[level as usize][index]
                    + mt.forward_norms[level as usize - 1][index];
        }
        if mt.frame_type == FrameType::B {
            for index in 0..range_size {
                mt.backward_norms[level as usize][index] =
                    mt.backward_norms[level as usize][index]
                        + mt.backward_norms[level as usize - 1][index];
            }
        }
    }
}

/// Subtract the motion compensated prediction from the chroma channels of
/// `image` before the chroma bands are encoded.
pub fn subtract_mc(image: &mut Image, past: &Image, future: Option<&Image>, wfa: &crate::wfa::Wfa) {
    let p_max = wfa.info.p_max_level;
    let mut mcblock1 = vec![0i16; crate::bintree::size_of_level(p_max)];
    let mut mcblock2 = vec![0i16; crate::bintree::size_of_level(p_max)];

    for state in wfa.basis_states..wfa.num_states() {
        for label in 0..crate::wfa::MAX_LABELS {
            let entry = &wfa.states[state].labels[label];
            if entry.mv.kind == MvKind::None {
                continue;
            }

            let level = wfa.states[state].level - 1;
            let width = width_of_level(level);
            let height = height_of_level(level);
            let size = (width * height) as usize;

            for band in 1..=2 {
                match entry.mv.kind {
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
                            (entry.mv.fx / 2) * 2,
                            (entry.mv.fy / 2) * 2,
                        );
                        subtract_block(image, band, entry.x, entry.y, width, height, &mcblock1, None);
                    }
                    MvKind::Backward => {
                        let future = future.unwrap();
                        extract_mc_block(
                            &mut mcblock1[..size],
                            width,
                            height,
                            &future.pixels[band],
                            future.width,
                            wfa.info.half_pixel,
                            entry.x,
                            entry.y,
                            (entry.mv.bx / 2) * 2,
                            (entry.mv.by / 2) * 2,
                        );
                        subtract_block(image, band, entry.x, entry.y, width, height, &mcblock1, None);
                    }
                    MvKind::Interpolated => {
                        let future = future.unwrap();
                        extract_mc_block(
                            &mut mcblock1[..size],
                            width,
                            height,
                            &past.pixels[band],
                            past.width,
                            wfa.info.half_pixel,
                            entry.x,
                            entry.y,
                            (entry.mv.fx / 2) * 2,
                            (entry.mv.fy / 2) * 2,
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
                            (entry.mv.bx / 2) * 2,
                            (entry.mv.by / 2) * 2,
                        );
                        subtract_block(
                            image,
                            band,
                            entry.x,
                            entry.y,
                            width,
                            height,
                            &mcblock1,
                            Some(&mcblock2),
                        );
                    }
                    MvKind::None => {}
                }
            }
        }
    }
}

fn subtract_block(
    image: &mut Image,
    band: usize,
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    mcblock1: &[i16],
    mcblock2: Option<&[i16]>,
) {
    let image_width = image.width;
    let plane = &mut image.pixels[band];

    for y in 0..height {
        for x in 0..width {
            let n = (y * width + x) as usize;
            let prediction = match mcblock2 {
                Some(mc2) => ((i32::from(mcblock1[n]) + i32::from(mc2[n])) / 2) as i16,
                None => mcblock1[n],
            };
            plane[((y0 + y) * image_width + x0 + x) as usize] -= prediction;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_extract_integer_block() {
        // 4x4 reference with row-major values.
        let reference: Vec<i16> = (0..16).collect();
        let mut block = vec![0i16; 4];

        extract_mc_block(&mut block, 2, 2, &reference, 4, false, 1, 1, 1, -1);
        // Block at (2, 0).
        assert_eq!(block, vec![2, 3, 6, 7]);
    }

    #[test]
    fn verify_extract_half_pel_interpolates() {
        let reference: Vec<i16> = vec![0, 16, 0, 16, 0, 16, 0, 16];
        let mut block = vec![0i16; 2];

        // One half-pel to the right: averages horizontal neighbours.
        extract_mc_block(&mut block, 2, 1, &reference, 4, true, 0, 0, 1, 0);
        assert_eq!(block, vec![8, 8]);
    }

    #[test]
    fn verify_zero_motion_mcpe_is_zero() {
        let mut image = Image::new(8, 8, false);
        for (n, p) in image.pixels[GRAY].iter_mut().enumerate() {
            *p = ((n as i16) % 251) << 4;
        }
        let reference = image.clone();

        let mut mcblock = vec![0i16; 16];
        extract_mc_block(&mut mcblock, 4, 4, &reference.pixels[GRAY], 8, false, 2, 2, 0, 0);
        assert_eq!(mcpe_norm(&image, 2, 2, 4, 4, &mcblock, None), 0.0);
    }
}
