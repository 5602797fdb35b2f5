// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bintree geometry and the bintree probability model.
//!
//! A bintree partition halves the image alternately along the two axes: a
//! square tile (even level) is cut vertically into two tall halves, a tall
//! tile (odd level) is cut horizontally into two squares. Pixel buffers in
//! "bintree order" store the leaves of a subtree contiguously, so the leaves
//! of the subtree with address `a` at level `l` occupy the index interval
//! `[a * 2^l, (a + 1) * 2^l)`.

use crate::wfa::MAX_LEVEL;

/// Width of a subimage at `level`.
pub fn width_of_level(level: u32) -> u32 {
    1 << (level >> 1)
}

/// Height of a subimage at `level`.
pub fn height_of_level(level: u32) -> u32 {
    1 << ((level + 1) >> 1)
}

/// Number of pixels of a subimage at `level`.
pub fn size_of_level(level: u32) -> usize {
    1 << level
}

/// Number of pixels of all levels `0..=level` of one multiresolution image.
pub fn size_of_tree(level: u32) -> usize {
    (1 << (level + 1)) - 1
}

/// Offset of the `level` plane inside a multiresolution image buffer.
pub fn address_of_level(level: u32) -> usize {
    (1 << level) - 1
}

/// Compute the pixel coordinates and size of the subimage with the given
/// bintree `address`. The original image is at `orig_level`, the subimage at
/// `level`.
pub fn locate_subimage(orig_level: u32, level: u32, address: u32) -> (u32, u32, u32, u32) {
    debug_assert!(level <= orig_level);
    debug_assert!(address < 1 << (orig_level - level));

    let mut x = 0;
    let mut y = 0;

    if level < orig_level {
        // Square images start with a vertical subdivision, 2:1 images with a
        // horizontal one.
        let mut hor = orig_level % 2 == 1;
        let mut l = orig_level - 1;

        let mut mask = 1u32 << (orig_level - level - 1);
        while mask != 0 {
            if address & mask != 0 {
                if hor {
                    y += height_of_level(l);
                }
                else {
                    x += width_of_level(l);
                }
            }
            if l > 0 {
                l -= 1;
            }
            mask >>= 1;
            hor = !hor;
        }
    }

    (x, y, width_of_level(level), height_of_level(level))
}

/// Compute the bintree address of the subimage at coordinates `(x, y)`. The
/// original image is at `level`; `n` subdivision steps are performed.
pub fn xy_to_address(x: u32, y: u32, level: u32, n: u32) -> u32 {
    let mut address = 0;
    let mut level = level;

    for _ in 0..n {
        address <<= 1;
        level -= 1;
        if level % 2 == 1 {
            if x & width_of_level(level) != 0 {
                address += 1;
            }
        }
        else if y & height_of_level(level) != 0 {
            address += 1;
        }
    }

    address
}

/// Cut the region `(x0, y0, width, height)` out of the pixel array `src`
/// and store it in bintree order, converted to reals. Pixels outside the
/// source image are zero.
pub fn cut_to_bintree(
    dst: &mut [f32],
    src: &[i16],
    src_width: u32,
    src_height: u32,
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
) {
    assert!(
        height == width || height == width * 2,
        "bintree cutting requires square or 1:2 regions"
    );

    fn fill(
        dst: &mut [f32],
        src: &[i16],
        src_width: u32,
        src_height: u32,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
    ) {
        if dst.len() == 1 {
            dst[0] = if x0 >= src_width || y0 >= src_height {
                0.0
            }
            else {
                f32::from(src[(y0 * src_width + x0) as usize] / 16)
            };
            return;
        }

        let half = dst.len() / 2;
        let (first, second) = dst.split_at_mut(half);
        if width == height {
            // Vertical cut into two tall halves.
            fill(first, src, src_width, src_height, x0, y0, width / 2, height);
            fill(second, src, src_width, src_height, x0 + width / 2, y0, width / 2, height);
        }
        else {
            // Horizontal cut into two squares.
            fill(first, src, src_width, src_height, x0, y0, width, height / 2);
            fill(second, src, src_width, src_height, x0, y0 + height / 2, width, height / 2);
        }
    }

    fill(dst, src, src_width, src_height, x0, y0, width, height);
}

/// Inverse of [`cut_to_bintree`]: scatter a bintree-ordered buffer back into
/// raster order at `(x0, y0)`. Pixels outside the destination are dropped.
pub fn bintree_to_raster(
    src: &[f32],
    dst: &mut [f32],
    dst_width: u32,
    dst_height: u32,
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
) {
    if src.len() == 1 {
        if x0 < dst_width && y0 < dst_height {
            dst[(y0 * dst_width + x0) as usize] = src[0];
        }
        return;
    }

    let half = src.len() / 2;
    let (first, second) = src.split_at(half);
    if width == height {
        bintree_to_raster(first, dst, dst_width, dst_height, x0, y0, width / 2, height);
        bintree_to_raster(second, dst, dst_width, dst_height, x0 + width / 2, y0, width / 2, height);
    }
    else {
        bintree_to_raster(first, dst, dst_width, dst_height, x0, y0, width, height / 2);
        bintree_to_raster(second, dst, dst_width, dst_height, x0, y0 + height / 2, width, height / 2);
    }
}

/// Per-level Bernoulli model of the bintree: for every level the counts of
/// the "subdivided" symbol and the totals.
#[derive(Clone, Debug)]
pub struct TreeModel {
    counts: [u32; MAX_LEVEL],
    totals: [u32; MAX_LEVEL],
}

const COUNTS_0: [u32; MAX_LEVEL] =
    [20, 17, 15, 10, 5, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1];
const COUNTS_1: [u32; MAX_LEVEL] =
    [1, 1, 1, 1, 1, 1, 1, 1, 1, 2, 3, 5, 10, 15, 20, 25, 30, 35, 60, 60, 60, 60];

impl Default for TreeModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeModel {
    pub fn new() -> TreeModel {
        let mut model = TreeModel { counts: [0; MAX_LEVEL], totals: [0; MAX_LEVEL] };
        for level in 0..MAX_LEVEL {
            model.counts[level] = COUNTS_1[level];
            model.totals[level] = COUNTS_0[level] + COUNTS_1[level];
        }
        model
    }

    /// Number of bits needed for coding the decision `subdivided` at `level`.
    pub fn bits(&self, subdivided: bool, level: u32) -> f32 {
        let prob = self.counts[level as usize] as f64 / self.totals[level as usize] as f64;
        if subdivided {
            -prob.log2() as f32
        }
        else {
            -(1.0 - prob).log2() as f32
        }
    }

    /// Count the decision `subdivided` at `level`.
    pub fn update(&mut self, subdivided: bool, level: u32) {
        if subdivided {
            self.counts[level as usize] += 1;
        }
        self.totals[level as usize] += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_level_geometry() {
        assert_eq!((width_of_level(0), height_of_level(0)), (1, 1));
        assert_eq!((width_of_level(1), height_of_level(1)), (1, 2));
        assert_eq!((width_of_level(2), height_of_level(2)), (2, 2));
        assert_eq!((width_of_level(7), height_of_level(7)), (8, 16));
        assert_eq!((width_of_level(14), height_of_level(14)), (128, 128));
        assert_eq!(size_of_level(7), 128);
        assert_eq!(size_of_tree(2), 7);
        assert_eq!(address_of_level(3), 7);
    }

    #[test]
    fn verify_address_round_trip() {
        let orig_level = 8;
        for n in 1..=4 {
            let level = orig_level - n;
            for address in 0..1u32 << n {
                let (x, y, _, _) = locate_subimage(orig_level, level, address);
                assert_eq!(xy_to_address(x, y, orig_level, n), address);
            }
        }
    }

    #[test]
    fn verify_cut_to_bintree_is_bijective() {
        // 4x4 block at level 4 with distinct pixel values.
        let src: Vec<i16> = (0..16i16).map(|n| n * 16).collect();
        let mut tree = vec![0.0f32; 16];
        cut_to_bintree(&mut tree, &src, 4, 4, 0, 0, 4, 4);

        let mut seen = [false; 16];
        for &v in &tree {
            seen[v as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));

        let mut raster = vec![0.0f32; 16];
        bintree_to_raster(&tree, &mut raster, 4, 4, 0, 0, 4, 4);
        for (n, &v) in raster.iter().enumerate() {
            assert_eq!(v as usize, n);
        }
    }

    #[test]
    fn verify_cut_to_bintree_zero_pads_outside() {
        let src: Vec<i16> = vec![16; 4];
        let mut tree = vec![-1.0f32; 4];
        // Source is 2x2, region is the 2x2 block at (1, 1).
        cut_to_bintree(&mut tree, &src, 2, 2, 1, 1, 2, 2);
        assert_eq!(tree.iter().filter(|&&v| v == 0.0).count(), 3);
    }

    #[test]
    fn verify_tree_model_bits_and_update() {
        let mut model = TreeModel::new();
        // At level 0 the initial bias is strongly toward leaves.
        assert!(model.bits(true, 0) > model.bits(false, 0));
        // At level 18 the bias is toward subdivision.
        assert!(model.bits(true, 18) < model.bits(false, 18));

        let before = model.bits(true, 5);
        model.update(true, 5);
        assert!(model.bits(true, 5) < before);
    }
}
