// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image tiling: a pre-encoder permutation of image tiles.
//!
//! The image is split into `2^exponent` tiles which are traversed in spiral
//! or variance-sorted order instead of plain bintree order. `vorder[n]` is
//! the original bintree address of the tile coded in position `n`, or `-1`
//! for tiles outside the visible image area.

use log::warn;

use crate::bintree::{height_of_level, locate_subimage, width_of_level, xy_to_address};
use crate::image::{variance, Image, GRAY};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TilingMethod {
    /// Spiral order, starting in the middle of the image.
    SpiralAsc,
    /// Spiral order, starting at the top left corner.
    SpiralDsc,
    /// Sorted by tile variance, lowest variance first.
    VarianceAsc,
    /// Sorted by tile variance, largest variance first.
    VarianceDsc,
}

#[derive(Clone, Debug)]
pub struct Tiling {
    pub exponent: u32,
    pub method: TilingMethod,
    pub vorder: Vec<i32>,
}

impl Tiling {
    /// Create a tiling descriptor. Tiles smaller than 8x8 pixels are
    /// rejected by clamping the exponent.
    pub fn new(method: TilingMethod, exponent: u32, image_level: u32) -> Tiling {
        let exponent = if exponent > image_level.saturating_sub(6) {
            warn!("image tiles must be at least 8x8 pixels large, reducing tiling exponent");
            image_level.saturating_sub(6)
        }
        else {
            exponent
        };

        Tiling { exponent, method, vorder: Vec::new() }
    }

    pub fn none() -> Tiling {
        Tiling { exponent: 0, method: TilingMethod::SpiralAsc, vorder: Vec::new() }
    }

    /// Compute the tile permutation for `image`.
    pub fn perform(&mut self, image: &Image) {
        if self.exponent == 0 {
            return;
        }

        let tiles = 1usize << self.exponent;
        self.vorder = vec![0; tiles];

        match self.method {
            TilingMethod::VarianceAsc | TilingMethod::VarianceDsc => {
                let level = image_level(image.width, image.height);

                let mut var_list: Vec<(f32, i32)> = Vec::new();
                let mut tile_valid = vec![false; tiles];

                for address in 0..tiles {
                    let (x0, y0, mut width, mut height) =
                        locate_subimage(level, level - self.exponent, address as u32);
                    if x0 < image.width && y0 < image.height {
                        if x0 + width > image.width {
                            width = image.width - x0;
                        }
                        if y0 + height > image.height {
                            height = image.height - y0;
                        }
                        var_list.push((
                            variance(&image.pixels[GRAY], x0, y0, width, height, image.width),
                            address as i32,
                        ));
                        tile_valid[address] = true;
                    }
                }

                if self.method == TilingMethod::VarianceDsc {
                    var_list.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
                }
                else {
                    var_list.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
                }

                let mut number = 0;
                for address in 0..tiles {
                    if tile_valid[address] {
                        self.vorder[address] = var_list[number].1;
                        number += 1;
                    }
                    else {
                        self.vorder[address] = -1;
                    }
                }
            }
            TilingMethod::SpiralAsc | TilingMethod::SpiralDsc => {
                // The ascending spiral starts at the top left corner, the
                // descending one in the middle of the image.
                compute_spiral(
                    &mut self.vorder,
                    image.width,
                    image.height,
                    self.exponent,
                    self.method == TilingMethod::SpiralDsc,
                );
            }
        }
    }
}

/// Bintree level of an image of the given size.
pub fn image_level(width: u32, height: u32) -> u32 {
    let lx = (width - 1).ilog2() + 1;
    let ly = (height - 1).ilog2() + 1;
    lx.max(ly) * 2 - u32::from(ly == lx + 1)
}

/// Compute an image tiling in spiral order. With `inc_spiral` the spiral
/// starts in the middle of the image, otherwise at the top left corner.
pub fn compute_spiral(
    vorder: &mut [i32],
    image_width: u32,
    image_height: u32,
    tiling_exp: u32,
    inc_spiral: bool,
) {
    let level = image_level(image_width, image_height);
    let tiles = 1usize << tiling_exp;
    let width = width_of_level(level - tiling_exp);
    let height = height_of_level(level - tiling_exp);

    for address in 0..tiles {
        let (x0, y0, _, _) = locate_subimage(level, level - tiling_exp, address as u32);
        vorder[address] = if x0 < image_width && y0 < image_height { 0 } else { -1 };
    }

    let mut xmin = 0u32;
    let mut xmax = width_of_level(level);
    let mut ymin = 0u32;
    let mut ymax = height_of_level(level);
    let mut address = 0usize;

    // Traverse the image in spiral order starting at the top left corner.
    'outer: loop {
        let mut x = xmin;
        let y = ymin;
        while x < xmax {
            if address >= tiles {
                break;
            }
            while address < tiles && vorder[address] == -1 {
                address += 1;
            }
            if address >= tiles {
                break;
            }
            if x < image_width && y < image_height {
                vorder[address] = xy_to_address(x, y, level, tiling_exp) as i32;
                address += 1;
            }
            while address < tiles && vorder[address] == -1 {
                address += 1;
            }
            x += width;
        }
        ymin += height;
        if address >= tiles {
            break 'outer;
        }

        let x = xmax - width;
        let mut y = ymin;
        while y < ymax {
            if address >= tiles {
                break;
            }
            while address < tiles && vorder[address] == -1 {
                address += 1;
            }
            if address >= tiles {
                break;
            }
            if x <= image_width && y <= image_height {
                vorder[address] = xy_to_address(x, y, level, tiling_exp) as i32;
                address += 1;
            }
            while address < tiles && vorder[address] == -1 {
                address += 1;
            }
            y += height;
        }
        xmax -= width;
        if address >= tiles {
            break 'outer;
        }

        let y = ymax - height;
        let mut x = xmax as i64 - width as i64;
        while x >= xmin as i64 {
            if address >= tiles {
                break;
            }
            while address < tiles && vorder[address] == -1 {
                address += 1;
            }
            if address >= tiles {
                break;
            }
            if x as u32 <= image_width && y <= image_height {
                vorder[address] = xy_to_address(x as u32, y, level, tiling_exp) as i32;
                address += 1;
            }
            while address < tiles && vorder[address] == -1 {
                address += 1;
            }
            x -= width as i64;
        }
        ymax -= height;
        if address >= tiles {
            break 'outer;
        }

        let x = xmin;
        let mut y = ymax as i64 - height as i64;
        while y >= ymin as i64 {
            if address >= tiles {
                break;
            }
            while address < tiles && vorder[address] == -1 {
                address += 1;
            }
            if address >= tiles {
                break;
            }
            if x <= image_width && y as u32 <= image_height {
                vorder[address] = xy_to_address(x, y as u32, level, tiling_exp) as i32;
                address += 1;
            }
            while address < tiles && vorder[address] == -1 {
                address += 1;
            }
            y -= height as i64;
        }
        xmin += width;
        if address >= tiles {
            break 'outer;
        }
    }

    if inc_spiral {
        // Reverse the visible tiles so the spiral starts in the middle.
        let mut i = 0i64;
        let mut j = tiles as i64 - 1;
        while i < j {
            while vorder[i as usize] == -1 {
                i += 1;
            }
            while vorder[j as usize] == -1 {
                j -= 1;
            }
            if i < j {
                vorder.swap(i as usize, j as usize);
            }
            i += 1;
            j -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_spiral_order_of_four_tiles() {
        // A square 256x256 image with exponent 2: tiles are the four
        // quadrants. Descending spiral starts top-left and runs clockwise;
        // addresses are in bintree order (left pair first).
        let mut vorder = vec![0; 4];
        compute_spiral(&mut vorder, 256, 256, 2, false);
        assert_eq!(vorder, vec![0, 2, 3, 1]);

        // The ascending spiral is the reverse.
        let mut vorder = vec![0; 4];
        compute_spiral(&mut vorder, 256, 256, 2, true);
        assert_eq!(vorder, vec![1, 3, 2, 0]);
    }

    #[test]
    fn verify_variance_ordering() {
        let mut image = Image::new(16, 16, false);
        // Right half noisy, left half flat.
        for y in 0..16 {
            for x in 8..16 {
                image.pixels[GRAY][y * 16 + x] = (((x ^ y) & 1) as i16) * (255 << 4);
            }
        }

        let mut tiling = Tiling::new(TilingMethod::VarianceAsc, 2, image_level(16, 16));
        tiling.perform(&image);

        // The two flat (left) tiles come first.
        assert!(tiling.vorder[0] < 2 && tiling.vorder[1] < 2);
        assert!(tiling.vorder[2] >= 2 && tiling.vorder[3] >= 2);
    }

    #[test]
    fn verify_small_tiles_are_rejected() {
        let tiling = Tiling::new(TilingMethod::SpiralAsc, 10, 12);
        assert_eq!(tiling.exponent, 6);
    }
}
