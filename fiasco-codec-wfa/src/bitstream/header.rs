// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The FIASCO file header and the tiling block.

use std::io;

use log::debug;

use fiasco_core::errors::{decode_error, Result};
use fiasco_core::io::{read_rice_code, write_rice_code, BitReader, BitWriter};
use fiasco_core::quant::{Rpf, RpfRange};

use crate::bintree::locate_subimage;
use crate::tiling::{compute_spiral, image_level, Tiling, TilingMethod};
use crate::wfa::{StreamInfo, FIASCO_BINFILE_RELEASE, FIASCO_MAGIC, MAXSTRLEN};

const RICE_K: u32 = 8;

const HEADER_END: u32 = 0;
const HEADER_TITLE: u32 = 1;
const HEADER_COMMENT: u32 = 2;

fn write_string<W: io::Write>(text: &str, output: &mut BitWriter<W>) -> Result<()> {
    for &byte in text.as_bytes().iter().take(MAXSTRLEN - 2) {
        output.put_bits(u32::from(byte), 8)?;
    }
    output.put_bits(0, 8)
}

fn read_string<R: io::Read>(input: &mut BitReader<R>) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = input.get_bits(8)? as u8;
        if byte == 0 {
            break;
        }
        if bytes.len() >= MAXSTRLEN {
            return decode_error("header string too long");
        }
        bytes.push(byte);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_rpf<W: io::Write>(rpf: &Rpf, output: &mut BitWriter<W>) -> Result<()> {
    output.put_bits(rpf.mantissa_bits - 2, 3)?;
    output.put_bits(rpf.range.code(), 2)
}

fn read_rpf<R: io::Read>(input: &mut BitReader<R>) -> Result<Rpf> {
    let mantissa = input.get_bits(3)? + 2;
    let range = RpfRange::from_code(input.get_bits(2)?);
    Ok(Rpf::new(mantissa, range))
}

/// Write the stream header to `output`.
pub fn write_header<W: io::Write>(info: &StreamInfo, output: &mut BitWriter<W>) -> Result<()> {
    let bits = output.bits_processed();

    for &byte in FIASCO_MAGIC {
        output.put_bits(u32::from(byte), 8)?;
    }
    output.put_bits(u32::from(b'\n'), 8)?;
    write_string(&info.basis_name, output)?;

    write_rice_code(FIASCO_BINFILE_RELEASE, RICE_K, output)?;

    write_rice_code(HEADER_TITLE, RICE_K, output)?;
    write_string(&info.title, output)?;
    write_rice_code(HEADER_COMMENT, RICE_K, output)?;
    write_string(&info.comment, output)?;
    write_rice_code(HEADER_END, RICE_K, output)?;

    write_rice_code(info.max_states as u32, RICE_K, output)?;
    output.put_bit(info.color)?;
    write_rice_code(info.width, RICE_K, output)?;
    write_rice_code(info.height, RICE_K, output)?;
    if info.color {
        write_rice_code(info.chroma_max_states as u32, RICE_K, output)?;
    }
    write_rice_code(info.p_min_level, RICE_K, output)?;
    write_rice_code(info.p_max_level, RICE_K, output)?;
    write_rice_code(info.frames, RICE_K, output)?;
    write_rice_code(info.smoothing, RICE_K, output)?;

    write_rpf(&info.rpf, output)?;
    if info.rpf != info.dc_rpf {
        output.put_bit(true)?;
        write_rpf(&info.dc_rpf, output)?;
    }
    else {
        output.put_bit(false)?;
    }
    if info.rpf != info.d_rpf {
        output.put_bit(true)?;
        write_rpf(&info.d_rpf, output)?;
    }
    else {
        output.put_bit(false)?;
    }
    if info.dc_rpf != info.d_dc_rpf {
        output.put_bit(true)?;
        write_rpf(&info.d_dc_rpf, output)?;
    }
    else {
        output.put_bit(false)?;
    }

    if info.frames > 1 {
        write_rice_code(info.fps, RICE_K, output)?;
        write_rice_code(info.search_range, RICE_K, output)?;
        output.put_bit(info.half_pixel)?;
        output.put_bit(info.b_as_past_ref)?;
    }

    output.byte_align()?;
    debug!("header: {} bits", output.bits_processed() - bits);

    Ok(())
}

/// Read the stream header from `input`.
pub fn read_header<R: io::Read>(input: &mut BitReader<R>) -> Result<StreamInfo> {
    for &byte in FIASCO_MAGIC {
        if input.get_bits(8)? != u32::from(byte) {
            return decode_error("not a valid FIASCO stream");
        }
    }
    input.get_bits(8)?; // newline

    let mut info = StreamInfo { basis_name: read_string(input)?, ..StreamInfo::default() };

    info.release = read_rice_code(RICE_K, input)?;
    if info.release > FIASCO_BINFILE_RELEASE {
        return decode_error("file format release not supported");
    }

    if info.release > 1 {
        loop {
            match read_rice_code(RICE_K, input)? {
                HEADER_END => break,
                HEADER_TITLE => info.title = read_string(input)?,
                HEADER_COMMENT => info.comment = read_string(input)?,
                _ => return decode_error("unknown header field"),
            }
        }
    }

    info.max_states = read_rice_code(RICE_K, input)? as usize;
    info.color = input.get_bit()?;
    info.width = read_rice_code(RICE_K, input)?;
    info.height = read_rice_code(RICE_K, input)?;
    if info.width == 0 || info.height == 0 {
        return decode_error("invalid image geometry");
    }
    info.level = image_level(info.width, info.height);

    info.chroma_max_states =
        if info.color { read_rice_code(RICE_K, input)? as usize } else { 0 };
    info.p_min_level = read_rice_code(RICE_K, input)?;
    info.p_max_level = read_rice_code(RICE_K, input)?;
    info.frames = read_rice_code(RICE_K, input)?;
    info.smoothing = read_rice_code(RICE_K, input)?;

    info.rpf = read_rpf(input)?;
    info.dc_rpf = if input.get_bit()? {
        read_rpf(input)?
    }
    else {
        info.rpf
    };
    info.d_rpf = if input.get_bit()? {
        read_rpf(input)?
    }
    else {
        info.rpf
    };
    info.d_dc_rpf = if input.get_bit()? {
        read_rpf(input)?
    }
    else {
        info.dc_rpf
    };

    if info.frames > 1 {
        info.fps = read_rice_code(RICE_K, input)?;
        info.search_range = read_rice_code(RICE_K, input)?;
        info.half_pixel = input.get_bit()?;
        info.b_as_past_ref = input.get_bit()?;
    }

    input.byte_align();

    Ok(info)
}

/// Write the tiling block: the exponent, then either the original indices
/// of the visible tiles (variance order) or the spiral direction.
pub fn write_tiling<W: io::Write>(tiling: &Tiling, output: &mut BitWriter<W>) -> Result<()> {
    let bits = output.bits_processed();

    write_rice_code(tiling.exponent, RICE_K, output)?;
    match tiling.method {
        TilingMethod::VarianceAsc | TilingMethod::VarianceDsc => {
            output.put_bit(true)?;
            for tile in 0..1usize << tiling.exponent {
                if tiling.vorder[tile] != -1 {
                    output.put_bits(tiling.vorder[tile] as u32, tiling.exponent)?;
                }
            }
        }
        TilingMethod::SpiralAsc | TilingMethod::SpiralDsc => {
            output.put_bit(false)?;
            output.put_bit(tiling.method == TilingMethod::SpiralAsc)?;
        }
    }

    debug!("tiling: {:4} bits", output.bits_processed() - bits);

    Ok(())
}

/// Read the tiling block.
pub fn read_tiling<R: io::Read>(
    image_width: u32,
    image_height: u32,
    image_level: u32,
    input: &mut BitReader<R>,
) -> Result<Tiling> {
    let exponent = read_rice_code(RICE_K, input)?;
    if exponent >= image_level {
        return decode_error("invalid tiling exponent");
    }

    let tiles = 1usize << exponent;
    let mut vorder = vec![0i32; tiles];

    if input.get_bit()? {
        // Variance order: the visible tiles' original addresses follow.
        for (tile, order) in vorder.iter_mut().enumerate() {
            let (x0, y0, _, _) = locate_subimage(image_level, image_level - exponent, tile as u32);
            *order = if x0 < image_width && y0 < image_height {
                input.get_bits(exponent)? as i32
            }
            else {
                -1
            };
        }
        Ok(Tiling { exponent, method: TilingMethod::VarianceAsc, vorder })
    }
    else {
        let asc = input.get_bit()?;
        compute_spiral(&mut vorder, image_width, image_height, exponent, !asc);
        let method = if asc { TilingMethod::SpiralAsc } else { TilingMethod::SpiralDsc };
        Ok(Tiling { exponent, method, vorder })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_header_round_trip() {
        let info = StreamInfo {
            basis_name: "small.wfa".to_string(),
            title: "t".to_string(),
            comment: "c".to_string(),
            color: true,
            width: 352,
            height: 288,
            level: image_level(352, 288),
            chroma_max_states: 40,
            frames: 3,
            half_pixel: true,
            rpf: Rpf::new(5, RpfRange::Range1_00),
            dc_rpf: Rpf::new(5, RpfRange::Range1_00),
            d_rpf: Rpf::new(3, RpfRange::Range1_50),
            d_dc_rpf: Rpf::new(6, RpfRange::Range2_00),
            ..StreamInfo::default()
        };

        let mut writer = BitWriter::new(Vec::new());
        write_header(&info, &mut writer).unwrap();
        assert_eq!(writer.bits_processed() % 8, 0);
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        let read = read_header(&mut reader).unwrap();

        assert_eq!(read.basis_name, info.basis_name);
        assert_eq!(read.title, info.title);
        assert_eq!(read.comment, info.comment);
        assert_eq!(read.color, info.color);
        assert_eq!((read.width, read.height), (info.width, info.height));
        assert_eq!(read.level, info.level);
        assert_eq!(read.frames, info.frames);
        assert_eq!(read.half_pixel, info.half_pixel);
        assert_eq!(read.rpf, info.rpf);
        assert_eq!(read.dc_rpf, info.dc_rpf);
        assert_eq!(read.d_rpf, info.d_rpf);
        assert_eq!(read.d_dc_rpf, info.d_dc_rpf);
        assert_eq!(read.fps, info.fps);
        assert_eq!(read.search_range, info.search_range);
        assert_eq!(read.b_as_past_ref, info.b_as_past_ref);
    }

    #[test]
    fn verify_release_too_new_is_rejected() {
        // A stream with a forged (future) release number.
        let mut writer = BitWriter::new(Vec::new());
        for &byte in FIASCO_MAGIC {
            writer.put_bits(u32::from(byte), 8).unwrap();
        }
        writer.put_bits(u32::from(b'\n'), 8).unwrap();
        writer.put_bits(0, 8).unwrap();
        write_rice_code(FIASCO_BINFILE_RELEASE + 1, RICE_K, &mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        assert!(read_header(&mut reader).is_err());
    }

    #[test]
    fn verify_spiral_tiling_round_trip() {
        let tiling = Tiling {
            exponent: 2,
            method: TilingMethod::SpiralAsc,
            vorder: vec![0, 2, 3, 1],
        };

        let mut writer = BitWriter::new(Vec::new());
        write_tiling(&tiling, &mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        let read = read_tiling(256, 256, 16, &mut reader).unwrap();
        assert_eq!(read.exponent, 2);
        assert_eq!(read.method, TilingMethod::SpiralAsc);
        assert_eq!(read.vorder, tiling.vorder);
    }

    #[test]
    fn verify_variance_tiling_skips_invisible_tiles() {
        // A 160x256 image at level 16: the right tiles are invisible.
        let level = image_level(160, 256);
        assert_eq!(level, 16);

        let mut vorder = vec![0i32; 4];
        for tile in 0..4u32 {
            let (x0, _, _, _) = locate_subimage(level, level - 2, tile);
            vorder[tile as usize] = if x0 < 160 { tile as i32 } else { -1 };
        }
        let tiling = Tiling { exponent: 2, method: TilingMethod::VarianceAsc, vorder };

        let mut writer = BitWriter::new(Vec::new());
        write_tiling(&tiling, &mut writer).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes[..]);
        let read = read_tiling(160, 256, level, &mut reader).unwrap();
        assert_eq!(read.vorder, tiling.vorder);
    }
}
