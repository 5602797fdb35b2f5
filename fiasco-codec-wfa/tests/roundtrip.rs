// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end encoder/decoder tests.

use std::path::PathBuf;

use fiasco_codec_wfa::basis;
use fiasco_codec_wfa::bitstream;
use fiasco_codec_wfa::coder::{encode, Options};
use fiasco_codec_wfa::decoder;
use fiasco_codec_wfa::image::{write_image, Image, GRAY};
use fiasco_codec_wfa::tiling::TilingMethod;
use fiasco_codec_wfa::wfa::{FrameType, Wfa};
use fiasco_core::io::BitReader;

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("fiasco-roundtrip-tests");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn write_test_image(name: &str, width: u32, height: u32, pixel: impl Fn(u32, u32) -> u8) -> PathBuf {
    let mut image = Image::new(width, height, false);
    for y in 0..height {
        for x in 0..width {
            image.pixels[GRAY][(y * width + x) as usize] = i16::from(pixel(x, y)) << 4;
        }
    }
    let path = temp_path(name);
    write_image(&path, &image).unwrap();
    path
}

/// Decode all frames of a grayscale stream, in display order.
fn decode_stream(stream: &[u8]) -> Vec<Image> {
    let mut reader = BitReader::new(stream);
    let info = bitstream::read_header(&mut reader).unwrap();
    let frames = info.frames;

    let mut wfa = Wfa::new();
    let basis_name = info.basis_name.clone();
    wfa.info = info;
    basis::read_basis(&basis_name, &mut wfa).unwrap();

    let mut decoded: Vec<(u32, Image)> = Vec::new();
    let mut reconst: Option<(u32, Image)> = None;
    let mut past: Option<Image> = None;
    let mut future: Option<Image> = None;

    for _ in 0..frames {
        let number = bitstream::read_next_wfa(&mut wfa, &mut reader).unwrap();
        let mut image = decoder::decode_image(&wfa).unwrap();

        match wfa.frame_type {
            FrameType::I => {
                past = None;
                future = None;
            }
            FrameType::P => {
                past = reconst.take().map(|(_, image)| image);
                future = None;
                decoder::restore_mc(&mut image, past.as_ref().unwrap(), None, &wfa).unwrap();
            }
            FrameType::B => {
                match reconst.take() {
                    Some((ref_number, ref_image)) if ref_number > number => {
                        future = Some(ref_image);
                    }
                    Some((_, ref_image)) if wfa.info.b_as_past_ref => {
                        past = Some(ref_image);
                    }
                    _ => {}
                }
                decoder::restore_mc(&mut image, past.as_ref().unwrap(), future.as_ref(), &wfa)
                    .unwrap();
            }
        }

        reconst = Some((number, image.clone()));
        decoded.push((number, image));
    }

    decoded.sort_by_key(|&(number, _)| number);
    decoded.into_iter().map(|(_, image)| image).collect()
}

fn mean_abs_error(a: &Image, b: &Image) -> f64 {
    let n = a.pixels[GRAY].len();
    let sum: f64 = a.pixels[GRAY]
        .iter()
        .zip(&b.pixels[GRAY])
        .map(|(&x, &y)| f64::from((i32::from(x) - i32::from(y)).abs()) / 16.0)
        .sum();
    sum / n as f64
}

#[test]
fn verify_solid_grey_image_round_trip() {
    let path = write_test_image("grey-128.pgm", 128, 128, |_, _| 128);

    let mut stream = Vec::new();
    encode(&[path], 20.0, &Options::default(), &mut stream).unwrap();

    let frames = decode_stream(&stream);
    assert_eq!(frames.len(), 1);

    // The DC state approximates the flat image; the error stays far below
    // one grey level.
    let mut reference = Image::new(128, 128, false);
    reference.pixels[GRAY].fill(128 << 4);
    assert!(mean_abs_error(&frames[0], &reference) < 0.25);
}

#[test]
fn verify_gradient_image_round_trip() {
    let path = write_test_image("gradient-64.pgm", 64, 64, |x, y| ((2 * x + 2 * y) / 2) as u8);

    let mut stream = Vec::new();
    encode(&[path.clone()], 50.0, &Options::default(), &mut stream).unwrap();

    let frames = decode_stream(&stream);
    let original = fiasco_codec_wfa::image::read_image(&path).unwrap();
    assert!(mean_abs_error(&frames[0], &original) < 16.0);
}

#[test]
fn verify_noise_image_round_trip() {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    let mut rng = SmallRng::seed_from_u64(0x2545_f491);
    let noise: Vec<u8> = (0..64 * 64).map(|_| rng.gen()).collect();
    let path = write_test_image("noise-64.pgm", 64, 64, |x, y| noise[(y * 64 + x) as usize]);

    let mut stream = Vec::new();
    encode(&[path.clone()], 50.0, &Options::default(), &mut stream).unwrap();

    let frames = decode_stream(&stream);
    let original = fiasco_codec_wfa::image::read_image(&path).unwrap();
    assert!(mean_abs_error(&frames[0], &original) < 32.0);
}

#[test]
fn verify_p_frame_of_still_sequence_is_cheap() {
    let pixel = |x: u32, y: u32| (((x / 8) + (y / 8)) % 2 * 160 + 40) as u8;
    let frame0 = write_test_image("still-0.pgm", 64, 64, pixel);
    let frame1 = write_test_image("still-1.pgm", 64, 64, pixel);

    let options = Options { pattern: "IP".to_string(), ..Options::default() };

    let mut single = Vec::new();
    encode(&[frame0.clone()], 20.0, &Options::default(), &mut single).unwrap();

    let mut both = Vec::new();
    encode(&[frame0, frame1], 20.0, &options, &mut both).unwrap();

    // The P-frame of two identical frames predicts everything with zero
    // motion; it must cost less than the I-frame.
    let p_frame_bytes = both.len() - single.len();
    assert!(p_frame_bytes < single.len(), "p frame {} vs i frame {}", p_frame_bytes, single.len());

    let frames = decode_stream(&both);
    assert_eq!(frames.len(), 2);
    assert!(mean_abs_error(&frames[0], &frames[1]) < 4.0);
}

#[test]
fn verify_tiling_of_flat_image_decodes_identically() {
    let path = write_test_image("flat-256.pgm", 256, 256, |_, _| 99);

    let mut plain = Vec::new();
    encode(&[path.clone()], 20.0, &Options::default(), &mut plain).unwrap();

    let options = Options {
        tiling_exponent: 2,
        tiling_method: TilingMethod::SpiralAsc,
        ..Options::default()
    };
    let mut tiled = Vec::new();
    encode(&[path], 20.0, &options, &mut tiled).unwrap();

    let plain_frames = decode_stream(&plain);
    let tiled_frames = decode_stream(&tiled);
    assert_eq!(plain_frames[0].pixels[GRAY], tiled_frames[0].pixels[GRAY]);
}

#[test]
fn verify_search_optimizations_still_round_trip() {
    let path = write_test_image("detail-64.pgm", 64, 64, |x, y| {
        (128.0 + 64.0 * ((x as f32) / 9.0).sin() * ((y as f32) / 7.0).cos()) as u8
    });

    let mut options = Options::default();
    options.set_optimization_level(2);

    let mut stream = Vec::new();
    encode(&[path.clone()], 40.0, &options, &mut stream).unwrap();

    let frames = decode_stream(&stream);
    let original = fiasco_codec_wfa::image::read_image(&path).unwrap();
    assert!(mean_abs_error(&frames[0], &original) < 24.0);
}
