// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{App, Arg};
use log::error;

use fiasco_codec_wfa::bitstream;
use fiasco_codec_wfa::coder::{self, Options};
use fiasco_codec_wfa::decoder;
use fiasco_codec_wfa::image::write_image;
use fiasco_codec_wfa::tiling::TilingMethod;
use fiasco_codec_wfa::wfa::{FrameType, Wfa};
use fiasco_core::errors::{Error, Result};
use fiasco_core::io::BitReader;

fn main() -> ExitCode {
    pretty_env_logger::init();

    let matches = App::new("fiasco")
        .version("0.1.0")
        .about("Fractal image and sequence codec based on weighted finite automata")
        .subcommand(
            App::new("encode")
                .about("Encode PNM images or frame sequences to a FIASCO stream")
                .arg(
                    Arg::with_name("quality")
                        .long("quality")
                        .short('q')
                        .value_name("Q")
                        .default_value("20")
                        .help("Compression quality, 1 (worst) to 100 (best)"),
                )
                .arg(
                    Arg::with_name("output")
                        .long("output")
                        .short('o')
                        .value_name("FILE")
                        .required(true)
                        .help("Output FIASCO file"),
                )
                .arg(
                    Arg::with_name("pattern")
                        .long("pattern")
                        .value_name("PATTERN")
                        .help("Frame type pattern for sequences, e.g. IPPPP"),
                )
                .arg(
                    Arg::with_name("optimize")
                        .long("optimize")
                        .short('z')
                        .value_name("LEVEL")
                        .help("Optimization level 0..5 of the approximation search"),
                )
                .arg(
                    Arg::with_name("prediction")
                        .long("prediction")
                        .short('p')
                        .help("Enable nondeterministic prediction of intra frames"),
                )
                .arg(
                    Arg::with_name("half-pixel")
                        .long("half-pixel")
                        .help("Use half pixel precise motion compensation"),
                )
                .arg(
                    Arg::with_name("tiling")
                        .long("tiling")
                        .value_name("EXP")
                        .help("Split the image into 2^EXP permuted tiles"),
                )
                .arg(
                    Arg::with_name("tiling-method")
                        .long("tiling-method")
                        .value_name("METHOD")
                        .help("Tiling order: spiral-asc, spiral-dsc, variance-asc, variance-dsc"),
                )
                .arg(
                    Arg::with_name("title")
                        .long("title")
                        .value_name("TEXT")
                        .help("Title stored in the stream header"),
                )
                .arg(
                    Arg::with_name("comment")
                        .long("comment")
                        .value_name("TEXT")
                        .help("Comment stored in the stream header"),
                )
                .arg(
                    Arg::with_name("INPUT")
                        .required(true)
                        .multiple_values(true)
                        .help("Input images; templates like img[001-100].pgm expand to sequences"),
                ),
        )
        .subcommand(
            App::new("decode")
                .about("Decode a FIASCO stream to PNM images")
                .arg(
                    Arg::with_name("output")
                        .long("output")
                        .short('o')
                        .value_name("FILE")
                        .required(true)
                        .help("Output image; sequences are numbered by frame"),
                )
                .arg(Arg::with_name("INPUT").required(true).help("Input FIASCO file")),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("encode", matches)) => encode(matches),
        Some(("decode", matches)) => decode(matches),
        _ => {
            eprintln!("no subcommand given, try 'fiasco --help'");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn encode(matches: &clap::ArgMatches) -> Result<()> {
    let quality: f32 = matches
        .value_of("quality")
        .unwrap()
        .parse()
        .map_err(|_| Error::Parameter("quality must be a number"))?;

    let mut inputs = Vec::new();
    for input in matches.values_of("INPUT").unwrap() {
        inputs.extend(expand_template(input)?);
    }

    let mut options = Options::default();
    if let Some(pattern) = matches.value_of("pattern") {
        options.pattern = pattern.to_string();
    }
    if let Some(level) = matches.value_of("optimize") {
        let level = level.parse().map_err(|_| Error::Parameter("invalid optimization level"))?;
        options.set_optimization_level(level);
    }
    if matches.is_present("prediction") {
        options.prediction = true;
    }
    if matches.is_present("half-pixel") {
        options.half_pixel = true;
    }
    if let Some(exponent) = matches.value_of("tiling") {
        options.tiling_exponent =
            exponent.parse().map_err(|_| Error::Parameter("invalid tiling exponent"))?;
    }
    if let Some(method) = matches.value_of("tiling-method") {
        options.tiling_method = match method {
            "spiral-asc" => TilingMethod::SpiralAsc,
            "spiral-dsc" => TilingMethod::SpiralDsc,
            "variance-asc" => TilingMethod::VarianceAsc,
            "variance-dsc" => TilingMethod::VarianceDsc,
            _ => return Err(Error::Parameter("unknown tiling method")),
        };
    }
    if let Some(title) = matches.value_of("title") {
        options.title = title.to_string();
    }
    if let Some(comment) = matches.value_of("comment") {
        options.comment = comment.to_string();
    }

    let output = BufWriter::new(File::create(matches.value_of("output").unwrap())?);
    coder::encode(&inputs, quality, &options, output)
}

fn decode(matches: &clap::ArgMatches) -> Result<()> {
    let input = File::open(matches.value_of("INPUT").unwrap())?;
    let mut reader = BitReader::new(input);

    let info = bitstream::read_header(&mut reader)?;
    let frames = info.frames;

    let mut wfa = Wfa::new();
    let basis_name = info.basis_name.clone();
    wfa.info = info;
    fiasco_codec_wfa::basis::read_basis(&basis_name, &mut wfa)?;

    let output = PathBuf::from(matches.value_of("output").unwrap());

    // Frames arrive in coding order; a frame whose display number is
    // smaller than the previously decoded one is a B-frame between its two
    // references.
    let mut decoded_frames: Vec<(u32, fiasco_codec_wfa::image::Image)> = Vec::new();
    let mut reconst: Option<(u32, fiasco_codec_wfa::image::Image)> = None;
    let mut past: Option<fiasco_codec_wfa::image::Image> = None;
    let mut future: Option<fiasco_codec_wfa::image::Image> = None;

    for _ in 0..frames {
        let number = bitstream::read_next_wfa(&mut wfa, &mut reader)?;
        let mut image = decoder::decode_image(&wfa)?;

        match wfa.frame_type {
            FrameType::I => {
                past = None;
                future = None;
            }
            FrameType::P => {
                past = reconst.take().map(|(_, image)| image);
                future = None;
                decoder::restore_mc(
                    &mut image,
                    past.as_ref().ok_or(Error::DecodeError("missing reference frame"))?,
                    None,
                    &wfa,
                )?;
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
                decoder::restore_mc(
                    &mut image,
                    past.as_ref().ok_or(Error::DecodeError("missing reference frame"))?,
                    future.as_ref(),
                    &wfa,
                )?;
            }
        }

        reconst = Some((number, image.clone()));
        decoded_frames.push((number, image));
    }

    decoded_frames.sort_by_key(|&(number, _)| number);

    if decoded_frames.len() == 1 {
        write_image(&output, &decoded_frames[0].1)?;
    }
    else {
        for (number, image) in &decoded_frames {
            write_image(&numbered_path(&output, *number), image)?;
        }
    }

    Ok(())
}

fn numbered_path(path: &std::path::Path, number: u32) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("pgm");
    path.with_file_name(format!("{}-{:03}.{}", stem, number, ext))
}

/// Expand an input name template of the form `prefix[start-end+step]suffix`
/// (also `-step`) into the numbered sequence of file names. Leading zeros
/// of `start` are significant. A plain file name expands to itself.
fn expand_template(template: &str) -> Result<Vec<PathBuf>> {
    let (prefix, rest) = match template.split_once('[') {
        Some(parts) => parts,
        None => return Ok(vec![PathBuf::from(template)]),
    };
    let (spec, suffix) = rest
        .split_once(']')
        .ok_or(Error::Parameter("unterminated input name template"))?;

    let invalid = Error::Parameter("input name template conversion failure");

    let mut bounds = spec.splitn(2, '-');
    let start_str = bounds.next().ok_or(Error::Parameter("empty template"))?;
    let rest = bounds.next().ok_or(Error::Parameter("template needs start and end"))?;

    let n_digits = start_str.len();
    let start: i64 = start_str.parse().map_err(|_| Error::Parameter("invalid template start"))?;

    let (end_str, step) = if let Some((end, step)) = rest.split_once('+') {
        (end, step.parse::<i64>().map_err(|_| Error::Parameter("invalid template step"))?)
    }
    else if let Some((end, step)) = rest.split_once('-') {
        (end, -step.parse::<i64>().map_err(|_| Error::Parameter("invalid template step"))?)
    }
    else {
        (rest, 1)
    };
    let end: i64 = end_str.parse().map_err(|_| Error::Parameter("invalid template end"))?;

    if step == 0 || (step > 0 && end < start) || (step < 0 && end > start) {
        return Err(invalid);
    }

    let mut paths = Vec::new();
    let mut number = start;
    while (step > 0 && number <= end) || (step < 0 && number >= end) {
        paths.push(PathBuf::from(format!(
            "{}{:0width$}{}",
            prefix,
            number,
            suffix,
            width = n_digits
        )));
        number += step;
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_template_expansion() {
        let paths = expand_template("image0[12-14].pgm").unwrap();
        let names: Vec<String> =
            paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["image012.pgm", "image013.pgm", "image014.pgm"]);

        let paths = expand_template("f[10-06-2].ppm").unwrap();
        let names: Vec<String> =
            paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["f10.ppm", "f08.ppm", "f06.ppm"]);

        let paths = expand_template("plain.pgm").unwrap();
        assert_eq!(paths, vec![PathBuf::from("plain.pgm")]);
    }

    #[test]
    fn verify_bad_templates_are_rejected() {
        assert!(expand_template("img[1.pgm").is_err());
        assert!(expand_template("img[a-b].pgm").is_err());
    }
}
