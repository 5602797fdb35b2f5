// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Encoder control: options, the coding context, state management, and the
//! frame and video drivers.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use fiasco_core::errors::{limit_error, parameter_error, Result};
use fiasco_core::io::BitWriter;
use fiasco_core::quant::{Rpf, RpfRange};

use crate::basis;
use crate::bintree::{address_of_level, size_of_level, size_of_tree, TreeModel};
use crate::bitstream;
use crate::coeff::Coeff;
use crate::decoder;
use crate::domain::DomainPool;
use crate::image::{self, Image, GRAY, Y};
use crate::ip;
use crate::motion::Motion;
use crate::subdivide::{self, Range};
use crate::tiling::{image_level, Tiling, TilingMethod};
use crate::wfa::{FrameType, State, StreamInfo, Wfa, MAX_EDGES, MAX_LABELS, MAX_STATES};

/// Costs of an infeasible approximation.
pub const MAX_COSTS: f32 = 1e20;

/// Encoder options.
#[derive(Clone, Debug)]
pub struct Options {
    pub basis_name: String,
    pub title: String,
    pub comment: String,
    /// Frame type pattern of a sequence, e.g. "IPPPP".
    pub pattern: String,
    pub max_states: usize,
    pub chroma_max_states: usize,
    /// Maximum number of elements of one linear combination.
    pub max_elements: usize,
    pub lc_min_level: u32,
    pub lc_max_level: u32,
    pub p_min_level: u32,
    pub p_max_level: u32,
    /// State images are stored explicitly up to this level.
    pub images_level: u32,
    pub rpf_mantissa: u32,
    pub rpf_range: RpfRange,
    pub dc_rpf_mantissa: u32,
    pub dc_rpf_range: RpfRange,
    pub d_rpf_mantissa: u32,
    pub d_rpf_range: RpfRange,
    pub d_dc_rpf_mantissa: u32,
    pub d_dc_rpf_range: RpfRange,
    /// Quality reduction factor of the chroma bands.
    pub chroma_decrease: f32,
    /// Enable ND prediction of I-frames.
    pub prediction: bool,
    /// Admit images of delta approximations in the normal domain pool.
    pub delta_domains: bool,
    /// Admit images of normal approximations in the delta domain pool.
    pub normal_domains: bool,
    pub search_range: u32,
    pub fps: u32,
    pub half_pixel: bool,
    pub cross_b_search: bool,
    pub b_as_past_ref: bool,
    pub smoothing: u32,
    pub full_search: bool,
    pub second_domain_block: bool,
    pub check_for_underflow: bool,
    pub check_for_overflow: bool,
    pub id_domain_pool: String,
    pub id_d_domain_pool: String,
    pub id_rpf_model: String,
    pub id_d_rpf_model: String,
    pub tiling_method: TilingMethod,
    pub tiling_exponent: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            basis_name: "small.wfa".to_string(),
            title: String::new(),
            comment: String::new(),
            pattern: "IPPPPPPPPP".to_string(),
            max_states: MAX_STATES,
            chroma_max_states: 40,
            max_elements: MAX_EDGES,
            lc_min_level: 4,
            lc_max_level: 12,
            p_min_level: 8,
            p_max_level: 10,
            images_level: 5,
            rpf_mantissa: 3,
            rpf_range: RpfRange::Range1_50,
            dc_rpf_mantissa: 5,
            dc_rpf_range: RpfRange::Range1_00,
            d_rpf_mantissa: 3,
            d_rpf_range: RpfRange::Range1_50,
            d_dc_rpf_mantissa: 5,
            d_dc_rpf_range: RpfRange::Range1_00,
            chroma_decrease: 2.0,
            prediction: false,
            delta_domains: true,
            normal_domains: true,
            search_range: 16,
            fps: 25,
            half_pixel: false,
            cross_b_search: false,
            b_as_past_ref: true,
            smoothing: 70,
            full_search: false,
            second_domain_block: false,
            check_for_underflow: false,
            check_for_overflow: false,
            id_domain_pool: "rle".to_string(),
            id_d_domain_pool: "rle".to_string(),
            id_rpf_model: "adaptive".to_string(),
            id_d_rpf_model: "adaptive".to_string(),
            tiling_method: TilingMethod::VarianceDsc,
            tiling_exponent: 0,
        }
    }
}

impl Options {
    /// Map an optimization level (0..=5) onto the search flags.
    pub fn set_optimization_level(&mut self, level: u32) {
        self.second_domain_block = level >= 1;
        self.check_for_underflow = level >= 2;
        self.check_for_overflow = level >= 2;
        self.full_search = level >= 3;
    }
}

/// Per-state scratch data of the encoder.
#[derive(Clone, Debug)]
pub struct StateCache {
    /// Pixel image of the state up to `images_level`, in bintree order.
    pub image: Option<Vec<f32>>,
    /// Inner products with all range images up to `products_level`.
    pub ip_images: Option<Vec<f32>>,
    /// Inner products with every earlier state, per level.
    pub ip_states: Vec<Option<Vec<f32>>>,
}

impl StateCache {
    pub fn new() -> StateCache {
        StateCache {
            image: None,
            ip_images: None,
            ip_states: vec![None; crate::wfa::MAX_LEVEL],
        }
    }

    pub fn clear(&mut self) {
        self.image = None;
        self.ip_images = None;
        for entry in self.ip_states.iter_mut() {
            *entry = None;
        }
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// All probability models the subdivider snapshots and rolls back.
#[derive(Clone)]
pub struct Models {
    pub tree: TreeModel,
    pub p_tree: TreeModel,
    pub domain_pool: DomainPool,
    pub d_domain_pool: DomainPool,
    pub coeff: Coeff,
    pub d_coeff: Coeff,
}

/// All parameters and scratch state threaded through the coding process.
pub struct CodingContext {
    pub options: Options,
    /// Lagrange multiplier weighting rate against distortion.
    pub price: f32,
    /// Pixels of the current range image, in bintree order (leaves only).
    pub pixels: Vec<f32>,
    /// Per-state images and inner products, indexed by state id.
    pub caches: Vec<StateCache>,
    /// Inner products with range images are stored up to this level.
    pub products_level: u32,
    pub tiling: Tiling,
    pub motion: Motion,
}

impl CodingContext {
    pub fn cache(&self, state: usize) -> &StateCache {
        &self.caches[state]
    }

    pub fn cache_mut(&mut self, state: usize) -> &mut StateCache {
        while self.caches.len() <= state {
            self.caches.push(StateCache::new());
        }
        &mut self.caches[state]
    }
}

/// Whether the encoder keeps images and inner products for `state`.
pub fn need_image(state: usize, wfa: &Wfa) -> bool {
    wfa.states[state].domain
}

/// Append a state to the WFA. For a non-auxiliary state the pixel image and
/// the inner products against all earlier states are computed and cached.
pub fn append_state(
    auxiliary: bool,
    final_distribution: f32,
    level: u32,
    mut state: State,
    wfa: &mut Wfa,
    c: &mut CodingContext,
) -> Result<u16> {
    state.final_distribution = final_distribution;
    state.level = level;
    state.domain = !auxiliary;

    wfa.states.push(state);
    let id = wfa.num_states() - 1;

    if !auxiliary {
        let images_level = c.options.images_level;
        let lc_max_level = c.options.lc_max_level;
        let products_size = size_of_tree(c.products_level);

        let cache = c.cache_mut(id);
        let mut image = vec![0.0; size_of_tree(images_level)];
        image[0] = final_distribution;
        cache.image = Some(image);
        cache.ip_images = Some(vec![0.0; products_size]);
        for l in images_level + 1..=lc_max_level {
            cache.ip_states[l as usize] = Some(vec![0.0; id + 1]);
        }

        compute_images(id, id, wfa, c);
        ip::compute_ip_states_state(id, id, wfa, c);
    }
    else {
        c.cache_mut(id).clear();
    }

    if wfa.num_states() >= MAX_STATES {
        return limit_error("maximum number of states reached");
    }

    Ok(id as u16)
}

/// Append the basis states `0..basis_states` of `wfa`, computing their
/// images and mutual inner products.
pub fn append_basis_states(wfa: &mut Wfa, c: &mut CodingContext) -> Result<()> {
    let basis_states = wfa.basis_states;
    let images_level = c.options.images_level;
    let lc_max_level = c.options.lc_max_level;
    let products_size = size_of_tree(c.products_level);

    for state in 0..basis_states {
        let final_distribution = wfa.states[state].final_distribution;
        let cache = c.cache_mut(state);
        let mut image = vec![0.0; size_of_tree(images_level)];
        image[0] = final_distribution;
        cache.image = Some(image);
        cache.ip_images = Some(vec![0.0; products_size]);
        for l in images_level + 1..=lc_max_level {
            cache.ip_states[l as usize] = Some(vec![0.0; state + 1]);
        }
    }

    compute_images(0, basis_states - 1, wfa, c);
    ip::compute_ip_states_state(0, basis_states - 1, wfa, c);

    if wfa.num_states() >= MAX_STATES {
        return limit_error("maximum number of states reached");
    }

    Ok(())
}

/// Append the transitions of the range `(state, label)` given by `edges`.
pub fn append_transitions(
    state: usize,
    label: usize,
    edges: &[crate::wfa::Edge],
    wfa: &mut Wfa,
) {
    wfa.states[state].labels[label].y_column = false;
    let y_state = wfa.states[state].labels[label].y_state;

    for edge in edges {
        wfa.append_edge(state, edge.into, edge.weight, label);
        if Some(edge.into) == y_state {
            wfa.states[state].labels[label].y_column = true;
        }
    }
}

/// Encode the image or video frames given by `inputs` and write the FIASCO
/// stream to `output`. `quality` ranges from 1 (worst) to 100 (best).
pub fn encode<W: std::io::Write>(
    inputs: &[PathBuf],
    quality: f32,
    options: &Options,
    output: W,
) -> Result<()> {
    if quality <= 0.0 {
        return parameter_error("compression quality has to be positive");
    }
    if quality >= 100.0 {
        warn!("quality typically is 1 (worst) to 100 (best), be prepared for a long running time");
    }
    if inputs.is_empty() {
        return parameter_error("no input images given");
    }

    let (mut wfa, mut c) = alloc_coder(inputs, options)?;
    basis::read_basis(&c.options.basis_name, &mut wfa)?;
    append_basis_states(&mut wfa, &mut c)?;

    c.price = 128.0 * 64.0 / quality;

    let mut writer = BitWriter::new(output);
    video_coder(inputs, &mut writer, &mut wfa, &mut c)?;
    writer.finish()?;

    Ok(())
}

/// Check the input frames and build the coding context.
fn alloc_coder(inputs: &[PathBuf], options: &Options) -> Result<(Wfa, CodingContext)> {
    let mut options = options.clone();

    // All frames have to be of the same geometry and colour model.
    let (width, height, color) = image::read_pnm_header(&inputs[0])?;
    for path in &inputs[1..] {
        let (w, h, c) = image::read_pnm_header(path)?;
        if (w, h) != (width, height) {
            return parameter_error("all images of a sequence have to be of the same size");
        }
        if c != color {
            return parameter_error(
                "all images of a sequence have to use the same color model",
            );
        }
    }

    let level = image_level(width, height);
    if level < 7 {
        return parameter_error("images smaller than 16x16 pixels are not supported");
    }

    options.lc_min_level = options.lc_min_level.max(3);
    options.lc_max_level = options.lc_max_level.min(level - 1);

    let mut tiling = Tiling::new(options.tiling_method, options.tiling_exponent, level);
    if inputs.len() > 1 && tiling.exponent > 0 {
        warn!("image tiling valid only with still image compression");
        tiling.exponent = 0;
    }

    if options.lc_max_level >= level - tiling.exponent {
        debug!(
            "'max_level' changed from {} to {} due to image tiling level",
            options.lc_max_level,
            level - tiling.exponent - 1
        );
        options.lc_max_level = level - tiling.exponent - 1;
    }
    if options.lc_min_level > options.lc_max_level {
        options.lc_min_level = options.lc_max_level;
    }

    options.p_min_level = options.p_min_level.max(options.lc_min_level);
    options.p_max_level = options.p_max_level.min(options.lc_max_level);
    if options.p_min_level > options.p_max_level {
        options.p_min_level = options.p_max_level;
    }

    options.images_level = options.images_level.min(options.lc_max_level - 1);
    let products_level =
        options.lc_max_level.saturating_sub(options.images_level + 1);

    options.max_states = options.max_states.clamp(1, MAX_STATES);
    options.max_elements = options.max_elements.clamp(1, MAX_EDGES);
    options.chroma_max_states = options.chroma_max_states.max(1);
    if options.search_range > 16 {
        warn!("motion vector search range clamped to 16");
        options.search_range = 16;
    }
    options.cross_b_search = options.half_pixel;

    let info = StreamInfo {
        basis_name: options.basis_name.clone(),
        title: options.title.clone(),
        comment: options.comment.clone(),
        max_states: options.max_states,
        chroma_max_states: options.chroma_max_states,
        color,
        width,
        height,
        level,
        p_min_level: options.p_min_level,
        p_max_level: options.p_max_level,
        frames: inputs.len() as u32,
        smoothing: options.smoothing,
        rpf: Rpf::new(options.rpf_mantissa, options.rpf_range),
        dc_rpf: Rpf::new(options.dc_rpf_mantissa, options.dc_rpf_range),
        d_rpf: Rpf::new(options.d_rpf_mantissa, options.d_rpf_range),
        d_dc_rpf: Rpf::new(options.d_dc_rpf_mantissa, options.d_dc_rpf_range),
        fps: options.fps,
        search_range: options.search_range,
        half_pixel: options.half_pixel,
        cross_b_search: options.cross_b_search,
        b_as_past_ref: options.b_as_past_ref,
        ..StreamInfo::default()
    };

    debug!(
        "images_level {}, products_level {}",
        options.images_level, products_level
    );

    let motion = Motion::new(&info);
    let pixels = vec![0.0; size_of_level(options.lc_max_level)];

    let wfa = Wfa { info, ..Wfa::new() };
    let c = CodingContext {
        options,
        price: 0.0,
        pixels,
        caches: Vec::new(),
        products_level,
        tiling,
        motion,
    };

    Ok((wfa, c))
}

fn pattern2type(frame: usize, pattern: &str) -> Result<FrameType> {
    let bytes = pattern.as_bytes();
    match bytes[frame % bytes.len()].to_ascii_uppercase() {
        b'I' => Ok(FrameType::I),
        b'P' => Ok(FrameType::P),
        b'B' => Ok(FrameType::B),
        _ => parameter_error("frame type pattern must consist of I, B, and P"),
    }
}

/// Encode a sequence of video frames.
fn video_coder<W: std::io::Write>(
    inputs: &[PathBuf],
    output: &mut BitWriter<W>,
    wfa: &mut Wfa,
    c: &mut CodingContext,
) -> Result<()> {
    debug!("generating {} WFAs", wfa.info.frames);

    let mut future_display: i64 = -1;
    let mut frame: i64;
    let mut display = 0usize;
    let mut reconst: Option<Image> = None;
    let mut future_frame = false;

    while display < inputs.len() {
        let mut image_name: &Path = &inputs[display];

        // Determine the type of the next frame; the first frame is forced
        // to be intra coded. Already coded future references are skipped.
        let mut frame_type =
            if display == 0 { FrameType::I } else { pattern2type(display, &c.options.pattern)? };

        if display as i64 == future_display {
            display += 1;
            continue;
        }
        else if frame_type == FrameType::B && display as i64 > future_display {
            // Search for the future reference of this B-frame.
            let mut i = display;
            frame = future_display;
            while frame_type == FrameType::B {
                i += 1;
                if i >= inputs.len() {
                    // Force the last valid frame to be a P-frame.
                    future_display = i as i64 - 1;
                    frame_type = FrameType::P;
                }
                else {
                    future_display = i as i64;
                    image_name = &inputs[i];
                    frame_type = pattern2type(i, &c.options.pattern)?;
                }
                frame = future_display;
            }
        }
        else {
            frame = display as i64;
            display += 1;
        }

        debug!("coding '{}' [{:?}-frame]", image_name.display(), frame_type);

        // Update the past and future reference frames.
        c.motion.frame_type = frame_type;
        wfa.frame_type = frame_type;
        match frame_type {
            FrameType::I => {
                c.motion.past = None;
                c.motion.future = None;
                reconst = None;
            }
            FrameType::P => {
                c.motion.past = reconst.take();
                c.motion.future = None;
            }
            FrameType::B => {
                if future_frame {
                    c.motion.future = reconst.take();
                }
                else if wfa.info.b_as_past_ref {
                    c.motion.past = reconst.take();
                }
                else {
                    reconst = None;
                }
            }
        }

        future_frame = frame == future_display;
        c.motion.number = frame as u32;
        c.motion.original = Some(image::read_image(image_name)?);
        if c.tiling.exponent > 0 && frame_type == FrameType::I {
            let original = c.motion.original.take().unwrap();
            c.tiling.perform(&original);
            c.motion.original = Some(original);
        }

        frame_coder(wfa, c, output)?;

        // Regenerate the coded frame as the reference of later frames.
        let mut decoded = decoder::decode_image(wfa)?;
        if frame_type != FrameType::I {
            let past = c.motion.past.take();
            decoder::restore_mc(&mut decoded, past.as_ref().unwrap(), c.motion.future.as_ref(), wfa)?;
            c.motion.past = past;
        }
        reconst = Some(decoded);

        c.motion.original = None;
        wfa.remove_states(wfa.basis_states);
    }

    Ok(())
}

/// Encode one frame and write its WFA to `output`.
fn frame_coder<W: std::io::Write>(
    wfa: &mut Wfa,
    c: &mut CodingContext,
    output: &mut BitWriter<W>,
) -> Result<()> {
    let bits = output.bits_processed();

    let d_pool_id = if c.options.prediction || c.motion.frame_type != FrameType::I {
        c.options.id_d_domain_pool.clone()
    }
    else {
        "constant".to_string()
    };

    let mut models = Models {
        tree: TreeModel::new(),
        p_tree: TreeModel::new(),
        domain_pool: DomainPool::new(&c.options.id_domain_pool, wfa.info.max_states, wfa),
        d_domain_pool: DomainPool::new(&d_pool_id, wfa.info.max_states, wfa),
        coeff: Coeff::new(
            &c.options.id_rpf_model,
            wfa.info.rpf,
            wfa.info.dc_rpf,
            c.options.lc_min_level,
            c.options.lc_max_level,
        ),
        d_coeff: Coeff::new(
            &c.options.id_d_rpf_model,
            wfa.info.d_rpf,
            wfa.info.d_dc_rpf,
            c.options.lc_min_level,
            c.options.lc_max_level,
        ),
    };

    let color = c.motion.original.as_ref().unwrap().color;
    let prediction = c.options.prediction || c.motion.frame_type != FrameType::I;

    if !color {
        let mut range = Range { level: wfa.info.level, ..Range::default() };
        let costs =
            subdivide::subdivide(MAX_COSTS, GRAY, None, &mut range, wfa, c, &mut models, prediction, false)?;

        match range.child {
            Some(root) => wfa.root_state = root as usize,
            None => return limit_error("no root state generated"),
        }

        print_statistics(None, costs, wfa, &range);
    }
    else {
        let saved_lc_min_level = c.options.lc_min_level;
        let mut band_roots: [Option<u16>; 3] = [None; 3];
        let mut ycb_node = 0u16;

        // The three colour components are coded in a row; virtual states
        // describing the joint image are generated afterwards.
        for band in 0..3 {
            debug!("encoding color component {}", band);

            if band == 1 {
                models.domain_pool.chroma(wfa.info.chroma_max_states, wfa);

                // Don't use a finer partitioning for the chroma bands than
                // for the luminance band.
                let mut min_level = crate::wfa::MAX_LEVEL as u32;
                for state in wfa.basis_states..wfa.num_states() {
                    let lincomb = wfa.states[state]
                        .labels
                        .iter()
                        .filter(|entry| entry.child.is_none())
                        .count();
                    if lincomb > 0 {
                        min_level = min_level.min(wfa.states[state].level - 1);
                    }
                }
                c.options.lc_min_level = min_level;

                if c.motion.frame_type != FrameType::I {
                    let mut original = c.motion.original.take().unwrap();
                    motion_subtract(&mut original, c, wfa);
                    c.motion.original = Some(original);
                }
            }

            let mut range = Range { level: wfa.info.level, ..Range::default() };
            let costs = subdivide::subdivide(
                MAX_COSTS,
                band,
                band_roots[Y],
                &mut range,
                wfa,
                c,
                &mut models,
                c.motion.frame_type != FrameType::I && band == Y,
                false,
            )?;

            print_statistics(Some(band), costs, wfa, &range);

            match range.child {
                Some(root) => band_roots[band] = Some(root),
                None => return limit_error("no root state generated for color component"),
            }

            if band == 1 {
                let mut state = State::default();
                state.labels[0].child = band_roots[0];
                state.labels[1].child = band_roots[1];
                ycb_node = wfa.num_states() as u16;
                let final_distribution = virtual_final(&state, wfa);
                append_state(true, final_distribution, wfa.info.level + 1, state, wfa, c)?;
            }
        }

        let mut state = State::default();
        state.labels[0].child = band_roots[2];
        let final_distribution = virtual_final(&state, wfa);
        append_state(true, final_distribution, wfa.info.level + 1, state, wfa, c)?;

        let mut state = State::default();
        state.labels[0].child = Some(ycb_node);
        state.labels[1].child = Some(wfa.num_states() as u16 - 1);
        let final_distribution = virtual_final(&state, wfa);
        append_state(true, final_distribution, wfa.info.level + 2, state, wfa, c)?;

        wfa.root_state = wfa.num_states() - 1;
        c.options.lc_min_level = saved_lc_min_level;
    }

    // The per-state scratch images are no longer needed.
    for state in wfa.basis_states..c.caches.len() {
        c.caches[state].clear();
    }

    wfa.locate_delta_states();
    bitstream::write_next_wfa(wfa, c, output)?;

    let bits = output.bits_processed() - bits;
    let pixels =
        u64::from(wfa.info.width) * u64::from(wfa.info.height);
    debug!(
        "total number of bits written: {} ({} bytes, {:.3} bpp)",
        bits,
        bits >> 3,
        bits as f64 / pixels as f64
    );

    Ok(())
}

fn motion_subtract(original: &mut Image, c: &mut CodingContext, wfa: &Wfa) {
    let past = c.motion.past.as_ref().unwrap();
    let future = c.motion.future.as_ref();
    crate::motion::subtract_mc(original, past, future, wfa);
}

fn virtual_final(state: &State, wfa: &Wfa) -> f32 {
    let mut final_ = 0.0;
    for entry in &state.labels {
        if let Some(child) = entry.child {
            final_ += wfa.states[child as usize].final_distribution;
        }
    }
    final_ / MAX_LABELS as f32
}

fn print_statistics(band: Option<usize>, costs: f32, wfa: &Wfa, range: &Range) {
    let mut max_level = 0;
    let mut min_level = crate::wfa::MAX_LEVEL as u32;
    for state in wfa.basis_states..wfa.num_states() {
        let lincomb = wfa.states[state]
            .labels
            .iter()
            .filter(|entry| entry.child.is_none())
            .count();
        if lincomb > 0 {
            max_level = max_level.max(wfa.states[state].level - 1);
            min_level = min_level.min(wfa.states[state].level - 1);
        }
    }

    let pixels = f64::from(wfa.info.width) * f64::from(wfa.info.height);
    let err = f64::from(range.err);

    debug!("image partitioning: maximum level {}, minimum level {}", max_level, min_level);
    debug!("WFA contains {} states ({} basis states)", wfa.num_states(), wfa.basis_states);
    debug!(
        "estimated error: {:.2} (RMSE: {:.2}, PSNR: {:.2} dB)",
        err,
        (err / pixels).sqrt(),
        10.0 * (255.0 * 255.0 / (err / pixels)).log10()
    );
    let total_bits = range.tree_bits
        + range.matrix_bits
        + range.weights_bits
        + range.mv_tree_bits
        + range.mv_coord_bits
        + range.nd_tree_bits
        + range.nd_weights_bits;
    debug!(
        "estimated filesize: {:.0} bits ({:.0} bytes), band {:?}",
        total_bits,
        total_bits / 8.0,
        band
    );
    debug!(
        "(T: {:.0}, M: {:.0}, W: {:.0}, MC: {:.0}, MV: {:.0}, NT: {:.0}, NW: {:.0})",
        range.tree_bits,
        range.matrix_bits,
        range.weights_bits,
        range.mv_tree_bits,
        range.mv_coord_bits,
        range.nd_tree_bits,
        range.nd_weights_bits
    );
    debug!("total costs: {:.2}", costs);
}

/// Compute the images of the states `from..=to` at levels `1..=images_level`
/// from the weighted sums of their children images.
pub fn compute_images(from: usize, to: usize, wfa: &Wfa, c: &mut CodingContext) {
    let images_level = c.options.images_level;

    for level in 1..=images_level {
        for state in from..=to {
            for label in 0..MAX_LABELS {
                let offset =
                    address_of_level(level) + label * size_of_level(level - 1);
                let src_offset = address_of_level(level - 1);
                let size = size_of_level(level - 1);

                let entry = &wfa.states[state].labels[label];
                if let Some(child) = entry.child {
                    let src: Vec<f32> = c.caches[child as usize].image.as_ref().unwrap()
                        [src_offset..src_offset + size]
                        .to_vec();
                    let dst = c.caches[state].image.as_mut().unwrap();
                    dst[offset..offset + size].copy_from_slice(&src);
                }
                for edge in &entry.edges {
                    let src: Vec<f32> = c.caches[edge.into as usize].image.as_ref().unwrap()
                        [src_offset..src_offset + size]
                        .to_vec();
                    let dst = c.caches[state].image.as_mut().unwrap();
                    for (d, s) in dst[offset..offset + size].iter_mut().zip(&src) {
                        *d += s * edge.weight;
                    }
                }
            }
        }
    }
}
