// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Range prediction with motion compensation or nondeterminism.
//!
//! P- and B-frame ranges are predicted by motion compensation, I-frame
//! ranges by subtracting the projection onto the DC state. The residual is
//! approximated by a recursive call of the subdivider with `delta` set. The
//! prediction is committed only if its total cost beats both alternatives
//! of the caller; otherwise all automaton states, caches, and probability
//! models are restored.

use fiasco_core::errors::Result;

use crate::bintree::{cut_to_bintree, height_of_level, size_of_level, size_of_tree, width_of_level};
use crate::coder::{need_image, CodingContext, Models, StateCache, MAX_COSTS};
use crate::ip::{compute_ip_images_state, get_ip_image_state, get_ip_state_state};
use crate::motion::{fill_norms_table, find_b_frame_mc, find_p_frame_mc};
use crate::subdivide::{subdivide, Range};
use crate::wfa::{Edge, FrameType, State, Wfa};

/// Saved tail of the WFA and the per-state caches, for rollback.
struct StateData {
    states: Vec<State>,
    caches: Vec<StateCache>,
}

fn store_state_data(from: usize, wfa: &mut Wfa, c: &mut CodingContext) -> StateData {
    let states: Vec<State> = wfa.states.drain(from..).collect();
    let mut caches = Vec::with_capacity(states.len());
    for state in from..from + states.len() {
        let cache = std::mem::take(c.cache_mut(state));
        caches.push(cache);
    }
    StateData { states, caches }
}

fn restore_state_data(from: usize, data: StateData, wfa: &mut Wfa, c: &mut CodingContext) {
    wfa.states.truncate(from);
    wfa.states.extend(data.states);
    for (n, cache) in data.caches.into_iter().enumerate() {
        *c.cache_mut(from + n) = cache;
    }
}

/// Try to predict `range`. The probability models are rolled back to
/// `saved_models` (their state before the recursive subdivision of the
/// caller) first; on failure everything is restored and [`MAX_COSTS`] is
/// returned.
pub fn predict_range(
    max_costs: f32,
    price: f32,
    range: &mut Range,
    wfa: &mut Wfa,
    c: &mut CodingContext,
    models: &mut Models,
    saved_models: &Models,
    band: usize,
    y_state: Option<u16>,
    states: usize,
) -> Result<f32> {
    // Save the WFA tail and the models produced by the recursive
    // subdivision of the caller.
    let rec_models = models.clone();
    let rec_states = wfa.num_states();
    let rec_state_data = store_state_data(states, wfa, c);

    *models = saved_models.clone();

    let costs = if c.motion.frame_type == FrameType::I {
        nd_prediction(max_costs, price, band, y_state, range, wfa, c, models)?
    }
    else {
        mc_prediction(max_costs, price, band, y_state, range, wfa, c, models)?
    };

    if costs < MAX_COSTS {
        Ok((range.tree_bits
            + range.matrix_bits
            + range.weights_bits
            + range.mv_tree_bits
            + range.mv_coord_bits
            + range.nd_tree_bits
            + range.nd_weights_bits)
            * price
            + range.err)
    }
    else {
        // Restore the WFA and the models to the state before this call.
        *models = rec_models;
        range.prediction = false;

        wfa.remove_states(states);
        restore_state_data(states, rec_state_data, wfa, c);
        debug_assert_eq!(wfa.num_states(), rec_states);

        Ok(MAX_COSTS)
    }
}

fn mc_prediction(
    max_costs: f32,
    price: f32,
    band: usize,
    y_state: Option<u16>,
    range: &mut Range,
    wfa: &mut Wfa,
    c: &mut CodingContext,
    models: &mut Models,
) -> Result<f32> {
    let width = width_of_level(range.level);
    let height = height_of_level(range.level);
    let mut mcpe = vec![0i16; (width * height) as usize];

    let mut prange = range.clone();

    // At the bottom level of the mc tree the norms table is filled in.
    if prange.level == wfa.info.p_min_level {
        let info = wfa.info.clone();
        fill_norms_table(prange.x, prange.y, prange.level, &info, &mut c.motion);
    }

    if c.motion.frame_type == FrameType::P {
        find_p_frame_mc(&mut mcpe, price, &mut prange, &wfa.info, &c.motion);
    }
    else {
        find_b_frame_mc(&mut mcpe, price, &mut prange, &wfa.info, &c.motion);
    }

    let mut costs = (prange.mv_tree_bits + prange.mv_coord_bits) * price;

    if costs >= max_costs {
        return Ok(MAX_COSTS);
    }

    // Approximate the MCPE recursively.
    let mut pixels = vec![0.0f32; size_of_level(prange.level)];
    cut_to_bintree(&mut pixels, &mcpe, width, height, 0, 0, width, height);
    let saved_pixels = std::mem::replace(&mut c.pixels, pixels);

    let last_state = wfa.num_states() - 1;
    let products_size = size_of_tree(c.products_level);
    let mut saved_ipi: Vec<(usize, Option<Vec<f32>>)> = Vec::new();
    for state in 0..=last_state {
        if need_image(state, wfa) {
            let cache = c.cache_mut(state);
            saved_ipi
                .push((state, cache.ip_images.replace(vec![0.0; products_size])));
        }
    }

    let mvc = prange.mv_coord_bits;
    let mvt = prange.mv_tree_bits;

    prange.image = 0;
    prange.address = 0;
    prange.tree_bits = 0.0;
    prange.matrix_bits = 0.0;
    prange.weights_bits = 0.0;
    prange.mv_coord_bits = 0.0;
    prange.mv_tree_bits = 0.0;
    prange.nd_weights_bits = 0.0;
    prange.nd_tree_bits = 0.0;

    compute_ip_images_state(prange.image, prange.address, prange.level, 1, 0, wfa, c);
    costs += subdivide(max_costs - costs, band, y_state, &mut prange, wfa, c, models, false, true)?;

    let result = if costs < max_costs {
        let img = range.image;
        let adr = range.address;
        *range = prange;
        range.image = img;
        range.address = adr;
        range.mv_coord_bits = mvc;
        range.mv_tree_bits = mvt;
        range.prediction = true;

        for state in last_state + 1..wfa.num_states() {
            if need_image(state, wfa) {
                let cache = c.cache_mut(state);
                cache.ip_images = Some(vec![0.0; products_size]);
            }
        }

        (range.tree_bits
            + range.matrix_bits
            + range.weights_bits
            + range.mv_tree_bits
            + range.mv_coord_bits
            + range.nd_tree_bits
            + range.nd_weights_bits)
            * price
            + range.err
    }
    else {
        MAX_COSTS
    };

    for (state, ipi) in saved_ipi {
        c.cache_mut(state).ip_images = ipi;
    }
    c.pixels = saved_pixels;

    Ok(result)
}

fn nd_prediction(
    max_costs: f32,
    price: f32,
    band: usize,
    y_state: Option<u16>,
    range: &mut Range,
    wfa: &mut Wfa,
    c: &mut CodingContext,
    models: &mut Models,
) -> Result<f32> {
    let mut lrange = range.clone();

    // Predict the range with its projection onto the DC state.
    {
        let x = get_ip_image_state(range.image, range.address, range.level, 0, c);
        let y = get_ip_state_state(0, 0, range.level, c);
        let dc_rpf = models.coeff.dc_rpf;
        let w = dc_rpf.dequantize(dc_rpf.quantize(x / y));

        // A DC weight quantised to zero has no representation in the ND
        // coefficients block.
        if w == 0.0 {
            return Ok(MAX_COSTS);
        }

        lrange.edges.clear();
        lrange.edges.push(Edge { into: 0, weight: w });
        lrange.mv_coord_bits = 0.0;
        lrange.mv_tree_bits = 0.0;
        lrange.nd_tree_bits = models.p_tree.bits(false, lrange.level);
        lrange.nd_weights_bits = 0.0;
        lrange.tree_bits = 0.0;
        lrange.matrix_bits = 0.0;
        lrange.weights_bits = models.coeff.bits(&[(w, 0)], range.level);
    }

    let mut costs = price * (lrange.weights_bits + lrange.nd_tree_bits);

    if costs >= max_costs {
        return Ok(MAX_COSTS);
    }

    // Build the difference image original - DC prediction and approximate
    // it recursively.
    let size = size_of_level(range.level);
    let dc_pixel = c.cache(0).image.as_ref().unwrap()[0];
    let w = -lrange.edges[0].weight * dc_pixel;

    let pixels: Vec<f32> = c.pixels
        [range.address as usize * size..(range.address as usize + 1) * size]
        .iter()
        .map(|p| p + w)
        .collect();
    let saved_pixels = std::mem::replace(&mut c.pixels, pixels);

    let mut rrange = range.clone();
    rrange.tree_bits = 0.0;
    rrange.matrix_bits = 0.0;
    rrange.weights_bits = 0.0;
    rrange.mv_coord_bits = 0.0;
    rrange.mv_tree_bits = 0.0;
    rrange.nd_tree_bits = 0.0;
    rrange.nd_weights_bits = 0.0;
    rrange.image = 0;
    rrange.address = 0;

    let last_state = wfa.num_states() - 1;
    let products_size = size_of_tree(c.products_level);
    let mut saved_ipi: Vec<(usize, Option<Vec<f32>>)> = Vec::new();
    for state in 0..=last_state {
        if need_image(state, wfa) {
            let cache = c.cache_mut(state);
            saved_ipi
                .push((state, cache.ip_images.replace(vec![0.0; products_size])));
        }
    }

    compute_ip_images_state(rrange.image, rrange.address, rrange.level, 1, 0, wfa, c);

    costs += subdivide(max_costs - costs, band, y_state, &mut rrange, wfa, c, models, false, true)?;

    let result = if costs < max_costs && rrange.child.is_some() {
        let img = range.image;
        let adr = range.address;
        let nd_edges = lrange.edges.clone();
        *range = rrange;
        range.image = img;
        range.address = adr;
        range.nd_tree_bits += lrange.nd_tree_bits;
        range.nd_weights_bits += lrange.weights_bits;
        range.edges = nd_edges;
        range.prediction = true;

        for state in last_state + 1..wfa.num_states() {
            if need_image(state, wfa) {
                let cache = c.cache_mut(state);
                cache.ip_images = Some(vec![0.0; products_size]);
            }
        }

        costs
    }
    else {
        MAX_COSTS
    };

    for (state, ipi) in saved_ipi {
        c.cache_mut(state).ip_images = ipi;
    }
    c.pixels = saved_pixels;

    Ok(result)
}
