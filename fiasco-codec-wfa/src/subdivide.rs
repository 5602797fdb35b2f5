// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recursive subdivision of range images.
//!
//! For every range the subdivider evaluates up to three alternatives: a
//! linear combination at the current level, a recursive subdivision into the
//! two child ranges, and (where allowed) a prediction. The alternative with
//! the minimum rate-distortion cost wins; probability models are snapshotted
//! on entry so the losing alternatives can be rolled back.

use log::warn;

use fiasco_core::errors::Result;

use crate::approx::approximate_range;
use crate::bintree::{cut_to_bintree, height_of_level, locate_subimage, width_of_level};
use crate::coder::{
    append_state, need_image, CodingContext, Models, MAX_COSTS,
};
use crate::ip::compute_ip_images_state;
use crate::motion::{clear_norms_table, fill_norms_table, update_norms_table};
use crate::prediction::predict_range;
use crate::wfa::{EdgeList, FrameType, MotionVector, State, Wfa, MAX_LABELS};

/// The image block being approximated at one recursion step, together with
/// its bit and error accumulators.
#[derive(Clone, Debug, Default)]
pub struct Range {
    /// Absolute bintree address, used for the tiling permutation.
    pub global_address: u32,
    /// Coordinates of the upper left corner.
    pub x: u32,
    pub y: u32,
    /// Position in the tree of range images.
    pub image: u32,
    /// Address of the pixel data.
    pub address: u32,
    pub level: u32,
    /// Transitions of the chosen linear combination.
    pub edges: EdgeList,
    /// New state if the range was subdivided, `None` for a leaf.
    pub child: Option<u16>,
    /// Approximation error.
    pub err: f32,
    pub tree_bits: f32,
    pub matrix_bits: f32,
    pub weights_bits: f32,
    pub mv_tree_bits: f32,
    pub mv_coord_bits: f32,
    pub nd_tree_bits: f32,
    pub nd_weights_bits: f32,
    pub mv: MotionVector,
    /// Whether the range was coded through a prediction.
    pub prediction: bool,
}

/// Subdivide the current `range` recursively and decide whether a linear
/// combination, a recursive subdivision, or a prediction is the best
/// approximation. With `prediction` motion compensation or nondeterminism
/// may be tried; `delta` marks a range that is already predicted.
///
/// Returns the costs of the best approximation, or [`MAX_COSTS`] if they
/// exceed `max_costs`.
pub fn subdivide(
    max_costs: f32,
    band: usize,
    y_state: Option<u16>,
    range: &mut Range,
    wfa: &mut Wfa,
    c: &mut CodingContext,
    models: &mut Models,
    prediction: bool,
    delta: bool,
) -> Result<f32> {
    range.edges.clear();
    range.child = None;

    if range.level < 3 {
        return Ok(MAX_COSTS);
    }

    // If image tiling is performed and the tiling level is reached, get the
    // coordinates of the permuted block.
    if c.tiling.exponent > 0 && range.level == wfa.info.level - c.tiling.exponent {
        let vorder = c.tiling.vorder[range.global_address as usize];
        if vorder < 0 {
            return Ok(0.0);
        }
        let (x, y, _, _) = locate_subimage(wfa.info.level, range.level, vorder as u32);
        range.x = x;
        range.y = y;
    }

    let (original_width, original_height) = {
        let original = c.motion.original.as_ref().unwrap();
        (original.width, original.height)
    };

    if range.x >= original_width || range.y >= original_height {
        return Ok(0.0);
    }

    let try_mc = prediction
        && c.motion.frame_type != FrameType::I
        && range.level >= wfa.info.p_min_level
        && range.level <= wfa.info.p_max_level
        && range.x + width_of_level(range.level) <= original_width
        && range.y + height_of_level(range.level) <= original_height;

    let try_nd = prediction
        && c.motion.frame_type == FrameType::I
        && range.level >= wfa.info.p_min_level
        && range.level <= wfa.info.p_max_level;

    if try_mc {
        let info = wfa.info.clone();
        clear_norms_table(range.level, &info, &mut c.motion);
    }

    // A top level entry: copy the range pixels into the bintree buffer and
    // reset the inner product tables. Residual recursions bring their own
    // pixel buffer.
    if range.level == c.options.lc_max_level && !delta {
        init_range(range, band, wfa, c);
    }

    let mut price = c.price;
    if band != crate::image::Y {
        price *= c.options.chroma_decrease;
    }

    // Children of the corresponding state in the Y band (chroma only).
    let new_y_state: [Option<u16>; MAX_LABELS] = if band != crate::image::Y {
        match y_state {
            Some(ys) => [
                wfa.states[ys as usize].labels[0].child,
                wfa.states[ys as usize].labels[1].child,
            ],
            None => [None, None],
        }
    }
    else {
        [None, None]
    };

    // Snapshot all models that may get modified during the recursion.
    let saved_models = models.clone();
    let states = wfa.num_states();

    // First alternative: approximate the range with a linear combination.
    let mut lrange = range.clone();
    let lincomb_costs = if range.level <= c.options.lc_max_level {
        lrange.child = None;
        lrange.tree_bits = models.tree.bits(false, lrange.level);
        lrange.matrix_bits = 0.0;
        lrange.weights_bits = 0.0;
        lrange.mv_tree_bits = if try_mc { 1.0 } else { 0.0 };
        lrange.mv_coord_bits = 0.0;
        lrange.nd_tree_bits = 0.0;
        lrange.nd_weights_bits = 0.0;
        lrange.prediction = false;

        let (pool, coeff) = if delta {
            (&mut models.d_domain_pool, &mut models.d_coeff)
        }
        else {
            (&mut models.domain_pool, &mut models.coeff)
        };
        approximate_range(
            max_costs,
            price,
            c.options.max_elements,
            y_state,
            &mut lrange,
            pool,
            coeff,
            wfa,
            c,
        )
    }
    else {
        MAX_COSTS
    };

    // Keep the models the linear combination produced and restore the
    // snapshot for the second alternative.
    let lc_models = std::mem::replace(models, saved_models.clone());

    // Second alternative: recursive subdivision.
    let mut rrange = range.clone();
    let mut child: [Range; MAX_LABELS] = [Range::default(), Range::default()];
    let mut subdivide_costs = MAX_COSTS;

    if range.level > c.options.lc_min_level {
        rrange.tree_bits = models.tree.bits(true, rrange.level);
        rrange.matrix_bits = 0.0;
        rrange.weights_bits = 0.0;
        rrange.err = 0.0;
        rrange.mv_tree_bits = if try_mc { 1.0 } else { 0.0 };
        rrange.mv_coord_bits = 0.0;
        rrange.nd_tree_bits =
            if try_nd { models.p_tree.bits(true, range.level) } else { 0.0 };
        rrange.nd_weights_bits = 0.0;
        rrange.prediction = false;

        subdivide_costs = (rrange.tree_bits
            + rrange.weights_bits
            + rrange.matrix_bits
            + rrange.mv_tree_bits
            + rrange.mv_coord_bits
            + rrange.nd_tree_bits
            + rrange.nd_weights_bits)
            * price;

        for label in 0..MAX_LABELS {
            child[label] = Range {
                image: rrange.image * MAX_LABELS as u32 + label as u32 + 1,
                address: rrange.address * MAX_LABELS as u32 + label as u32,
                global_address: rrange.global_address * MAX_LABELS as u32 + label as u32,
                level: rrange.level - 1,
                x: if rrange.level & 1 == 1 {
                    rrange.x
                }
                else {
                    rrange.x + label as u32 * width_of_level(rrange.level - 1)
                },
                y: if rrange.level & 1 == 1 {
                    rrange.y + label as u32 * height_of_level(rrange.level - 1)
                }
                else {
                    rrange.y
                },
                ..Range::default()
            };

            // Inner products of states generated during the recursion of
            // child 0 against the subtree of child 1.
            if label > 0 && rrange.level <= c.options.lc_max_level {
                compute_ip_images_state(
                    child[label].image,
                    child[label].address,
                    child[label].level,
                    1,
                    states,
                    wfa,
                    c,
                );
            }

            let remaining_costs = lincomb_costs.min(max_costs) - subdivide_costs;

            if remaining_costs > 0.0 {
                subdivide_costs += subdivide(
                    remaining_costs,
                    band,
                    new_y_state[label],
                    &mut child[label],
                    wfa,
                    c,
                    models,
                    prediction,
                    delta,
                )?;
            }
            else if try_mc && child[label].level >= wfa.info.p_min_level {
                let info = wfa.info.clone();
                fill_norms_table(child[label].x, child[label].y, child[label].level, &info, &mut c.motion);
            }

            if try_mc {
                let info = wfa.info.clone();
                update_norms_table(rrange.level, &info, &mut c.motion);
            }

            if subdivide_costs >= lincomb_costs.min(max_costs) {
                subdivide_costs = MAX_COSTS;
                break;
            }

            rrange.err += child[label].err;
            rrange.tree_bits += child[label].tree_bits;
            rrange.matrix_bits += child[label].matrix_bits;
            rrange.weights_bits += child[label].weights_bits;
            rrange.mv_tree_bits += child[label].mv_tree_bits;
            rrange.mv_coord_bits += child[label].mv_coord_bits;
            rrange.nd_weights_bits += child[label].nd_weights_bits;
            rrange.nd_tree_bits += child[label].nd_tree_bits;

            models.tree.update(child[label].child.is_some(), child[label].level);
            models.p_tree.update(!child[label].prediction, child[label].level);
        }
    }

    // Third alternative: predict the range and approximate the residual.
    if try_mc || try_nd {
        let prediction_costs = predict_range(
            lincomb_costs.min(subdivide_costs).min(max_costs),
            price,
            range,
            wfa,
            c,
            models,
            &saved_models,
            band,
            y_state,
            states,
        )?;
        if prediction_costs < MAX_COSTS {
            return Ok(prediction_costs);
        }
    }

    if lincomb_costs >= MAX_COSTS && subdivide_costs >= MAX_COSTS {
        // Neither alternative stayed below 'max_costs'.
        *models = saved_models;
        if wfa.num_states() != states {
            wfa.remove_states(states);
        }
        Ok(MAX_COSTS)
    }
    else if lincomb_costs < subdivide_costs {
        // The factors of the linear combination are stored in 'lrange';
        // revert the probability models to the post-LC state.
        *models = lc_models;
        *range = lrange;
        if wfa.num_states() != states {
            wfa.remove_states(states);
        }
        Ok(lincomb_costs)
    }
    else {
        // Use the subdivision: generate a new state with the transitions of
        // the two children. The state is kept out of the domain pools if it
        // is a chroma state, crosses the tiling level, or lies partially
        // outside the image.
        let auxiliary = band > crate::image::Y
            || (c.tiling.exponent > 0
                && rrange.level > wfa.info.level - c.tiling.exponent)
            || range.x + width_of_level(range.level) > original_width
            || range.y + height_of_level(range.level) > original_height;

        init_new_state(auxiliary, delta, &mut rrange, &child, &new_y_state, wfa, c, models)?;
        *range = rrange;

        Ok(subdivide_costs)
    }
}

/// Initialise a new state with the children of `range` and append it to the
/// WFA. With `auxiliary` the state is kept out of the domain pools.
fn init_new_state(
    auxiliary: bool,
    delta: bool,
    range: &mut Range,
    child: &[Range; MAX_LABELS],
    y_state: &[Option<u16>; MAX_LABELS],
    wfa: &mut Wfa,
    c: &mut CodingContext,
    models: &mut Models,
) -> Result<()> {
    let id = wfa.num_states() as u16;

    let mut state_is_domain = false;
    if !auxiliary {
        if !delta || c.options.delta_domains {
            state_is_domain = models.domain_pool.append(id, range.level, wfa);
        }
        if delta || c.options.normal_domains {
            state_is_domain =
                models.d_domain_pool.append(id, range.level, wfa) || state_is_domain;
        }
    }

    range.edges.clear();
    range.child = Some(id);

    let mut state = State { delta, ..State::default() };
    for label in 0..MAX_LABELS {
        let entry = &mut state.labels[label];
        entry.child = child[label].child;
        entry.y_state = y_state[label];
        entry.mv = child[label].mv;
        entry.x = child[label].x;
        entry.y = child[label].y;
        entry.prediction = child[label].prediction;

        for edge in &child[label].edges {
            let pos = entry.edges.iter().position(|e| e.into >= edge.into).unwrap_or(entry.edges.len());
            entry.edges.insert(pos, *edge);
            if Some(edge.into) == entry.y_state {
                entry.y_column = true;
            }
        }
    }

    if range.err < 0.0 {
        warn!("negative image norm: {}, {}", child[0].err, child[1].err);
    }

    let final_distribution = final_distribution_of(&state, wfa);
    append_state(!state_is_domain, final_distribution, range.level, state, wfa, c)?;

    Ok(())
}

/// Final distribution of a state that is not yet part of the WFA.
fn final_distribution_of(state: &State, wfa: &Wfa) -> f32 {
    let mut final_ = 0.0;
    for entry in &state.labels {
        if let Some(child) = entry.child {
            final_ += wfa.states[child as usize].final_distribution;
        }
        for edge in &entry.edges {
            final_ += edge.weight * wfa.states[edge.into as usize].final_distribution;
        }
    }
    final_ / MAX_LABELS as f32
}

/// Copy the pixels of a fresh top-level `range` into the bintree buffer and
/// recompute the inner product tables.
fn init_range(range: &mut Range, band: usize, wfa: &Wfa, c: &mut CodingContext) {
    for state in 0..wfa.num_states() {
        if need_image(state, wfa) {
            if let Some(ipi) = c.caches[state].ip_images.as_mut() {
                for value in ipi.iter_mut() {
                    *value = 0.0;
                }
            }
        }
    }

    let mut pixels = std::mem::take(&mut c.pixels);
    {
        let original = c.motion.original.as_ref().unwrap();
        cut_to_bintree(
            &mut pixels,
            &original.pixels[band],
            original.width,
            original.height,
            range.x,
            range.y,
            width_of_level(range.level),
            height_of_level(range.level),
        );
    }
    c.pixels = pixels;

    range.address = 0;
    range.image = 0;
    compute_ip_images_state(0, 0, range.level, 1, 0, wfa, c);
}
