// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Approximation of range images with matching pursuit.
//!
//! The range is approximated step by step: each step picks the domain image
//! whose Gram-Schmidt orthogonalisation against the already chosen vectors
//! yields the largest rate-distortion gain. Coefficients are computed
//! against the non-orthogonal basis by back substitution and quantised in
//! reverse order so the quantisation error propagates forward.

use log::warn;

use crate::bintree::size_of_level;
use crate::coder::{CodingContext, MAX_COSTS};
use crate::coeff::Coeff;
use crate::domain::DomainPool;
use crate::ip::{get_ip_image_state, get_ip_state_state};
use crate::subdivide::Range;
use crate::wfa::{Edge, Wfa, MAX_EDGES};

const MIN_NORM: f32 = 2e-3;

/// Scratch state of one matching-pursuit invocation.
struct MpWorkspace {
    /// Domain already chosen or unusable.
    used: Vec<bool>,
    /// Remaining numerator `<b, o_n>` per domain.
    rem_numerator: Vec<f32>,
    /// Remaining denominator `||o_n||^2` per domain.
    rem_denominator: Vec<f32>,
    /// `<s_j, o_i>` per domain and orthogonal vector.
    ip_domain_ortho: Vec<[f32; MAX_EDGES]>,
    /// `<b, o_i>` per orthogonal vector.
    ip_image_ortho: [f32; MAX_EDGES],
    /// `||o_i||^2` per orthogonal vector.
    norm_ortho: [f32; MAX_EDGES],
}

impl MpWorkspace {
    fn new(domains: usize) -> MpWorkspace {
        MpWorkspace {
            used: vec![false; domains],
            rem_numerator: vec![0.0; domains],
            rem_denominator: vec![0.0; domains],
            ip_domain_ortho: vec![[0.0; MAX_EDGES]; domains],
            ip_image_ortho: [0.0; MAX_EDGES],
            norm_ortho: [0.0; MAX_EDGES],
        }
    }
}

/// Result of one matching-pursuit run.
#[derive(Clone)]
struct Mp {
    /// Domains to exclude before the search starts (positions into the
    /// candidate list).
    exclude: Vec<usize>,
    /// Chosen domains, as positions into the candidate list.
    indices: Vec<usize>,
    /// Chosen domains, as state ids.
    into: Vec<u16>,
    weight: [f32; MAX_EDGES],
    matrix_bits: f32,
    weights_bits: f32,
    err: f32,
    costs: f32,
}

impl Mp {
    fn new() -> Mp {
        Mp {
            exclude: Vec::new(),
            indices: Vec::new(),
            into: Vec::new(),
            weight: [0.0; MAX_EDGES],
            matrix_bits: 0.0,
            weights_bits: 0.0,
            err: 0.0,
            costs: 0.0,
        }
    }
}

/// Approximate the image block `range` by matching pursuit, running the
/// search several times with different exclusions in order to find the best
/// approximation. On success the chosen edges, weights and error are
/// committed to `range` and the probability models are updated.
///
/// Returns the approximation costs, or [`MAX_COSTS`] if no approximation
/// below `max_costs` exists.
pub fn approximate_range(
    max_costs: f32,
    price: f32,
    max_edges: usize,
    y_state: Option<u16>,
    range: &mut Range,
    domain_pool: &mut DomainPool,
    coeff: &mut Coeff,
    wfa: &Wfa,
    c: &CodingContext,
) -> f32 {
    let full_search = c.options.full_search;

    // First attempt: the default matching pursuit.
    let mut mp = Mp::new();
    matching_pursuit(&mut mp, full_search, price, max_edges, y_state, range, domain_pool, coeff, wfa, c);

    // Next attempt: remove the first chosen domain block (the vector with
    // the smallest costs) from the pool and run the pursuit again.
    if c.options.second_domain_block && !mp.indices.is_empty() {
        let mut tmp_mp = mp.clone();
        tmp_mp.exclude = vec![tmp_mp.indices[0]];

        matching_pursuit(&mut tmp_mp, full_search, price, max_edges, y_state, range, domain_pool, coeff, wfa, c);
        if tmp_mp.costs < mp.costs {
            mp = tmp_mp;
        }
    }

    // Next attempt: as long as some coefficient is quantised to zero,
    // remove the vector causing the underflow and run the pursuit again.
    if c.options.check_for_underflow {
        let mut tmp_mp = mp.clone();
        tmp_mp.exclude.clear();

        for _ in 0..MAX_EDGES {
            let underflow = (0..tmp_mp.indices.len()).find(|&i| tmp_mp.weight[i] == 0.0);
            match underflow {
                Some(i) => tmp_mp.exclude.push(tmp_mp.indices[i]),
                None => break,
            }

            matching_pursuit(&mut tmp_mp, full_search, price, max_edges, y_state, range, domain_pool, coeff, wfa, c);
            if tmp_mp.costs < mp.costs {
                mp = tmp_mp.clone();
            }
        }
    }

    // Next attempt: the same for coefficients saturating to the maximum
    // representable value.
    if c.options.check_for_overflow {
        let mut tmp_mp = mp.clone();
        tmp_mp.exclude.clear();

        for _ in 0..MAX_EDGES {
            let overflow = (0..tmp_mp.indices.len()).find(|&i| {
                let rpf = coeff.rpf_of(tmp_mp.into[i]);
                let saturated = rpf.dequantize(rpf.quantize(200.0));
                tmp_mp.weight[i] == saturated || tmp_mp.weight[i] == -saturated
            });
            match overflow {
                Some(i) => tmp_mp.exclude.push(tmp_mp.indices[i]),
                None => break,
            }

            matching_pursuit(&mut tmp_mp, full_search, price, max_edges, y_state, range, domain_pool, coeff, wfa, c);
            if tmp_mp.costs < mp.costs {
                mp = tmp_mp.clone();
            }
        }
    }

    // Finally, check whether the best approximation is good enough.
    if mp.costs < max_costs {
        // Drop quantised-to-zero coefficients.
        let mut new_index = 0;
        for old_index in 0..mp.indices.len() {
            if mp.weight[old_index] != 0.0 {
                mp.indices[new_index] = mp.indices[old_index];
                mp.into[new_index] = mp.into[old_index];
                mp.weight[new_index] = mp.weight[old_index];
                new_index += 1;
            }
        }
        mp.indices.truncate(new_index);
        mp.into.truncate(new_index);

        // Update the probability models.
        let domain_blocks = domain_pool.generate(range.level, y_state, wfa);
        domain_pool.update(&domain_blocks, &mp.indices, range.level, y_state, wfa);
        let used: Vec<(f32, u16)> =
            (0..new_index).map(|i| (mp.weight[i], mp.into[i])).collect();
        coeff.update(&used, range.level);

        range.edges.clear();
        for i in 0..new_index {
            range.edges.push(Edge { into: mp.into[i], weight: mp.weight[i] });
        }
        range.matrix_bits = mp.matrix_bits;
        range.weights_bits = mp.weights_bits;
        range.err = mp.err;

        mp.costs
    }
    else {
        range.edges.clear();
        MAX_COSTS
    }
}

/// One matching-pursuit run. Chosen vectors, factors, rate, distortion and
/// costs are stored in `mp`; the domains listed in `mp.exclude` are barred
/// from the search.
fn matching_pursuit(
    mp: &mut Mp,
    full_search: bool,
    price: f32,
    max_edges: usize,
    y_state: Option<u16>,
    range: &Range,
    domain_pool: &DomainPool,
    coeff: &Coeff,
    wfa: &Wfa,
    c: &CodingContext,
) {
    let size = size_of_level(range.level);
    let domain_blocks = domain_pool.generate(range.level, y_state, wfa);
    let n_domains = domain_blocks.len();

    let mut ws = MpWorkspace::new(n_domains);

    // Initialise the per-domain remainders; domains with a tiny norm or a
    // tiny projection onto the range are unusable.
    for domain in 0..n_domains {
        ws.rem_denominator[domain] =
            get_ip_state_state(domain_blocks[domain], domain_blocks[domain], range.level, c);
        if ws.rem_denominator[domain] / (size as f32) < MIN_NORM {
            ws.used[domain] = true;
        }
        else {
            ws.rem_numerator[domain] =
                get_ip_image_state(range.image, range.address, range.level, domain_blocks[domain], c);
            if ws.rem_numerator[domain].abs() < MIN_NORM {
                ws.used[domain] = true;
            }
        }
    }

    for &exclude in &mp.exclude {
        ws.used[exclude] = true;
    }

    // Approximation with the empty linear combination: the error is the
    // squared norm of the range and the rate covers the all-zero matrix row.
    let norm: f32 = c.pixels
        [range.address as usize * size..(range.address as usize + 1) * size]
        .iter()
        .map(|p| p * p)
        .sum();

    let additional_bits = range.tree_bits
        + range.mv_tree_bits
        + range.mv_coord_bits
        + range.nd_tree_bits
        + range.nd_weights_bits;

    mp.indices.clear();
    mp.into.clear();
    mp.err = norm;
    mp.weights_bits = 0.0;
    mp.matrix_bits = domain_pool.bits(&domain_blocks, None, range.level, y_state, wfa);
    mp.costs = (mp.matrix_bits + mp.weights_bits + additional_bits) * price + mp.err;

    let mut best_n = 0;
    let mut n = 0;

    loop {
        let mut best_index: Option<usize> = None;
        let mut min_costs = if full_search { MAX_COSTS } else { mp.costs };
        let mut min_matrix_bits = 0.0;
        let mut min_weights_bits = 0.0;
        let mut min_error = 0.0;
        let mut min_weight = [0.0f32; MAX_EDGES];

        for domain in 0..n_domains {
            if ws.used[domain] {
                continue;
            }

            // Optimistic bound: picking this domain can improve the error by
            // at most rem_numerator^2 / rem_denominator. Estimate the rate
            // with a dummy coefficient before the expensive evaluation.
            let (est_matrix_bits, est_weights_bits) = {
                let mut vectors: Vec<usize> = Vec::with_capacity(n + 1);
                let mut used_weights: Vec<(f32, u16)> = Vec::with_capacity(n + 1);
                for k in 0..n {
                    if mp.weight[k] != 0.0 {
                        vectors.push(mp.indices[k]);
                        used_weights.push((mp.weight[k], domain_blocks[mp.indices[k]]));
                    }
                }
                vectors.push(domain);
                used_weights.push((0.5, domain_blocks[domain]));

                (
                    domain_pool.bits(&domain_blocks, Some(&vectors), range.level, y_state, wfa),
                    coeff.bits(&used_weights, range.level),
                )
            };

            let bound = (est_matrix_bits + est_weights_bits + additional_bits) * price + mp.err
                - ws.rem_numerator[domain] * ws.rem_numerator[domain]
                    / ws.rem_denominator[domain];
            if bound >= min_costs {
                continue;
            }

            // Compute the linear factors against the non-orthogonal basis by
            // back substitution, quantising in reverse order so that the
            // quantisation error of factor l is compensated in factors < l.
            let mut f = [0.0f32; MAX_EDGES];
            let mut r = [0.0f32; MAX_EDGES];
            let mut v = [0usize; MAX_EDGES];

            f[n] = ws.rem_numerator[domain] / ws.rem_denominator[domain];
            v[n] = domain;
            for k in 0..n {
                f[k] = ws.ip_image_ortho[k] / ws.norm_ortho[k];
                v[k] = mp.indices[k];
            }

            for l in (0..=n).rev() {
                let rpf = coeff.rpf_of(domain_blocks[v[l]]);
                f[l] = rpf.dequantize(rpf.quantize(f[l]));
                r[l] = f[l];

                for k in 0..l {
                    f[k] -= f[l] * ws.ip_domain_ortho[v[l]][k] / ws.norm_ortho[k];
                }
            }

            // Rate of the quantised linear combination.
            let (m_bits, w_bits) = {
                let mut vectors: Vec<usize> = Vec::with_capacity(n + 1);
                let mut used_weights: Vec<(f32, u16)> = Vec::with_capacity(n + 1);
                for k in 0..=n {
                    if f[k] != 0.0 {
                        vectors.push(v[k]);
                        used_weights.push((f[k], domain_blocks[v[k]]));
                    }
                }

                (
                    domain_pool.bits(&domain_blocks, Some(&vectors), range.level, y_state, wfa),
                    coeff.bits(&used_weights, range.level),
                )
            };

            // Factors of the corresponding orthogonal representation.
            for l in 0..=n {
                let mut a = get_ip_state_state(
                    domain_blocks[v[l]],
                    domain_blocks[domain],
                    range.level,
                    c,
                );
                for k in 0..n {
                    a -= ws.ip_domain_ortho[v[l]][k] / ws.norm_ortho[k]
                        * ws.ip_domain_ortho[domain][k];
                }
                ws.ip_domain_ortho[v[l]][n] = a;
            }
            ws.norm_ortho[n] = ws.rem_denominator[domain];
            ws.ip_image_ortho[n] = ws.rem_numerator[domain];

            for k in 0..=n {
                for l in k + 1..=n {
                    r[k] += ws.ip_domain_ortho[v[l]][k] * r[l] / ws.norm_ortho[k];
                }
            }

            // Approximation error of the quantised combination.
            let mut m_err = norm;
            for k in 0..=n {
                m_err += r[k] * r[k] * ws.norm_ortho[k] - 2.0 * r[k] * ws.ip_image_ortho[k];
            }
            if m_err < 0.0 {
                warn!(
                    "negative image norm {} (current domain {}, level {})",
                    m_err, domain, range.level
                );
            }

            let costs = (m_bits + w_bits + additional_bits) * price + m_err;
            if costs < min_costs {
                best_index = Some(domain);
                min_costs = costs;
                min_matrix_bits = m_bits;
                min_weights_bits = w_bits;
                min_error = m_err;
                min_weight[..=n].copy_from_slice(&f[..=n]);
            }
        }

        match best_index {
            Some(index) => {
                if min_costs < mp.costs {
                    mp.costs = min_costs;
                    mp.err = min_error;
                    mp.matrix_bits = min_matrix_bits;
                    mp.weights_bits = min_weights_bits;
                    mp.weight[..=n].copy_from_slice(&min_weight[..=n]);
                    best_n = n + 1;
                }

                if mp.indices.len() == n {
                    mp.indices.push(index);
                    mp.into.push(domain_blocks[index]);
                }
                else {
                    mp.indices[n] = index;
                    mp.into[n] = domain_blocks[index];
                }
                ws.used[index] = true;

                orthogonalize(index, n, range.level, &domain_blocks, &mut ws, c);
                n += 1;
            }
            None => break,
        }

        if n >= max_edges {
            break;
        }
    }

    mp.indices.truncate(best_n);
    mp.into.truncate(best_n);

    mp.costs = (mp.matrix_bits + mp.weights_bits + additional_bits) * price + mp.err;
}

/// Step `n` of the Gram-Schmidt orthogonalisation: update the remainder
/// values of all unused domains with respect to the new orthogonal vector
/// built from the domain at `index`. Domains whose remaining norm drops
/// below the threshold are excluded.
fn orthogonalize(
    index: usize,
    n: usize,
    level: u32,
    domain_blocks: &[u16],
    ws: &mut MpWorkspace,
    c: &CodingContext,
) {
    ws.ip_image_ortho[n] = ws.rem_numerator[index];
    ws.norm_ortho[n] = ws.rem_denominator[index];

    for domain in 0..domain_blocks.len() {
        if ws.used[domain] {
            continue;
        }

        let mut tmp = get_ip_state_state(domain_blocks[index], domain_blocks[domain], level, c);
        for k in 0..n {
            tmp -= ws.ip_domain_ortho[domain][k] / ws.norm_ortho[k]
                * ws.ip_domain_ortho[index][k];
        }
        ws.ip_domain_ortho[domain][n] = tmp;
        ws.rem_denominator[domain] -= tmp * tmp / ws.norm_ortho[n];
        ws.rem_numerator[domain] -=
            ws.ip_image_ortho[n] / ws.norm_ortho[n] * ws.ip_domain_ortho[domain][n];

        if ws.rem_denominator[domain] / (size_of_level(level) as f32) < MIN_NORM {
            ws.used[domain] = true;
        }
    }
}
