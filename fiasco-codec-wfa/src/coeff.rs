// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Probability models for matching-pursuit coefficients.
//!
//! Every linear-combination weight is quantised through one of two reduced
//! precision formats: the DC format for transitions into state 0 and the
//! normal format otherwise. The model estimates (and later defines) the bit
//! cost of the quantised weights.

use log::warn;

use fiasco_core::quant::{Rpf, RPF_ZERO};

/// A quantised weight with its target state, the unit the models work on.
pub type WeightedState = (f32, u16);

#[derive(Clone, Debug)]
pub enum CoeffModel {
    /// Every coefficient costs `mantissa_bits + 1` bits.
    Uniform,
    /// Adaptive arithmetic coding with one histogram per `(level, kind)`
    /// context, kind being DC or non-DC.
    Adaptive(AacModel),
}

#[derive(Clone, Debug)]
pub struct AacModel {
    counts: Vec<u32>,
    totals: Vec<u32>,
}

impl AacModel {
    fn new(rpf: &Rpf, dc_rpf: &Rpf, min_level: u32, max_level: u32) -> AacModel {
        let levels = (max_level - min_level + 1) as usize;
        let size = levels * rpf.symbols() as usize + dc_rpf.symbols() as usize;

        let mut totals = vec![0; levels + 1];
        totals[0] = dc_rpf.symbols();
        for total in totals.iter_mut().skip(1) {
            *total = rpf.symbols();
        }

        AacModel { counts: vec![1; size], totals }
    }
}

/// Coefficients model: the RPF pair, the level range of linear
/// combinations, and the probability model proper.
#[derive(Clone, Debug)]
pub struct Coeff {
    pub rpf: Rpf,
    pub dc_rpf: Rpf,
    pub min_level: u32,
    pub max_level: u32,
    model: CoeffModel,
}

impl Coeff {
    /// Allocate a coefficients model identified by `name` ("adaptive" or
    /// "uniform"). Unknown names fall back to "adaptive" with a warning.
    pub fn new(name: &str, rpf: Rpf, dc_rpf: Rpf, min_level: u32, max_level: u32) -> Coeff {
        let model = match name.to_ascii_lowercase().as_str() {
            "adaptive" => CoeffModel::Adaptive(AacModel::new(&rpf, &dc_rpf, min_level, max_level)),
            "uniform" => CoeffModel::Uniform,
            other => {
                warn!("can't initialize coefficients model '{}', using default 'adaptive'", other);
                CoeffModel::Adaptive(AacModel::new(&rpf, &dc_rpf, min_level, max_level))
            }
        };

        Coeff { rpf, dc_rpf, min_level, max_level, model }
    }

    /// The reduced precision format of a transition into `state`.
    pub fn rpf_of(&self, state: u16) -> &Rpf {
        if state == 0 {
            &self.dc_rpf
        }
        else {
            &self.rpf
        }
    }

    fn context_offset(&self, level: u32) -> usize {
        self.dc_rpf.symbols() as usize
            + (level - self.min_level) as usize * self.rpf.symbols() as usize
    }

    /// Predicted number of bits for storing the weights of `used` at the
    /// given range `level`.
    pub fn bits(&self, used: &[WeightedState], level: u32) -> f32 {
        match self.model {
            CoeffModel::Uniform => used
                .iter()
                .map(|&(_, state)| (self.rpf_of(state).mantissa_bits + 1) as f32)
                .sum(),
            CoeffModel::Adaptive(ref model) => {
                let offset = self.context_offset(level);
                let mut bits = 0.0f64;

                for &(weight, state) in used {
                    if state != 0 {
                        let symbol = self.rpf.quantize(weight);
                        if symbol == RPF_ZERO {
                            continue;
                        }
                        let total = model.totals[(level - self.min_level + 1) as usize];
                        bits -= (f64::from(model.counts[offset + symbol as usize])
                            / f64::from(total))
                        .log2();
                    }
                    else {
                        let symbol = self.dc_rpf.quantize(weight);
                        if symbol == RPF_ZERO {
                            continue;
                        }
                        bits -= (f64::from(model.counts[symbol as usize])
                            / f64::from(model.totals[0]))
                        .log2();
                    }
                }

                bits as f32
            }
        }
    }

    /// Adapt the model to the chosen weights.
    pub fn update(&mut self, used: &[WeightedState], level: u32) {
        let offset = match self.model {
            CoeffModel::Uniform => return,
            CoeffModel::Adaptive(_) => self.context_offset(level),
        };

        let rpf = self.rpf;
        let dc_rpf = self.dc_rpf;
        let min_level = self.min_level;

        if let CoeffModel::Adaptive(ref mut model) = self.model {
            for &(weight, state) in used {
                if state != 0 {
                    let symbol = rpf.quantize(weight);
                    if symbol == RPF_ZERO {
                        continue;
                    }
                    model.counts[offset + symbol as usize] += 1;
                    model.totals[(level - min_level + 1) as usize] += 1;
                }
                else {
                    let symbol = dc_rpf.quantize(weight);
                    if symbol == RPF_ZERO {
                        continue;
                    }
                    model.counts[symbol as usize] += 1;
                    model.totals[0] += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiasco_core::quant::RpfRange;

    fn coeff(name: &str) -> Coeff {
        let rpf = Rpf::new(3, RpfRange::Range1_50);
        let dc_rpf = Rpf::new(5, RpfRange::Range1_00);
        Coeff::new(name, rpf, dc_rpf, 4, 10)
    }

    #[test]
    fn verify_uniform_bits() {
        let coeff = coeff("uniform");
        // One DC weight (5 + 1 bits) plus one normal weight (3 + 1 bits).
        assert_eq!(coeff.bits(&[(0.5, 0), (0.25, 7)], 6), 10.0);
    }

    #[test]
    fn verify_adaptive_model_learns() {
        let mut coeff = coeff("adaptive");
        let used = [(0.40f32, 3u16)];

        let before = coeff.bits(&used, 6);
        for _ in 0..16 {
            coeff.update(&used, 6);
        }
        assert!(coeff.bits(&used, 6) < before);

        // Other levels are separate contexts and stay untouched.
        assert_eq!(coeff.bits(&used, 8), before);
    }
}
