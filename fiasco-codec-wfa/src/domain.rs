// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Domain pool management.
//!
//! A domain pool is the set of state images admissible as basis vectors of
//! the matching pursuit together with a probability model of the transition
//! matrix columns. All pool families share one interface: `generate` the
//! ordered candidate list for a level, estimate the `bits` of a chosen
//! subset, `update` the model after a commitment, `append` a freshly
//! created state, and restrict the pool to the most popular states for
//! `chroma` coding. Models are plain data; cloning a pool is the model
//! duplication the subdivider relies on for trial and rollback.

use log::warn;

use fiasco_core::entropy::{lps_bits, mps_bits, MAX_INDEX};
use fiasco_core::io::bits_bin_code;

use crate::wfa::{Wfa, MAX_EDGES};

/// Reduce `y_state` to `None` unless it is usable as a domain.
fn effective_y(y_state: Option<u16>, wfa: &Wfa) -> Option<u16> {
    y_state.filter(|&s| wfa.states[s as usize].domain)
}

/// Per-column probability state of the quasi-arithmetic model: one
/// probability index per pooled domain plus one for the chroma Y-state
/// column.
#[derive(Clone, Debug)]
pub struct QacModel {
    index: Vec<u16>,
    states: Vec<u16>,
    y_index: u16,
    max_domains: usize,
}

impl QacModel {
    fn new(max_domains: usize) -> QacModel {
        QacModel { index: Vec::new(), states: Vec::new(), y_index: 0, max_domains }
    }

    fn generate(&self, y_state: Option<u16>, wfa: &Wfa) -> Vec<u16> {
        let y_state = effective_y(y_state, wfa);

        let mut domains = self.states.clone();
        if let Some(y) = y_state {
            if !domains.contains(&y) {
                domains.push(y);
            }
        }
        domains
    }

    fn bits(
        &self,
        domains: &[u16],
        used: Option<&[usize]>,
        y_state: Option<u16>,
        wfa: &Wfa,
    ) -> f32 {
        let y_state = effective_y(y_state, wfa);
        let mut bits = 0.0;

        for (domain, &state) in self.states.iter().enumerate() {
            if y_state != Some(state) {
                bits += mps_bits(self.index[domain] as usize);
            }
        }
        if y_state.is_some() {
            bits += mps_bits(self.y_index as usize);
        }

        if let Some(used) = used {
            for &pos in used {
                if y_state == Some(domains[pos]) {
                    bits -= mps_bits(self.y_index as usize);
                    bits += lps_bits(self.y_index as usize);
                }
                else {
                    bits -= mps_bits(self.index[pos] as usize);
                    bits += lps_bits(self.index[pos] as usize);
                }
            }
        }

        bits
    }

    fn update(&mut self, domains: &[u16], used: &[usize], y_state: Option<u16>, wfa: &Wfa) {
        let y_state = effective_y(y_state, wfa);

        let mut y_state_is_domain = false;
        for domain in 0..self.states.len() {
            self.index[domain] += 1;
            if y_state == Some(self.states[domain]) {
                y_state_is_domain = true;
            }
        }

        let mut used_y_state = false;
        for &pos in used {
            if y_state == Some(domains[pos]) {
                if y_state_is_domain {
                    self.index[pos] -= 1;
                }
                self.y_index >>= 1;
                used_y_state = true;
            }
            else {
                self.index[pos] -= 1;
                self.index[pos] >>= 1;
            }
        }

        if y_state.is_some() && !used_y_state {
            self.y_index += 1;
        }

        for index in self.index.iter_mut() {
            *index = (*index).min(MAX_INDEX as u16);
        }
        self.y_index = self.y_index.min(MAX_INDEX as u16);
    }

    fn append(&mut self, new_state: u16) -> bool {
        if self.states.len() >= self.max_domains {
            false
        }
        else {
            self.index.push(self.index.last().copied().unwrap_or(0));
            self.states.push(new_state);
            true
        }
    }

    fn chroma(&mut self, max_domains: usize, wfa: &Wfa) {
        if max_domains < self.states.len() {
            let states = wfa.compute_hits(wfa.basis_states, wfa.num_states() - 1, max_domains);

            let mut index = vec![0u16; states.len()];
            let mut new = 0;
            for old in 0..self.states.len() {
                if new < states.len() && self.states[old] == states[new] {
                    index[new] = self.index[old];
                    new += 1;
                }
            }

            self.states = states;
            self.index = index;
        }
        self.y_index = 0;
        self.max_domains = self.states.len();
    }
}

/// Run-length model: a histogram of the number of edges per range, a QAC
/// sub-model for the state-0 slot, and adjusted-binary deltas between the
/// remaining domain positions.
#[derive(Clone, Debug)]
pub struct RleModel {
    count: [u32; MAX_EDGES + 1],
    total: u32,
    states: Vec<u16>,
    max_domains: usize,
    y_index: u16,
    domain_0: QacModel,
}

impl RleModel {
    fn new(max_domains: usize) -> RleModel {
        RleModel {
            count: [1; MAX_EDGES + 1],
            total: (MAX_EDGES + 1) as u32,
            states: Vec::new(),
            max_domains,
            y_index: 0,
            domain_0: QacModel::new(1),
        }
    }

    fn generate(&self, y_state: Option<u16>, wfa: &Wfa) -> Vec<u16> {
        let y_state = effective_y(y_state, wfa);

        let mut domains = self.states.clone();
        if let Some(y) = y_state {
            if !domains.contains(&y) {
                domains.push(y);
            }
        }
        domains
    }

    fn bits(
        &self,
        domains: &[u16],
        used: Option<&[usize]>,
        y_state: Option<u16>,
        wfa: &Wfa,
    ) -> f32 {
        let y_state = effective_y(y_state, wfa);
        let mut sorted: Vec<usize> = Vec::new();

        // The y-state column does not contribute to the estimate; only the
        // remaining positions are delta coded.
        if let Some(used) = used {
            for &pos in used {
                if y_state != Some(domains[pos]) {
                    sorted.push(pos);
                }
            }
            sorted.sort_unstable();
        }

        let n = sorted.len();
        let mut bits =
            -(f64::from(self.count[n]) / f64::from(self.total)).log2() as f32;

        if used.is_some() && n > 0 && sorted[0] == 0 {
            bits += self.domain_0.bits(&[0], Some(&[0]), y_state, wfa);
        }
        else {
            bits += self.domain_0.bits(&[], Some(&[]), y_state, wfa);
        }

        let mut last = 1usize;
        for &pos in &sorted {
            let maxval = self.states.len() as i64 - 1 - last as i64;
            if pos != 0 && maxval > 0 {
                bits += bits_bin_code((pos - last) as u32, maxval as u32) as f32;
                last = pos + 1;
            }
        }

        bits
    }

    fn update(&mut self, domains: &[u16], used: &[usize], y_state: Option<u16>, wfa: &Wfa) {
        let y_state = effective_y(y_state, wfa);

        let mut state_0 = false;
        let mut state_y = false;
        for &pos in used {
            if domains[pos] == 0 {
                state_0 = true;
            }
            else if y_state == Some(domains[pos]) {
                state_y = true;
            }
        }

        self.count[used.len()] += 1;
        self.total += 1;

        let used_0: &[usize] = if state_0 { &[0] } else { &[] };
        self.domain_0.update(&[0], used_0, y_state, wfa);

        if state_y {
            self.y_index >>= 1;
        }
        else {
            self.y_index += 1;
        }
        self.y_index = self.y_index.min(MAX_INDEX as u16);
    }

    fn append(&mut self, new_state: u16) -> bool {
        if self.states.len() >= self.max_domains {
            false
        }
        else {
            self.states.push(new_state);
            if new_state == 0 {
                debug_assert_eq!(self.states.len(), 1);
                self.domain_0.append(0);
            }
            true
        }
    }

    fn chroma(&mut self, max_domains: usize, wfa: &Wfa) {
        if max_domains < self.states.len() {
            let states = wfa.compute_hits(wfa.basis_states, wfa.num_states() - 1, max_domains);
            debug_assert_eq!(states.first(), Some(&0));
            self.states = states;
        }
        self.y_index = 0;
        self.max_domains = self.states.len();
    }
}

/// A domain pool: the candidate set plus its probability model.
#[derive(Clone, Debug)]
pub enum DomainPool {
    /// All admitted states; quasi-arithmetic coding of matrix columns.
    Adaptive(QacModel),
    /// All admitted states; run-length model of the edge counts. With
    /// `restrict` the pool is narrowed for chroma bands.
    Rle { model: RleModel, restrict: bool },
    /// All admitted states, uniformly distributed.
    Uniform,
    /// Only the DC state; zero bits.
    Constant,
}

impl DomainPool {
    /// Allocate a domain pool identified by `name`. At most `max_domains`
    /// state images are pooled. Unknown names fall back to "adaptive".
    pub fn new(name: &str, max_domains: usize, wfa: &Wfa) -> DomainPool {
        let max_domains = if max_domains == 0 {
            warn!("can't generate empty domain pool, using at least the DC component");
            1
        }
        else {
            max_domains
        };

        let mut pool = match name.to_ascii_lowercase().as_str() {
            "adaptive" => DomainPool::Adaptive(QacModel::new(max_domains)),
            "basis" => DomainPool::Adaptive(QacModel::new(wfa.basis_states)),
            "rle" => DomainPool::Rle { model: RleModel::new(max_domains), restrict: true },
            "rle-no-chroma" => {
                DomainPool::Rle { model: RleModel::new(max_domains), restrict: false }
            }
            "uniform" => DomainPool::Uniform,
            "constant" => DomainPool::Constant,
            other => {
                warn!("can't initialize domain pool '{}', using default 'adaptive'", other);
                DomainPool::Adaptive(QacModel::new(max_domains))
            }
        };

        for state in 0..wfa.basis_states {
            if wfa.states[state].domain {
                pool.append(state as u16, 0, wfa);
            }
        }

        pool
    }

    /// Ordered candidate domain list for a range at `level`. May include the
    /// cross-band `y_state`.
    pub fn generate(&self, _level: u32, y_state: Option<u16>, wfa: &Wfa) -> Vec<u16> {
        match self {
            DomainPool::Adaptive(model) => model.generate(y_state, wfa),
            DomainPool::Rle { model, .. } => model.generate(y_state, wfa),
            DomainPool::Uniform => {
                (0..wfa.num_states() as u16).filter(|&s| wfa.states[s as usize].domain).collect()
            }
            DomainPool::Constant => vec![0],
        }
    }

    /// Predicted bit cost of the chosen subset `used` (positions into
    /// `domains`). `None` estimates the all-zero matrix row.
    pub fn bits(
        &self,
        domains: &[u16],
        used: Option<&[usize]>,
        _level: u32,
        y_state: Option<u16>,
        wfa: &Wfa,
    ) -> f32 {
        match self {
            DomainPool::Adaptive(model) => model.bits(domains, used, y_state, wfa),
            DomainPool::Rle { model, .. } => model.bits(domains, used, y_state, wfa),
            DomainPool::Uniform => {
                let n =
                    (0..wfa.num_states()).filter(|&s| wfa.states[s].domain).count() as f64;
                let mut bits = -n * ((n - 1.0) / n).log2();
                if let Some(used) = used {
                    bits += used.len() as f64 * n.log2();
                }
                bits as f32
            }
            DomainPool::Constant => 0.0,
        }
    }

    /// Adapt the model to the chosen subset.
    pub fn update(
        &mut self,
        domains: &[u16],
        used: &[usize],
        _level: u32,
        y_state: Option<u16>,
        wfa: &Wfa,
    ) {
        match self {
            DomainPool::Adaptive(model) => model.update(domains, used, y_state, wfa),
            DomainPool::Rle { model, .. } => model.update(domains, used, y_state, wfa),
            DomainPool::Uniform | DomainPool::Constant => {}
        }
    }

    /// Try to admit a newly created state. Returns whether the state will be
    /// used in the pool.
    pub fn append(&mut self, new_state: u16, _level: u32, _wfa: &Wfa) -> bool {
        match self {
            DomainPool::Adaptive(model) => model.append(new_state),
            DomainPool::Rle { model, .. } => model.append(new_state),
            DomainPool::Uniform | DomainPool::Constant => true,
        }
    }

    /// Restrict the pool to the `max_domains` most referenced states for
    /// encoding the chroma bands.
    pub fn chroma(&mut self, max_domains: usize, wfa: &Wfa) {
        match self {
            DomainPool::Adaptive(model) => model.chroma(max_domains, wfa),
            DomainPool::Rle { model, restrict } => {
                if *restrict {
                    model.chroma(max_domains, wfa);
                }
            }
            DomainPool::Uniform | DomainPool::Constant => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wfa::{Edge, State};

    fn test_wfa(states: usize) -> Wfa {
        let mut wfa = Wfa::new();
        for n in 0..states {
            let mut state =
                State { final_distribution: 128.0, level: n as u32, domain: true, ..State::default() };
            if n > 0 {
                for entry in state.labels.iter_mut() {
                    entry.edges.push(Edge { into: 0, weight: 1.0 });
                }
            }
            wfa.states.push(state);
        }
        wfa.basis_states = 1;
        wfa
    }

    #[test]
    fn verify_constant_pool() {
        let wfa = test_wfa(4);
        let pool = DomainPool::new("constant", 10, &wfa);

        assert_eq!(pool.generate(5, None, &wfa), vec![0]);
        assert_eq!(pool.bits(&[0], Some(&[0]), 5, None, &wfa), 0.0);
    }

    #[test]
    fn verify_adaptive_pool_appends_and_adapts() {
        let wfa = test_wfa(4);
        let mut pool = DomainPool::new("adaptive", 3, &wfa);

        assert!(pool.append(1, 4, &wfa));
        assert!(pool.append(2, 4, &wfa));
        // The pool is full now.
        assert!(!pool.append(3, 4, &wfa));

        let domains = pool.generate(4, None, &wfa);
        assert_eq!(domains, vec![0, 1, 2]);

        // Using domain 1 repeatedly makes it cheaper.
        let before = pool.bits(&domains, Some(&[1]), 4, None, &wfa);
        for _ in 0..8 {
            pool.update(&domains, &[1], 4, None, &wfa);
        }
        let after = pool.bits(&domains, Some(&[1]), 4, None, &wfa);
        assert!(after < before);
    }

    #[test]
    fn verify_bits_matches_update_direction_for_rle() {
        let wfa = test_wfa(5);
        let mut pool = DomainPool::new("rle", 8, &wfa);
        for state in 1..4 {
            pool.append(state, 4, &wfa);
        }

        let domains = pool.generate(4, None, &wfa);
        assert_eq!(domains.len(), 4);

        // Two-edge rows get cheaper once the model has seen them.
        let before = pool.bits(&domains, Some(&[1, 2]), 4, None, &wfa);
        for _ in 0..8 {
            pool.update(&domains, &[1, 2], 4, None, &wfa);
        }
        assert!(pool.bits(&domains, Some(&[1, 2]), 4, None, &wfa) < before);
    }

    #[test]
    fn verify_uniform_pool_counts_states() {
        let wfa = test_wfa(4);
        let pool = DomainPool::new("uniform", 10, &wfa);

        let domains = pool.generate(4, None, &wfa);
        assert_eq!(domains.len(), 4);

        let empty = pool.bits(&domains, None, 4, None, &wfa);
        let one = pool.bits(&domains, Some(&[2]), 4, None, &wfa);
        assert!((one - empty - (4.0f32).log2()).abs() < 1e-5);
    }

    #[test]
    fn verify_chroma_restriction() {
        let mut wfa = test_wfa(6);
        // Make state 2 popular.
        for state in 3..6 {
            wfa.states[state].labels[0].edges.push(Edge { into: 2, weight: 0.5 });
        }

        let mut pool = DomainPool::new("adaptive", 8, &wfa);
        for state in 1..6 {
            pool.append(state, 4, &wfa);
        }

        pool.chroma(2, &wfa);
        let domains = pool.generate(4, None, &wfa);
        assert_eq!(domains, vec![0, 2]);
    }
}
