// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The weighted finite automaton data model.
//!
//! States are kept in a contiguous vector indexed by state id. Tree children
//! always refer to states with smaller ids, so state id is a topological
//! order; transition edges may refer to any state of the domain pool. Edges
//! of one `(state, label)` slot are sorted by increasing target state.

use smallvec::SmallVec;

use fiasco_core::quant::{Rpf, RpfRange};

pub const MAX_LABELS: usize = 2;
pub const MAX_EDGES: usize = 8;
pub const MAX_STATES: usize = 5800;
pub const MAX_LEVEL: usize = 22;

pub const FIASCO_MAGIC: &[u8] = b"FIASCO";
pub const FIASCO_BINFILE_RELEASE: u32 = 2;
pub const MAXSTRLEN: usize = 1024;

/// A transition of the automaton: target state and linear weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    pub into: u16,
    pub weight: f32,
}

pub type EdgeList = SmallVec<[Edge; MAX_EDGES]>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MvKind {
    #[default]
    None,
    Forward,
    Backward,
    Interpolated,
}

/// Motion vector of one `(state, label)` slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotionVector {
    pub kind: MvKind,
    pub fx: i32,
    pub fy: i32,
    pub bx: i32,
    pub by: i32,
}

/// Frame types of a coded sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    I = 0,
    P = 1,
    B = 2,
}

impl FrameType {
    pub fn from_code(code: u32) -> Option<FrameType> {
        match code {
            0 => Some(FrameType::I),
            1 => Some(FrameType::P),
            2 => Some(FrameType::B),
            _ => None,
        }
    }
}

/// Per-label data of a state.
#[derive(Clone, Debug, Default)]
pub struct LabelEntry {
    /// Child state of the bintree, or `None` if this slot is a range.
    pub child: Option<u16>,
    /// Pixel coordinates of the upper left corner.
    pub x: u32,
    pub y: u32,
    /// Corresponding state of the Y band (chroma coding only).
    pub y_state: Option<u16>,
    /// Set when a transition targets `y_state`.
    pub y_column: bool,
    /// Set when this slot was coded through a prediction.
    pub prediction: bool,
    pub mv: MotionVector,
    /// Transitions, sorted by increasing target state.
    pub edges: EdgeList,
}

/// One automaton state.
#[derive(Clone, Debug, Default)]
pub struct State {
    /// Pixel average of the image this state represents.
    pub final_distribution: f32,
    /// Bintree level of the subimage this state corresponds to.
    pub level: u32,
    /// Whether the state participates in the domain pools.
    pub domain: bool,
    /// Whether the state carries the residual of a prediction.
    pub delta: bool,
    pub labels: [LabelEntry; MAX_LABELS],
}

/// Header information shared by all frames of a stream.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub basis_name: String,
    pub title: String,
    pub comment: String,
    pub release: u32,
    pub max_states: usize,
    pub chroma_max_states: usize,
    pub color: bool,
    pub width: u32,
    pub height: u32,
    /// Bintree level of one frame.
    pub level: u32,
    pub p_min_level: u32,
    pub p_max_level: u32,
    pub frames: u32,
    pub smoothing: u32,
    pub rpf: Rpf,
    pub dc_rpf: Rpf,
    pub d_rpf: Rpf,
    pub d_dc_rpf: Rpf,
    pub fps: u32,
    pub search_range: u32,
    pub half_pixel: bool,
    pub cross_b_search: bool,
    pub b_as_past_ref: bool,
}

impl Default for StreamInfo {
    fn default() -> Self {
        StreamInfo {
            basis_name: String::new(),
            title: String::new(),
            comment: String::new(),
            release: FIASCO_BINFILE_RELEASE,
            max_states: MAX_STATES,
            chroma_max_states: 40,
            color: false,
            width: 0,
            height: 0,
            level: 0,
            p_min_level: 8,
            p_max_level: 10,
            frames: 1,
            smoothing: 70,
            rpf: Rpf::new(3, RpfRange::Range1_50),
            dc_rpf: Rpf::new(5, RpfRange::Range1_00),
            d_rpf: Rpf::new(3, RpfRange::Range1_50),
            d_dc_rpf: Rpf::new(5, RpfRange::Range1_00),
            fps: 25,
            search_range: 16,
            half_pixel: false,
            cross_b_search: false,
            b_as_past_ref: true,
        }
    }
}

/// The weighted finite automaton.
#[derive(Clone, Debug, Default)]
pub struct Wfa {
    pub states: Vec<State>,
    pub basis_states: usize,
    pub root_state: usize,
    pub frame_type: FrameType,
    pub info: StreamInfo,
}

/// Ranges listed in the order the coder produced them, as required by the
/// transition-matrix block.
pub struct RangeListEntry {
    pub state: u16,
    pub label: usize,
    pub max_domain: u16,
    pub subdivided: bool,
}

impl Wfa {
    pub fn new() -> Wfa {
        Wfa::default()
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Append an edge from `from` to `into` with the given `label` and
    /// `weight`, keeping the edge list sorted by increasing target state.
    pub fn append_edge(&mut self, from: usize, into: u16, weight: f32, label: usize) {
        let edges = &mut self.states[from].labels[label].edges;
        let pos = edges.iter().position(|e| e.into >= into).unwrap_or(edges.len());
        edges.insert(pos, Edge { into, weight });
    }

    /// Remove states `from..` and reset the truncated slots.
    pub fn remove_states(&mut self, from: usize) {
        self.states.truncate(from);
    }

    /// Compute the final distribution of `state` from its children and
    /// transitions. Relies on the automaton being average preserving.
    pub fn compute_final_distribution(&self, state: usize) -> f32 {
        let mut final_ = 0.0;

        for label in 0..MAX_LABELS {
            let entry = &self.states[state].labels[label];
            if let Some(child) = entry.child {
                final_ += self.states[child as usize].final_distribution;
            }
            for edge in &entry.edges {
                final_ += edge.weight * self.states[edge.into as usize].final_distribution;
            }
        }

        final_ / MAX_LABELS as f32
    }

    /// Select the `n` most referenced domain images among the transitions of
    /// states `from..=to`. State 0 is always part of the selection. The
    /// result is sorted by increasing state number.
    pub fn compute_hits(&self, from: usize, to: usize, n: usize) -> Vec<u16> {
        let mut hits: Vec<(u32, u16)> = (0..to).map(|d| (0, d as u16)).collect();

        for state in from..=to {
            for label in 0..MAX_LABELS {
                for edge in &self.states[state].labels[label].edges {
                    hits[edge.into as usize].0 += 1;
                }
            }
        }

        hits[1..].sort_by(|a, b| b.0.cmp(&a.0));

        let n = n.min(to);
        let mut domains: Vec<u16> = Vec::with_capacity(n);
        for (i, &(key, value)) in hits.iter().take(n).enumerate() {
            if i > 0 && key == 0 {
                break;
            }
            domains.push(value);
        }
        if domains.len() != n {
            log::debug!("only {} domains have been used in the luminance", domains.len());
        }
        domains.sort_unstable();

        domains
    }

    /// Mark all states that are part of a delta approximation, i.e. assigned
    /// to ranges predicted via MC or ND. Returns whether any state is.
    pub fn locate_delta_states(&mut self) -> bool {
        let mut delta = false;

        for state in self.basis_states..=self.root_state {
            self.states[state].delta = false;
        }

        for state in (self.basis_states..=self.root_state).rev() {
            for label in 0..MAX_LABELS {
                let entry = &self.states[state].labels[label];
                let predicted = entry.mv.kind != MvKind::None || !entry.edges.is_empty();
                let child = entry.child;

                if let Some(child) = child {
                    if predicted || self.states[state].delta {
                        delta = true;
                        self.states[child as usize].delta = true;
                    }
                }
            }
        }

        delta
    }

    /// Generate the list of ranges in coder order, starting at `root`.
    /// `domain` must be initialised to `basis_states - 1`.
    pub fn sort_ranges(&self, root: usize, domain: &mut usize, list: &mut Vec<RangeListEntry>) {
        for label in 0..MAX_LABELS {
            let subdivided = match self.states[root].labels[label].child {
                Some(child) => {
                    self.sort_ranges(child as usize, domain, list);
                    true
                }
                None => false,
            };

            let mut max_domain = *domain;
            while !self.states[max_domain].domain {
                max_domain -= 1;
            }

            if label == MAX_LABELS - 1 || !subdivided {
                list.push(RangeListEntry {
                    state: root as u16,
                    label,
                    max_domain: max_domain as u16,
                    subdivided,
                });
            }
        }

        *domain += 1;
    }

    /// List of ranges in coder order for the subtree rooted at `root`.
    pub fn range_list(&self, root: usize) -> Vec<RangeListEntry> {
        let mut list = Vec::new();
        let mut domain = self.basis_states - 1;
        self.sort_ranges(root, &mut domain, &mut list);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_state(level: u32, edges: &[(u16, f32)]) -> State {
        let mut state = State { level, domain: true, ..State::default() };
        for entry in state.labels.iter_mut() {
            entry.edges =
                edges.iter().map(|&(into, weight)| Edge { into, weight }).collect();
        }
        state
    }

    #[test]
    fn verify_append_edge_keeps_order() {
        let mut wfa = Wfa::new();
        wfa.states.push(State::default());
        wfa.append_edge(0, 5, 0.5, 0);
        wfa.append_edge(0, 1, 1.0, 0);
        wfa.append_edge(0, 3, -0.25, 0);

        let targets: Vec<u16> =
            wfa.states[0].labels[0].edges.iter().map(|e| e.into).collect();
        assert_eq!(targets, vec![1, 3, 5]);
    }

    #[test]
    fn verify_final_distribution_is_average_preserving() {
        let mut wfa = Wfa::new();
        // State 0: constant grey with self loops of weight one.
        let mut dc = State { final_distribution: 128.0, domain: true, ..State::default() };
        for entry in dc.labels.iter_mut() {
            entry.edges.push(Edge { into: 0, weight: 1.0 });
        }
        wfa.states.push(dc);
        wfa.states.push(leaf_state(1, &[(0, 0.5)]));

        assert_eq!(wfa.compute_final_distribution(0), 128.0);
        assert_eq!(wfa.compute_final_distribution(1), 64.0);
    }

    #[test]
    fn verify_compute_hits_prefers_popular_domains() {
        let mut wfa = Wfa::new();
        let mut dc = State { final_distribution: 128.0, domain: true, ..State::default() };
        for entry in dc.labels.iter_mut() {
            entry.edges.push(Edge { into: 0, weight: 1.0 });
        }
        wfa.states.push(dc);
        wfa.basis_states = 1;
        wfa.states.push(leaf_state(3, &[(0, 1.0)]));
        wfa.states.push(leaf_state(3, &[(1, 0.5)]));
        wfa.states.push(leaf_state(4, &[(1, 0.5), (2, 0.25)]));

        let hits = wfa.compute_hits(1, 3, 3);
        assert_eq!(hits[0], 0);
        assert!(hits.contains(&1));
    }

    #[test]
    fn verify_locate_delta_states() {
        let mut wfa = Wfa::new();
        wfa.states.push(State { domain: true, ..State::default() });
        wfa.basis_states = 1;

        // State 1 is a plain leaf pair, state 2 predicts its child 1 via MC.
        wfa.states.push(State { level: 3, ..State::default() });
        let mut parent = State { level: 4, ..State::default() };
        parent.labels[0].child = Some(1);
        parent.labels[0].mv =
            MotionVector { kind: MvKind::Forward, ..MotionVector::default() };
        wfa.states.push(parent);
        wfa.root_state = 2;

        assert!(wfa.locate_delta_states());
        assert!(wfa.states[1].delta);
        assert!(!wfa.states[2].delta);
    }
}
