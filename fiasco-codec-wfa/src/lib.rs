// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A still-image and video codec based on weighted finite automata (WFA).
//!
//! The encoder partitions each frame with a bintree and approximates every
//! block (a "range") by a linear combination of the images generated by
//! previously discovered automaton states, chosen with a matching-pursuit
//! search under a rate-distortion cost. Video frames may additionally be
//! predicted by motion compensation (P- and B-frames) or by DC-subtracted
//! nondeterministic prediction (I-frames), with the residual fed back into
//! the same approximation machinery.

pub mod approx;
pub mod basis;
pub mod bintree;
pub mod bitstream;
pub mod coder;
pub mod coeff;
pub mod decoder;
pub mod domain;
pub mod image;
pub mod ip;
pub mod motion;
pub mod prediction;
pub mod subdivide;
pub mod tiling;
pub mod wfa;
