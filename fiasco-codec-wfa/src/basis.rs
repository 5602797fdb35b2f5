// Fiasco
// Copyright (c) The Project Fiasco Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! WFA initial basis handling.
//!
//! The standard basis "small.wfa" is linked into the binary; other bases
//! are loaded from ASCII files found via the `FIASCO_DATA` search path.
//! State 0 is always the constant function f(x, y) = 128 with self loops of
//! weight one on both labels.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use fiasco_core::errors::{decode_error, Result};

use crate::wfa::{State, Wfa};

const FIASCO_BASIS_MAGIC: &str = "Wfa";

/// Environment variable with the search path for basis files.
pub const FIASCO_DATA: &str = "FIASCO_DATA";

struct BasisValues {
    states: usize,
    final_distributions: &'static [f32],
    use_domain: &'static [bool],
    /// Transitions as `(state, into, weight, label)`.
    transitions: &'static [(u16, u16, f32, usize)],
}

/// The basis "small.wfa": two states besides the DC state.
const SMALL_BASIS: BasisValues = BasisValues {
    states: 2,
    final_distributions: &[64.0, 64.0],
    use_domain: &[true, true],
    transitions: &[(1, 2, 0.5, 0), (1, 2, 0.5, 1), (1, 0, 0.5, 1), (2, 1, 1.0, 0), (2, 1, 1.0, 1)],
};

fn install_basis(values: &BasisValues, wfa: &mut Wfa) {
    wfa.states.clear();
    wfa.basis_states = values.states + 1;

    let mut dc = State {
        final_distribution: 128.0,
        domain: true,
        ..State::default()
    };
    for entry in dc.labels.iter_mut() {
        entry.edges.push(crate::wfa::Edge { into: 0, weight: 1.0 });
    }
    wfa.states.push(dc);

    for state in 0..values.states {
        wfa.states.push(State {
            final_distribution: values.final_distributions[state],
            domain: values.use_domain[state],
            ..State::default()
        });
    }

    for &(state, into, weight, label) in values.transitions {
        wfa.append_edge(state as usize, into, weight, label);
    }
}

/// Install the linked basis `basis_name` if available.
pub fn get_linked_basis(basis_name: &str, wfa: &mut Wfa) -> bool {
    match basis_name {
        "small.fco" | "small.wfa" => {
            install_basis(&SMALL_BASIS, wfa);
            true
        }
        _ => false,
    }
}

/// Search the current directory, the `FIASCO_DATA` path, and the directory
/// of the executable for `filename`.
fn find_file(filename: &str) -> Option<PathBuf> {
    let direct = Path::new(filename);
    if direct.is_file() {
        return Some(direct.to_path_buf());
    }
    if direct.is_absolute() {
        return None;
    }

    if let Ok(paths) = env::var(FIASCO_DATA) {
        for dir in paths.split([';', ':', ',', ' ']) {
            if dir.is_empty() {
                continue;
            }
            let candidate = Path::new(dir).join(filename);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Read the WFA initial basis `filename` into `wfa`. Linked bases take
/// precedence over files on disk.
pub fn read_basis(filename: &str, wfa: &mut Wfa) -> Result<()> {
    wfa.info.basis_name = filename.to_string();

    if get_linked_basis(filename, wfa) {
        return Ok(());
    }

    warn!("initial basis '{}' is not linked with the executable, loading from disk", filename);

    let path = match find_file(filename) {
        Some(path) => path,
        None => return decode_error("initial basis file not found"),
    };
    let text = fs::read_to_string(path)?;

    // ASCII basis format: magic, number of states, the domain flags, the
    // final distributions, then per state the transitions as
    // `<label> <into> <weight>` triples terminated by -1.
    let tokens: Vec<&str> = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(|line| line.split_whitespace())
        .collect();
    let mut cursor = tokens.into_iter();

    if cursor.next() != Some(FIASCO_BASIS_MAGIC) {
        return decode_error("not an ASCII FIASCO initial basis");
    }

    fn next_int<'a>(cursor: &mut impl Iterator<Item = &'a str>) -> Result<i64> {
        cursor
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or(())
            .or_else(|_| decode_error("truncated initial basis"))
    }

    let states = next_int(&mut cursor)? as usize;
    if states == 0 || states >= crate::wfa::MAX_STATES {
        return decode_error("invalid number of basis states");
    }

    wfa.states.clear();
    wfa.basis_states = states + 1;

    let mut dc = State { final_distribution: 128.0, domain: true, ..State::default() };
    for entry in dc.labels.iter_mut() {
        entry.edges.push(crate::wfa::Edge { into: 0, weight: 1.0 });
    }
    wfa.states.push(dc);

    let mut domains = Vec::with_capacity(states);
    for _ in 0..states {
        domains.push(next_int(&mut cursor)? != 0);
    }

    for state in 0..states {
        let final_distribution: f32 = cursor
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or(())
            .or_else(|_| decode_error("truncated initial basis"))?;
        wfa.states.push(State {
            final_distribution,
            domain: domains[state],
            ..State::default()
        });
    }

    for state in 1..=states {
        if next_int(&mut cursor)? != state as i64 {
            return decode_error("malformed initial basis");
        }

        loop {
            let label = next_int(&mut cursor)?;
            if label == -1 {
                break;
            }
            let into = next_int(&mut cursor)? as u16;
            let weight: f32 = cursor
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or(())
                .or_else(|_| decode_error("truncated initial basis"))?;
            if label < 0 || label > 1 || usize::from(into) > states {
                return decode_error("malformed initial basis");
            }
            wfa.append_edge(state, into, weight, label as usize);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_linked_basis_is_average_preserving() {
        let mut wfa = Wfa::new();
        assert!(get_linked_basis("small.wfa", &mut wfa));

        assert_eq!(wfa.basis_states, 3);
        for state in 0..wfa.basis_states {
            let expected = wfa.states[state].final_distribution;
            assert!(
                (wfa.compute_final_distribution(state) - expected).abs() < 1e-6,
                "state {}",
                state
            );
        }
    }

    #[test]
    fn verify_unknown_basis_is_not_linked() {
        let mut wfa = Wfa::new();
        assert!(!get_linked_basis("other.wfa", &mut wfa));
    }
}
