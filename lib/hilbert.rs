//! Definitions to describe states of a single ion coupled to one motional mode,
//! and their representation as vectors in a truncated Hilbert space.
//!
//! A truncation of `ns` motional levels gives a space of dimension `2 * ns`.
//! The excited block comes first: `|e, n>` has index `n` and `|g, n>` has
//! index `ns + n`.

use std::{ f64::consts::PI, fmt, str::FromStr };
use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    error::StateError,
    pulse::Colour,
};

/* States *********************************************************************/

/// Internal (electronic) state of the ion.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Internal {
    /// Ground state.
    #[default]
    G,
    /// Excited state.
    E,
}

impl TryFrom<char> for Internal {
    type Error = StateError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'g' => Ok(Self::G),
            'e' => Ok(Self::E),
            x => Err(StateError::BadInternal(x)),
        }
    }
}

impl FromStr for Internal {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c.try_into(),
            (Some(c), Some(_)) => Err(StateError::BadInternal(c)),
            (None, _) => Err(StateError::BadInternal(' ')),
        }
    }
}

impl fmt::Display for Internal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::G => write!(f, "g"),
            Self::E => write!(f, "e"),
        }
    }
}

/// One component of an equally-weighted superposition: a motional Fock level,
/// an internal state, and a relative phase.
///
/// The phase is stored as an angle divided by π, so that the component carries
/// a factor `e^(iπ·phase)`; e.g. `0.5` gives `i` and `1.0` gives `-1`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StateSpec {
    pub motional: usize,
    pub internal: Internal,
    pub phase: f64,
}

impl StateSpec {
    pub fn new(motional: usize, internal: Internal, phase: f64) -> Self {
        Self { motional, internal, phase }
    }

    /// Return a copy of `self` with the phase replaced.
    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    /// Return `e^(iπ·phase)`.
    pub fn phase_factor(&self) -> C64 { C64::cis(PI * self.phase) }

    /// Return `true` if `self` and `other` name the same basis state,
    /// regardless of phase.
    pub fn same_basis(&self, other: &Self) -> bool {
        self.motional == other.motional && self.internal == other.internal
    }

    /// Return the index of the basis state in a space truncated to `ns`
    /// motional levels.
    pub fn index(&self, ns: usize) -> Result<usize, StateError> {
        index(self.motional, self.internal, ns)
    }
}

impl From<usize> for StateSpec {
    fn from(motional: usize) -> Self {
        Self::new(motional, Internal::G, 0.0)
    }
}

impl From<(usize, Internal)> for StateSpec {
    fn from(ni: (usize, Internal)) -> Self {
        let (n, i) = ni;
        Self::new(n, i, 0.0)
    }
}

impl From<(usize, Internal, f64)> for StateSpec {
    fn from(nip: (usize, Internal, f64)) -> Self {
        let (n, i, p) = nip;
        Self::new(n, i, p)
    }
}

impl fmt::Display for StateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|{}{}>", self.internal, self.motional)
    }
}

/* Vectors ********************************************************************/

/// Return the index of `|internal, motional>` in a space truncated to `ns`
/// motional levels.
pub fn index(motional: usize, internal: Internal, ns: usize)
    -> Result<usize, StateError>
{
    if motional >= ns { return Err(StateError::Truncated(motional, ns)); }
    match internal {
        Internal::E => Ok(motional),
        Internal::G => Ok(ns + motional),
    }
}

/// Build the equally-weighted superposition of `specs`, each component
/// carrying its own phase factor, in a space truncated to `ns` motional levels.
pub fn state_vector(specs: &[StateSpec], ns: usize)
    -> Result<nd::Array1<C64>, StateError>
{
    if specs.is_empty() { return Err(StateError::Empty); }
    if let Some((a, _))
        = specs.iter().tuple_combinations().find(|(a, b)| a.same_basis(b))
    {
        return Err(StateError::Duplicate(a.to_string()));
    }
    let norm = (specs.len() as f64).sqrt().recip();
    let mut psi: nd::Array1<C64> = nd::Array1::zeros(2 * ns);
    for spec in specs.iter() {
        psi[spec.index(ns)?] = norm * spec.phase_factor();
    }
    Ok(psi)
}

/// Return the number of motional levels needed to represent the evolution of
/// `start` under `colours` exactly, as well as every level in `target`.
///
/// Each sideband pulse moves population by at most one motional level, so the
/// start state can never reach beyond its highest level plus the number of
/// sideband pulses.
pub fn motional_states_needed(
    colours: &[Colour],
    start: &[StateSpec],
    target: Option<&[StateSpec]>,
) -> usize
{
    let sidebands = colours.iter().filter(|c| c.is_sideband()).count();
    let start_max
        = start.iter().map(|s| s.motional).max().unwrap_or(0);
    let target_max
        = target.and_then(|t| t.iter().map(|s| s.motional).max())
        .unwrap_or(0);
    (start_max + sidebands).max(target_max) + 1
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_layout() {
        assert_eq!(index(0, Internal::E, 3).unwrap(), 0);
        assert_eq!(index(2, Internal::E, 3).unwrap(), 2);
        assert_eq!(index(0, Internal::G, 3).unwrap(), 3);
        assert_eq!(index(2, Internal::G, 3).unwrap(), 5);
        assert!(matches!(
            index(3, Internal::G, 3),
            Err(StateError::Truncated(3, 3)),
        ));
    }

    #[test]
    fn spec_defaults() {
        let s: StateSpec = 4.into();
        assert_eq!(s, StateSpec::new(4, Internal::G, 0.0));
        let s: StateSpec = (2, Internal::E).into();
        assert_eq!(s.phase, 0.0);
        assert_eq!("e".parse::<Internal>().unwrap(), Internal::E);
        assert!("x".parse::<Internal>().is_err());
    }

    #[test]
    fn superposition_is_normalised() {
        let specs: Vec<StateSpec> = vec![
            0.into(),
            (2, Internal::E, 0.5).into(),
            3.into(),
        ];
        let psi = state_vector(&specs, 4).unwrap();
        let norm: f64 = psi.iter().map(|a| a.norm_sqr()).sum();
        assert!((norm - 1.0).abs() < 1e-12);
        let r = 3.0_f64.sqrt().recip();
        assert!((psi[4] - C64::new(r, 0.0)).norm() < 1e-12);
        assert!((psi[2] - C64::new(0.0, r)).norm() < 1e-12);
        assert!((psi[7] - C64::new(r, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn superposition_rejects_bad_input() {
        assert!(matches!(state_vector(&[], 2), Err(StateError::Empty)));
        let dup: Vec<StateSpec> = vec![1.into(), (1, Internal::G, 0.5).into()];
        assert!(matches!(
            state_vector(&dup, 2),
            Err(StateError::Duplicate(_)),
        ));
        let big: Vec<StateSpec> = vec![5.into()];
        assert!(matches!(
            state_vector(&big, 2),
            Err(StateError::Truncated(5, 2)),
        ));
    }

    #[test]
    fn truncation_covers_sidebands() {
        let colours = [Colour::Red, Colour::Carrier, Colour::Blue];
        let start: Vec<StateSpec> = vec![1.into()];
        assert_eq!(motional_states_needed(&colours, &start, None), 4);
        let target: Vec<StateSpec> = vec![0.into(), 6.into()];
        assert_eq!(
            motional_states_needed(&colours, &start, Some(&target)), 7);
        let start: Vec<StateSpec> = vec![0.into()];
        assert_eq!(
            motional_states_needed(&[Colour::Carrier], &start, None), 1);
    }
}
