//! Unitary operators for single laser pulses of fixed colour.
//!
//! Every colour couples disjoint pairs `|g, n> <-> |e, m>` in the truncated
//! space, so each operator is a direct sum of 2x2 rotations plus the identity
//! on any uncoupled states. Within the Lamb-Dicke regime, the sideband Rabi
//! frequencies scale as `√n` (red) and `√(n + 1)` (blue) relative to the
//! carrier, and pulse angles are measured in units of π at the carrier Rabi
//! frequency.

use std::{ f64::consts::PI, fmt, str::FromStr };
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::{ Zero, One };
use crate::{
    error::SequenceError,
    hilbert::{ Internal, index },
};

/// Sideband structure of a pulse.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Colour {
    /// `|g, n> <-> |e, n>`
    Carrier,
    /// First red sideband, `|g, n> <-> |e, n - 1>`
    Red,
    /// First blue sideband, `|g, n> <-> |e, n + 1>`
    Blue,
}

impl Colour {
    /// Return `true` for the red and blue sidebands.
    pub fn is_sideband(&self) -> bool { !matches!(self, Self::Carrier) }

    /// Single-character label.
    pub fn label(&self) -> char {
        match self {
            Self::Carrier => 'c',
            Self::Red => 'r',
            Self::Blue => 'b',
        }
    }

    /// Parse a string like `"rbc"` into a sequence of colours, read
    /// left-to-right.
    pub fn parse_sequence(s: &str) -> Result<Vec<Self>, SequenceError> {
        s.chars().map(Self::try_from).collect()
    }

    /// Return each coupled pair of indices `(ground, excited)` in a space of
    /// `ns` motional levels, along with the relative Rabi frequency.
    pub fn couplings(&self, ns: usize) -> Vec<(usize, usize, f64)> {
        let pair = |ng: usize, ne: usize, f: f64| -> Option<(usize, usize, f64)> {
            let g = index(ng, Internal::G, ns).ok()?;
            let e = index(ne, Internal::E, ns).ok()?;
            Some((g, e, f))
        };
        match self {
            Self::Carrier
                => (0..ns).filter_map(|n| pair(n, n, 1.0)).collect(),
            Self::Red
                => (1..ns)
                .filter_map(|n| pair(n, n - 1, (n as f64).sqrt()))
                .collect(),
            Self::Blue
                => (0..ns)
                .filter_map(|n| pair(n, n + 1, ((n + 1) as f64).sqrt()))
                .collect(),
        }
    }
}

impl TryFrom<char> for Colour {
    type Error = SequenceError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'c' => Ok(Self::Carrier),
            'r' => Ok(Self::Red),
            'b' => Ok(Self::Blue),
            x => Err(SequenceError::BadColour(x)),
        }
    }
}

impl FromStr for Colour {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c.try_into(),
            (Some(c), Some(_)) => Err(SequenceError::BadColour(c)),
            (None, _) => Err(SequenceError::BadColour(' ')),
        }
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The operator of a single pulse of fixed colour and its derivative with
/// respect to the pulse angle, both held at a current angle.
///
/// Both matrices are allocated once and refreshed in place whenever the angle
/// changes.
#[derive(Clone, Debug)]
pub struct ColourOperator {
    colour: Colour,
    ns: usize,
    couplings: Vec<(usize, usize, f64)>,
    angle: f64,
    op: nd::Array2<C64>,
    d_op: nd::Array2<C64>,
}

impl ColourOperator {
    /// Create a new operator at angle zero, i.e. the identity.
    pub fn new(colour: Colour, ns: usize) -> Self {
        let couplings = colour.couplings(ns);
        let mut new = Self {
            colour,
            ns,
            couplings,
            angle: 0.0,
            op: nd::Array2::eye(2 * ns),
            d_op: nd::Array2::zeros((2 * ns, 2 * ns)),
        };
        new.refresh();
        new
    }

    pub fn colour(&self) -> Colour { self.colour }

    pub fn ns(&self) -> usize { self.ns }

    /// Current angle, in units of π.
    pub fn angle(&self) -> f64 { self.angle }

    /// Operator matrix at the current angle.
    pub fn op(&self) -> &nd::Array2<C64> { &self.op }

    /// Derivative of the operator matrix with respect to the angle, at the
    /// current angle.
    pub fn d_op(&self) -> &nd::Array2<C64> { &self.d_op }

    /// Set the angle, recomputing both matrices if it differs from the current
    /// one. Returns `true` if anything was recomputed.
    pub fn set_angle(&mut self, angle: f64) -> bool {
        if angle.to_bits() == self.angle.to_bits() { return false; }
        self.angle = angle;
        self.refresh();
        true
    }

    fn refresh(&mut self) {
        let mi = -C64::i();
        for &(g, e, f) in self.couplings.iter() {
            let x = PI * self.angle * f / 2.0;
            let dx = PI * f / 2.0;
            let (s, c) = x.sin_cos();
            self.op[[g, g]] = c.into();
            self.op[[e, e]] = c.into();
            self.op[[g, e]] = mi * s;
            self.op[[e, g]] = mi * s;
            self.d_op[[g, g]] = (-dx * s).into();
            self.d_op[[e, e]] = (-dx * s).into();
            self.d_op[[g, e]] = mi * dx * c;
            self.d_op[[e, g]] = mi * dx * c;
        }
    }
}

/// Return `true` if `M` is unitary to within `eps`, elementwise.
pub fn is_unitary(M: &nd::Array2<C64>, eps: f64) -> bool {
    let n = M.nrows();
    if M.ncols() != n { return false; }
    let MdM = M.t().mapv(|z| z.conj()).dot(M);
    MdM.indexed_iter()
        .all(|((i, j), z)| {
            let expected = if i == j { C64::one() } else { C64::zero() };
            (*z - expected).norm() < eps
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{ rngs::StdRng, Rng, SeedableRng };

    #[test]
    fn parse_colours() {
        assert_eq!(
            Colour::parse_sequence("rbc").unwrap(),
            vec![Colour::Red, Colour::Blue, Colour::Carrier],
        );
        assert!(matches!(
            Colour::parse_sequence("rxb"),
            Err(SequenceError::BadColour('x')),
        ));
        assert_eq!("b".parse::<Colour>().unwrap(), Colour::Blue);
    }

    #[test]
    fn couplings_respect_truncation() {
        let ns = 3;
        assert_eq!(Colour::Carrier.couplings(ns).len(), 3);
        let red = Colour::Red.couplings(ns);
        assert_eq!(red.len(), 2);
        // |g1> <-> |e0>
        assert_eq!((red[0].0, red[0].1), (4, 0));
        assert!((red[1].2 - 2.0_f64.sqrt()).abs() < 1e-15);
        let blue = Colour::Blue.couplings(ns);
        assert_eq!(blue.len(), 2);
        // |g0> <-> |e1>
        assert_eq!((blue[0].0, blue[0].1), (3, 1));
    }

    #[test]
    fn zero_angle_is_identity() {
        for colour in [Colour::Carrier, Colour::Red, Colour::Blue] {
            let op = ColourOperator::new(colour, 4);
            assert_eq!(op.op(), &nd::Array2::<C64>::eye(8));
        }
    }

    #[test]
    fn carrier_pi_pulse_flips() {
        let mut op = ColourOperator::new(Colour::Carrier, 1);
        assert!(op.set_angle(1.0));
        assert!(!op.set_angle(1.0));
        let g = nd::array![C64::zero(), C64::one()];
        let out = op.op().dot(&g);
        assert!((out[0] - (-C64::i())).norm() < 1e-12);
        assert!(out[1].norm() < 1e-12);
    }

    #[test]
    fn operators_are_unitary() {
        let mut rng = StdRng::seed_from_u64(10546);
        for colour in [Colour::Carrier, Colour::Red, Colour::Blue] {
            let mut op = ColourOperator::new(colour, 5);
            for _ in 0..20 {
                op.set_angle(rng.gen_range(-2.0..2.0));
                assert!(is_unitary(op.op(), 1e-12));
            }
        }
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let h = 1e-6;
        let mut rng = StdRng::seed_from_u64(77);
        for colour in [Colour::Carrier, Colour::Red, Colour::Blue] {
            let mut op = ColourOperator::new(colour, 4);
            let angle: f64 = rng.gen();
            op.set_angle(angle + h);
            let plus = op.op().clone();
            op.set_angle(angle - h);
            let minus = op.op().clone();
            op.set_angle(angle);
            let fd = (plus - minus).mapv(|z| z / (2.0 * h));
            let err = (&fd - op.d_op()).mapv(|z| z.norm())
                .fold(0.0_f64, |acc, x| acc.max(*x));
            assert!(err < 1e-7, "{colour}: {err}");
        }
    }
}
