//! Propagators, their derivatives, and state distances for a fixed sequence of
//! coloured pulses.
//!
//! Matrices are written in operator notation: for colours `[c0, c1, ..., cL]`
//! the propagator is `U = Op(c0) · Op(c1) · ... · Op(cL)`, so the *last* pulse
//! in the list is the first to act on the start state.
//!
//! Every derived quantity is cached and tracked as [`Freshness::Fresh`] or
//! [`Freshness::Stale`]. Loading a new angle point invalidates the propagator
//! and everything computed from it; loading a new phase point rebuilds the
//! target state and invalidates the distance and both gradients, but keeps the
//! propagator. A point bitwise identical to the last one loaded is a no-op.

use std::f64::consts::PI;
use itertools::Itertools;
use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use num_traits::{ Zero, One };
use tracing::{ debug, info, trace };
use crate::{
    error::{ LengthError, SequenceError, SeqResult },
    hilbert::{ StateSpec, motional_states_needed, state_vector },
    pulse::{ Colour, ColourOperator },
};

/// Cache state of a single derived quantity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Freshness {
    Stale,
    Fresh,
}

impl Freshness {
    fn is_stale(&self) -> bool { matches!(self, Self::Stale) }
}

#[derive(Copy, Clone, Debug)]
struct Cache {
    propagator: Freshness,
    distance: Freshness,
    d_angles: Freshness,
    d_phases: Freshness,
}

impl Cache {
    fn stale() -> Self {
        Self {
            propagator: Freshness::Stale,
            distance: Freshness::Stale,
            d_angles: Freshness::Stale,
            d_phases: Freshness::Stale,
        }
    }

    fn invalidate_angles(&mut self) {
        self.propagator = Freshness::Stale;
        self.invalidate_target();
    }

    fn invalidate_target(&mut self) {
        self.distance = Freshness::Stale;
        self.d_angles = Freshness::Stale;
        self.d_phases = Freshness::Stale;
    }
}

/// Number of times each derived quantity has actually been recomputed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EvalStats {
    pub propagator: usize,
    pub target: usize,
    pub distance: usize,
    pub d_angles: usize,
    pub d_phases: usize,
}

/// Gradient of the distance.
#[derive(Clone, Debug, PartialEq)]
pub enum Gradient {
    /// Fixed-phase mode: derivatives with respect to the pulse angles only.
    Fixed(nd::Array1<f64>),
    /// Derivatives with respect to the pulse angles and the free target
    /// phases, the latter excluding the pinned first component.
    Free {
        angles: nd::Array1<f64>,
        phases: nd::Array1<f64>,
    },
}

impl Gradient {
    pub fn angles(&self) -> &nd::Array1<f64> {
        match self {
            Self::Fixed(angles) => angles,
            Self::Free { angles, .. } => angles,
        }
    }

    pub fn phases(&self) -> Option<&nd::Array1<f64>> {
        match self {
            Self::Fixed(_) => None,
            Self::Free { phases, .. } => Some(phases),
        }
    }

    /// Concatenate angle and phase derivatives into a single vector.
    pub fn into_flat(self) -> nd::Array1<f64> {
        match self {
            Self::Fixed(angles) => angles,
            Self::Free { angles, phases } => {
                angles.iter().chain(phases.iter()).copied().collect()
            },
        }
    }
}

#[derive(Clone, Debug)]
struct Target {
    specs: Vec<StateSpec>,
    indices: Vec<usize>,
    vector: nd::Array1<C64>,
}

/// A fixed sequence of coloured pulses acting on a start state, with an
/// optional target state.
///
/// The angles of the pulses (and, outside of fixed-phase mode, the relative
/// phases of the target components) are supplied at each call; all angles and
/// phases are in units of π.
#[derive(Clone, Debug)]
pub struct PulseSequence {
    colours: Vec<Colour>,
    ns: usize,
    fixed_phase: bool,
    start: nd::Array1<C64>,
    target: Option<Target>,
    ops: Vec<ColourOperator>,
    // last loaded points, valid only once the matching flag is set
    angles: nd::Array1<f64>,
    phases: nd::Array1<f64>,
    angles_loaded: bool,
    phases_loaded: bool,
    // outputs
    u: nd::Array2<C64>,
    d_u: Vec<nd::Array2<C64>>,
    u_start: nd::Array1<C64>,
    tus: C64,
    dist: f64,
    d_dist_angles: nd::Array1<f64>,
    d_dist_phases: nd::Array1<f64>,
    // scratch
    partials_ltr: Vec<nd::Array2<C64>>,
    partials_rtl: Vec<nd::Array2<C64>>,
    temp: nd::Array2<C64>,
    temp_vec: nd::Array1<C64>,
    cache: Cache,
    stats: EvalStats,
}

fn mat_mul_into(
    a: &nd::Array2<C64>,
    b: &nd::Array2<C64>,
    c: &mut nd::Array2<C64>,
) {
    nd::linalg::general_mat_mul(C64::one(), a, b, C64::zero(), c);
}

fn same_point<I>(old: &nd::Array1<f64>, new: I) -> bool
where I: IntoIterator<Item = f64>
{
    let mut new = new.into_iter();
    old.iter().all(|a| new.next().is_some_and(|b| a.to_bits() == b.to_bits()))
        && new.next().is_none()
}

impl PulseSequence {
    /// Create a new pulse sequence.
    ///
    /// `start` defaults to the motional ground state `|g0>`. If `target` is
    /// `None`, everything requiring a target will return
    /// [`SequenceError::NoTarget`]. A target with a single component has no
    /// free phases, and forces fixed-phase mode.
    ///
    /// Fails if `colours` is empty, or if either state is malformed.
    pub fn new(
        colours: &[Colour],
        target: Option<&[StateSpec]>,
        fixed_phase: bool,
        start: Option<&[StateSpec]>,
    ) -> SeqResult<Self>
    {
        if colours.is_empty() { return Err(SequenceError::NoColours); }
        let default_start = [StateSpec::from(0)];
        let start_specs = start.unwrap_or(&default_start);
        let ns = motional_states_needed(colours, start_specs, target);
        let fixed_phase
            = fixed_phase || target.is_some_and(|t| t.len() == 1);
        let start = state_vector(start_specs, ns)?;
        let target
            = target.map(|specs| -> SeqResult<Target> {
                let mut specs = specs.to_vec();
                if !fixed_phase {
                    if let Some(first) = specs.first_mut() {
                        *first = first.with_phase(0.0);
                    }
                }
                let indices: Vec<usize>
                    = specs.iter()
                    .map(|s| s.index(ns))
                    .collect::<Result<_, _>>()?;
                let vector = state_vector(&specs, ns)?;
                Ok(Target { specs, indices, vector })
            })
            .transpose()?;
        let n_phases
            = target.as_ref()
            .filter(|_| !fixed_phase)
            .map(|t| t.specs.len() - 1)
            .unwrap_or(0);

        let len = colours.len();
        let dim = 2 * ns;
        let ops: Vec<ColourOperator>
            = colours.iter().map(|c| ColourOperator::new(*c, ns)).collect();
        let eye: nd::Array2<C64> = nd::Array2::eye(dim);
        let zeros: nd::Array2<C64> = nd::Array2::zeros((dim, dim));
        info!(
            colours = %colours.iter().join(""),
            ns,
            fixed_phase,
            n_phases,
            "new pulse sequence"
        );
        Ok(Self {
            colours: colours.to_vec(),
            ns,
            fixed_phase,
            start,
            target,
            ops,
            angles: nd::Array1::zeros(len),
            phases: nd::Array1::zeros(n_phases),
            angles_loaded: false,
            phases_loaded: false,
            u: eye.clone(),
            d_u: vec![zeros.clone(); len],
            u_start: nd::Array1::zeros(dim),
            tus: C64::zero(),
            dist: f64::INFINITY,
            d_dist_angles: nd::Array1::zeros(len),
            d_dist_phases: nd::Array1::zeros(n_phases),
            partials_ltr: vec![eye.clone(); len],
            partials_rtl: vec![eye; len],
            temp: zeros,
            temp_vec: nd::Array1::zeros(dim),
            cache: Cache::stale(),
            stats: EvalStats::default(),
        })
    }

    /// Number of pulses in the sequence.
    pub fn len(&self) -> usize { self.colours.len() }

    /// Always `false`; a sequence cannot be constructed without pulses.
    pub fn is_empty(&self) -> bool { self.colours.is_empty() }

    /// Number of motional levels in the truncated space.
    pub fn ns(&self) -> usize { self.ns }

    pub fn colours(&self) -> &[Colour] { &self.colours }

    pub fn fixed_phase(&self) -> bool { self.fixed_phase }

    pub fn has_target(&self) -> bool { self.target.is_some() }

    /// Number of free target phases, or zero in fixed-phase mode.
    pub fn n_phases(&self) -> usize {
        if self.fixed_phase { return 0; }
        self.target.as_ref()
            .map(|t| t.specs.len() - 1)
            .unwrap_or(0)
    }

    pub fn start_state(&self) -> &nd::Array1<C64> { &self.start }

    /// Current target state vector, including any phases loaded so far.
    pub fn target_state(&self) -> Option<&nd::Array1<C64>> {
        self.target.as_ref().map(|t| &t.vector)
    }

    /// Last angles used for a calculation.
    pub fn angles(&self) -> Option<&nd::Array1<f64>> {
        self.angles_loaded.then_some(&self.angles)
    }

    /// Last free phases used for a calculation, relative to the first target
    /// component.
    pub fn phases(&self) -> Option<&nd::Array1<f64>> {
        self.phases_loaded.then_some(&self.phases)
    }

    pub fn stats(&self) -> EvalStats { self.stats }

    pub(crate) fn operators(&self) -> &[ColourOperator] { &self.ops }

    /// Mark every derived quantity as stale, forcing recomputation on the next
    /// call even at an unchanged point.
    pub fn invalidate(&mut self) {
        self.cache = Cache::stale();
    }

    pub(crate) fn load_angles(&mut self, angles: nd::ArrayView1<f64>)
        -> SeqResult<()>
    {
        LengthError::check("angles", self.len(), angles.len())?;
        if self.angles_loaded && same_point(&self.angles, angles.iter().copied()) {
            return Ok(());
        }
        self.ops.iter_mut().zip(angles.iter())
            .for_each(|(op, angle)| { op.set_angle(*angle); });
        self.angles.assign(&angles);
        self.angles_loaded = true;
        self.cache.invalidate_angles();
        Ok(())
    }

    pub(crate) fn load_phases(&mut self, phases: Option<nd::ArrayView1<f64>>)
        -> SeqResult<()>
    {
        if self.fixed_phase { return Ok(()); }
        let Some(target) = self.target.as_mut() else {
            return Err(SequenceError::NoTarget);
        };
        let phases = phases.ok_or(SequenceError::NoPhases)?;
        let k = target.specs.len();
        SequenceError::check_phases(k, phases.len())?;
        // a full set of phases is taken relative to the first
        let (first, rest)
            = if phases.len() == k {
                (phases[0], phases.slice_move(s![1..]))
            } else {
                (0.0, phases)
            };
        let relative = rest.iter().map(|p| p - first);
        if self.phases_loaded && same_point(&self.phases, relative.clone()) {
            return Ok(());
        }
        self.phases.iter_mut().zip(relative)
            .for_each(|(old, p)| { *old = p; });
        self.phases_loaded = true;
        target.specs.iter_mut().skip(1).zip(self.phases.iter())
            .for_each(|(spec, p)| { *spec = spec.with_phase(*p); });
        let norm = (k as f64).sqrt().recip();
        target.vector.fill(C64::zero());
        for (spec, idx) in target.specs.iter().zip(target.indices.iter()) {
            target.vector[*idx] = norm * spec.phase_factor();
        }
        self.stats.target += 1;
        self.cache.invalidate_target();
        Ok(())
    }

    // partials_ltr[i] = Op[0] · ... · Op[i - 1]
    // partials_rtl[i] = Op[L - i] · ... · Op[L - 1]
    fn update_propagator(&mut self) {
        if !self.cache.propagator.is_stale() { return; }
        let len = self.len();
        for i in 0..len - 1 {
            let (done, todo) = self.partials_ltr.split_at_mut(i + 1);
            mat_mul_into(&done[i], self.ops[i].op(), &mut todo[0]);
            let (done, todo) = self.partials_rtl.split_at_mut(i + 1);
            mat_mul_into(self.ops[len - 1 - i].op(), &done[i], &mut todo[0]);
        }
        mat_mul_into(
            &self.partials_ltr[len - 1], self.ops[len - 1].op(), &mut self.u);
        for i in 0..len {
            mat_mul_into(&self.partials_ltr[i], self.ops[i].d_op(), &mut self.temp);
            mat_mul_into(
                &self.temp, &self.partials_rtl[len - 1 - i], &mut self.d_u[i]);
        }
        self.cache.propagator = Freshness::Fresh;
        self.stats.propagator += 1;
        debug!(evals = self.stats.propagator, "propagator rebuilt");
    }

    fn update_distance(&mut self) -> SeqResult<()> {
        self.update_propagator();
        if !self.cache.distance.is_stale() { return Ok(()); }
        let target = self.target.as_ref().ok_or(SequenceError::NoTarget)?;
        nd::linalg::general_mat_vec_mul(
            C64::one(), &self.u, &self.start, C64::zero(), &mut self.u_start);
        self.tus
            = target.vector.iter().zip(self.u_start.iter())
            .map(|(t, us)| t.conj() * us)
            .sum();
        self.dist = 1.0 - self.tus.norm_sqr();
        self.cache.distance = Freshness::Fresh;
        self.stats.distance += 1;
        trace!(distance = self.dist, "distance updated");
        Ok(())
    }

    fn update_distance_angle_derivatives(&mut self) -> SeqResult<()> {
        self.update_distance()?;
        if !self.cache.d_angles.is_stale() { return Ok(()); }
        let target = self.target.as_ref().ok_or(SequenceError::NoTarget)?;
        let tus_conj = self.tus.conj();
        let iter = self.d_dist_angles.iter_mut().zip(self.d_u.iter());
        for (d, d_u) in iter {
            nd::linalg::general_mat_vec_mul(
                C64::one(), d_u, &self.start, C64::zero(), &mut self.temp_vec);
            let prod: C64
                = target.vector.iter().zip(self.temp_vec.iter())
                .map(|(t, dus)| t.conj() * dus)
                .sum();
            *d = -2.0 * (tus_conj * prod).re;
        }
        self.cache.d_angles = Freshness::Fresh;
        self.stats.d_angles += 1;
        Ok(())
    }

    // <g n_j|U|start> is read straight out of U|start>
    fn update_distance_phase_derivatives(&mut self) -> SeqResult<()> {
        self.update_distance()?;
        if !self.cache.d_phases.is_stale() { return Ok(()); }
        let target = self.target.as_ref().ok_or(SequenceError::NoTarget)?;
        let pref = 2.0 * PI / (target.specs.len() as f64).sqrt();
        let tus_conj = self.tus.conj();
        let iter
            = self.d_dist_phases.iter_mut()
            .zip(target.specs.iter().skip(1))
            .zip(target.indices.iter().skip(1));
        for ((d, spec), idx) in iter {
            let rot = C64::cis(PI * (0.5 - spec.phase));
            *d = pref * (rot * self.u_start[*idx] * tus_conj).re;
        }
        self.cache.d_phases = Freshness::Fresh;
        self.stats.d_phases += 1;
        Ok(())
    }

    fn require_target(&self) -> SeqResult<()> {
        self.target.is_some().then_some(()).ok_or(SequenceError::NoTarget)
    }

    pub(crate) fn distance_view(
        &mut self,
        angles: nd::ArrayView1<f64>,
        phases: Option<nd::ArrayView1<f64>>,
    ) -> SeqResult<f64>
    {
        self.require_target()?;
        self.load_angles(angles)?;
        self.load_phases(phases)?;
        self.update_distance()?;
        Ok(self.dist)
    }

    pub(crate) fn distance_gradient_view(
        &mut self,
        angles: nd::ArrayView1<f64>,
        phases: Option<nd::ArrayView1<f64>>,
    ) -> SeqResult<Gradient>
    {
        self.require_target()?;
        self.load_angles(angles)?;
        self.load_phases(phases)?;
        self.update_distance_angle_derivatives()?;
        if self.fixed_phase {
            Ok(Gradient::Fixed(self.d_dist_angles.clone()))
        } else {
            self.update_distance_phase_derivatives()?;
            Ok(Gradient::Free {
                angles: self.d_dist_angles.clone(),
                phases: self.d_dist_phases.clone(),
            })
        }
    }

    /// Get the propagator of the sequence at the given angles.
    pub fn propagator(&mut self, angles: &[f64])
        -> SeqResult<nd::Array2<C64>>
    {
        self.load_angles(nd::aview1(angles))?;
        self.update_propagator();
        Ok(self.u.clone())
    }

    /// Get the derivatives of the propagator at the given angles with respect
    /// to each angle in turn.
    pub fn propagator_derivatives(&mut self, angles: &[f64])
        -> SeqResult<Vec<nd::Array2<C64>>>
    {
        self.load_angles(nd::aview1(angles))?;
        self.update_propagator();
        Ok(self.d_u.clone())
    }

    /// Get the distance `1 - |<target|U|start>|^2` at the given angles and
    /// target phases.
    ///
    /// Phases are ignored in fixed-phase mode and required otherwise. They may
    /// be given either for every target component after the first, or for
    /// every component, in which case they are taken relative to the first.
    pub fn distance(&mut self, angles: &[f64], phases: Option<&[f64]>)
        -> SeqResult<f64>
    {
        self.distance_view(nd::aview1(angles), phases.map(nd::aview1))
    }

    /// Get the derivatives of the distance with respect to the angles of the
    /// pulses (in list order) and, outside of fixed-phase mode, the phases of
    /// all target components after the first.
    pub fn distance_gradient(&mut self, angles: &[f64], phases: Option<&[f64]>)
        -> SeqResult<Gradient>
    {
        self.distance_gradient_view(nd::aview1(angles), phases.map(nd::aview1))
    }
}
