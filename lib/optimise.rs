//! Optimisation of pulse angles (and target phases) to minimise the distance
//! between the evolved start state and the target.

use ndarray as nd;
use rand::{ prelude as rnd, Rng };
use crate::{
    error::{ LengthError, SequenceError, SeqResult },
    minimize::{ BfgsOptions, MinimizeResult, Objective, bfgs },
    sequence::PulseSequence,
};

/// Flat parameter layout used by the minimizer: all pulse angles, followed by
/// the free target phases unless in fixed-phase mode.
struct DistanceObjective<'a> {
    seq: &'a mut PulseSequence,
}

impl<'a> DistanceObjective<'a> {
    fn split<'x>(&self, x: nd::ArrayView1<'x, f64>)
        -> (nd::ArrayView1<'x, f64>, Option<nd::ArrayView1<'x, f64>>)
    {
        let (angles, phases) = x.split_at(nd::Axis(0), self.seq.len());
        (angles, (!self.seq.fixed_phase()).then_some(phases))
    }

    fn load(&mut self, x: nd::ArrayView1<f64>) -> SeqResult<()> {
        let (angles, phases) = self.split(x);
        self.seq.load_angles(angles)?;
        self.seq.load_phases(phases)
    }
}

impl<'a> Objective for DistanceObjective<'a> {
    type Error = SequenceError;

    fn value(&mut self, x: &nd::Array1<f64>) -> SeqResult<f64> {
        let (angles, phases) = self.split(x.view());
        self.seq.distance_view(angles, phases)
    }

    fn gradient(&mut self, x: &nd::Array1<f64>) -> SeqResult<nd::Array1<f64>> {
        let (angles, phases) = self.split(x.view());
        self.seq.distance_gradient_view(angles, phases)
            .map(|grad| grad.into_flat())
    }
}

fn initial<R>(rng: &mut R, given: Option<&[f64]>, what: &'static str, n: usize)
    -> SeqResult<nd::Array1<f64>>
where R: Rng + ?Sized
{
    match given {
        Some(x) => {
            LengthError::check(what, n, x.len())?;
            Ok(nd::Array1::from_vec(x.to_vec()))
        },
        None => Ok((0..n).map(|_| rng.gen::<f64>()).collect()),
    }
}

impl PulseSequence {
    /// Minimise the distance to the target with BFGS, starting from the given
    /// angles and phases, or from uniform random values in `[0, 1)` where
    /// these are `None`.
    ///
    /// Initial phases are ignored in fixed-phase mode, and otherwise must be
    /// given for every target component after the first. The returned result
    /// is that of the minimizer, whether it converged or not; use
    /// [`Self::split_result`] to unpack its parameters. The sequence is left
    /// loaded at the returned point rather than the last one the minimizer
    /// tried, so that [`Self::angles`] and [`Self::trace`] refer to it.
    pub fn optimise(
        &mut self,
        initial_angles: Option<&[f64]>,
        initial_phases: Option<&[f64]>,
        opts: &BfgsOptions,
    ) -> SeqResult<MinimizeResult>
    {
        let mut rng = rnd::thread_rng();
        self.optimise_with_rng(&mut rng, initial_angles, initial_phases, opts)
    }

    /// Like [`Self::optimise`], but drawing any random initial values from
    /// `rng`.
    pub fn optimise_with_rng<R>(
        &mut self,
        rng: &mut R,
        initial_angles: Option<&[f64]>,
        initial_phases: Option<&[f64]>,
        opts: &BfgsOptions,
    ) -> SeqResult<MinimizeResult>
    where R: Rng + ?Sized
    {
        if !self.has_target() { return Err(SequenceError::NoTarget); }
        let angles = initial(rng, initial_angles, "angles", self.len())?;
        let x0: nd::Array1<f64>
            = if self.fixed_phase() {
                angles
            } else {
                let phases
                    = initial(rng, initial_phases, "phases", self.n_phases())?;
                angles.iter().chain(phases.iter()).copied().collect()
            };
        let mut objective = DistanceObjective { seq: self };
        let res = bfgs(&mut objective, x0, opts)?;
        objective.load(res.x.view())?;
        Ok(res)
    }

    /// Split the parameters of an optimisation result into pulse angles and
    /// target phases.
    ///
    /// The phases include the pinned phase of the first target component, so
    /// in fixed-phase mode they are just `[0.0]`.
    ///
    /// Fails if the result does not have one parameter for each pulse and
    /// free phase of this sequence.
    pub fn split_result(&self, res: &MinimizeResult)
        -> SeqResult<(nd::Array1<f64>, nd::Array1<f64>)>
    {
        LengthError::check(
            "parameters", self.len() + self.n_phases(), res.x.len())?;
        if self.fixed_phase() {
            return Ok((res.x.clone(), nd::array![0.0]));
        }
        let len = self.len();
        let angles = res.x.slice(nd::s![..len]).to_owned();
        let phases
            = std::iter::once(0.0)
            .chain(res.x.slice(nd::s![len..]).iter().copied())
            .collect();
        Ok((angles, phases))
    }
}

#[cfg(test)]
mod test {
    use rand::{ rngs::StdRng, SeedableRng };
    use crate::{
        hilbert::{ Internal, StateSpec },
        minimize::Status,
        pulse::Colour,
    };
    use super::*;

    fn colours(s: &str) -> Vec<Colour> { Colour::parse_sequence(s).unwrap() }

    #[test]
    fn sideband_pair_reaches_superposition() {
        // blue acts first: |g0> -> |g0>, |e1>; red then moves |e1> -> |g2>
        let target: Vec<StateSpec> = vec![(0, Internal::G).into(), 2.into()];
        let mut seq = PulseSequence::new(&colours("rb"), Some(&target), true, None)
            .unwrap();
        let res = seq.optimise(Some(&[0.6, 1.4]), None, &BfgsOptions::default())
            .unwrap();
        assert!(res.success(), "{}", res.message());
        assert!(res.fun < 1e-4);
        let (angles, phases) = seq.split_result(&res).unwrap();
        assert_eq!(angles.len(), 2);
        assert_eq!(phases, nd::array![0.0]);
        let d = seq.distance(angles.as_slice().unwrap(), None).unwrap();
        assert!(d < 1e-4);
    }

    #[test]
    fn free_phases_are_optimised() {
        let target: Vec<StateSpec> = vec![0.into(), 2.into()];
        let mut seq
            = PulseSequence::new(&colours("rb"), Some(&target), false, None)
            .unwrap();
        let res = seq.optimise(
            Some(&[0.6, 0.4]), Some(&[0.7]), &BfgsOptions::default())
            .unwrap();
        assert!(res.success(), "{}", res.message());
        assert!(res.fun < 1e-4);
        assert_eq!(res.x.len(), 3);
        let (angles, phases) = seq.split_result(&res).unwrap();
        assert_eq!(angles, res.x.slice(nd::s![..2]));
        // left loaded at the returned point
        assert_eq!(seq.angles(), Some(&angles));
        assert_eq!(seq.phases().unwrap(), &res.x.slice(nd::s![2..]));
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0], 0.0);
        assert_eq!(phases[1], res.x[2]);
        let d = seq.distance(
            angles.as_slice().unwrap(), Some(phases.as_slice().unwrap()))
            .unwrap();
        assert!(d < 1e-4);
    }

    #[test]
    fn random_start_on_single_pulse() {
        let target: Vec<StateSpec> = vec![(0, Internal::E).into()];
        let mut seq = PulseSequence::new(&colours("c"), Some(&target), false, None)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(2718);
        let res = seq.optimise_with_rng(
            &mut rng, None, None, &BfgsOptions::default())
            .unwrap();
        assert!(res.success(), "{}", res.message());
        assert!(res.fun < 1e-8);
        // odd multiples of a pi pulse
        assert!((res.x[0].rem_euclid(2.0) - 1.0).abs() < 1e-3);
    }

    fn result_at(x: nd::Array1<f64>) -> MinimizeResult {
        let n = x.len();
        MinimizeResult {
            x,
            fun: 0.5,
            jac: nd::Array1::zeros(n),
            hess_inv: nd::Array2::eye(n),
            nit: 0,
            nfev: 1,
            njev: 1,
            status: Status::MaxIterations,
        }
    }

    #[test]
    fn fixed_phase_split_is_reference_only() {
        let target: Vec<StateSpec> = vec![0.into(), (1, Internal::E).into()];
        let seq = PulseSequence::new(&colours("bc"), Some(&target), true, None)
            .unwrap();
        for x in [nd::array![0.3, 0.9], nd::array![-4.0, 17.5]] {
            let (angles, phases) = seq.split_result(&result_at(x.clone()))
                .unwrap();
            assert_eq!(angles, x);
            assert_eq!(phases, nd::array![0.0]);
        }
    }

    #[test]
    fn split_checks_parameter_count() {
        let target: Vec<StateSpec> = vec![0.into(), 2.into()];
        for fixed_phase in [true, false] {
            let seq
                = PulseSequence::new(
                    &colours("rb"), Some(&target), fixed_phase, None)
                .unwrap();
            let expected = if fixed_phase { 2 } else { 3 };
            for x in [nd::array![0.1], nd::array![0.1, 0.2, 0.3, 0.4]] {
                let got = x.len();
                assert!(matches!(
                    seq.split_result(&result_at(x)),
                    Err(SequenceError::Length(LengthError { expected: e, got: g, .. }))
                        if e == expected && g == got,
                ));
            }
        }
    }

    #[test]
    fn sidebands_alone_cannot_change_parity() {
        // |g0> and |e2> differ in the parity of internal + motional
        // excitations, which only a carrier pulse can change; the best that
        // "rb" can do is to leave |g0> in place
        let target: Vec<StateSpec> = vec![0.into(), (2, Internal::E).into()];
        let mut seq = PulseSequence::new(&colours("rb"), Some(&target), true, None)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(1618);
        let best
            = (0..8)
            .map(|_| {
                seq.optimise_with_rng(&mut rng, None, None, &BfgsOptions::default())
                    .unwrap()
                    .fun
            })
            .fold(f64::INFINITY, f64::min);
        assert!(best >= 0.5 - 1e-12);
        assert!(best < 0.5 + 1e-6);
    }

    #[test]
    fn optimise_checks_preconditions() {
        let mut seq = PulseSequence::new(&colours("rb"), None, true, None)
            .unwrap();
        assert!(matches!(
            seq.optimise(None, None, &BfgsOptions::default()),
            Err(SequenceError::NoTarget),
        ));
        let target: Vec<StateSpec> = vec![0.into(), 2.into()];
        let mut seq
            = PulseSequence::new(&colours("rb"), Some(&target), false, None)
            .unwrap();
        assert!(matches!(
            seq.optimise(Some(&[0.1]), None, &BfgsOptions::default()),
            Err(SequenceError::Length(_)),
        ));
        assert!(matches!(
            seq.optimise(Some(&[0.1, 0.2]), Some(&[0.1, 0.2]), &BfgsOptions::default()),
            Err(SequenceError::Length(_)),
        ));
    }
}
