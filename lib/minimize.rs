//! Quasi-Newton minimization of smooth, real-valued functions of several
//! variables.
//!
//! The minimizer is BFGS with a strong-Wolfe line search (Nocedal & Wright,
//! *Numerical Optimization*, algorithms 3.5, 3.6 and 6.1). It needs an exact
//! gradient; nothing here approximates one numerically.

use std::fmt;
use ndarray as nd;
use tracing::{ debug, info, warn };

/// A function to minimize, along with its gradient.
///
/// Both methods take `&mut self` so that implementors can cache work between
/// calls at the same point.
pub trait Objective {
    type Error;

    /// Evaluate the function at `x`.
    fn value(&mut self, x: &nd::Array1<f64>) -> Result<f64, Self::Error>;

    /// Evaluate the gradient of the function at `x`.
    fn gradient(&mut self, x: &nd::Array1<f64>)
        -> Result<nd::Array1<f64>, Self::Error>;
}

/// [`Objective`] built from a pair of infallible closures.
pub struct FnObjective<F, G> {
    pub f: F,
    pub g: G,
}

impl<F, G> Objective for FnObjective<F, G>
where
    F: FnMut(&nd::Array1<f64>) -> f64,
    G: FnMut(&nd::Array1<f64>) -> nd::Array1<f64>,
{
    type Error = std::convert::Infallible;

    fn value(&mut self, x: &nd::Array1<f64>) -> Result<f64, Self::Error> {
        Ok((self.f)(x))
    }

    fn gradient(&mut self, x: &nd::Array1<f64>)
        -> Result<nd::Array1<f64>, Self::Error>
    {
        Ok((self.g)(x))
    }
}

/// Options for [`bfgs`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BfgsOptions {
    /// Terminate successfully once the largest gradient component falls to
    /// this value.
    pub gtol: f64,
    /// Maximum number of iterations; defaults to `200 * n` for `n` parameters.
    pub maxiter: Option<usize>,
    /// Sufficient-decrease parameter of the Wolfe conditions.
    pub c1: f64,
    /// Curvature parameter of the Wolfe conditions.
    pub c2: f64,
    /// Maximum number of trial steps in each line search phase.
    pub max_linesearch: usize,
}

impl Default for BfgsOptions {
    fn default() -> Self {
        Self {
            gtol: 1e-5,
            maxiter: None,
            c1: 1e-4,
            c2: 0.9,
            max_linesearch: 40,
        }
    }
}

impl BfgsOptions {
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = Some(maxiter);
        self
    }

    pub fn with_wolfe(mut self, c1: f64, c2: f64) -> Self {
        self.c1 = c1;
        self.c2 = c2;
        self
    }

    pub fn with_max_linesearch(mut self, max_linesearch: usize) -> Self {
        self.max_linesearch = max_linesearch;
        self
    }
}

/// Reason for termination of [`bfgs`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The gradient norm fell below `gtol`.
    Converged,
    /// The iteration limit was reached first.
    MaxIterations,
    /// No step satisfying the Wolfe conditions could be found, usually due to
    /// loss of precision near a minimum.
    LineSearchFailed,
    /// The function or its gradient became NaN or infinite.
    NonFinite,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged
                => write!(f, "Optimization terminated successfully."),
            Self::MaxIterations
                => write!(f, "Maximum number of iterations has been exceeded."),
            Self::LineSearchFailed
                => write!(f, "Desired error not necessarily achieved due to precision loss."),
            Self::NonFinite
                => write!(f, "NaN or infinity encountered."),
        }
    }
}

/// Output of [`bfgs`].
#[derive(Clone, Debug)]
pub struct MinimizeResult {
    /// Final parameters.
    pub x: nd::Array1<f64>,
    /// Function value at `x`.
    pub fun: f64,
    /// Gradient at `x`.
    pub jac: nd::Array1<f64>,
    /// Final approximation to the inverse Hessian.
    pub hess_inv: nd::Array2<f64>,
    /// Number of iterations.
    pub nit: usize,
    /// Number of function evaluations.
    pub nfev: usize,
    /// Number of gradient evaluations.
    pub njev: usize,
    pub status: Status,
}

impl MinimizeResult {
    /// `true` if the minimizer converged.
    pub fn success(&self) -> bool { self.status == Status::Converged }

    /// Human-readable termination reason.
    pub fn message(&self) -> String { self.status.to_string() }
}

struct Trial {
    alpha: f64,
    fun: f64,
    jac: nd::Array1<f64>,
    slope: f64,
}

struct LineSearch<'a, O> {
    objective: &'a mut O,
    x: &'a nd::Array1<f64>,
    p: &'a nd::Array1<f64>,
    f0: f64,
    slope0: f64,
    c1: f64,
    c2: f64,
    maxiter: usize,
    nfev: usize,
    njev: usize,
}

impl<'a, O> LineSearch<'a, O>
where O: Objective
{
    fn eval(&mut self, alpha: f64) -> Result<Trial, O::Error> {
        let xa = self.x + &(alpha * self.p);
        let fun = self.objective.value(&xa)?;
        let jac = self.objective.gradient(&xa)?;
        self.nfev += 1;
        self.njev += 1;
        let slope = jac.dot(self.p);
        Ok(Trial { alpha, fun, jac, slope })
    }

    fn armijo_fails(&self, trial: &Trial) -> bool {
        trial.fun > self.f0 + self.c1 * trial.alpha * self.slope0
    }

    fn curvature_holds(&self, trial: &Trial) -> bool {
        trial.slope.abs() <= -self.c2 * self.slope0
    }

    fn search(&mut self, alpha0: f64) -> Result<Option<Trial>, O::Error> {
        let mut prev = Trial {
            alpha: 0.0,
            fun: self.f0,
            jac: nd::Array1::zeros(self.x.len()),
            slope: self.slope0,
        };
        let mut alpha = alpha0;
        for i in 0..self.maxiter {
            let trial = self.eval(alpha)?;
            if !trial.fun.is_finite() { return Ok(None); }
            if self.armijo_fails(&trial) || (i > 0 && trial.fun >= prev.fun) {
                return self.zoom(prev, trial);
            }
            if self.curvature_holds(&trial) { return Ok(Some(trial)); }
            if trial.slope >= 0.0 { return self.zoom(trial, prev); }
            alpha = 2.0 * trial.alpha;
            prev = trial;
        }
        Ok(None)
    }

    fn zoom(&mut self, mut lo: Trial, mut hi: Trial)
        -> Result<Option<Trial>, O::Error>
    {
        for _ in 0..self.maxiter {
            let d = hi.alpha - lo.alpha;
            if d.abs() < 1e-16 * lo.alpha.abs().max(1.0) { break; }
            let alpha = interpolate(&lo, &hi);
            let trial = self.eval(alpha)?;
            if !trial.fun.is_finite() {
                hi = trial;
                continue;
            }
            if self.armijo_fails(&trial) || trial.fun >= lo.fun {
                hi = trial;
            } else {
                if self.curvature_holds(&trial) { return Ok(Some(trial)); }
                if trial.slope * (hi.alpha - lo.alpha) >= 0.0 {
                    hi = std::mem::replace(&mut lo, trial);
                } else {
                    lo = trial;
                }
            }
        }
        Ok(None)
    }
}

// safeguarded quadratic interpolation using f(lo), f'(lo), f(hi); falls back
// to bisection when the minimizer lands too close to either end
fn interpolate(lo: &Trial, hi: &Trial) -> f64 {
    let d = hi.alpha - lo.alpha;
    let denom = 2.0 * (hi.fun - lo.fun - lo.slope * d);
    let bisect = lo.alpha + 0.5 * d;
    if denom == 0.0 || !denom.is_finite() { return bisect; }
    let a = lo.alpha - lo.slope * d * d / denom;
    let (amin, amax)
        = if d > 0.0 { (lo.alpha, hi.alpha) } else { (hi.alpha, lo.alpha) };
    let margin = 0.1 * d.abs();
    if a.is_finite() && a > amin + margin && a < amax - margin {
        a
    } else {
        bisect
    }
}

fn outer(a: &nd::Array1<f64>, b: &nd::Array1<f64>) -> nd::Array2<f64> {
    let a2 = a.view().insert_axis(nd::Axis(1));
    let b2 = b.view().insert_axis(nd::Axis(0));
    a2.dot(&b2)
}

fn max_abs(a: &nd::Array1<f64>) -> f64 {
    a.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// Minimize `objective` starting from `x0` using the BFGS quasi-Newton method.
///
/// Failure to converge is reported through [`MinimizeResult::status`]; the only
/// errors returned are those raised by `objective` itself.
pub fn bfgs<O>(objective: &mut O, x0: nd::Array1<f64>, opts: &BfgsOptions)
    -> Result<MinimizeResult, O::Error>
where O: Objective
{
    let n = x0.len();
    let maxiter = opts.maxiter.unwrap_or(200 * n);
    let eye: nd::Array2<f64> = nd::Array2::eye(n);

    let mut x = x0;
    let mut fun = objective.value(&x)?;
    let mut jac = objective.gradient(&x)?;
    let mut nfev: usize = 1;
    let mut njev: usize = 1;
    let mut hess_inv = eye.clone();
    let mut nit: usize = 0;
    // first step is scaled so that its length is ~1% larger than the
    // gradient's reciprocal norm
    let mut old_fun = fun + jac.dot(&jac).sqrt() / 2.0;

    let status = loop {
        if !fun.is_finite() || jac.iter().any(|g| !g.is_finite()) {
            break Status::NonFinite;
        }
        if max_abs(&jac) <= opts.gtol { break Status::Converged; }
        if nit >= maxiter { break Status::MaxIterations; }

        let mut p = -hess_inv.dot(&jac);
        let mut slope0 = jac.dot(&p);
        if slope0 >= 0.0 {
            // lost positive-definiteness; restart from steepest descent
            hess_inv.assign(&eye);
            p = -&jac;
            slope0 = jac.dot(&p);
        }
        let alpha0
            = if nit == 0 {
                (1.01 * 2.0 * (fun - old_fun) / slope0).min(1.0)
            } else {
                1.0
            };

        let mut search = LineSearch {
            objective: &mut *objective,
            x: &x,
            p: &p,
            f0: fun,
            slope0,
            c1: opts.c1,
            c2: opts.c2,
            maxiter: opts.max_linesearch,
            nfev: 0,
            njev: 0,
        };
        let step = search.search(alpha0)?;
        nfev += search.nfev;
        njev += search.njev;
        let Some(step) = step else {
            warn!(nit, fun, "bfgs: line search failed");
            break Status::LineSearchFailed;
        };

        let s = step.alpha * &p;
        let y = &step.jac - &jac;
        x += &s;
        old_fun = fun;
        fun = step.fun;
        jac = step.jac;
        nit += 1;

        let ys = y.dot(&s);
        if ys > 0.0 {
            if nit == 1 { hess_inv = &eye * (ys / y.dot(&y)); }
            let rho = ys.recip();
            let hy = hess_inv.dot(&y);
            let yhy = y.dot(&hy);
            hess_inv = hess_inv
                - rho * (outer(&hy, &s) + outer(&s, &hy))
                + (rho * rho * yhy + rho) * outer(&s, &s);
        }
        debug!(nit, fun, gnorm = max_abs(&jac), alpha = step.alpha, "bfgs");
    };

    info!(%status, nit, nfev, njev, fun, "bfgs finished");
    Ok(MinimizeResult { x, fun, jac, hess_inv, nit, nfev, njev, status })
}
