//! Optimisation of chi-squared target functions.
//!
//! Three algorithms are available:
//! - a rayon-parallel grid search (used for starting values)
//! - Nelder–Mead simplex
//! - Polak–Ribière+ conjugate gradient with a strong Wolfe line search
//!
//! Linear inequality constraints `A·x ≥ b` are enforced with a logarithmic
//! barrier around the local optimisers, and by skipping infeasible points in
//! the grid search.

pub mod cg;
pub mod constraints;
pub mod grid;
pub mod simplex;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{RelaxError, Result};

pub use cg::polak_ribiere_plus;
pub use constraints::{LinearConstraints, LogBarrier};
pub use grid::{GridAxis, grid_search};
pub use simplex::simplex;

pub const WARN_MAX_ITER: &str = "Maximum number of iterations reached";
pub const WARN_INFINITE: &str = "Infinite function value encountered";

/// Rounds of the logarithmic barrier (μ = 1, 0.1, ...).
const BARRIER_ROUNDS: usize = 10;

/// A scalar function of a parameter vector.
///
/// Implementors must be `Sync` since grid points and Monte Carlo simulations
/// are evaluated in parallel.
pub trait TargetFunction: Sync {
    fn func(&self, x: &[f64]) -> f64;

    /// Gradient of `func`. Defaults to central finite differences.
    fn dfunc(&self, x: &[f64], grad: &mut [f64]) {
        numeric_gradient(|p| self.func(p), x, grad);
    }
}

/// Central difference gradient.
pub fn numeric_gradient<F>(f: F, x: &[f64], grad: &mut [f64])
where
    F: Fn(&[f64]) -> f64,
{
    let mut work = x.to_vec();
    for (i, g) in grad.iter_mut().enumerate() {
        let h = 1e-6 * x[i].abs().max(1.0);
        work[i] = x[i] + h;
        let up = f(&work);
        work[i] = x[i] - h;
        let down = f(&work);
        work[i] = x[i];
        *g = (up - down) / (2.0 * h);
    }
}

/// Local optimisation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "simplex")]
    Simplex,
    #[serde(rename = "cg", alias = "polak-ribiere+")]
    Cg,
    /// Grid search only. The grid optimum is kept as the final result.
    #[serde(rename = "grid")]
    Grid,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Simplex => "simplex",
            Algorithm::Cg => "polak-ribiere+",
            Algorithm::Grid => "grid",
        })
    }
}

impl FromStr for Algorithm {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simplex" | "nelder-mead" => Ok(Algorithm::Simplex),
            "cg" | "polak-ribiere+" | "prcg" => Ok(Algorithm::Cg),
            "grid" => Ok(Algorithm::Grid),
            other => Err(RelaxError::Unknown {
                kind: "minimisation algorithm",
                name: other.to_string(),
            }),
        }
    }
}

/// Local optimiser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinOptions {
    pub algorithm: Algorithm,
    pub func_tol: f64,
    pub grad_tol: Option<f64>,
    pub max_iterations: usize,
    /// Apply the parameter constraints when they are available.
    pub constraints: bool,
}

impl Default for MinOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Simplex,
            func_tol: 1e-25,
            grad_tol: None,
            max_iterations: 10_000,
            constraints: true,
        }
    }
}

/// Outcome of one optimisation.
#[derive(Debug, Clone, PartialEq)]
pub struct MinResult {
    pub x: Vec<f64>,
    pub f: f64,
    pub iterations: usize,
    pub f_count: usize,
    pub g_count: usize,
    pub h_count: usize,
    pub warning: Option<String>,
}

impl MinResult {
    fn absorb_counts(&mut self, other: &MinResult) {
        self.iterations += other.iterations;
        self.f_count += other.f_count;
        self.g_count += other.g_count;
        self.h_count += other.h_count;
    }
}

/// Run the configured local optimiser from `x0`.
///
/// With constraints, the optimiser runs inside a logarithmic barrier whose
/// weight drops tenfold per round. The reported `f` is always the value of
/// the unpenalised target.
pub fn minimise<T: TargetFunction>(
    target: &T,
    x0: &[f64],
    options: &MinOptions,
    constraints: Option<&LinearConstraints>,
) -> Result<MinResult> {
    if x0.is_empty() {
        return Err(RelaxError::Optimisation(
            "there are no parameters to optimise".to_string(),
        ));
    }

    let run = |t: &dyn TargetFunction, x: &[f64]| match options.algorithm {
        Algorithm::Simplex => simplex(t, x, options.func_tol, options.max_iterations),
        Algorithm::Cg => polak_ribiere_plus(
            t,
            x,
            options.func_tol,
            options.grad_tol,
            options.max_iterations,
        ),
        Algorithm::Grid => MinResult {
            x: x.to_vec(),
            f: t.func(x),
            iterations: 0,
            f_count: 1,
            g_count: 0,
            h_count: 0,
            warning: None,
        },
    };

    let constraints = constraints.filter(|c| options.constraints && !c.is_empty());
    let Some(constraints) = constraints else {
        return Ok(run(target, x0));
    };
    if options.algorithm == Algorithm::Grid {
        return Ok(run(target, x0));
    }

    let mut x = constraints.make_feasible(x0)?;
    let mut total = MinResult {
        x: x.clone(),
        f: f64::INFINITY,
        iterations: 0,
        f_count: 0,
        g_count: 0,
        h_count: 0,
        warning: None,
    };

    let mut mu = 1.0;
    for round in 0..BARRIER_ROUNDS {
        let barrier = LogBarrier::new(target, constraints, mu);
        let res = run(&barrier, &x);
        trace!(round, mu, f = res.f, "Barrier round finished");
        total.absorb_counts(&res);
        total.warning = res.warning.clone();
        if constraints.is_strictly_feasible(&res.x) {
            x = res.x;
        }
        mu /= 10.0;
    }

    total.f = target.func(&x);
    total.f_count += 1;
    total.x = x;
    if !total.f.is_finite() {
        total.warning = Some(WARN_INFINITE.to_string());
    }
    Ok(total)
}

/// Map NaN onto +∞ so that comparisons stay total.
pub(crate) fn eval<T: TargetFunction + ?Sized>(target: &T, x: &[f64]) -> f64 {
    let f = target.func(x);
    if f.is_nan() { f64::INFINITY } else { f }
}
