//! Exhaustive grid search.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{RelaxError, Result};

use super::{LinearConstraints, MinResult, TargetFunction, WARN_INFINITE, eval};

/// Largest number of grid points accepted.
pub const MAX_GRID_POINTS: f64 = 1e8;

/// One grid dimension: `inc` points spread evenly over `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridAxis {
    pub inc: usize,
    pub lower: f64,
    pub upper: f64,
}

impl GridAxis {
    pub fn new(inc: usize, lower: f64, upper: f64) -> Self {
        Self { inc, lower, upper }
    }

    /// Coordinate of point `k`. A single point sits on the lower bound.
    pub fn value(&self, k: usize) -> f64 {
        if self.inc <= 1 {
            self.lower
        } else {
            self.lower + k as f64 * (self.upper - self.lower) / (self.inc - 1) as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    idx: usize,
    f: f64,
}

fn better(a: Option<Candidate>, b: Option<Candidate>) -> Option<Candidate> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if b.f < a.f || (b.f == a.f && b.idx < a.idx) {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, None) => a,
        (None, b) => b,
    }
}

fn decode(mut idx: usize, axes: &[GridAxis], out: &mut [f64]) {
    // The first parameter varies fastest.
    for (axis, x) in axes.iter().zip(out.iter_mut()) {
        *x = axis.value(idx % axis.inc);
        idx /= axis.inc;
    }
}

/// Evaluate every grid point and return the lowest.
///
/// Points violating the constraints are skipped. Ties go to the lowest grid
/// index so that the result does not depend on thread scheduling.
pub fn grid_search<T: TargetFunction>(
    target: &T,
    axes: &[GridAxis],
    constraints: Option<&LinearConstraints>,
) -> Result<MinResult> {
    if axes.is_empty() {
        return Err(RelaxError::Optimisation(
            "the grid search has no dimensions".to_string(),
        ));
    }
    if let Some(axis) = axes.iter().find(|a| a.inc == 0) {
        return Err(RelaxError::Argument(format!(
            "grid increments must be at least 1 (bounds [{}, {}])",
            axis.lower, axis.upper
        )));
    }

    let total_f: f64 = axes.iter().map(|a| a.inc as f64).product();
    if total_f > MAX_GRID_POINTS {
        return Err(RelaxError::Argument(format!(
            "a grid search of {total_f:e} points is too large (the limit is {MAX_GRID_POINTS:e})"
        )));
    }
    let total = axes.iter().map(|a| a.inc).product::<usize>();

    let (best, f_count) = (0..total)
        .into_par_iter()
        .filter_map(|idx| {
            let mut x = vec![0.0; axes.len()];
            decode(idx, axes, &mut x);
            if constraints.is_some_and(|c| !c.is_satisfied(&x)) {
                return None;
            }
            Some(Candidate {
                idx,
                f: eval(target, &x),
            })
        })
        .map(|c| (Some(c), 1usize))
        .reduce(|| (None, 0), |(a, na), (b, nb)| (better(a, b), na + nb));

    let Some(best) = best else {
        return Err(RelaxError::Optimisation(
            "every grid point violates the parameter constraints".to_string(),
        ));
    };

    let mut x = vec![0.0; axes.len()];
    decode(best.idx, axes, &mut x);
    Ok(MinResult {
        x,
        f: best.f,
        iterations: f_count,
        f_count,
        g_count: 0,
        h_count: 0,
        warning: (!best.f.is_finite()).then(|| WARN_INFINITE.to_string()),
    })
}
