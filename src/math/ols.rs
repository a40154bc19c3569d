//! Least squares solver.
//!
//! Used to obtain starting values for exponential curve fits from the
//! log-linearised problem:
//!
//! ```text
//! ln I(t) = ln I0 - Rx·t
//! ```
//!
//! Implementation choices:
//! - SVD handles the tall design matrix (more time points than columns).
//!   Nalgebra's `QR::solve` is meant for square systems.
//! - Non-positive intensities cannot be log-transformed and are dropped.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Estimate `(Rx, I0)` of a decaying exponential from a log-linear fit.
///
/// Needs at least two distinct times with positive intensities.
pub fn exponential_estimate(times: &[f64], intensities: &[f64]) -> Option<(f64, f64)> {
    let points: Vec<(f64, f64)> = times
        .iter()
        .zip(intensities)
        .filter(|(t, i)| t.is_finite() && i.is_finite() && **i > 0.0)
        .map(|(&t, &i)| (t, i.ln()))
        .collect();

    let first = points.first()?.0;
    if points.len() < 2 || points.iter().all(|(t, _)| *t == first) {
        return None;
    }

    let mut x = DMatrix::zeros(points.len(), 2);
    let mut y = DVector::zeros(points.len());
    for (row, (t, ln_i)) in points.iter().enumerate() {
        x[(row, 0)] = 1.0;
        x[(row, 1)] = -t;
        y[row] = *ln_i;
    }

    let beta = solve_least_squares(&x, &y)?;
    Some((beta[1], beta[0].exp()))
}
