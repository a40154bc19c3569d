//! Polak–Ribière+ nonlinear conjugate gradient.
//!
//! Nocedal and Wright, *Numerical Optimization* (1999), algorithms 3.5, 3.6
//! and 5.4.

use super::{MinResult, TargetFunction, WARN_INFINITE, WARN_MAX_ITER, eval};

/// Sufficient decrease constant.
const MU: f64 = 1e-4;
/// Curvature constant.
const ETA: f64 = 0.1;
/// Initial step length.
const A0: f64 = 1.0;
const MAX_BRACKET: usize = 30;
const MAX_ZOOM: usize = 50;

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

struct Counter<'a, T: ?Sized> {
    target: &'a T,
    f_count: usize,
    g_count: usize,
}

impl<T: TargetFunction + ?Sized> Counter<'_, T> {
    fn f(&mut self, x: &[f64]) -> f64 {
        self.f_count += 1;
        eval(self.target, x)
    }

    fn g(&mut self, x: &[f64]) -> Vec<f64> {
        self.g_count += 1;
        let mut grad = vec![0.0; x.len()];
        self.target.dfunc(x, &mut grad);
        grad
    }
}

struct LinePoint {
    f: f64,
    x: Vec<f64>,
    g: Vec<f64>,
}

fn step(x: &[f64], p: &[f64], a: f64) -> Vec<f64> {
    x.iter().zip(p).map(|(xi, pi)| xi + a * pi).collect()
}

/// Line search satisfying the strong Wolfe conditions.
///
/// Returns `None` when `p` is not a descent direction or no acceptable step
/// was found.
fn line_search<T: TargetFunction + ?Sized>(
    c: &mut Counter<'_, T>,
    x: &[f64],
    f0: f64,
    g0: &[f64],
    p: &[f64],
) -> Option<LinePoint> {
    let d0 = dot(g0, p);
    if d0.is_nan() || d0 >= 0.0 {
        return None;
    }

    let mut a_prev = 0.0;
    let mut f_prev = f0;
    let mut d_prev = d0;
    let mut a = A0;

    for i in 0..MAX_BRACKET {
        let xa = step(x, p, a);
        let fa = c.f(&xa);
        if fa > f0 + MU * a * d0 || (i > 0 && fa >= f_prev) {
            return zoom(c, x, f0, d0, p, (a_prev, f_prev, d_prev), (a, fa));
        }

        let ga = c.g(&xa);
        let da = dot(&ga, p);
        if da.abs() <= -ETA * d0 {
            return Some(LinePoint { f: fa, x: xa, g: ga });
        }
        if da >= 0.0 {
            return zoom(c, x, f0, d0, p, (a, fa, da), (a_prev, f_prev));
        }

        a_prev = a;
        f_prev = fa;
        d_prev = da;
        a *= 2.0;
    }
    None
}

/// Shrink the bracket `[lo, hi]` until a strong Wolfe point is found.
///
/// `lo` always holds the lowest function value found so far satisfying
/// sufficient decrease.
fn zoom<T: TargetFunction + ?Sized>(
    c: &mut Counter<'_, T>,
    x: &[f64],
    f0: f64,
    d0: f64,
    p: &[f64],
    lo: (f64, f64, f64),
    hi: (f64, f64),
) -> Option<LinePoint> {
    let (mut a_lo, mut f_lo, mut d_lo) = lo;
    let (mut a_hi, mut f_hi) = hi;

    for _ in 0..MAX_ZOOM {
        // Quadratic interpolation, safeguarded into the middle of the bracket.
        let width = a_hi - a_lo;
        let denom = 2.0 * (f_hi - f_lo - d_lo * width);
        let mut a = if denom.is_finite() && denom > 0.0 {
            a_lo - d_lo * width * width / denom
        } else {
            a_lo + 0.5 * width
        };
        let (min, max) = if a_lo < a_hi { (a_lo, a_hi) } else { (a_hi, a_lo) };
        let guard = 0.1 * (max - min);
        if a.is_nan() || a <= min + guard || a >= max - guard {
            a = a_lo + 0.5 * width;
        }
        if (max - min) <= f64::EPSILON * max.abs().max(1.0) {
            return None;
        }

        let xa = step(x, p, a);
        let fa = c.f(&xa);
        if fa > f0 + MU * a * d0 || fa >= f_lo {
            a_hi = a;
            f_hi = fa;
            continue;
        }

        let ga = c.g(&xa);
        let da = dot(&ga, p);
        if da.abs() <= -ETA * d0 {
            return Some(LinePoint { f: fa, x: xa, g: ga });
        }
        if da * (a_hi - a_lo) >= 0.0 {
            a_hi = a_lo;
            f_hi = f_lo;
        }
        a_lo = a;
        f_lo = fa;
        d_lo = da;
    }
    None
}

/// Minimise `target` from `x0`.
///
/// Stops when the function change falls to `func_tol`, when the gradient
/// norm falls to `grad_tol`, or when the line search can make no progress
/// along the steepest descent direction.
pub fn polak_ribiere_plus<T: TargetFunction + ?Sized>(
    target: &T,
    x0: &[f64],
    func_tol: f64,
    grad_tol: Option<f64>,
    max_iterations: usize,
) -> MinResult {
    let mut c = Counter {
        target,
        f_count: 0,
        g_count: 0,
    };

    let mut x = x0.to_vec();
    let mut f = c.f(&x);
    let mut g = c.g(&x);
    let mut p: Vec<f64> = g.iter().map(|v| -v).collect();
    let mut steepest = true;

    let mut iterations = 0;
    let mut warning = None;

    while f.is_finite() {
        if grad_tol.is_some_and(|tol| dot(&g, &g).sqrt() <= tol) {
            break;
        }
        if iterations >= max_iterations {
            warning = Some(WARN_MAX_ITER.to_string());
            break;
        }
        iterations += 1;

        let Some(next) = line_search(&mut c, &x, f, &g, &p) else {
            if steepest {
                break;
            }
            // Restart along the steepest descent direction.
            p = g.iter().map(|v| -v).collect();
            steepest = true;
            continue;
        };

        let converged = (f - next.f).abs() <= func_tol;
        let gg = dot(&g, &g);
        let beta = if gg > 0.0 {
            let diff: Vec<f64> = next.g.iter().zip(&g).map(|(a, b)| a - b).collect();
            (dot(&next.g, &diff) / gg).max(0.0)
        } else {
            0.0
        };

        x = next.x;
        f = next.f;
        g = next.g;
        if converged {
            break;
        }

        p = p.iter().zip(&g).map(|(pi, gi)| -gi + beta * pi).collect();
        steepest = beta == 0.0;
        if dot(&g, &p) >= 0.0 {
            p = g.iter().map(|v| -v).collect();
            steepest = true;
        }
    }

    if !f.is_finite() {
        warning = Some(WARN_INFINITE.to_string());
    }
    MinResult {
        x,
        f,
        iterations,
        f_count: c.f_count,
        g_count: c.g_count,
        h_count: 0,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimise::test_functions::{Quadratic, Rosenbrock};

    #[test]
    fn quadratic_converges_quickly() {
        let res = polak_ribiere_plus(&Quadratic, &[0.0, 0.0], 1e-25, None, 1000);
        assert!((res.x[0] - 3.0).abs() < 1e-6, "{:?}", res.x);
        assert!((res.x[1] + 1.0).abs() < 1e-6, "{:?}", res.x);
        assert!(res.g_count > 0);
    }

    #[test]
    fn rosenbrock_with_numeric_gradient() {
        let res = polak_ribiere_plus(&Rosenbrock, &[-1.2, 1.0], 1e-25, None, 10_000);
        assert!((res.x[0] - 1.0).abs() < 1e-3, "{:?}", res.x);
        assert!((res.x[1] - 1.0).abs() < 1e-3, "{:?}", res.x);
    }

    #[test]
    fn gradient_tolerance_stops_at_start() {
        let res = polak_ribiere_plus(&Quadratic, &[3.0, -1.0], 1e-25, Some(1e-8), 1000);
        assert_eq!(res.iterations, 0);
        assert_eq!(res.x, vec![3.0, -1.0]);
    }

    #[test]
    fn infinite_start_is_flagged() {
        struct Wall;
        impl TargetFunction for Wall {
            fn func(&self, _: &[f64]) -> f64 {
                f64::INFINITY
            }
        }
        let res = polak_ribiere_plus(&Wall, &[1.0], 1e-25, None, 10);
        assert_eq!(res.warning.as_deref(), Some(WARN_INFINITE));
    }
}
