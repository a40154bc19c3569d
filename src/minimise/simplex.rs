//! Nelder–Mead downhill simplex.

use super::{MinResult, TargetFunction, WARN_INFINITE, WARN_MAX_ITER, eval};

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

struct Simplex {
    vertices: Vec<Vec<f64>>,
    values: Vec<f64>,
}

impl Simplex {
    /// Sort vertices by function value, best first.
    fn order(&mut self) {
        let mut idx: Vec<usize> = (0..self.values.len()).collect();
        idx.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        self.vertices = idx.iter().map(|&i| self.vertices[i].clone()).collect();
        self.values = idx.iter().map(|&i| self.values[i]).collect();
    }

    fn collapsed(&self) -> bool {
        let best = &self.vertices[0];
        self.vertices[1..].iter().all(|v| {
            v.iter()
                .zip(best)
                .all(|(a, b)| (a - b).abs() <= 1e-15 * (1.0 + b.abs()))
        })
    }

    /// Centroid of every vertex except the worst.
    fn centroid(&self) -> Vec<f64> {
        let n = self.vertices.len() - 1;
        let mut c = vec![0.0; n];
        for v in &self.vertices[..n] {
            for (ci, vi) in c.iter_mut().zip(v) {
                *ci += vi / n as f64;
            }
        }
        c
    }
}

/// `c + coef·(p - c)`.
fn along(c: &[f64], p: &[f64], coef: f64) -> Vec<f64> {
    c.iter().zip(p).map(|(ci, pi)| ci + coef * (pi - ci)).collect()
}

/// Minimise `target` starting from `x0`.
///
/// The initial simplex steps each coordinate by 5 % of its value, or by
/// 0.00025 when the coordinate is zero.
pub fn simplex<T: TargetFunction + ?Sized>(
    target: &T,
    x0: &[f64],
    func_tol: f64,
    max_iterations: usize,
) -> MinResult {
    let n = x0.len();
    let mut f_count = 0;
    let mut f = |x: &[f64]| {
        f_count += 1;
        eval(target, x)
    };

    let mut vertices = vec![x0.to_vec()];
    for i in 0..n {
        let mut v = x0.to_vec();
        v[i] = if v[i] != 0.0 { v[i] * 1.05 } else { 0.00025 };
        vertices.push(v);
    }
    let values: Vec<f64> = vertices.iter().map(|v| f(v)).collect();
    let mut s = Simplex { vertices, values };

    let mut iterations = 0;
    let mut warning = None;
    loop {
        s.order();
        // No direction to follow when even the best vertex is infinite.
        if !s.values[0].is_finite() {
            break;
        }
        let spread = s.values[n] - s.values[0];
        if spread <= func_tol || s.collapsed() {
            break;
        }
        if iterations >= max_iterations {
            warning = Some(WARN_MAX_ITER.to_string());
            break;
        }
        iterations += 1;

        let c = s.centroid();
        let worst = s.vertices[n].clone();
        let xr = along(&c, &worst, -REFLECT);
        let fr = f(&xr);

        if fr < s.values[0] {
            let xe = along(&c, &xr, EXPAND);
            let fe = f(&xe);
            if fe < fr {
                s.vertices[n] = xe;
                s.values[n] = fe;
            } else {
                s.vertices[n] = xr;
                s.values[n] = fr;
            }
            continue;
        }

        if fr < s.values[n - 1] {
            s.vertices[n] = xr;
            s.values[n] = fr;
            continue;
        }

        // Outside contraction when the reflection improved on the worst
        // vertex, inside contraction otherwise.
        let (xc, fc, accept) = if fr < s.values[n] {
            let xc = along(&c, &xr, CONTRACT);
            let fc = f(&xc);
            (xc, fc, fc <= fr)
        } else {
            let xc = along(&c, &worst, CONTRACT);
            let fc = f(&xc);
            (xc, fc, fc < s.values[n])
        };
        if accept {
            s.vertices[n] = xc;
            s.values[n] = fc;
            continue;
        }

        let best = s.vertices[0].clone();
        for i in 1..=n {
            s.vertices[i] = along(&best, &s.vertices[i], SHRINK);
            s.values[i] = f(&s.vertices[i]);
        }
    }

    s.order();
    let f_best = s.values[0];
    if !f_best.is_finite() {
        warning = Some(WARN_INFINITE.to_string());
    }
    MinResult {
        x: s.vertices.swap_remove(0),
        f: f_best,
        iterations,
        f_count,
        g_count: 0,
        h_count: 0,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimise::test_functions::{Quadratic, Rosenbrock};

    #[test]
    fn rosenbrock_from_the_classic_start() {
        let res = simplex(&Rosenbrock, &[-1.2, 1.0], 1e-25, 10_000);
        assert!((res.x[0] - 1.0).abs() < 1e-4, "{:?}", res.x);
        assert!((res.x[1] - 1.0).abs() < 1e-4, "{:?}", res.x);
        assert!(res.warning.is_none());
        assert!(res.f_count > res.iterations);
    }

    #[test]
    fn zero_start_uses_absolute_step() {
        let res = simplex(&Quadratic, &[0.0, 0.0], 1e-25, 10_000);
        assert!((res.x[0] - 3.0).abs() < 1e-6);
        assert!((res.x[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn iteration_limit_sets_warning() {
        let res = simplex(&Rosenbrock, &[-1.2, 1.0], 1e-25, 5);
        assert_eq!(res.iterations, 5);
        assert_eq!(res.warning.as_deref(), Some(WARN_MAX_ITER));
    }

    #[test]
    fn infinite_everywhere_stops_at_once() {
        struct Wall;
        impl TargetFunction for Wall {
            fn func(&self, _: &[f64]) -> f64 {
                f64::INFINITY
            }
        }
        let res = simplex(&Wall, &[1.0, 2.0], 1e-25, 10_000);
        assert_eq!(res.iterations, 0);
        assert_eq!(res.f_count, 3);
        assert_eq!(res.warning.as_deref(), Some(WARN_INFINITE));
    }
}
