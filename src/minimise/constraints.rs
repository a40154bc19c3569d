//! Linear inequality constraints `A·x ≥ b`.

use crate::error::{RelaxError, Result};

use super::TargetFunction;

/// Rows of `A·x ≥ b`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearConstraints {
    dim: usize,
    a: Vec<Vec<f64>>,
    b: Vec<f64>,
}

impl LinearConstraints {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            a: Vec::new(),
            b: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    pub fn push(&mut self, row: Vec<f64>, b: f64) -> Result<()> {
        if row.len() != self.dim {
            return Err(RelaxError::LengthMismatch {
                what: "constraint row",
                expected: self.dim,
                found: row.len(),
            });
        }
        self.a.push(row);
        self.b.push(b);
        Ok(())
    }

    /// `x[index] ≥ value`.
    pub fn push_lower(&mut self, index: usize, value: f64) {
        let mut row = vec![0.0; self.dim];
        row[index] = 1.0;
        self.a.push(row);
        self.b.push(value);
    }

    /// `x[index] ≤ value`, stored as `-x[index] ≥ -value`.
    pub fn push_upper(&mut self, index: usize, value: f64) {
        let mut row = vec![0.0; self.dim];
        row[index] = -1.0;
        self.a.push(row);
        self.b.push(-value);
    }

    pub fn rows(&self) -> impl Iterator<Item = (&[f64], f64)> {
        self.a.iter().map(Vec::as_slice).zip(self.b.iter().copied())
    }

    /// `A·x - b` for each row.
    pub fn slack(&self, x: &[f64]) -> Vec<f64> {
        self.rows()
            .map(|(row, b)| row.iter().zip(x).map(|(a, xi)| a * xi).sum::<f64>() - b)
            .collect()
    }

    /// Feasibility with a small tolerance for points on the boundary.
    pub fn is_satisfied(&self, x: &[f64]) -> bool {
        self.rows().zip(self.slack(x)).all(|((_, b), s)| s >= -1e-12 * b.abs().max(1.0))
    }

    pub fn is_strictly_feasible(&self, x: &[f64]) -> bool {
        self.slack(x).iter().all(|s| *s > 0.0)
    }

    /// Move `x` into the interior of the feasible region.
    ///
    /// Only rows acting on a single variable can be repaired. Any other
    /// violated row is an error.
    pub fn make_feasible(&self, x: &[f64]) -> Result<Vec<f64>> {
        let mut out = x.to_vec();
        for (i, (row, b)) in self.rows().enumerate() {
            let s: f64 = row.iter().zip(&out).map(|(a, xi)| a * xi).sum::<f64>() - b;
            if s > 0.0 {
                continue;
            }

            let mut nonzero = row.iter().enumerate().filter(|(_, a)| **a != 0.0);
            let (Some((j, &a)), None) = (nonzero.next(), nonzero.next()) else {
                return Err(RelaxError::Optimisation(format!(
                    "the starting point violates constraint row {i}, which cannot be repaired"
                )));
            };
            let margin = 1e-6 * b.abs().max(1.0);
            out[j] = (b + margin) / a;
        }

        if !self.is_strictly_feasible(&out) {
            return Err(RelaxError::Optimisation(
                "no strictly feasible starting point could be found".to_string(),
            ));
        }
        Ok(out)
    }
}

/// `f(x) - μ·Σ ln(A·x - b)`, and `+∞` outside the feasible region.
pub struct LogBarrier<'a, T> {
    target: &'a T,
    constraints: &'a LinearConstraints,
    mu: f64,
}

impl<'a, T: TargetFunction> LogBarrier<'a, T> {
    pub fn new(target: &'a T, constraints: &'a LinearConstraints, mu: f64) -> Self {
        Self {
            target,
            constraints,
            mu,
        }
    }
}

impl<T: TargetFunction> TargetFunction for LogBarrier<'_, T> {
    fn func(&self, x: &[f64]) -> f64 {
        let mut penalty = 0.0;
        for s in self.constraints.slack(x) {
            if s <= 0.0 {
                return f64::INFINITY;
            }
            penalty -= s.ln();
        }
        self.target.func(x) + self.mu * penalty
    }

    fn dfunc(&self, x: &[f64], grad: &mut [f64]) {
        self.target.dfunc(x, grad);
        for ((row, _), s) in self.constraints.rows().zip(self.constraints.slack(x)) {
            if s <= 0.0 {
                grad.fill(f64::INFINITY);
                return;
            }
            for (g, a) in grad.iter_mut().zip(row) {
                *g -= self.mu * a / s;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_and_slack() {
        let mut c = LinearConstraints::new(2);
        c.push_lower(0, 0.5);
        c.push_upper(0, 1.0);
        c.push_lower(1, 0.0);
        assert_eq!(c.len(), 3);
        assert_eq!(c.slack(&[0.75, 2.0]), vec![0.25, 0.25, 2.0]);
        assert!(c.is_satisfied(&[1.0, 0.0]));
        assert!(!c.is_strictly_feasible(&[1.0, 0.0]));
        assert!(!c.is_satisfied(&[1.1, 0.0]));
    }

    #[test]
    fn infeasible_start_is_nudged_inside() {
        let mut c = LinearConstraints::new(2);
        c.push_lower(0, 0.5);
        c.push_upper(0, 1.0);
        c.push_lower(1, 0.0);
        let x = c.make_feasible(&[1.0, -3.0]).unwrap();
        assert!(c.is_strictly_feasible(&x));
        assert!(x[0] < 1.0 && x[0] > 0.999);
        assert!(x[1] > 0.0 && x[1] < 1e-3);
    }

    #[test]
    fn coupled_rows_cannot_be_repaired() {
        let mut c = LinearConstraints::new(2);
        c.push(vec![1.0, 1.0], 1.0).unwrap();
        assert!(c.make_feasible(&[0.0, 0.0]).is_err());
        assert!(c.push(vec![1.0], 0.0).is_err());
    }

    #[test]
    fn barrier_is_infinite_outside() {
        struct Zero;
        impl TargetFunction for Zero {
            fn func(&self, _: &[f64]) -> f64 {
                0.0
            }
        }
        let mut c = LinearConstraints::new(1);
        c.push_lower(0, 0.0);
        let barrier = LogBarrier::new(&Zero, &c, 1.0);
        assert_eq!(barrier.func(&[-1.0]), f64::INFINITY);
        assert!((barrier.func(&[1.0])).abs() < 1e-12);
        let mut g = [0.0];
        barrier.dfunc(&[2.0], &mut g);
        assert!((g[0] + 0.5).abs() < 1e-6);
    }
}
