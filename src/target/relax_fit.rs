use crate::domain::CurveType;
use crate::error::{RelaxError, Result};
use crate::math::{chi2, dchi2};
use crate::minimise::TargetFunction;
use crate::models::exponential;

/// Exponential curve target for one spin.
#[derive(Debug, Clone)]
pub struct RelaxFitTarget {
    curve: CurveType,
    times: Vec<f64>,
    values: Vec<f64>,
    errors: Vec<f64>,
    scaling: Vec<f64>,
}

impl RelaxFitTarget {
    pub fn new(
        curve: CurveType,
        times: Vec<f64>,
        values: Vec<f64>,
        errors: Vec<f64>,
        scaling: Vec<f64>,
    ) -> Result<Self> {
        if values.len() != times.len() {
            return Err(RelaxError::LengthMismatch {
                what: "intensities",
                expected: times.len(),
                found: values.len(),
            });
        }
        if errors.len() != times.len() {
            return Err(RelaxError::LengthMismatch {
                what: "intensity errors",
                expected: times.len(),
                found: errors.len(),
            });
        }
        let n_params = curve.params().len();
        if scaling.len() != n_params {
            return Err(RelaxError::LengthMismatch {
                what: "parameter scaling",
                expected: n_params,
                found: scaling.len(),
            });
        }
        if let Some(e) = errors.iter().find(|e| !(e.is_finite() && **e > 0.0)) {
            return Err(RelaxError::MissingData(format!(
                "intensity errors must be positive, found {e}"
            )));
        }
        Ok(Self {
            curve,
            times,
            values,
            errors,
            scaling,
        })
    }

    pub fn num_points(&self) -> usize {
        self.times.len()
    }

    pub fn scaling(&self) -> &[f64] {
        &self.scaling
    }

    fn unscale(&self, x: &[f64]) -> Vec<f64> {
        x.iter().zip(&self.scaling).map(|(v, s)| v * s).collect()
    }

    /// Intensities at each relaxation time for the scaled parameter vector.
    pub fn back_calc(&self, x: &[f64]) -> Vec<f64> {
        let params = self.unscale(x);
        let mut out = vec![0.0; self.times.len()];
        exponential::back_calc(self.curve, &params, &self.times, &mut out);
        out
    }
}

impl TargetFunction for RelaxFitTarget {
    fn func(&self, x: &[f64]) -> f64 {
        chi2(&self.values, &self.back_calc(x), &self.errors)
    }

    fn dfunc(&self, x: &[f64], grad: &mut [f64]) {
        let params = self.unscale(x);
        let back_calc = self.back_calc(x);

        let n_params = params.len();
        let mut per_param = vec![vec![0.0; self.times.len()]; n_params];
        let mut point = vec![0.0; n_params];
        for (i, &t) in self.times.iter().enumerate() {
            exponential::gradient(self.curve, &params, t, &mut point);
            for (j, g) in point.iter().enumerate() {
                // Chain rule through the parameter scaling.
                per_param[j][i] = g * self.scaling[j];
            }
        }
        dchi2(&self.values, &back_calc, &per_param, &self.errors, grad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimise::numeric_gradient;

    fn target() -> RelaxFitTarget {
        let times: Vec<f64> = vec![0.0, 0.1, 0.2, 0.4];
        let values: Vec<f64> = times.iter().map(|t| 1000.0 * (-5.0 * t).exp()).collect();
        RelaxFitTarget::new(CurveType::Exp, times, values, vec![10.0; 4], vec![1.0, 1000.0]).unwrap()
    }

    #[test]
    fn chi2_is_zero_at_the_true_parameters() {
        assert!(target().func(&[5.0, 1.0]).abs() < 1e-18);
        assert!(target().func(&[4.0, 1.0]) > 1.0);
    }

    #[test]
    fn analytic_gradient_matches_numeric() {
        let t = target();
        let x = [4.0, 0.9];
        let mut analytic = [0.0; 2];
        let mut numeric = [0.0; 2];
        t.dfunc(&x, &mut analytic);
        numeric_gradient(|p| t.func(p), &x, &mut numeric);
        for (a, n) in analytic.iter().zip(&numeric) {
            assert!((a - n).abs() < 1e-4 * a.abs().max(1.0), "{a} vs {n}");
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = RelaxFitTarget::new(CurveType::Inv, vec![0.0], vec![1.0], vec![1.0], vec![1.0, 1.0]);
        assert!(matches!(err, Err(RelaxError::LengthMismatch { .. })));
        let err = RelaxFitTarget::new(CurveType::Exp, vec![0.0], vec![1.0], vec![0.0], vec![1.0, 1.0]);
        assert!(matches!(err, Err(RelaxError::MissingData(_))));
    }
}
