//! Exponential relaxation curves.
//!
//! The fitter relies on two primitive operations:
//! - back-calculate the peak intensity at each relaxation delay
//! - the partial derivatives of that intensity (for gradient optimisers)

use crate::domain::CurveType;

/// Back-calculate intensities for the given curve type.
///
/// `params` is `[Rx, I0]` for `exp` and `[Rx, I0, Iinf]` for `inv`.
pub fn back_calc(curve: CurveType, params: &[f64], times: &[f64], out: &mut [f64]) {
    let rx = params[0];
    let i0 = params[1];
    match curve {
        CurveType::Exp => {
            for (o, &t) in out.iter_mut().zip(times) {
                *o = i0 * (-rx * t).exp();
            }
        }
        CurveType::Inv => {
            let iinf = params[2];
            for (o, &t) in out.iter_mut().zip(times) {
                *o = iinf - (iinf - i0) * (-rx * t).exp();
            }
        }
    }
    sanitise(out);
}

/// Partial derivatives of the intensity at time `t`, in parameter order.
pub fn gradient(curve: CurveType, params: &[f64], t: f64, out: &mut [f64]) {
    let rx = params[0];
    let i0 = params[1];
    let e = (-rx * t).exp();
    match curve {
        CurveType::Exp => {
            out[0] = -t * i0 * e;
            out[1] = e;
        }
        CurveType::Inv => {
            let iinf = params[2];
            out[0] = t * (iinf - i0) * e;
            out[1] = e;
            out[2] = 1.0 - e;
        }
    }
}

/// Replace non-finite values so that chi-squared stays ordered.
pub fn sanitise(values: &mut [f64]) {
    for v in values.iter_mut() {
        if !v.is_finite() {
            *v = 1e100;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_decay_values() {
        let times = [0.0, 0.5, 1.0];
        let mut out = [0.0; 3];
        back_calc(CurveType::Exp, &[2.0, 1000.0], &times, &mut out);
        assert!((out[0] - 1000.0).abs() < 1e-9);
        assert!((out[1] - 1000.0 * (-1.0f64).exp()).abs() < 1e-9);
        assert!((out[2] - 1000.0 * (-2.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn inversion_recovery_limits() {
        let times = [0.0, 100.0];
        let mut out = [0.0; 2];
        back_calc(CurveType::Inv, &[1.5, -800.0, 1000.0], &times, &mut out);
        assert!((out[0] + 800.0).abs() < 1e-9);
        assert!((out[1] - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let params = [1.3, 500.0, 900.0];
        let t = 0.7;
        let mut g = [0.0; 3];
        gradient(CurveType::Inv, &params, t, &mut g);

        for i in 0..3 {
            let h = 1e-6 * params[i].abs().max(1.0);
            let mut p1 = params;
            let mut p2 = params;
            p1[i] += h;
            p2[i] -= h;
            let (mut a, mut b) = ([0.0], [0.0]);
            back_calc(CurveType::Inv, &p1, &[t], &mut a);
            back_calc(CurveType::Inv, &p2, &[t], &mut b);
            let fd = (a[0] - b[0]) / (2.0 * h);
            assert!((fd - g[i]).abs() < 1e-4 * fd.abs().max(1.0), "param {i}: {fd} vs {}", g[i]);
        }
    }

    #[test]
    fn overflow_is_sanitised() {
        let mut out = [0.0];
        back_calc(CurveType::Exp, &[-1e4, 1.0], &[10.0], &mut out);
        assert_eq!(out[0], 1e100);
    }
}
