//! Chi-squared statistic and its gradient.

/// `Σ((v - b)/e)²`.
pub fn chi2(values: &[f64], back_calc: &[f64], errors: &[f64]) -> f64 {
    values
        .iter()
        .zip(back_calc)
        .zip(errors)
        .map(|((v, b), e)| {
            let r = (v - b) / e;
            r * r
        })
        .sum()
}

/// Gradient of chi-squared.
///
/// `back_calc_grad[j][i]` is the partial derivative of the i-th back-calculated
/// value with respect to parameter j.
pub fn dchi2(
    values: &[f64],
    back_calc: &[f64],
    back_calc_grad: &[Vec<f64>],
    errors: &[f64],
    out: &mut [f64],
) {
    for (o, grad_j) in out.iter_mut().zip(back_calc_grad) {
        *o = values
            .iter()
            .zip(back_calc)
            .zip(errors)
            .zip(grad_j)
            .map(|(((v, b), e), g)| -2.0 * (v - b) / (e * e) * g)
            .sum();
    }
}
