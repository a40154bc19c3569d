//! Analytic 2-site exchange models for CPMG dispersion.
//!
//! All rates are in rad/s, `dw` in rad/s, and `cpmg_frqs` in Hz. Each function
//! fills `back_calc` with one R2eff value per CPMG frequency.

use super::exponential::sanitise;

/// Luz and Meiboom (1963) fast exchange.
pub fn r2eff_lm63(r20: f64, phi_ex: f64, kex: f64, cpmg_frqs: &[f64], back_calc: &mut [f64]) {
    if phi_ex == 0.0 || kex == 0.0 {
        back_calc.fill(r20);
        return;
    }

    let rex = phi_ex / kex;
    for (out, &nu) in back_calc.iter_mut().zip(cpmg_frqs) {
        *out = if nu > 0.0 {
            let x = 4.0 * nu / kex;
            r20 + rex * (1.0 - x * (kex / (4.0 * nu)).tanh())
        } else {
            r20 + rex
        };
    }
    sanitise(back_calc);
}

/// Carver and Richards (1972), valid on all exchange time scales.
///
/// With `r20a == r20b` this is the simplified `CR72` model, otherwise the
/// `CR72 full` model.
pub fn r2eff_cr72(
    r20a: f64,
    r20b: f64,
    pa: f64,
    dw: f64,
    kex: f64,
    cpmg_frqs: &[f64],
    back_calc: &mut [f64],
) {
    // No exchange.
    if dw == 0.0 || pa == 1.0 || kex == 0.0 {
        back_calc.fill(r20a);
        return;
    }

    let pb = 1.0 - pa;
    let k_ba = pa * kex;
    let k_ab = pb * kex;
    let dw2 = dw * dw;
    let r20_kex = (r20a + r20b + kex) / 2.0;

    let fact = r20a - r20b - k_ba + k_ab;
    let psi = fact * fact - dw2 + 4.0 * pa * pb * kex * kex;
    let zeta = 2.0 * dw * fact;
    let sqrt_psi2_zeta2 = (psi * psi + zeta * zeta).sqrt();

    let d_part = (psi + 2.0 * dw2) / sqrt_psi2_zeta2;
    let d_pos = 0.5 * (1.0 + d_part);
    let d_neg = 0.5 * (-1.0 + d_part);

    let eta_scale = 2.0f64.powf(-1.5);
    let eta_pos_part = eta_scale * (psi + sqrt_psi2_zeta2).max(0.0).sqrt();
    let eta_neg_part = eta_scale * (-psi + sqrt_psi2_zeta2).max(0.0).sqrt();

    for (out, &nu) in back_calc.iter_mut().zip(cpmg_frqs) {
        let eta_pos = eta_pos_part / nu;
        let eta_neg = eta_neg_part / nu;
        let arg = (d_pos * eta_pos.cosh() - d_neg * eta_neg.cos()).max(1.0);
        *out = r20_kex - nu * arg.acosh();
    }
    sanitise(back_calc);
}

/// Ishima and Torchia (1999), 2-site exchange with skewed populations.
pub fn r2eff_it99(r20: f64, pa: f64, dw: f64, tex: f64, cpmg_frqs: &[f64], back_calc: &mut [f64]) {
    if dw == 0.0 || pa == 1.0 || tex == 0.0 {
        back_calc.fill(r20);
        return;
    }

    let pb = 1.0 - pa;
    let dw2 = dw * dw;
    let pa2dw4 = pa * pa * dw2 * dw2;
    let numer = pa * pb * dw2 * tex;
    let tex2 = tex * tex;

    for (out, &nu) in back_calc.iter_mut().zip(cpmg_frqs) {
        let tcp = 1.0 / (4.0 * nu);
        let denom = 1.0 + tex2 * (pa2dw4 + 144.0 / tcp.powi(4)).sqrt();
        *out = r20 + numer / denom;
    }
    sanitise(back_calc);
}

/// Tollinger, Skrynnikov, Mulder, Forman-Kay and Kay (2001), slow exchange.
pub fn r2eff_tsmfk01(r20a: f64, dw: f64, k_ab: f64, cpmg_frqs: &[f64], back_calc: &mut [f64]) {
    if dw == 0.0 || k_ab == 0.0 {
        back_calc.fill(r20a);
        return;
    }

    for (out, &nu) in back_calc.iter_mut().zip(cpmg_frqs) {
        let tcp = 1.0 / (4.0 * nu);
        let x = dw * tcp;
        let sinc = if x.abs() < 1e-12 { 1.0 } else { x.sin() / x };
        *out = r20a + k_ab - k_ab * sinc;
    }
    sanitise(back_calc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Isotope, frequency_to_rad_per_s};

    const NCYC: [f64; 7] = [2.0, 4.0, 8.0, 10.0, 20.0, 40.0, 500.0];

    fn cpmg_frqs() -> Vec<f64> {
        NCYC.iter().map(|n| n / 0.04).collect()
    }

    /// 2 ppm of 15N at a 200 MHz spectrometer, in rad/s.
    fn dw_rad() -> f64 {
        2.0 * frequency_to_rad_per_s(200e6, Isotope::N15)
    }

    #[test]
    fn cr72_no_exchange_cases_return_r20a() {
        let frqs = cpmg_frqs();
        let mut out = vec![0.0; frqs.len()];
        for (pa, dw, kex) in [(0.95, 0.0, 1000.0), (1.0, dw_rad(), 1000.0), (0.95, dw_rad(), 0.0)] {
            r2eff_cr72(2.0, 4.0, pa, dw, kex, &frqs, &mut out);
            assert!(out.iter().all(|&v| (v - 2.0).abs() < 1e-12), "{pa} {dw} {kex}: {out:?}");
        }
    }

    #[test]
    fn cr72_approaches_lm63_in_fast_exchange() {
        let frqs = [100.0, 250.0, 500.0, 1000.0];
        let (r20, pa, dw, kex) = (10.0, 0.9, 200.0, 5000.0);
        let phi_ex = pa * (1.0 - pa) * dw * dw;

        let mut cr = [0.0; 4];
        let mut lm = [0.0; 4];
        r2eff_cr72(r20, r20, pa, dw, kex, &frqs, &mut cr);
        r2eff_lm63(r20, phi_ex, kex, &frqs, &mut lm);
        for (a, b) in cr.iter().zip(&lm) {
            assert!((a - b).abs() < 0.01, "cr72={a} lm63={b}");
        }
    }

    #[test]
    fn cr72_dispersion_decreases_with_frequency() {
        let frqs = cpmg_frqs();
        let mut out = vec![0.0; frqs.len()];
        r2eff_cr72(2.0, 2.0, 0.95, dw_rad(), 1000.0, &frqs, &mut out);
        for w in out.windows(2) {
            assert!(w[0] >= w[1] - 1e-9);
        }
        assert!(out[0] > out[6]);
        assert!(out[6] > 2.0);
    }

    #[test]
    fn lm63_limits() {
        let mut out = [0.0; 2];
        r2eff_lm63(5.0, 0.0, 1000.0, &[100.0, 200.0], &mut out);
        assert_eq!(out, [5.0, 5.0]);

        // Slow pulsing gives the full exchange contribution.
        r2eff_lm63(5.0, 4000.0, 1000.0, &[1e-3, 1e9], &mut out);
        assert!((out[0] - 9.0).abs() < 1e-4);
        assert!((out[1] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn it99_no_exchange_and_positive_rex() {
        let frqs = cpmg_frqs();
        let mut out = vec![0.0; frqs.len()];
        r2eff_it99(2.0, 1.0, dw_rad(), 1e-3, &frqs, &mut out);
        assert!(out.iter().all(|&v| v == 2.0));

        r2eff_it99(2.0, 0.95, dw_rad(), 1e-3, &frqs, &mut out);
        assert!(out.iter().all(|&v| v > 2.0));
        assert!(out[0] > out[6]);
    }

    #[test]
    fn tsmfk01_no_exchange_cases_return_r20a() {
        let frqs = cpmg_frqs();
        let mut out = vec![0.0; frqs.len()];
        r2eff_tsmfk01(2.0, 0.0, 50.0, &frqs, &mut out);
        assert!(out.iter().all(|&v| v == 2.0));
        r2eff_tsmfk01(2.0, dw_rad(), 0.0, &frqs, &mut out);
        assert!(out.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn tsmfk01_high_frequency_limit() {
        // At very fast pulsing sin(x)/x -> 1 and the exchange term vanishes.
        let mut out = [0.0];
        r2eff_tsmfk01(2.0, dw_rad(), 50.0, &[1e9], &mut out);
        assert!((out[0] - 2.0).abs() < 1e-6);
    }
}
