//! 2-site exchange models for R1rho dispersion.
//!
//! Spin-lock fields and offsets are in rad/s. `offsets` holds the resonance
//! offset Ω of the spin from the spin-lock carrier at each dispersion point.

use nalgebra::{Matrix6, Vector6};

use super::exponential::sanitise;

/// Meiboom (1961) fast exchange.
pub fn r1rho_m61(
    r1rho_prime: f64,
    phi_ex: f64,
    kex: f64,
    spin_lock_fields: &[f64],
    offsets: &[f64],
    back_calc: &mut [f64],
) {
    if phi_ex == 0.0 || kex == 0.0 {
        back_calc.fill(r1rho_prime);
        return;
    }

    let kex2 = kex * kex;
    for ((out, &w1), &omega) in back_calc.iter_mut().zip(spin_lock_fields).zip(offsets) {
        let we2 = w1 * w1 + omega * omega;
        *out = r1rho_prime + phi_ex * kex / (kex2 + we2);
    }
    sanitise(back_calc);
}

/// Meiboom (1961) on-resonance model with skewed populations (pA >> pB).
pub fn r1rho_m61_skew(
    r1rho_prime: f64,
    pa: f64,
    dw: f64,
    kex: f64,
    spin_lock_fields: &[f64],
    back_calc: &mut [f64],
) {
    if dw == 0.0 || pa == 1.0 || kex == 0.0 {
        back_calc.fill(r1rho_prime);
        return;
    }

    let pb = 1.0 - pa;
    let dw2 = dw * dw;
    let numer = pa * pa * pb * dw2 * kex;
    let denom_part = kex * kex + pa * pa * dw2;
    for (out, &w1) in back_calc.iter_mut().zip(spin_lock_fields) {
        *out = r1rho_prime + numer / (denom_part + w1 * w1);
    }
    sanitise(back_calc);
}

/// Davis, Perlman and London (1994) off-resonance fast exchange.
pub fn r1rho_dpl94(
    r1rho_prime: f64,
    phi_ex: f64,
    kex: f64,
    r1: f64,
    spin_lock_fields: &[f64],
    offsets: &[f64],
    back_calc: &mut [f64],
) {
    let kex2 = kex * kex;
    for ((out, &w1), &omega) in back_calc.iter_mut().zip(spin_lock_fields).zip(offsets) {
        let theta = w1.atan2(omega);
        let (sin_t, cos_t) = theta.sin_cos();
        let we2 = w1 * w1 + omega * omega;
        let rex = if phi_ex == 0.0 || kex == 0.0 {
            0.0
        } else {
            phi_ex * kex / (kex2 + we2)
        };
        *out = r1 * cos_t * cos_t + (r1rho_prime + rex) * sin_t * sin_t;
    }
    sanitise(back_calc);
}

/// Inputs of the numerical 2-site Bloch-McConnell solution.
#[derive(Debug, Clone, Copy)]
pub struct NsR1rhoParams {
    pub r1rho_prime: f64,
    pub r1: f64,
    pub pa: f64,
    pub dw: f64,
    pub kex: f64,
}

/// Relaxation/exchange evolution matrix for (MAx, MAy, MAz, MBx, MBy, MBz).
fn evolution_matrix(p: &NsR1rhoParams, w_a: f64, w1: f64) -> Matrix6<f64> {
    let pb = 1.0 - p.pa;
    let k_ba = p.pa * p.kex;
    let k_ab = pb * p.kex;
    let w_b = w_a + p.dw;
    let r2 = p.r1rho_prime;
    let r1 = p.r1;

    #[rustfmt::skip]
    let m = Matrix6::new(
        -r2 - k_ab, -w_a,       0.0,        k_ba,       0.0,        0.0,
        w_a,        -r2 - k_ab, -w1,        0.0,        k_ba,       0.0,
        0.0,        w1,         -r1 - k_ab, 0.0,        0.0,        k_ba,
        k_ab,       0.0,        0.0,        -r2 - k_ba, -w_b,       0.0,
        0.0,        k_ab,       0.0,        w_b,        -r2 - k_ba, -w1,
        0.0,        0.0,        k_ab,       0.0,        w1,         -r1 - k_ba,
    );
    m
}

/// Numerical solution of the 2-site Bloch-McConnell equations.
///
/// The A-state magnetisation starts along the effective field and is
/// propagated for each point's relaxation time. The decay of its projection
/// onto the starting vector gives R1rho. Non-positive or NaN projections are
/// reported as `1e99`.
pub fn r1rho_ns_2site(
    p: &NsR1rhoParams,
    spin_lock_fields: &[f64],
    offsets: &[f64],
    relax_times: &[f64],
    back_calc: &mut [f64],
) {
    let points = back_calc
        .iter_mut()
        .zip(spin_lock_fields)
        .zip(offsets)
        .zip(relax_times);

    for (((out, &w1), &omega), &t) in points {
        let theta = w1.atan2(omega);
        let m0 = Vector6::new(theta.sin(), 0.0, theta.cos(), 0.0, 0.0, 0.0);

        let propagator = (evolution_matrix(p, omega, w1) * t).exp();
        let ma = m0.dot(&(propagator * m0));

        *out = if ma <= 0.0 || ma.is_nan() || t <= 0.0 {
            1e99
        } else {
            -ma.ln() / t
        };
    }
    sanitise(back_calc);
}
