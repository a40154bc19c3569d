//! Chi-squared target functions for the optimisers.
//!
//! Targets work on scaled parameter vectors: the optimiser sees `x / scale`
//! so that every parameter is of order one.

pub mod dispersion;
pub mod relax_fit;

pub use dispersion::{DispersionTarget, FieldPoints, ParamLayout, ParamSlot, SpinFieldData};
pub use relax_fit::RelaxFitTarget;

/// Replace missing points by their back-calculated value so they add nothing
/// to chi-squared.
pub(crate) fn mask_missing(values: &[f64], back_calc: &[f64], missing: &[bool], out: &mut Vec<f64>) {
    out.clear();
    out.extend(
        values
            .iter()
            .zip(back_calc)
            .zip(missing)
            .map(|((v, b), m)| if *m { *b } else { *v }),
    );
}
