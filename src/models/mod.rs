//! Back-calculation of relaxation data.
//!
//! Models are implemented as small, pure functions writing into caller-owned
//! slices so that the target functions can stay allocation free.

pub mod cpmg;
pub mod exponential;
pub mod r1rho;

pub use cpmg::{r2eff_cr72, r2eff_it99, r2eff_lm63, r2eff_tsmfk01};
pub use exponential::sanitise;
pub use r1rho::{NsR1rhoParams, r1rho_dpl94, r1rho_m61, r1rho_m61_skew, r1rho_ns_2site};
