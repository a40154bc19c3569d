//! Mathematical utilities: chi-squared, statistics and least squares.

pub mod chi2;
pub mod ols;
pub mod stats;

pub use chi2::*;
pub use ols::*;
pub use stats::*;
