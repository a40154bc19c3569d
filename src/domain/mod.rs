//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - physical constants and nucleus properties (`constants`)
//! - analysis/model enums (`DispModel`, `CurveType`, `ExpType`, `ParamName`)
//! - serializable fit outputs (`ModelFitRecord`, `ResultsFile`, etc.)

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::*;
