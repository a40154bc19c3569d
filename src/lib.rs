//! `nmr-relax` library crate.
//!
//! NMR relaxation analysis: exponential curve fitting of peak intensities and
//! relaxation dispersion model fitting, with Monte Carlo errors and model
//! selection.
//!
//! The binary (`relax`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fitting code is reusable from other front-ends
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod minimise;
pub mod models;
pub mod mol;
pub mod plot;
pub mod report;
pub mod target;
pub mod tui;
