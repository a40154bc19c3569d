//! Reporting utilities: run summary and formatted terminal tables.

use crate::domain::SelectionMethod;

pub mod format;

pub use format::*;

/// What a run worked on, for the set-up summary.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub title: String,
    pub total_spins: usize,
    pub selected_spins: usize,
    pub spectra: usize,
    pub clusters: usize,
    pub models: Vec<String>,
    pub selection: Option<SelectionMethod>,
    pub monte_carlo_sims: usize,
}
