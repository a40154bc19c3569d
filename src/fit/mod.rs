//! Fitting orchestration.
//!
//! Responsibilities:
//!
//! - build target functions for curve fitting and relaxation dispersion
//! - run the grid search and local optimiser for every fit unit (parallel)
//! - Monte Carlo error analysis
//! - model selection with AIC / AICc / BIC

pub mod dispersion;
pub mod monte_carlo;
pub mod relax_fit;
pub mod selection;

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{FitStats, ModelFitRecord, ParamName};
use crate::error::Result;
use crate::minimise::{
    Algorithm, GridAxis, LinearConstraints, MinOptions, MinResult, TargetFunction, grid_search,
    minimise,
};

pub use dispersion::*;
pub use monte_carlo::*;
pub use relax_fit::*;
pub use selection::*;

/// Grid search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOptions {
    /// Points per dimension.
    pub inc: usize,
    /// Per-parameter overrides of the default lower bounds (unscaled).
    pub lower: HashMap<ParamName, f64>,
    /// Per-parameter overrides of the default upper bounds (unscaled).
    pub upper: HashMap<ParamName, f64>,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            inc: 11,
            lower: HashMap::new(),
            upper: HashMap::new(),
        }
    }
}

/// Everything needed to optimise one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub grid: Option<GridOptions>,
    pub min: MinOptions,
    /// Diagonal parameter scaling.
    pub scaling: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            grid: Some(GridOptions::default()),
            min: MinOptions::default(),
            scaling: true,
        }
    }
}

/// Optimised parameters of one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFit {
    /// Unscaled parameter values.
    pub params: Vec<f64>,
    pub stats: FitStats,
}

/// A model fitted to a unit that could not be optimised.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFit {
    pub unit: String,
    pub model: String,
    pub reason: String,
}

/// A self-contained fitting problem: a spin, or a cluster of spins.
///
/// Measured data are exposed flattened, with `None` for missing points, so
/// that Monte Carlo simulation can treat every analysis the same way.
pub trait FitUnit: Send + Sync + Sized {
    fn name(&self) -> &str;

    /// Name of the fitted model.
    fn model(&self) -> String;

    fn values(&self) -> Vec<Option<f64>>;

    /// Errors of `values`, in the same order.
    fn errors(&self) -> Vec<f64>;

    /// A copy of the unit with the measured values replaced.
    fn with_values(&self, values: &[Option<f64>]) -> Self;

    /// Back-calculated values for unscaled parameters, in `values` order.
    fn back_calc(&self, params: &[f64]) -> Result<Vec<f64>>;

    /// Optimise the unit. `start` (unscaled) skips the grid search.
    fn fit(&self, start: Option<&[f64]>, options: &FitOptions) -> Result<UnitFit>;

    /// Result record of a fit. Parameters are listed in vector order.
    fn record(&self, fit: &UnitFit) -> Result<ModelFitRecord>;
}

/// Units that were optimised, and those that could not be.
#[derive(Debug, Clone)]
pub struct FitOutcome<U> {
    pub fitted: Vec<(U, UnitFit)>,
    pub skipped: Vec<SkippedFit>,
}

impl<U: FitUnit> FitOutcome<U> {
    pub fn records(&self) -> Result<Vec<ModelFitRecord>> {
        self.fitted.iter().map(|(unit, fit)| unit.record(fit)).collect()
    }
}

/// Optimise every unit in parallel, keeping the input order.
pub fn fit_units<U: FitUnit>(units: Vec<U>, options: &FitOptions) -> FitOutcome<U> {
    let results: Vec<(U, Result<UnitFit>)> = units
        .into_par_iter()
        .map(|unit| {
            let fit = unit.fit(None, options);
            (unit, fit)
        })
        .collect();

    let mut outcome = FitOutcome {
        fitted: Vec::with_capacity(results.len()),
        skipped: Vec::new(),
    };
    for (unit, result) in results {
        match result {
            Ok(fit) => {
                debug!(
                    unit = unit.name(),
                    model = %unit.model(),
                    chi2 = fit.stats.chi2,
                    iterations = fit.stats.iterations,
                    params = ?fit.params,
                    "Optimised"
                );
                if let Some(w) = &fit.stats.warning {
                    warn!(unit = unit.name(), model = %unit.model(), "{w}");
                }
                outcome.fitted.push((unit, fit));
            }
            Err(e) => {
                warn!(unit = unit.name(), model = %unit.model(), "Fit skipped: {e}");
                outcome.skipped.push(SkippedFit {
                    unit: unit.name().to_string(),
                    model: unit.model(),
                    reason: e.to_string(),
                });
            }
        }
    }
    outcome
}

/// Scaled grid axes from unscaled default bounds and user overrides.
pub(crate) fn grid_axes(
    names: &[ParamName],
    defaults: &[(f64, f64)],
    scaling: &[f64],
    grid: &GridOptions,
) -> Vec<GridAxis> {
    names
        .iter()
        .zip(defaults)
        .zip(scaling)
        .map(|((name, (lower, upper)), scale)| {
            let lower = grid.lower.get(name).copied().unwrap_or(*lower);
            let upper = grid.upper.get(name).copied().unwrap_or(*upper);
            GridAxis::new(grid.inc, lower / scale, upper / scale)
        })
        .collect()
}

/// Grid search followed by the local optimiser, in scaled space.
pub(crate) fn optimise<T: TargetFunction>(
    target: &T,
    x0: Vec<f64>,
    axes: Option<&[GridAxis]>,
    constraints: &LinearConstraints,
    options: &MinOptions,
) -> Result<MinResult> {
    let active = options.constraints.then_some(constraints);

    let mut start = x0;
    if let Some(axes) = axes {
        let grid = grid_search(target, axes, active)?;
        if options.algorithm == Algorithm::Grid {
            return Ok(grid);
        }
        start = grid.x;
    }
    minimise(target, &start, options, active)
}

/// Stats of a finished optimisation.
pub(crate) fn fit_stats(result: &MinResult, n: usize) -> FitStats {
    FitStats {
        chi2: result.f,
        k: result.x.len(),
        n,
        iterations: result.iterations,
        f_count: result.f_count,
        g_count: result.g_count,
        h_count: result.h_count,
        warning: result.warning.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_axes_apply_overrides_and_scaling() {
        let mut grid = GridOptions {
            inc: 5,
            ..GridOptions::default()
        };
        grid.upper.insert(ParamName::Kex, 5000.0);
        let axes = grid_axes(
            &[ParamName::R2, ParamName::Kex],
            &[(5.0, 20.0), (1.0, 10_000.0)],
            &[10.0, 10_000.0],
            &grid,
        );
        assert_eq!(axes[0], GridAxis::new(5, 0.5, 2.0));
        assert_eq!(axes[1], GridAxis::new(5, 1e-4, 0.5));
    }

    #[test]
    fn grid_options_from_toml() {
        let grid: GridOptions = toml::from_str("inc = 21\n[lower]\nkex = 10.0\n").unwrap();
        assert_eq!(grid.inc, 21);
        assert_eq!(grid.lower.get(&ParamName::Kex), Some(&10.0));
        assert!(grid.upper.is_empty());
    }
}
