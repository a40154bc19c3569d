//! Relaxation curve fitting (R1 / R2 from exponential decays).
//!
//! Peak intensities are collected per spin and spectrum. Spectra that share a
//! relaxation time are replicates: they are averaged, and the spread of the
//! replicates gives the intensity error at that time.

use std::collections::{BTreeMap, HashMap};

use tracing::{info, warn};

use crate::domain::{CurveSeries, CurveType, ModelFitRecord, ParamName, ParamValue};
use crate::error::{RelaxError, Result};
use crate::fit::{FitOptions, FitOutcome, FitUnit, UnitFit, fit_stats, fit_units, grid_axes, optimise};
use crate::io::PeakList;
use crate::math::{exponential_estimate, mean, std_dev};
use crate::minimise::LinearConstraints;
use crate::models::exponential;
use crate::mol::{SpinIndex, SpinSystem};
use crate::target::RelaxFitTarget;

pub const DEFAULT_RX: f64 = 8.0;
pub const DEFAULT_I0: f64 = 10_000.0;
pub const DEFAULT_IINF: f64 = 0.0;

/// Upper grid bound of the relaxation rate.
const RX_GRID_UPPER: f64 = 20.0;

/// Minimum number of time points for a spin to be fitted.
const MIN_TIME_POINTS: usize = 3;

/// A peak list of the relaxation series.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxSpectrum {
    pub id: String,
    /// Relaxation delay in s.
    pub time: f64,
    pub rmsd: Option<f64>,
}

/// Averaged intensities and the per-time errors.
#[derive(Debug, Clone, PartialEq)]
struct Averaged {
    times: Vec<f64>,
    sd: Vec<f64>,
    means: BTreeMap<SpinIndex, Vec<Option<f64>>>,
}

/// Intensity data of a relaxation curve analysis.
#[derive(Debug, Clone, Default)]
pub struct RelaxFitData {
    curve: CurveType,
    spectra: Vec<RelaxSpectrum>,
    intensities: BTreeMap<SpinIndex, HashMap<String, f64>>,
    averaged: Option<Averaged>,
}

impl RelaxFitData {
    pub fn new(curve: CurveType) -> Self {
        Self {
            curve,
            ..Self::default()
        }
    }

    pub fn curve(&self) -> CurveType {
        self.curve
    }

    /// Switch between the two- and three-parameter curves.
    pub fn select_model(&mut self, curve: CurveType) {
        self.curve = curve;
    }

    pub fn spectra(&self) -> &[RelaxSpectrum] {
        &self.spectra
    }

    pub fn add_spectrum(&mut self, id: &str, time: f64, rmsd: Option<f64>) -> Result<()> {
        if self.spectra.iter().any(|s| s.id == id) {
            return Err(RelaxError::Duplicate {
                kind: "spectrum",
                name: id.to_string(),
            });
        }
        if !(time.is_finite() && time >= 0.0) {
            return Err(RelaxError::Argument(format!(
                "the relaxation time of '{id}' must be a non-negative number, not {time}"
            )));
        }
        self.spectra.push(RelaxSpectrum {
            id: id.to_string(),
            time,
            rmsd,
        });
        Ok(())
    }

    /// Distinct relaxation times in increasing order.
    pub fn times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self.spectra.iter().map(|s| s.time).collect();
        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    /// Assign the intensities of a peak list to the matching spins.
    ///
    /// Returns the number of spins that received an intensity.
    pub fn read_intensities(&mut self, system: &SpinSystem, spectrum_id: &str, peaks: &PeakList) -> Result<usize> {
        if !self.spectra.iter().any(|s| s.id == spectrum_id) {
            return Err(RelaxError::Unknown {
                kind: "spectrum",
                name: spectrum_id.to_string(),
            });
        }
        let mut count = 0;
        for peak in &peaks.peaks {
            let id = peak.spin_id();
            let Some(view) = system.return_spin(&id)? else {
                warn!(spectrum = spectrum_id, spin = %id, "No spin matches the peak, skipping");
                continue;
            };
            let per_spin = self.intensities.entry(view.index).or_default();
            if per_spin.insert(spectrum_id.to_string(), peak.intensity).is_some() {
                return Err(RelaxError::Duplicate {
                    kind: "peak intensity",
                    name: format!("{id} in spectrum '{spectrum_id}'"),
                });
            }
            count += 1;
        }
        info!(spectrum = spectrum_id, spins = count, "Read peak intensities");
        Ok(count)
    }

    fn time_points_with_data(&self, index: SpinIndex) -> usize {
        let Some(per_spin) = self.intensities.get(&index) else {
            return 0;
        };
        let mut times: Vec<f64> = self
            .spectra
            .iter()
            .filter(|s| per_spin.contains_key(&s.id))
            .map(|s| s.time)
            .collect();
        times.sort_by(f64::total_cmp);
        times.dedup();
        times.len()
    }

    /// Deselect spins with too few time points for a curve fit.
    pub fn overfit_deselect(&self, system: &mut SpinSystem) -> Result<usize> {
        let mut drop = Vec::new();
        for view in system.spins(None)? {
            if !view.spin.select {
                continue;
            }
            let n = self.time_points_with_data(view.index);
            if n < MIN_TIME_POINTS {
                warn!(spin = %view.id(), time_points = n, "Deselecting spin with insufficient data");
                drop.push(view.index);
            }
        }
        for index in &drop {
            if let Some(spin) = system.spin_mut(*index) {
                spin.select = false;
            }
        }
        Ok(drop.len())
    }

    /// Average the replicated spectra and compute the intensity errors.
    pub fn mean_and_error(&mut self, system: &mut SpinSystem) -> Result<()> {
        if self.averaged.is_some() {
            return Err(RelaxError::Argument(
                "the average intensities and errors have already been calculated".to_string(),
            ));
        }
        if self.spectra.is_empty() {
            return Err(RelaxError::MissingData("no spectra have been loaded".to_string()));
        }

        let times = self.times();
        let ids_at: Vec<Vec<&str>> = times
            .iter()
            .map(|t| {
                self.spectra
                    .iter()
                    .filter(|s| s.time == *t)
                    .map(|s| s.id.as_str())
                    .collect()
            })
            .collect();

        let mut means = BTreeMap::new();
        let mut sd_sum = vec![0.0; times.len()];
        let mut sd_count = vec![0usize; times.len()];
        let mut no_data = Vec::new();

        for view in system.spins(None)? {
            if !view.spin.select {
                continue;
            }
            let Some(per_spin) = self.intensities.get(&view.index) else {
                no_data.push((view.index, view.id()));
                continue;
            };
            let mut spin_means = Vec::with_capacity(times.len());
            for (ti, ids) in ids_at.iter().enumerate() {
                let values: Vec<f64> = ids.iter().filter_map(|id| per_spin.get(*id).copied()).collect();
                spin_means.push(mean(&values));
                if let Some(sd) = std_dev(&values) {
                    sd_sum[ti] += sd;
                    sd_count[ti] += 1;
                }
            }
            means.insert(view.index, spin_means);
        }

        for (index, id) in no_data {
            if let Some(spin) = system.spin_mut(index) {
                warn!(spin = %id, "Deselecting spin without intensity data");
                spin.select = false;
            }
        }
        if means.is_empty() {
            return Err(RelaxError::MissingData(
                "no selected spin has peak intensities".to_string(),
            ));
        }

        let mut sd: Vec<f64> = sd_sum
            .iter()
            .zip(&sd_count)
            .map(|(s, &n)| if n == 0 { 0.0 } else { s / n as f64 })
            .collect();

        if sd.contains(&0.0) {
            let replicated: Vec<f64> = sd.iter().copied().filter(|v| *v != 0.0).collect();
            match mean(&replicated) {
                Some(average) => {
                    info!(sd = average, "Intensity error averaged over all replicated time points");
                    sd.fill(average);
                }
                None => {
                    for (ti, ids) in ids_at.iter().enumerate() {
                        let rmsd: Option<Vec<f64>> = ids
                            .iter()
                            .map(|id| self.spectra.iter().find(|s| s.id == *id).and_then(|s| s.rmsd))
                            .collect();
                        sd[ti] = rmsd.as_deref().and_then(mean).ok_or_else(|| {
                            RelaxError::MissingData(format!(
                                "no replicated spectra, and no RMSD for the spectra at {} s",
                                times[ti]
                            ))
                        })?;
                    }
                    info!("Intensity errors taken from the spectrum RMSD values");
                }
            }
        }

        for (t, e) in times.iter().zip(&sd) {
            info!(time = t, sd = e, "Time point");
        }
        self.averaged = Some(Averaged { times, sd, means });
        Ok(())
    }

    /// Fit units for every selected spin with averaged data.
    pub fn units(&self, system: &SpinSystem) -> Result<Vec<CurveUnit>> {
        let averaged = self.averaged.as_ref().ok_or_else(|| {
            RelaxError::MissingData("the intensity errors have not been calculated".to_string())
        })?;

        let mut units = Vec::new();
        for view in system.spins(None)? {
            if !view.spin.select {
                continue;
            }
            let Some(spin_means) = averaged.means.get(&view.index) else {
                continue;
            };
            let mut times = Vec::new();
            let mut values = Vec::new();
            let mut errors = Vec::new();
            for ((t, m), e) in averaged.times.iter().zip(spin_means).zip(&averaged.sd) {
                if let Some(m) = m {
                    times.push(*t);
                    values.push(*m);
                    errors.push(*e);
                }
            }
            units.push(CurveUnit {
                spin_id: view.id(),
                curve: self.curve,
                times,
                values,
                errors,
            });
        }
        Ok(units)
    }

    /// Fit every selected spin.
    pub fn minimise(&self, system: &SpinSystem, options: &FitOptions) -> Result<FitOutcome<CurveUnit>> {
        let units = self.units(system)?;
        if units.is_empty() {
            return Err(RelaxError::MissingData("no spins to fit".to_string()));
        }
        info!(spins = units.len(), curve = self.curve.display_name(), "Fitting relaxation curves");
        Ok(fit_units(units, options))
    }

    /// Intensities of a spin at each time point for the given parameters.
    pub fn back_calc(&self, system: &SpinSystem, spin_id: &str, params: &[f64]) -> Result<Vec<f64>> {
        let index = system.spin_index(spin_id)?;
        let unit = self
            .units(system)?
            .into_iter()
            .find(|u| system.spin_index(&u.spin_id).ok() == Some(index))
            .ok_or_else(|| RelaxError::MissingData(format!("no intensities for the spin '{spin_id}'")))?;
        unit.back_calc(params)
    }
}

/// The relaxation curve of one spin.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveUnit {
    pub spin_id: String,
    pub curve: CurveType,
    pub times: Vec<f64>,
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
}

impl CurveUnit {
    /// Intensity scale: the mean intensity at the shortest time.
    fn intensity_scale(&self) -> f64 {
        let first = self
            .times
            .iter()
            .zip(&self.values)
            .min_by(|a, b| a.0.total_cmp(b.0))
            .map(|(_, v)| *v)
            .unwrap_or(1.0);
        if first > 0.0 { first } else { 1.0 }
    }

    fn default_params(&self) -> Vec<f64> {
        match self.curve {
            CurveType::Exp => vec![DEFAULT_RX, DEFAULT_I0],
            CurveType::Inv => vec![DEFAULT_RX, DEFAULT_I0, DEFAULT_IINF],
        }
    }
}

impl FitUnit for CurveUnit {
    fn name(&self) -> &str {
        &self.spin_id
    }

    fn model(&self) -> String {
        self.curve.display_name().to_string()
    }

    fn values(&self) -> Vec<Option<f64>> {
        self.values.iter().copied().map(Some).collect()
    }

    fn errors(&self) -> Vec<f64> {
        self.errors.clone()
    }

    fn with_values(&self, values: &[Option<f64>]) -> Self {
        let mut unit = self.clone();
        for (v, new) in unit.values.iter_mut().zip(values) {
            if let Some(new) = new {
                *v = *new;
            }
        }
        unit
    }

    fn back_calc(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = self.curve.params().len();
        if params.len() != n {
            return Err(RelaxError::LengthMismatch {
                what: "curve parameters",
                expected: n,
                found: params.len(),
            });
        }
        let mut out = vec![0.0; self.times.len()];
        exponential::back_calc(self.curve, params, &self.times, &mut out);
        Ok(out)
    }

    fn fit(&self, start: Option<&[f64]>, options: &FitOptions) -> Result<UnitFit> {
        let names = self.curve.params();
        let i_scale = self.intensity_scale();
        let scaling: Vec<f64> = names
            .iter()
            .map(|p| match p {
                ParamName::Rx => 1.0,
                _ if options.scaling => i_scale,
                _ => 1.0,
            })
            .collect();

        let target = RelaxFitTarget::new(
            self.curve,
            self.times.clone(),
            self.values.clone(),
            self.errors.clone(),
            scaling.clone(),
        )?;

        let mut constraints = LinearConstraints::new(names.len());
        for i in 0..names.len() {
            constraints.push_lower(i, 0.0);
        }

        let mut axes = None;
        let start_params = match start {
            Some(s) => s.to_vec(),
            None => match &options.grid {
                Some(grid) => {
                    let bounds: Vec<(f64, f64)> = names
                        .iter()
                        .map(|p| match p {
                            ParamName::Rx => (0.0, RX_GRID_UPPER),
                            _ => (0.0, i_scale),
                        })
                        .collect();
                    axes = Some(grid_axes(names, &bounds, &scaling, grid));
                    self.default_params()
                }
                None => {
                    let mut p = self.default_params();
                    if self.curve == CurveType::Exp
                        && let Some((rx, i0)) = exponential_estimate(&self.times, &self.values)
                    {
                        p[0] = rx.max(0.0);
                        p[1] = i0;
                    }
                    p
                }
            },
        };
        let x0: Vec<f64> = start_params.iter().zip(&scaling).map(|(p, s)| p / s).collect();

        let result = optimise(&target, x0, axes.as_deref(), &constraints, &options.min)?;
        let params = result.x.iter().zip(&scaling).map(|(x, s)| x * s).collect();
        Ok(UnitFit {
            params,
            stats: fit_stats(&result, target.num_points()),
        })
    }

    fn record(&self, fit: &UnitFit) -> Result<ModelFitRecord> {
        let back_calc = self.back_calc(&fit.params)?;
        let params = self
            .curve
            .params()
            .iter()
            .zip(&fit.params)
            .map(|(&name, &value)| ParamValue {
                name,
                spin_id: Some(self.spin_id.clone()),
                field_mhz: None,
                value,
                error: None,
            })
            .collect();
        Ok(ModelFitRecord {
            unit: self.spin_id.clone(),
            spins: vec![self.spin_id.clone()],
            model: self.model(),
            params,
            stats: fit.stats.clone(),
            criterion: None,
            selected: false,
            curves: vec![CurveSeries {
                spin_id: self.spin_id.clone(),
                label: self.curve.display_name().to_string(),
                x: self.times.clone(),
                y: self.values(),
                errors: self.errors.iter().copied().map(Some).collect(),
                back_calc,
            }],
        })
    }
}
