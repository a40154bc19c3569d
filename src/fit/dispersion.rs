//! Relaxation dispersion analysis.
//!
//! Fixed-time CPMG or R1rho peak intensities are converted to effective
//! relaxation rates, which are then fitted with the chemical exchange models.
//! A fit unit is either a single spin or a named cluster of spins sharing the
//! global exchange parameters.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::domain::{
    CurveSeries, DispModel, ExpType, FitStats, ModelFitRecord, ParamName, ParamScope, ParamValue,
    frequency_to_rad_per_s,
};
use crate::error::{RelaxError, Result};
use crate::fit::{FitOptions, FitOutcome, FitUnit, UnitFit, fit_stats, fit_units, grid_axes, optimise};
use crate::io::{PeakList, read_r2eff};
use crate::math::{mean, std_dev};
use crate::minimise::LinearConstraints;
use crate::mol::{SpinIndex, SpinSystem};
use crate::target::{DispersionTarget, FieldPoints, ParamLayout, SpinFieldData};

/// Spectrometer frequencies closer than this (Hz) are the same field.
const FIELD_TOLERANCE_HZ: f64 = 1e-3;

/// Grid bounds, scaling and starting value of a parameter, in its own units.
struct ParamDefaults {
    lower: f64,
    upper: f64,
    scale: f64,
    start: f64,
}

fn param_defaults(name: ParamName) -> ParamDefaults {
    let (lower, upper, scale, start) = match name {
        ParamName::R2 | ParamName::R2a | ParamName::R2b => (5.0, 20.0, 10.0, 10.0),
        ParamName::Dw => (0.0, 10.0, 1.0, 0.0),
        ParamName::PhiEx => (0.0, 10.0, 1.0, 0.0),
        ParamName::Pa => (0.5, 1.0, 1.0, 0.5),
        ParamName::Kex => (1.0, 10_000.0, 10_000.0, 10_000.0),
        ParamName::Tex => (1e-5, 1e-2, 1e-4, 1e-4),
        ParamName::KAb => (0.0, 100.0, 100.0, 10.0),
        ParamName::Rx | ParamName::I0 | ParamName::Iinf => (0.0, 1.0, 1.0, 1.0),
    };
    ParamDefaults {
        lower,
        upper,
        scale,
        start,
    }
}

/// A fixed-time dispersion spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct DispSpectrum {
    pub id: String,
    /// Proton frequency of the spectrometer, in Hz.
    pub frq_hz: f64,
    /// CPMG frequency or spin-lock field, in Hz. `None` for a reference spectrum.
    pub point: Option<f64>,
    /// Constant relaxation time, in s.
    pub relax_time: f64,
    /// Spin-lock carrier offset, in ppm.
    pub offset_ppm: Option<f64>,
    pub rmsd: Option<f64>,
}

/// One effective relaxation rate of a spin.
#[derive(Debug, Clone, PartialEq)]
pub struct RatePoint {
    pub frq_hz: f64,
    pub point_hz: f64,
    pub relax_time: Option<f64>,
    pub offset_ppm: Option<f64>,
    /// `None` marks a missing point.
    pub value: Option<f64>,
    pub error: Option<f64>,
}

/// Data of a relaxation dispersion analysis.
#[derive(Debug, Clone)]
pub struct DispersionData {
    exp_type: ExpType,
    spectra: Vec<DispSpectrum>,
    replicates: Vec<Vec<String>>,
    intensities: BTreeMap<SpinIndex, HashMap<String, f64>>,
    rates: BTreeMap<SpinIndex, Vec<RatePoint>>,
    /// R1 values per spin, as `(proton frequency in Hz, R1)`.
    r1: BTreeMap<SpinIndex, Vec<(f64, f64)>>,
    clusters: Vec<(String, Vec<String>)>,
}

fn same_field(a: f64, b: f64) -> bool {
    (a - b).abs() < FIELD_TOLERANCE_HZ
}

impl DispersionData {
    pub fn new(exp_type: ExpType) -> Self {
        Self {
            exp_type,
            spectra: Vec::new(),
            replicates: Vec::new(),
            intensities: BTreeMap::new(),
            rates: BTreeMap::new(),
            r1: BTreeMap::new(),
            clusters: Vec::new(),
        }
    }

    pub fn exp_type(&self) -> ExpType {
        self.exp_type
    }

    pub fn spectra(&self) -> &[DispSpectrum] {
        &self.spectra
    }

    pub fn add_spectrum(&mut self, spectrum: DispSpectrum) -> Result<()> {
        if self.spectra.iter().any(|s| s.id == spectrum.id) {
            return Err(RelaxError::Duplicate {
                kind: "spectrum",
                name: spectrum.id,
            });
        }
        if !(spectrum.frq_hz > 0.0 && spectrum.relax_time > 0.0) {
            return Err(RelaxError::Argument(format!(
                "the spectrum '{}' needs a positive frequency and relaxation time",
                spectrum.id
            )));
        }
        if spectrum.point.is_some_and(|p| !(p > 0.0)) {
            return Err(RelaxError::Argument(format!(
                "the dispersion point of '{}' must be positive",
                spectrum.id
            )));
        }
        self.spectra.push(spectrum);
        Ok(())
    }

    fn spectrum(&self, id: &str) -> Result<&DispSpectrum> {
        self.spectra.iter().find(|s| s.id == id).ok_or_else(|| RelaxError::Unknown {
            kind: "spectrum",
            name: id.to_string(),
        })
    }

    /// Declare a group of replicated spectra.
    ///
    /// Replicates must share the field, dispersion point and relaxation time.
    pub fn replicated(&mut self, ids: &[String]) -> Result<()> {
        if ids.len() < 2 {
            return Err(RelaxError::Argument(
                "a replicate group needs at least two spectra".to_string(),
            ));
        }
        let first = self.spectrum(&ids[0])?.clone();
        for id in &ids[1..] {
            let s = self.spectrum(id)?;
            if !same_field(s.frq_hz, first.frq_hz) || s.point != first.point || s.relax_time != first.relax_time {
                return Err(RelaxError::Argument(format!(
                    "the spectra '{}' and '{id}' are not replicates",
                    first.id
                )));
            }
        }
        if let Some(id) = ids.iter().find(|id| self.replicates.iter().flatten().any(|r| r == *id)) {
            return Err(RelaxError::Duplicate {
                kind: "replicated spectrum",
                name: id.to_string(),
            });
        }
        self.replicates.push(ids.to_vec());
        Ok(())
    }

    /// Assign the intensities of a peak list to the matching spins.
    pub fn read_intensities(&mut self, system: &SpinSystem, spectrum_id: &str, peaks: &PeakList) -> Result<usize> {
        self.spectrum(spectrum_id)?;
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

    /// Peak intensity error of every spectrum.
    ///
    /// Replicated groups give the sd of their spectra, averaged over spins.
    /// When only some spectra are replicated the mean of those values applies
    /// to every spectrum. Without replicates each spectrum needs an RMSD.
    pub fn spectrum_errors(&self) -> Result<HashMap<String, f64>> {
        let mut group_sd = Vec::new();
        for group in &self.replicates {
            let per_spin: Vec<f64> = self
                .intensities
                .values()
                .filter_map(|per_spin| {
                    let values: Vec<f64> = group.iter().filter_map(|id| per_spin.get(id).copied()).collect();
                    if values.len() < 2 { None } else { std_dev(&values) }
                })
                .collect();
            let sd = mean(&per_spin).ok_or_else(|| {
                RelaxError::MissingData(format!(
                    "no spin has intensities in more than one of the replicated spectra {group:?}"
                ))
            })?;
            debug!(group = ?group, sd, "Replicate sd");
            group_sd.push(sd);
        }

        let mut errors = HashMap::new();
        if group_sd.is_empty() {
            for s in &self.spectra {
                let rmsd = s.rmsd.ok_or_else(|| {
                    RelaxError::MissingData(format!(
                        "no replicated spectra, and no RMSD for the spectrum '{}'",
                        s.id
                    ))
                })?;
                errors.insert(s.id.clone(), rmsd);
            }
            return Ok(errors);
        }

        let all_replicated = self
            .spectra
            .iter()
            .all(|s| self.replicates.iter().flatten().any(|r| *r == s.id));
        if all_replicated {
            for (group, sd) in self.replicates.iter().zip(&group_sd) {
                for id in group {
                    errors.insert(id.clone(), *sd);
                }
            }
        } else {
            let average = mean(&group_sd).unwrap_or_default();
            info!(sd = average, "Replicate sd averaged over all spectra");
            for s in &self.spectra {
                errors.insert(s.id.clone(), average);
            }
        }
        Ok(errors)
    }

    /// Convert the peak intensities of every selected spin to R2eff / R1rho.
    ///
    /// Uses `R = -ln(I / I0) / T` against the reference spectra of the same
    /// field. Returns the number of spins with rates.
    pub fn calc_r2eff(&mut self, system: &SpinSystem) -> Result<usize> {
        let errors = self.spectrum_errors()?;

        // Spectra with equal metadata are averaged into one point.
        let mut groups: Vec<(&DispSpectrum, Vec<&str>)> = Vec::new();
        for s in &self.spectra {
            let found = groups.iter_mut().find(|(g, _)| {
                same_field(g.frq_hz, s.frq_hz)
                    && g.point == s.point
                    && g.relax_time == s.relax_time
                    && g.offset_ppm == s.offset_ppm
            });
            match found {
                Some((_, ids)) => ids.push(&s.id),
                None => groups.push((s, vec![s.id.as_str()])),
            }
        }

        let average = |per_spin: &HashMap<String, f64>, ids: &[&str]| -> Option<(f64, f64)> {
            let values: Vec<f64> = ids.iter().filter_map(|id| per_spin.get(*id).copied()).collect();
            let errs: Vec<f64> = ids
                .iter()
                .filter(|id| per_spin.contains_key(**id))
                .filter_map(|id| errors.get(*id).copied())
                .collect();
            Some((mean(&values)?, mean(&errs)?))
        };

        let mut rates = BTreeMap::new();
        for view in system.spins(None)? {
            if !view.spin.select {
                continue;
            }
            let Some(per_spin) = self.intensities.get(&view.index) else {
                continue;
            };
            let mut points = Vec::new();
            for (s, ids) in groups.iter().filter(|(s, _)| s.point.is_some()) {
                let reference_ids: Vec<&str> = groups
                    .iter()
                    .filter(|(r, _)| r.point.is_none() && same_field(r.frq_hz, s.frq_hz))
                    .flat_map(|(_, ids)| ids.iter().copied())
                    .collect();
                let mut point = RatePoint {
                    frq_hz: s.frq_hz,
                    point_hz: s.point.unwrap_or_default(),
                    relax_time: Some(s.relax_time),
                    offset_ppm: s.offset_ppm,
                    value: None,
                    error: None,
                };
                if let (Some((i, si)), Some((i0, si0))) =
                    (average(per_spin, ids), average(per_spin, &reference_ids))
                    && i > 0.0
                    && i0 > 0.0
                {
                    let t = s.relax_time;
                    point.value = Some(-(i / i0).ln() / t);
                    point.error = Some(((si / i).powi(2) + (si0 / i0).powi(2)).sqrt() / t);
                }
                points.push(point);
            }
            if points.iter().all(|p| p.value.is_none()) {
                warn!(spin = %view.id(), "No effective relaxation rates could be calculated");
                continue;
            }
            rates.insert(view.index, points);
        }

        let count = rates.len();
        self.rates.extend(rates);
        info!(spins = count, exp_type = self.exp_type.display_name(), "Calculated effective relaxation rates");
        Ok(count)
    }

    /// Load pre-computed rates for one field from an R2eff file.
    pub fn r2eff_read(
        &mut self,
        system: &SpinSystem,
        path: &Path,
        frq_hz: f64,
        relax_time: Option<f64>,
        offset_ppm: Option<f64>,
        sep: Option<char>,
    ) -> Result<usize> {
        let mut count = 0;
        for p in read_r2eff(path, sep)? {
            let Some(view) = system.return_spin(&p.spin_id)? else {
                warn!(file = %path.display(), spin = %p.spin_id, "No spin matches, skipping");
                continue;
            };
            self.rates.entry(view.index).or_default().push(RatePoint {
                frq_hz,
                point_hz: p.point_hz,
                relax_time,
                offset_ppm,
                value: Some(p.value),
                error: Some(p.error),
            });
            count += 1;
        }
        info!(file = %path.display(), points = count, "Read effective relaxation rates");
        Ok(count)
    }

    /// Set R1 at one field for the spins matching `selection`.
    pub fn set_r1(&mut self, system: &SpinSystem, selection: Option<&str>, frq_hz: f64, value: f64) -> Result<usize> {
        let spins = system.spins(selection)?;
        for view in &spins {
            let entry = self.r1.entry(view.index).or_default();
            entry.retain(|(f, _)| !same_field(*f, frq_hz));
            entry.push((frq_hz, value));
        }
        Ok(spins.len())
    }

    /// Declare a cluster of spins sharing the global parameters.
    pub fn cluster(&mut self, name: &str, spin_ids: &[String]) -> Result<()> {
        if self.clusters.iter().any(|(n, _)| n == name) {
            return Err(RelaxError::Duplicate {
                kind: "cluster",
                name: name.to_string(),
            });
        }
        self.clusters.push((name.to_string(), spin_ids.to_vec()));
        Ok(())
    }

    /// Deselect spins whose rates vary by less than `level` at every field.
    pub fn insignificance(&self, system: &mut SpinSystem, level: f64) -> Result<usize> {
        let mut insignificant = Vec::new();
        for view in system.spins(None)? {
            if !view.spin.select {
                continue;
            }
            let Some(points) = self.rates.get(&view.index) else {
                continue;
            };
            let mut ranges: Vec<(f64, f64, f64)> = Vec::new();
            for p in points {
                let Some(v) = p.value else { continue };
                match ranges.iter_mut().find(|(f, _, _)| same_field(*f, p.frq_hz)) {
                    Some((_, lo, hi)) => {
                        *lo = lo.min(v);
                        *hi = hi.max(v);
                    }
                    None => ranges.push((p.frq_hz, v, v)),
                }
            }
            let max_range = ranges.iter().map(|(_, lo, hi)| hi - lo).fold(0.0, f64::max);
            if max_range < level {
                info!(spin = %view.id(), range = max_range, "Deselecting insignificant spin");
                insignificant.push(view.index);
            }
        }
        for index in &insignificant {
            if let Some(spin) = system.spin_mut(*index) {
                spin.select = false;
            }
        }
        Ok(insignificant.len())
    }

    /// Selected spins with rates, grouped into fit units.
    fn groups(&self, system: &SpinSystem) -> Result<Vec<(String, Vec<SpinIndex>)>> {
        let usable = |index: &SpinIndex| {
            system.spin(*index).is_some_and(|s| s.select) && self.rates.contains_key(index)
        };

        let mut clustered = HashSet::new();
        let mut groups = Vec::new();
        for (name, ids) in &self.clusters {
            let mut members = Vec::new();
            for id in ids {
                for view in system.spins(Some(id))? {
                    if !clustered.insert(view.index) {
                        return Err(RelaxError::Duplicate {
                            kind: "clustered spin",
                            name: view.id(),
                        });
                    }
                    if usable(&view.index) {
                        members.push(view.index);
                    }
                }
            }
            if members.is_empty() {
                warn!(cluster = %name, "No selected spins with data in the cluster, skipping");
                continue;
            }
            groups.push((name.clone(), members));
        }

        for view in system.spins(None)? {
            if !clustered.contains(&view.index) && usable(&view.index) {
                groups.push((view.id(), vec![view.index]));
            }
        }
        Ok(groups)
    }

    /// Build a fit unit for every spin and cluster.
    pub fn units(&self, system: &SpinSystem, model: DispModel) -> Result<Vec<DispersionUnit>> {
        if !model.is_compatible(self.exp_type) {
            return Err(RelaxError::Argument(format!(
                "the {model} model does not apply to {} data",
                self.exp_type.display_name()
            )));
        }
        self.groups(system)?
            .into_iter()
            .map(|(name, members)| self.build_unit(system, model, name, &members))
            .collect()
    }

    fn build_unit(
        &self,
        system: &SpinSystem,
        model: DispModel,
        name: String,
        members: &[SpinIndex],
    ) -> Result<DispersionUnit> {
        let spin_points: Vec<&[RatePoint]> = members
            .iter()
            .map(|i| self.rates.get(i).map(Vec::as_slice).unwrap_or_default())
            .collect();

        // Fields in increasing frequency, then the union of points per field.
        let mut frqs: Vec<f64> = Vec::new();
        for p in spin_points.iter().flat_map(|pts| pts.iter()) {
            if !frqs.iter().any(|f| same_field(*f, p.frq_hz)) {
                frqs.push(p.frq_hz);
            }
        }
        frqs.sort_by(f64::total_cmp);

        type PointKey = (f64, Option<f64>, Option<f64>);
        let mut keys_per_field: Vec<Vec<PointKey>> = vec![Vec::new(); frqs.len()];
        for p in spin_points.iter().flat_map(|pts| pts.iter()) {
            let Some(fi) = frqs.iter().position(|f| same_field(*f, p.frq_hz)) else {
                continue;
            };
            let key = (p.point_hz, p.relax_time, p.offset_ppm);
            if !keys_per_field[fi].contains(&key) {
                keys_per_field[fi].push(key);
            }
        }
        for keys in &mut keys_per_field {
            keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        }

        let uses_shifts = model.params().iter().any(|p| matches!(p, ParamName::Dw | ParamName::PhiEx));
        if model == DispModel::NsR1rho2Site && keys_per_field.iter().flatten().any(|k| k.1.is_none()) {
            return Err(RelaxError::MissingData(format!(
                "the {model} model needs the relaxation time of every point"
            )));
        }

        let fields: Vec<FieldPoints> = frqs
            .iter()
            .zip(&keys_per_field)
            .map(|(frq, keys)| FieldPoints {
                proton_frq_hz: *frq,
                points_hz: keys.iter().map(|k| k.0).collect(),
                relax_times: keys.iter().map(|k| k.1.unwrap_or_default()).collect(),
            })
            .collect();

        let mut spin_ids = Vec::with_capacity(members.len());
        let mut data = Vec::with_capacity(members.len());
        for (index, points) in members.iter().zip(&spin_points) {
            let spin = system.spin(*index).ok_or_else(|| RelaxError::Unknown {
                kind: "spin",
                name: format!("{index:?}"),
            })?;
            let spin_id = system.spin_id(*index).unwrap_or_default();
            let needs_offsets = keys_per_field.iter().flatten().any(|k| k.2.is_some()) && spin.chemical_shift.is_some();
            if spin.isotope.is_none() && (uses_shifts || needs_offsets) {
                return Err(RelaxError::MissingData(format!(
                    "the spin '{spin_id}' has no isotope, needed to convert ppm to rad/s"
                )));
            }

            let mut per_field = Vec::with_capacity(frqs.len());
            for (frq, keys) in frqs.iter().zip(&keys_per_field) {
                let frq_factor = spin.isotope.map_or(1.0, |iso| frequency_to_rad_per_s(*frq, iso));
                let mut d = SpinFieldData {
                    values: vec![0.0; keys.len()],
                    errors: vec![1.0; keys.len()],
                    missing: vec![true; keys.len()],
                    frq_factor,
                    offsets: vec![0.0; keys.len()],
                    r1: self
                        .r1
                        .get(index)
                        .and_then(|r| r.iter().find(|(f, _)| same_field(*f, *frq)))
                        .map(|(_, v)| *v),
                };
                for (k, key) in keys.iter().enumerate() {
                    if let (Some(shift), Some(offset)) = (spin.chemical_shift, key.2) {
                        d.offsets[k] = (shift - offset) * frq_factor;
                    }
                    let found = points.iter().find(|p| {
                        same_field(p.frq_hz, *frq)
                            && p.point_hz == key.0
                            && p.relax_time == key.1
                            && p.offset_ppm == key.2
                    });
                    if let Some(RatePoint {
                        value: Some(v),
                        error: Some(e),
                        ..
                    }) = found
                        && *e > 0.0
                    {
                        d.values[k] = *v;
                        d.errors[k] = *e;
                        d.missing[k] = false;
                    }
                }
                per_field.push(d);
            }
            spin_ids.push(spin_id);
            data.push(per_field);
        }

        if model.needs_r1()
            && let Some((id, _)) = spin_ids
                .iter()
                .zip(&data)
                .find(|(_, per_field)| per_field.iter().any(|d| d.r1.is_none()))
        {
            return Err(RelaxError::MissingData(format!(
                "R1 values are required by the {model} model for the spin '{id}'"
            )));
        }

        Ok(DispersionUnit {
            name,
            spin_ids,
            model,
            exp_type: self.exp_type,
            fields,
            data,
        })
    }

    /// Fit a model to every spin and cluster.
    pub fn minimise(
        &self,
        system: &SpinSystem,
        model: DispModel,
        options: &FitOptions,
    ) -> Result<FitOutcome<DispersionUnit>> {
        if model == DispModel::R2eff {
            return Err(RelaxError::Argument(
                "the R2eff model is not optimised, its values are the measured rates".to_string(),
            ));
        }
        let units = self.units(system, model)?;
        if units.is_empty() {
            return Err(RelaxError::MissingData("no spins with dispersion data to fit".to_string()));
        }
        info!(model = %model, units = units.len(), "Fitting dispersion model");
        Ok(fit_units(units, options))
    }

    /// Records of the R2eff model: the measured rates of each unit.
    ///
    /// A cluster gets a single record so that it competes with the other
    /// models fitted to the same cluster.
    pub fn r2eff_records(&self, system: &SpinSystem) -> Result<Vec<ModelFitRecord>> {
        let mut records = Vec::new();
        for unit in self.units(system, DispModel::R2eff)? {
            let mut curves = Vec::new();
            let mut n = 0;
            for (spin_id, spin_data) in unit.spin_ids.iter().zip(&unit.data) {
                for (field, d) in unit.fields.iter().zip(spin_data) {
                    let (x, values, errors): (Vec<f64>, Vec<f64>, Vec<f64>) = field
                        .points_hz
                        .iter()
                        .enumerate()
                        .filter(|(k, _)| !d.missing[*k])
                        .map(|(k, x)| (*x, d.values[k], d.errors[k]))
                        .fold((Vec::new(), Vec::new(), Vec::new()), |mut acc, (x, v, e)| {
                            acc.0.push(x);
                            acc.1.push(v);
                            acc.2.push(e);
                            acc
                        });
                    n += x.len();
                    curves.push(CurveSeries {
                        spin_id: spin_id.clone(),
                        label: field_label(field.proton_frq_hz),
                        x,
                        y: values.iter().copied().map(Some).collect(),
                        errors: errors.iter().copied().map(Some).collect(),
                        back_calc: values,
                    });
                }
            }
            records.push(ModelFitRecord {
                unit: unit.name.clone(),
                spins: unit.spin_ids.clone(),
                model: DispModel::R2eff.display_name().to_string(),
                params: Vec::new(),
                stats: FitStats {
                    chi2: 0.0,
                    k: n,
                    n,
                    ..FitStats::default()
                },
                criterion: None,
                selected: false,
                curves,
            });
        }
        Ok(records)
    }

    /// Back-calculated curves `[spin][field][point]` of a unit.
    pub fn back_calc(
        &self,
        system: &SpinSystem,
        model: DispModel,
        unit: &str,
        params: &[f64],
    ) -> Result<Vec<Vec<Vec<f64>>>> {
        let unit = self
            .units(system, model)?
            .into_iter()
            .find(|u| u.name == unit)
            .ok_or_else(|| RelaxError::Unknown {
                kind: "fit unit",
                name: unit.to_string(),
            })?;
        Ok(unit.target(vec![1.0; params.len()])?.back_calc(params))
    }
}

/// Set the chemical shifts of the spins from a peak list's shift column.
pub fn read_chemical_shifts(system: &mut SpinSystem, peaks: &PeakList) -> Result<usize> {
    let mut count = 0;
    for peak in &peaks.peaks {
        let Some(shift) = peak.shift else { continue };
        let index = match system.return_spin(&peak.spin_id())? {
            Some(view) => view.index,
            None => continue,
        };
        if let Some(spin) = system.spin_mut(index) {
            spin.chemical_shift = Some(shift);
            count += 1;
        }
    }
    info!(spins = count, "Read chemical shifts");
    Ok(count)
}

fn field_label(frq_hz: f64) -> String {
    format!("{:.1} MHz", frq_hz / 1e6)
}

/// A dispersion model applied to a spin or cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct DispersionUnit {
    pub name: String,
    pub spin_ids: Vec<String>,
    pub model: DispModel,
    pub exp_type: ExpType,
    pub fields: Vec<FieldPoints>,
    /// `[spin][field]`.
    pub data: Vec<Vec<SpinFieldData>>,
}

impl DispersionUnit {
    pub fn layout(&self) -> ParamLayout {
        ParamLayout::new(self.model, self.spin_ids.len(), self.fields.len())
    }

    fn target(&self, scaling: Vec<f64>) -> Result<DispersionTarget> {
        DispersionTarget::new(
            self.layout(),
            self.exp_type,
            self.fields.clone(),
            self.data.clone(),
            scaling,
        )
    }
}

impl FitUnit for DispersionUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> String {
        self.model.display_name().to_string()
    }

    fn values(&self) -> Vec<Option<f64>> {
        self.data
            .iter()
            .flatten()
            .flat_map(|d| d.values.iter().zip(&d.missing).map(|(v, m)| (!m).then_some(*v)))
            .collect()
    }

    fn errors(&self) -> Vec<f64> {
        self.data.iter().flatten().flat_map(|d| d.errors.iter().copied()).collect()
    }

    fn with_values(&self, values: &[Option<f64>]) -> Self {
        let mut unit = self.clone();
        let mut it = values.iter();
        for d in unit.data.iter_mut().flatten() {
            for (v, m) in d.values.iter_mut().zip(&d.missing) {
                if let Some(Some(new)) = it.next()
                    && !m
                {
                    *v = *new;
                }
            }
        }
        unit
    }

    fn back_calc(&self, params: &[f64]) -> Result<Vec<f64>> {
        let target = self.target(vec![1.0; self.layout().param_num()])?;
        if params.len() != target.layout().param_num() {
            return Err(RelaxError::LengthMismatch {
                what: "dispersion parameters",
                expected: target.layout().param_num(),
                found: params.len(),
            });
        }
        Ok(target.back_calc(params).into_iter().flatten().flatten().collect())
    }

    fn fit(&self, start: Option<&[f64]>, options: &FitOptions) -> Result<UnitFit> {
        let layout = self.layout();
        let slots = layout.slots().to_vec();
        let defaults: Vec<ParamDefaults> = slots.iter().map(|s| param_defaults(s.name)).collect();
        let scaling: Vec<f64> = defaults
            .iter()
            .map(|d| if options.scaling { d.scale } else { 1.0 })
            .collect();
        let target = self.target(scaling.clone())?;

        let mut constraints = LinearConstraints::new(slots.len());
        for (i, slot) in slots.iter().enumerate() {
            match slot.name {
                ParamName::Pa => {
                    constraints.push_lower(i, 0.5 / scaling[i]);
                    constraints.push_upper(i, 1.0 / scaling[i]);
                }
                _ => constraints.push_lower(i, 0.0),
            }
        }

        let mut axes = None;
        let start_params: Vec<f64> = match start {
            Some(s) => s.to_vec(),
            None => {
                if let Some(grid) = &options.grid {
                    let names: Vec<ParamName> = slots.iter().map(|s| s.name).collect();
                    let bounds: Vec<(f64, f64)> = defaults.iter().map(|d| (d.lower, d.upper)).collect();
                    axes = Some(grid_axes(&names, &bounds, &scaling, grid));
                }
                defaults.iter().map(|d| d.start).collect()
            }
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
        let layout = self.layout();
        let target = self.target(vec![1.0; layout.param_num()])?;
        let curves = target.back_calc(&fit.params);

        let params = layout
            .slots()
            .iter()
            .zip(&fit.params)
            .map(|(slot, &value)| ParamValue {
                name: slot.name,
                spin_id: match slot.name.scope() {
                    ParamScope::Global => None,
                    _ => slot.spin.map(|s| self.spin_ids[s].clone()),
                },
                field_mhz: slot.field.map(|f| self.fields[f].proton_frq_hz / 1e6),
                value,
                error: None,
            })
            .collect();

        let mut series = Vec::new();
        for (spin, spin_id) in self.spin_ids.iter().enumerate() {
            for (field, (points, d)) in self.fields.iter().zip(&self.data[spin]).enumerate() {
                series.push(CurveSeries {
                    spin_id: spin_id.clone(),
                    label: field_label(points.proton_frq_hz),
                    x: points.points_hz.clone(),
                    y: d.values.iter().zip(&d.missing).map(|(v, m)| (!m).then_some(*v)).collect(),
                    errors: d.errors.iter().zip(&d.missing).map(|(e, m)| (!m).then_some(*e)).collect(),
                    back_calc: curves[spin][field].clone(),
                });
            }
        }

        Ok(ModelFitRecord {
            unit: self.name.clone(),
            spins: self.spin_ids.clone(),
            model: self.model(),
            params,
            stats: fit.stats.clone(),
            criterion: None,
            selected: false,
            curves: series,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Isotope;
    use crate::io::Peak;
    use crate::minimise::{Algorithm, MinOptions};
    use crate::models::r2eff_cr72;

    const FRQ: f64 = 600e6;
    const T: f64 = 0.04;
    const CPMG: [f64; 6] = [50.0, 100.0, 200.0, 400.0, 700.0, 1000.0];

    fn system(n: i64) -> SpinSystem {
        let mut sys = SpinSystem::new();
        for res in 1..=n {
            sys.create_spin(None, Some(res), None, None, Some("N")).unwrap();
        }
        sys.set_isotope(Isotope::N15, None).unwrap();
        sys
    }

    fn peaks(values: &[(i64, f64)]) -> PeakList {
        PeakList {
            peaks: values
                .iter()
                .map(|&(res_num, intensity)| Peak {
                    res_num,
                    res_name: None,
                    spin_name: "N".into(),
                    shift: Some(120.0),
                    intensity,
                    line: 1,
                })
                .collect(),
            row_errors: Vec::new(),
        }
    }

    fn spectrum(id: &str, point: Option<f64>, rmsd: Option<f64>) -> DispSpectrum {
        DispSpectrum {
            id: id.into(),
            frq_hz: FRQ,
            point,
            relax_time: T,
            offset_ppm: None,
            rmsd,
        }
    }

    /// CR72 rates of a spin (pA 0.9, dw 2 ppm, kex 1500) as intensities.
    fn cr72_intensities(r20: f64) -> Vec<f64> {
        let dw = 2.0 * frequency_to_rad_per_s(FRQ, Isotope::N15);
        let mut r2eff = vec![0.0; CPMG.len()];
        r2eff_cr72(r20, r20, 0.9, dw, 1500.0, &CPMG, &mut r2eff);
        r2eff.iter().map(|r| 1e5 * (-r * T).exp()).collect()
    }

    #[test]
    fn two_point_r2eff_and_error() {
        let sys = system(1);
        let mut data = DispersionData::new(ExpType::Cpmg);
        data.add_spectrum(spectrum("ref", None, Some(100.0))).unwrap();
        data.add_spectrum(spectrum("p50", Some(50.0), Some(100.0))).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5)])).unwrap();
        data.read_intensities(&sys, "p50", &peaks(&[(1, 6e4)])).unwrap();
        assert_eq!(data.calc_r2eff(&sys).unwrap(), 1);

        let p = &data.rates.values().next().unwrap()[0];
        let expected = -(0.6f64).ln() / T;
        assert!((p.value.unwrap() - expected).abs() < 1e-12);
        let err = ((100.0f64 / 6e4).powi(2) + (100.0f64 / 1e5).powi(2)).sqrt() / T;
        assert!((p.error.unwrap() - err).abs() < 1e-12);
    }

    #[test]
    fn non_positive_intensity_is_missing() {
        let sys = system(1);
        let mut data = DispersionData::new(ExpType::Cpmg);
        data.add_spectrum(spectrum("ref", None, Some(1.0))).unwrap();
        data.add_spectrum(spectrum("a", Some(50.0), Some(1.0))).unwrap();
        data.add_spectrum(spectrum("b", Some(100.0), Some(1.0))).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5)])).unwrap();
        data.read_intensities(&sys, "a", &peaks(&[(1, -5.0)])).unwrap();
        data.read_intensities(&sys, "b", &peaks(&[(1, 5e4)])).unwrap();
        data.calc_r2eff(&sys).unwrap();

        let unit = &data.units(&sys, DispModel::NoRex).unwrap()[0];
        assert_eq!(unit.values(), vec![None, Some(-(0.5f64).ln() / T)]);
    }

    #[test]
    fn replicate_errors() {
        let sys = system(2);
        let mut data = DispersionData::new(ExpType::Cpmg);
        for (id, point) in [("ref1", None), ("ref2", None), ("p1", Some(50.0)), ("p2", Some(50.0)), ("q", Some(100.0))] {
            data.add_spectrum(spectrum(id, point, None)).unwrap();
        }
        let values = [
            ("ref1", [1000.0, 2000.0]),
            ("ref2", [1010.0, 1990.0]),
            ("p1", [800.0, 1500.0]),
            ("p2", [820.0, 1540.0]),
            ("q", [700.0, 1400.0]),
        ];
        for (id, v) in values {
            data.read_intensities(&sys, id, &peaks(&[(1, v[0]), (2, v[1])])).unwrap();
        }

        // Without replicates the RMSD is required.
        assert!(data.spectrum_errors().is_err());

        data.replicated(&["ref1".into(), "ref2".into()]).unwrap();
        data.replicated(&["p1".into(), "p2".into()]).unwrap();
        let sd_ref = 10.0 / 2f64.sqrt();
        let sd_p = (20.0 / 2f64.sqrt() + 40.0 / 2f64.sqrt()) / 2.0;
        let errors = data.spectrum_errors().unwrap();
        // "q" is not replicated, so the average applies to every spectrum.
        let average = (sd_ref + sd_p) / 2.0;
        for id in ["ref1", "p2", "q"] {
            assert!((errors[id] - average).abs() < 1e-9, "{id}: {}", errors[id]);
        }

        // Replicates must share their metadata.
        assert!(data.replicated(&["ref1".into(), "q".into()]).is_err());
    }

    #[test]
    fn cluster_layout_and_duplicates() {
        let mut sys = system(3);
        let mut data = DispersionData::new(ExpType::Cpmg);
        data.add_spectrum(spectrum("ref", None, Some(10.0))).unwrap();
        data.add_spectrum(spectrum("p", Some(100.0), Some(10.0))).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5), (2, 1e5), (3, 1e5)])).unwrap();
        data.read_intensities(&sys, "p", &peaks(&[(1, 5e4), (2, 6e4), (3, 7e4)])).unwrap();
        data.calc_r2eff(&sys).unwrap();
        data.cluster("c1", &[":1".into(), ":2".into()]).unwrap();

        let units = data.units(&sys, DispModel::Cr72).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "c1");
        assert_eq!(units[0].layout().param_num(), 6);
        assert_eq!(units[1].name, ":3@N");
        assert_eq!(units[1].layout().param_num(), 4);

        // Deselected spins drop out of their cluster.
        sys.deselect(Some(":2"), false).unwrap();
        let units = data.units(&sys, DispModel::Cr72).unwrap();
        assert_eq!(units[0].spin_ids, vec![":1@N".to_string()]);

        data.cluster("c2", &[":1".into()]).unwrap();
        assert!(data.units(&sys, DispModel::Cr72).is_err());
        assert!(data.cluster("c2", &[":3".into()]).is_err());
    }

    #[test]
    fn insignificant_spins_are_deselected() {
        let mut sys = system(2);
        let mut data = DispersionData::new(ExpType::Cpmg);
        data.add_spectrum(spectrum("ref", None, Some(10.0))).unwrap();
        data.add_spectrum(spectrum("a", Some(50.0), Some(10.0))).unwrap();
        data.add_spectrum(spectrum("b", Some(1000.0), Some(10.0))).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5), (2, 1e5)])).unwrap();
        data.read_intensities(&sys, "a", &peaks(&[(1, 5e4), (2, 7e4)])).unwrap();
        data.read_intensities(&sys, "b", &peaks(&[(1, 7e4), (2, 7.01e4)])).unwrap();
        data.calc_r2eff(&sys).unwrap();

        assert_eq!(data.insignificance(&mut sys, 1.0).unwrap(), 1);
        assert!(!sys.return_spin(":2").unwrap().unwrap().spin.select);
        assert!(sys.return_spin(":1").unwrap().unwrap().spin.select);
    }

    #[test]
    fn r1rho_models_need_r1() {
        let sys = system(1);
        let mut data = DispersionData::new(ExpType::R1rho);
        data.add_spectrum(spectrum("ref", None, Some(10.0))).unwrap();
        data.add_spectrum(spectrum("sl", Some(1000.0), Some(10.0))).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5)])).unwrap();
        data.read_intensities(&sys, "sl", &peaks(&[(1, 6e4)])).unwrap();
        data.calc_r2eff(&sys).unwrap();

        assert!(data.units(&sys, DispModel::Dpl94).is_err());
        assert!(data.units(&sys, DispModel::Cr72).is_err());
        data.set_r1(&sys, None, FRQ, 1.5).unwrap();
        let units = data.units(&sys, DispModel::Dpl94).unwrap();
        assert_eq!(units[0].data[0][0].r1, Some(1.5));
    }

    #[test]
    fn off_resonance_offsets_use_shift_and_carrier() {
        let mut sys = system(1);
        read_chemical_shifts(&mut sys, &peaks(&[(1, 0.0)])).unwrap();
        let mut data = DispersionData::new(ExpType::R1rho);
        let mut sl = spectrum("sl", Some(1000.0), Some(10.0));
        sl.offset_ppm = Some(118.0);
        data.add_spectrum(spectrum("ref", None, Some(10.0))).unwrap();
        data.add_spectrum(sl).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5)])).unwrap();
        data.read_intensities(&sys, "sl", &peaks(&[(1, 6e4)])).unwrap();
        data.calc_r2eff(&sys).unwrap();

        let unit = &data.units(&sys, DispModel::M61).unwrap()[0];
        let expected = 2.0 * frequency_to_rad_per_s(FRQ, Isotope::N15);
        assert!((unit.data[0][0].offsets[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn r2eff_model_records_measured_rates() {
        let sys = system(1);
        let mut data = DispersionData::new(ExpType::Cpmg);
        data.add_spectrum(spectrum("ref", None, Some(10.0))).unwrap();
        data.add_spectrum(spectrum("a", Some(50.0), Some(10.0))).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5)])).unwrap();
        data.read_intensities(&sys, "a", &peaks(&[(1, 5e4)])).unwrap();
        data.calc_r2eff(&sys).unwrap();

        let records = data.r2eff_records(&sys).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model, "R2eff");
        assert_eq!((records[0].stats.k, records[0].stats.n), (1, 1));
        assert!(data.minimise(&sys, DispModel::R2eff, &FitOptions::default()).is_err());
    }

    #[test]
    fn r2eff_record_of_a_cluster_covers_all_its_spins() {
        let sys = system(3);
        let mut data = DispersionData::new(ExpType::Cpmg);
        data.add_spectrum(spectrum("ref", None, Some(10.0))).unwrap();
        data.add_spectrum(spectrum("a", Some(50.0), Some(10.0))).unwrap();
        data.add_spectrum(spectrum("b", Some(100.0), Some(10.0))).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5), (2, 1e5), (3, 1e5)])).unwrap();
        data.read_intensities(&sys, "a", &peaks(&[(1, 5e4), (2, 6e4), (3, 7e4)])).unwrap();
        data.read_intensities(&sys, "b", &peaks(&[(1, 6e4), (2, 7e4), (3, 8e4)])).unwrap();
        data.calc_r2eff(&sys).unwrap();
        data.cluster("c1", &[":1".into(), ":2".into()]).unwrap();

        let records = data.r2eff_records(&sys).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].unit, "c1");
        assert_eq!(records[0].spins, vec![":1@N".to_string(), ":2@N".to_string()]);
        assert_eq!(records[0].curves.len(), 2);
        assert_eq!((records[0].stats.k, records[0].stats.n), (4, 4));
        assert_eq!(records[1].unit, ":3@N");
        assert_eq!((records[1].stats.k, records[1].stats.n), (2, 2));
    }

    #[test]
    fn cr72_fit_of_synthetic_spin() {
        let sys = system(1);
        let mut data = DispersionData::new(ExpType::Cpmg);
        data.add_spectrum(spectrum("ref", None, Some(10.0))).unwrap();
        data.read_intensities(&sys, "ref", &peaks(&[(1, 1e5)])).unwrap();
        for (nu, intensity) in CPMG.iter().zip(cr72_intensities(8.0)) {
            let id = format!("cpmg_{nu}");
            data.add_spectrum(spectrum(&id, Some(*nu), Some(10.0))).unwrap();
            data.read_intensities(&sys, &id, &peaks(&[(1, intensity)])).unwrap();
        }
        data.calc_r2eff(&sys).unwrap();

        let start = [8.5, 1.8, 0.92, 1200.0];
        let unit = data.units(&sys, DispModel::Cr72).unwrap().remove(0);
        let options = FitOptions {
            grid: None,
            min: MinOptions {
                algorithm: Algorithm::Simplex,
                ..MinOptions::default()
            },
            scaling: true,
        };
        let fit = unit.fit(Some(&start[..]), &options).unwrap();
        assert!(fit.stats.chi2 < 1e-2, "chi2 {}", fit.stats.chi2);
        assert!((fit.params[0] - 8.0).abs() < 0.1, "{:?}", fit.params);

        let record = unit.record(&fit).unwrap();
        assert_eq!(record.params.len(), 4);
        assert_eq!(record.params[0].field_mhz, Some(600.0));
        assert_eq!(record.params[3].spin_id, None);
        assert_eq!(record.curves[0].x, CPMG);
    }
}
