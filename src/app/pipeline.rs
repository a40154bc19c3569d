//! The `relax fit` workflow, shared by the CLI and the integration tests.
//!
//! sequence -> deselection -> peak intensities -> errors / rates -> fits
//! -> Monte Carlo -> model selection -> results

use chrono::Local;
use tracing::{info, warn};

use crate::domain::{AnalysisKind, DispModel, ModelFitRecord, ResultsFile};
use crate::error::{RelaxError, Result};
use crate::fit::{
    DispSpectrum, DispersionData, FitOptions, FitOutcome, FitUnit, MonteCarlo, RelaxFitData, SkippedFit,
    read_chemical_shifts, select_model,
};
use crate::io::columns::read_rows;
use crate::io::{Setup, read_deselection, read_peak_list, read_sequence};
use crate::mol::SpinSystem;
use crate::report::RunSummary;

const TOOL_NAME: &str = "relax";

/// All computed outputs of a single `relax fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub results: ResultsFile,
    pub summary: RunSummary,
    pub skipped: Vec<SkippedFit>,
}

/// Execute the analysis described by a set-up file.
///
/// `seed` overrides the Monte Carlo seed of the set-up file.
pub fn run_fit(setup: &Setup, seed: Option<u64>) -> Result<RunOutput> {
    let mut system = load_spins(setup)?;
    let options = setup.fit_options();
    let monte_carlo = monte_carlo(setup, seed)?;

    let (mut fits, skipped, x_label, y_label) = match setup.analysis.kind {
        AnalysisKind::RelaxFit => {
            let (fits, skipped) = run_relax_fit(setup, &mut system, &options, monte_carlo.as_ref())?;
            (
                fits,
                skipped,
                "Relaxation time (s)".to_string(),
                "Intensity".to_string(),
            )
        }
        AnalysisKind::Dispersion => {
            let exp_type = setup
                .analysis
                .exp_type
                .ok_or_else(|| RelaxError::Config("a dispersion analysis needs analysis.exp_type".into()))?;
            let (fits, skipped) = run_dispersion(setup, &mut system, &options, monte_carlo.as_ref())?;
            (
                fits,
                skipped,
                exp_type.point_label().to_string(),
                exp_type.rate_label().to_string(),
            )
        }
    };

    if fits.is_empty() {
        return Err(RelaxError::Optimisation("no model could be fitted to any spin".to_string()));
    }
    if let Some(method) = setup.analysis.selection {
        let units = select_model(&mut fits, method);
        info!(units, method = method.display_name(), "Model selection finished");
    }

    let summary = RunSummary {
        title: match setup.analysis.kind {
            AnalysisKind::RelaxFit => format!("Relaxation curve fitting ({})", setup.analysis.curve_type.display_name()),
            AnalysisKind::Dispersion => match setup.analysis.exp_type {
                Some(exp_type) => format!("Relaxation dispersion ({})", exp_type.display_name()),
                None => "Relaxation dispersion".to_string(),
            },
        },
        total_spins: system.count_spins(None, false)?,
        selected_spins: system.count_spins(None, true)?,
        spectra: setup.spectra.len(),
        clusters: setup.clusters.len(),
        models: model_names(setup),
        selection: setup.analysis.selection,
        monte_carlo_sims: monte_carlo.as_ref().map_or(0, |mc| mc.number),
    };

    let results = ResultsFile {
        tool: TOOL_NAME.to_string(),
        created: Local::now(),
        analysis: setup.analysis.kind,
        x_label,
        y_label,
        selection_method: setup.analysis.selection,
        monte_carlo_sims: summary.monte_carlo_sims,
        fits,
    };

    Ok(RunOutput {
        results,
        summary,
        skipped,
    })
}

fn model_names(setup: &Setup) -> Vec<String> {
    match setup.analysis.kind {
        AnalysisKind::RelaxFit => vec![setup.analysis.curve_type.display_name().to_string()],
        AnalysisKind::Dispersion => setup.analysis.models.clone(),
    }
}

/// Sequence, spin names, isotopes and deselections.
fn load_spins(setup: &Setup) -> Result<SpinSystem> {
    let mut system = SpinSystem::new();
    let created = read_sequence(&mut system, &setup.sequence.file, &setup.sequence.columns)?;
    info!(spins = created, file = %setup.sequence.file.display(), "Read sequence");

    if let Some(name) = &setup.sequence.spin_name {
        system.name_spins(name, None)?;
    }
    if let Some(isotope) = setup.sequence.isotope()? {
        system.set_isotope(isotope, None)?;
    }

    for d in &setup.deselect.files {
        let n = read_deselection(&mut system, &d.file, d.column, d.sep)?;
        info!(spins = n, file = %d.file.display(), "Deselected spins from file");
    }
    for id in &setup.deselect.ids {
        let n = system.deselect(Some(id.as_str()), false)?;
        if n == 0 {
            warn!(selection = %id, "Deselection matched no spins");
        }
    }
    Ok(system)
}

fn monte_carlo(setup: &Setup, seed: Option<u64>) -> Result<Option<MonteCarlo>> {
    let Some(section) = &setup.monte_carlo else {
        return Ok(None);
    };
    let seed = seed.or(section.seed).unwrap_or_default();
    let mc = MonteCarlo::setup(section.number, seed)?
        .with_method(section.method)
        .with_prune(section.prune)?;
    Ok(Some(mc))
}

/// Records of a fit outcome, with Monte Carlo errors when requested.
fn records<U: FitUnit>(
    outcome: &FitOutcome<U>,
    options: &FitOptions,
    monte_carlo: Option<&MonteCarlo>,
) -> Result<Vec<ModelFitRecord>> {
    match monte_carlo {
        Some(mc) => mc.run(outcome, options),
        None => outcome.records(),
    }
}

fn run_relax_fit(
    setup: &Setup,
    system: &mut SpinSystem,
    options: &FitOptions,
    monte_carlo: Option<&MonteCarlo>,
) -> Result<(Vec<ModelFitRecord>, Vec<SkippedFit>)> {
    let mut data = RelaxFitData::new(setup.analysis.curve_type);
    for s in &setup.spectra {
        let time = s
            .time
            .ok_or_else(|| RelaxError::Config(format!("the spectrum '{}' has no relaxation time", s.id)))?;
        data.add_spectrum(&s.id, time, s.rmsd)?;
        let peaks = read_peak_list(&s.file, &s.format)?;
        let n = data.read_intensities(system, &s.id, &peaks)?;
        info!(spectrum = %s.id, time, spins = n, "Read peak intensities");
    }

    data.overfit_deselect(system)?;
    data.mean_and_error(system)?;

    let outcome = data.minimise(system, options)?;
    let fits = records(&outcome, options, monte_carlo)?;
    Ok((fits, outcome.skipped))
}

fn run_dispersion(
    setup: &Setup,
    system: &mut SpinSystem,
    options: &FitOptions,
    monte_carlo: Option<&MonteCarlo>,
) -> Result<(Vec<ModelFitRecord>, Vec<SkippedFit>)> {
    let exp_type = setup
        .analysis
        .exp_type
        .ok_or_else(|| RelaxError::Config("a dispersion analysis needs analysis.exp_type".into()))?;
    let mut data = DispersionData::new(exp_type);

    for s in &setup.spectra {
        let (Some(frq_mhz), Some(relax_time)) = (s.frq_mhz, s.time) else {
            return Err(RelaxError::Config(format!(
                "the spectrum '{}' needs both frq_mhz and time",
                s.id
            )));
        };
        data.add_spectrum(DispSpectrum {
            id: s.id.clone(),
            frq_hz: frq_mhz * 1e6,
            point: s.point,
            relax_time,
            offset_ppm: s.offset_ppm,
            rmsd: s.rmsd,
        })?;
        let peaks = read_peak_list(&s.file, &s.format)?;
        let n = data.read_intensities(system, &s.id, &peaks)?;
        info!(spectrum = %s.id, spins = n, "Read peak intensities");
    }
    for group in &setup.replicates {
        data.replicated(group)?;
    }
    if !setup.spectra.is_empty() {
        data.calc_r2eff(system)?;
    }
    for r in &setup.r2eff {
        data.r2eff_read(system, &r.file, r.frq_mhz * 1e6, r.relax_time, r.offset_ppm, r.sep)?;
    }

    for r1 in &setup.r1 {
        let frq_hz = r1.frq_mhz * 1e6;
        if let Some(value) = r1.value {
            data.set_r1(system, None, frq_hz, value)?;
        }
        if let Some(path) = &r1.file {
            for row in read_rows(path, None)? {
                let parsed = row
                    .get(0)
                    .ok_or_else(|| "missing spin ID column".to_string())
                    .and_then(|id| Ok((id.to_string(), row.parse::<f64>(1, "R1")?)));
                let (spin_id, value) = parsed.map_err(|message| RelaxError::Parse {
                    path: path.clone(),
                    line: row.line,
                    message,
                })?;
                if data.set_r1(system, Some(spin_id.as_str()), frq_hz, value)? == 0 {
                    warn!(file = %path.display(), spin = %spin_id, "No spin matches the R1 value, skipping");
                }
            }
        }
    }

    for s in &setup.shifts {
        let peaks = read_peak_list(&s.file, &s.format)?;
        let n = read_chemical_shifts(system, &peaks)?;
        info!(file = %s.file.display(), spins = n, "Read chemical shifts");
    }
    for (name, ids) in &setup.clusters {
        data.cluster(name, ids)?;
    }
    if let Some(level) = setup.insignificance {
        data.insignificance(system, level)?;
    }

    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    for model in setup.analysis.disp_models()? {
        if model == DispModel::R2eff {
            fits.extend(data.r2eff_records(system)?);
            continue;
        }
        let outcome = data.minimise(system, model, options)?;
        fits.extend(records(&outcome, options, monte_carlo)?);
        skipped.extend(outcome.skipped);
    }
    Ok((fits, skipped))
}
