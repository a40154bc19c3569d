//! Experiment set-up files (TOML).
//!
//! A set-up file replaces the script that would otherwise drive an analysis.
//! It names the input files and every analysis option, for example:
//!
//! ```toml
//! insignificance = 1.0
//! replicates = [["ref_a", "ref_b"]]
//!
//! [analysis]
//! kind = "dispersion"
//! exp_type = "cpmg"
//! models = ["R2eff", "No Rex", "CR72"]
//!
//! [sequence]
//! file = "seq.txt"
//! isotope = "15N"
//!
//! [[spectra]]
//! id = "ref_a"
//! file = "ref_a.list"
//! frq_mhz = 600.0
//! time = 0.04
//! ```
//!
//! Relative paths are resolved against the directory holding the set-up file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::domain::{AnalysisKind, CurveType, DispModel, ExpType, Isotope, McMethod, SelectionMethod};
use crate::error::{RelaxError, Result};
use crate::fit::{FitOptions, GridOptions};
use crate::io::peaks::PeakFormat;
use crate::io::sequence::SequenceColumns;
use crate::minimise::{Algorithm, MinOptions};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Setup {
    pub analysis: AnalysisSection,
    pub sequence: SequenceSection,
    #[serde(default)]
    pub spectra: Vec<SpectrumEntry>,
    /// Groups of replicated spectrum IDs.
    #[serde(default)]
    pub replicates: Vec<Vec<String>>,
    #[serde(default)]
    pub deselect: DeselectSection,
    /// Named clusters of spin IDs.
    #[serde(default)]
    pub clusters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub r1: Vec<R1Entry>,
    #[serde(default)]
    pub shifts: Vec<ShiftEntry>,
    /// Pre-computed R2eff / R1rho files.
    #[serde(default)]
    pub r2eff: Vec<R2effEntry>,
    #[serde(default)]
    pub grid: GridOptions,
    #[serde(default)]
    pub minimise: MinimiseSection,
    pub monte_carlo: Option<MonteCarloSection>,
    /// Deselect spins whose dispersion range is below this value (rad/s).
    pub insignificance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisSection {
    pub kind: AnalysisKind,
    #[serde(default)]
    pub curve_type: CurveType,
    pub exp_type: Option<ExpType>,
    /// Dispersion models, by name.
    #[serde(default)]
    pub models: Vec<String>,
    pub selection: Option<SelectionMethod>,
}

impl AnalysisSection {
    pub fn disp_models(&self) -> Result<Vec<DispModel>> {
        self.models.iter().map(|m| m.parse()).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceSection {
    pub file: PathBuf,
    #[serde(default)]
    pub columns: SequenceColumns,
    /// Isotope given to every spin, for example `15N`.
    pub isotope: Option<String>,
    /// Name given to every spin, for example `N`.
    pub spin_name: Option<String>,
}

impl SequenceSection {
    pub fn isotope(&self) -> Result<Option<Isotope>> {
        self.isotope.as_deref().map(str::parse).transpose()
    }
}

/// One peak list and its acquisition metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpectrumEntry {
    pub id: String,
    pub file: PathBuf,
    #[serde(default)]
    pub format: PeakFormat,
    /// Relaxation delay, or the constant relaxation time of a dispersion experiment (s).
    pub time: Option<f64>,
    /// Proton frequency of the spectrometer (MHz).
    pub frq_mhz: Option<f64>,
    /// CPMG frequency or spin-lock field (Hz). Absent for reference spectra.
    pub point: Option<f64>,
    /// Spin-lock offset (ppm).
    pub offset_ppm: Option<f64>,
    /// Baseplane noise of the spectrum.
    pub rmsd: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeselectSection {
    #[serde(default)]
    pub files: Vec<DeselectFile>,
    /// Spin identification strings.
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeselectFile {
    pub file: PathBuf,
    #[serde(default)]
    pub column: usize,
    pub sep: Option<char>,
}

/// R1 values at one field: a file of `spin_id value` rows, or one value for all spins.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct R1Entry {
    pub frq_mhz: f64,
    pub file: Option<PathBuf>,
    pub value: Option<f64>,
}

/// Chemical shifts read from the shift column of a peak list.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShiftEntry {
    pub file: PathBuf,
    #[serde(default)]
    pub format: PeakFormat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct R2effEntry {
    pub file: PathBuf,
    pub frq_mhz: f64,
    pub relax_time: Option<f64>,
    pub offset_ppm: Option<f64>,
    pub sep: Option<char>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinimiseSection {
    pub algorithm: Algorithm,
    pub func_tol: f64,
    pub grad_tol: Option<f64>,
    pub max_iterations: usize,
    pub constraints: bool,
    pub scaling: bool,
    /// Run the grid search before the local optimiser.
    pub grid_search: bool,
}

impl Default for MinimiseSection {
    fn default() -> Self {
        let min = MinOptions::default();
        Self {
            algorithm: min.algorithm,
            func_tol: min.func_tol,
            grad_tol: min.grad_tol,
            max_iterations: min.max_iterations,
            constraints: min.constraints,
            scaling: true,
            grid_search: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonteCarloSection {
    pub number: usize,
    pub seed: Option<u64>,
    pub method: McMethod,
    /// Fraction of simulations pruned from the chi-squared tails.
    pub prune: f64,
}

impl Default for MonteCarloSection {
    fn default() -> Self {
        Self {
            number: 500,
            seed: None,
            method: McMethod::BackCalc,
            prune: 0.0,
        }
    }
}

impl Setup {
    /// Read, resolve and validate a set-up file.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(file = %path.display(), "Loading experiment set-up");
        let text = std::fs::read_to_string(path).map_err(|e| RelaxError::io(path, e))?;
        let mut setup: Setup = toml::from_str(&text)
            .map_err(|e| RelaxError::Config(format!("'{}': {e}", path.display())))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        setup.resolve_paths(base);
        setup.validate()?;
        Ok(setup)
    }

    pub fn fit_options(&self) -> FitOptions {
        let m = &self.minimise;
        FitOptions {
            grid: m.grid_search.then(|| self.grid.clone()),
            min: MinOptions {
                algorithm: m.algorithm,
                func_tol: m.func_tol,
                grad_tol: m.grad_tol,
                max_iterations: m.max_iterations,
                constraints: m.constraints,
            },
            scaling: m.scaling,
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.sequence.file);
        self.spectra.iter_mut().for_each(|s| resolve(&mut s.file));
        self.deselect.files.iter_mut().for_each(|d| resolve(&mut d.file));
        self.r1.iter_mut().filter_map(|r| r.file.as_mut()).for_each(resolve);
        self.shifts.iter_mut().for_each(|s| resolve(&mut s.file));
        self.r2eff.iter_mut().for_each(|r| resolve(&mut r.file));
    }

    fn validate(&self) -> Result<()> {
        let config = |msg: String| Err(RelaxError::Config(msg));

        let mut ids = HashSet::new();
        for s in &self.spectra {
            if !ids.insert(s.id.as_str()) {
                return config(format!("the spectrum ID '{}' is used more than once", s.id));
            }
        }
        for id in self.replicates.iter().flatten() {
            if !ids.contains(id.as_str()) {
                return config(format!("the replicated spectrum '{id}' is not defined"));
            }
        }
        if let Some(mc) = &self.monte_carlo
            && !(0.0..1.0).contains(&mc.prune)
        {
            return config(format!("the Monte Carlo prune fraction {} must lie in [0, 1)", mc.prune));
        }
        self.sequence.isotope()?;

        match self.analysis.kind {
            AnalysisKind::RelaxFit => {
                if self.spectra.is_empty() {
                    return config("a relaxation curve analysis needs [[spectra]] entries".into());
                }
                if let Some(s) = self.spectra.iter().find(|s| s.time.is_none()) {
                    return config(format!("the spectrum '{}' has no relaxation time", s.id));
                }
            }
            AnalysisKind::Dispersion => {
                let Some(exp_type) = self.analysis.exp_type else {
                    return config("a dispersion analysis needs analysis.exp_type".into());
                };
                let models = self.analysis.disp_models()?;
                if models.is_empty() {
                    return config("a dispersion analysis needs at least one model".into());
                }
                if let Some(m) = models.iter().find(|m| !m.is_compatible(exp_type)) {
                    return config(format!(
                        "the {m} model does not apply to {} data",
                        exp_type.display_name()
                    ));
                }
                if self.spectra.is_empty() && self.r2eff.is_empty() {
                    return config("a dispersion analysis needs [[spectra]] or [[r2eff]] entries".into());
                }
                for s in &self.spectra {
                    if s.frq_mhz.is_none() || s.time.is_none() {
                        return config(format!(
                            "the spectrum '{}' needs both frq_mhz and time",
                            s.id
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISPERSION: &str = r#"
insignificance = 0.5
replicates = [["ref_a", "ref_b"]]

[analysis]
kind = "dispersion"
exp_type = "cpmg"
models = ["R2eff", "no rex", "CR72"]
selection = "AICc"

[sequence]
file = "seq.txt"
isotope = "15N"
spin_name = "N"

[[spectra]]
id = "ref_a"
file = "ref_a.list"
frq_mhz = 600.0
time = 0.04

[[spectra]]
id = "ref_b"
file = "/data/ref_b.list"
frq_mhz = 600.0
time = 0.04

[[spectra]]
id = "cpmg_50"
file = "cpmg_50.list"
format = { type = "generic", res_num_col = 0, spin_name_col = 1, int_col = 3 }
frq_mhz = 600.0
time = 0.04
point = 50.0

[clusters]
slow = [":10", ":11"]

[grid]
inc = 5

[minimise]
algorithm = "cg"
grid_search = false

[monte_carlo]
number = 100
seed = 7
"#;

    fn write(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("setup.toml");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn dispersion_setup_loads_and_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let setup = Setup::load(&write(dir.path(), DISPERSION)).unwrap();

        assert_eq!(setup.analysis.kind, AnalysisKind::Dispersion);
        assert_eq!(
            setup.analysis.disp_models().unwrap(),
            vec![DispModel::R2eff, DispModel::NoRex, DispModel::Cr72]
        );
        assert_eq!(setup.sequence.file, dir.path().join("seq.txt"));
        assert_eq!(setup.spectra[1].file, PathBuf::from("/data/ref_b.list"));
        assert_eq!(setup.sequence.isotope().unwrap(), Some(Isotope::N15));
        assert!(matches!(setup.spectra[2].format, PeakFormat::Generic(c) if c.int_col == 3));
        assert_eq!(setup.clusters["slow"].len(), 2);

        let options = setup.fit_options();
        assert!(options.grid.is_none());
        assert_eq!(options.min.algorithm, Algorithm::Cg);
        let mc = setup.monte_carlo.unwrap();
        assert_eq!((mc.number, mc.seed, mc.prune), (100, Some(7), 0.0));
    }

    #[test]
    fn unknown_replicate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text = DISPERSION.replace("[[\"ref_a\", \"ref_b\"]]", "[[\"ref_a\", \"nope\"]]");
        let err = Setup::load(&write(dir.path(), &text)).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn incompatible_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text = DISPERSION.replace("\"CR72\"]", "\"M61\"]");
        assert!(Setup::load(&write(dir.path(), &text)).is_err());
    }

    #[test]
    fn relax_fit_needs_times() {
        let dir = tempfile::tempdir().unwrap();
        let text = r#"
[analysis]
kind = "relax-fit"
curve_type = "inv"

[sequence]
file = "seq.txt"

[[spectra]]
id = "t1"
file = "t1.list"
"#;
        let err = Setup::load(&write(dir.path(), text)).unwrap_err();
        assert!(matches!(err, RelaxError::Config(_)));

        let ok = text.replace("file = \"t1.list\"", "file = \"t1.list\"\ntime = 0.01");
        let setup = Setup::load(&write(dir.path(), &ok)).unwrap();
        assert_eq!(setup.analysis.curve_type, CurveType::Inv);
        assert!(setup.fit_options().grid.is_some());
        assert!(setup.monte_carlo.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text = DISPERSION.replace("[grid]\ninc = 5", "[grid]\ninc = 5\n\n[bogus]\nx = 1");
        assert!(Setup::load(&write(dir.path(), &text)).is_err());
    }
}
